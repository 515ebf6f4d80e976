use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use super::{
    users::UserRepository, vouchers::VoucherRepository, EntitlementStore, StoreResult,
};
use crate::entitlement::{Grant, Subscription};
use crate::models::{
    users::{AdminIdentity, User, UserId},
    vouchers::Voucher,
};

#[derive(Clone)]
pub struct PgEntitlementStore {
    users: UserRepository,
    vouchers: VoucherRepository,
}

impl PgEntitlementStore {
    pub fn new(conn: PgPool, admin: AdminIdentity) -> Self {
        Self {
            users: UserRepository::new(conn.clone(), admin),
            vouchers: VoucherRepository::new(conn),
        }
    }

    /// Connects and applies pending migrations.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        admin: AdminIdentity,
    ) -> StoreResult<Self> {
        let conn = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        sqlx::migrate!("./migrations").run(&conn).await?;
        log::info!("Database migrations applied.");

        Ok(Self::new(conn, admin))
    }
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.users.get_user_by_id(id).await
    }

    async fn upsert_user(&self, id: UserId, username: Option<&str>) -> StoreResult<User> {
        self.users.upsert_user(id, username).await
    }

    async fn set_subscription(
        &self,
        id: UserId,
        expires_at: DateTime<Utc>,
        subscribed: bool,
    ) -> StoreResult<()> {
        self.users
            .set_subscription(id, expires_at, subscribed)
            .await
    }

    async fn grant_subscription(
        &self,
        id: UserId,
        grant: Grant,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        self.users.grant_subscription(id, grant, now).await
    }

    async fn expire_subscription(&self, id: UserId, now: DateTime<Utc>) -> StoreResult<bool> {
        self.users.expire_subscription(id, now).await
    }

    async fn set_subject(&self, id: UserId, subject: &str) -> StoreResult<()> {
        self.users.set_subject(id, subject).await
    }

    async fn list_entitled_users(&self, as_of: DateTime<Utc>) -> StoreResult<Vec<User>> {
        self.users.list_entitled_users(as_of).await
    }

    async fn list_subscribed_users(&self) -> StoreResult<Vec<User>> {
        self.users.list_subscribed_users().await
    }

    async fn insert_voucher(&self, voucher: &Voucher) -> StoreResult<bool> {
        self.vouchers.insert_voucher(voucher).await
    }

    async fn get_voucher(&self, code: &str) -> StoreResult<Option<Voucher>> {
        self.vouchers.get_voucher(code).await
    }

    async fn redeem_voucher(&self, code: &str) -> StoreResult<Option<u32>> {
        self.vouchers.redeem_voucher(code).await
    }

    async fn revoke_voucher(&self, code: &str) -> StoreResult<()> {
        self.vouchers.revoke_voucher(code).await
    }
}
