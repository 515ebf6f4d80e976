use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entitlement::{Grant, Subscription};
use crate::models::{
    users::{User, UserId},
    vouchers::Voucher,
};

pub mod advisory;
pub mod memory;
pub mod postgres;
pub mod telegram;
mod users;
mod vouchers;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn user_not_found(id: UserId) -> Self {
        Self::NotFound {
            entity: "User",
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable record of users, their entitlement state and voucher codes.
///
/// `grant_subscription`, `expire_subscription` and `redeem_voucher` are atomic
/// check-and-set operations; implementations must not split them into a read
/// followed by an unguarded write.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Creates the user on first contact, refreshes the display name otherwise.
    async fn upsert_user(&self, id: UserId, username: Option<&str>) -> StoreResult<User>;

    async fn set_subscription(
        &self,
        id: UserId,
        expires_at: DateTime<Utc>,
        subscribed: bool,
    ) -> StoreResult<()>;

    /// Applies `grant` to the user's stored expiry in one transaction.
    async fn grant_subscription(
        &self,
        id: UserId,
        grant: Grant,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription>;

    /// Revokes a non-admin subscription whose stored expiry has lapsed at `now`.
    /// Returns false when the user is no longer lapsed, e.g. after a
    /// concurrent redemption.
    async fn expire_subscription(&self, id: UserId, now: DateTime<Utc>) -> StoreResult<bool>;

    async fn set_subject(&self, id: UserId, subject: &str) -> StoreResult<()>;

    /// Users entitled at `as_of`: subscribed with a future expiry, or the admin.
    async fn list_entitled_users(&self, as_of: DateTime<Utc>) -> StoreResult<Vec<User>>;

    /// Users still holding the subscribed flag, plus the admin. Sweep candidates.
    async fn list_subscribed_users(&self) -> StoreResult<Vec<User>>;

    /// Returns false if the code already exists.
    async fn insert_voucher(&self, voucher: &Voucher) -> StoreResult<bool>;

    async fn get_voucher(&self, code: &str) -> StoreResult<Option<Voucher>>;

    /// Marks an unused voucher as used and returns its duration in days.
    async fn redeem_voucher(&self, code: &str) -> StoreResult<Option<u32>>;

    /// Marks the voucher used. Unknown codes are ignored.
    async fn revoke_voucher(&self, code: &str) -> StoreResult<()>;
}
