use crate::entitlement::{self, Grant, Subscription};
use crate::models::users::{AdminIdentity, User, UserId};

use super::{StoreError, StoreResult};

use chrono::{DateTime, Utc};
use sqlx::PgPool;

const USER_COLUMNS: &str = "user_id, username, is_subscribed, subscription_expires, \
     selected_asset, initial_balance, current_profit";

#[derive(Clone)]
pub struct UserRepository {
    conn: PgPool,
    admin: AdminIdentity,
}

impl UserRepository {
    pub fn new(conn: PgPool, admin: AdminIdentity) -> Self {
        Self { conn, admin }
    }

    pub async fn get_user_by_id(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(user)
    }

    pub async fn upsert_user(&self, user_id: UserId, username: Option<&str>) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
                INSERT INTO users (user_id, username)
                VALUES ($1, $2)
                ON CONFLICT (user_id)
                DO UPDATE SET username = EXCLUDED.username, updated_at = CURRENT_TIMESTAMP
                RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(username)
        .fetch_one(&self.conn)
        .await?;

        Ok(user)
    }

    pub async fn set_subscription(
        &self,
        user_id: UserId,
        expires_at: DateTime<Utc>,
        subscribed: bool,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET is_subscribed = $2, subscription_expires = $3, updated_at = CURRENT_TIMESTAMP WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(subscribed)
        .bind(entitlement::format_expiry(expires_at))
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::user_not_found(user_id));
        }

        Ok(())
    }

    pub async fn grant_subscription(
        &self,
        user_id: UserId,
        grant: Grant,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        let mut tx = self.conn.begin().await?;

        let current: Option<Option<String>> = sqlx::query_scalar(
            "SELECT subscription_expires FROM users WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Err(StoreError::user_not_found(user_id));
        };

        let subscription = entitlement::apply(current.as_deref(), grant, now);

        sqlx::query(
            "UPDATE users SET is_subscribed = $2, subscription_expires = $3, updated_at = CURRENT_TIMESTAMP WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(subscription.subscribed)
        .bind(subscription.expiry_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(subscription)
    }

    pub async fn expire_subscription(&self, user_id: UserId, now: DateTime<Utc>) -> StoreResult<bool> {
        if self.admin.is_admin(user_id) {
            return Ok(false);
        }

        let mut tx = self.conn.begin().await?;

        let row: Option<(bool, Option<String>)> = sqlx::query_as(
            "SELECT is_subscribed, subscription_expires FROM users WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((is_subscribed, expires)) = row else {
            return Err(StoreError::user_not_found(user_id));
        };

        if !is_subscribed || !entitlement::is_lapsed(expires.as_deref(), now) {
            return Ok(false);
        }

        let revoked = entitlement::apply(None, Grant::Revoke, now);

        sqlx::query(
            "UPDATE users SET is_subscribed = $2, subscription_expires = $3, updated_at = CURRENT_TIMESTAMP WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(revoked.subscribed)
        .bind(revoked.expiry_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(true)
    }

    pub async fn set_subject(&self, user_id: UserId, subject: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET selected_asset = $2, updated_at = CURRENT_TIMESTAMP WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(subject)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::user_not_found(user_id));
        }

        Ok(())
    }

    pub async fn list_entitled_users(&self, as_of: DateTime<Utc>) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"
                SELECT {USER_COLUMNS} FROM users
                WHERE (is_subscribed AND subscription_expires > $1) OR user_id = $2
                ORDER BY user_id
            "#
        ))
        .bind(entitlement::format_expiry(as_of))
        .bind(self.admin.id())
        .fetch_all(&self.conn)
        .await?;

        Ok(users)
    }

    pub async fn list_subscribed_users(&self) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_subscribed OR user_id = $1 ORDER BY user_id"
        ))
        .bind(self.admin.id())
        .fetch_all(&self.conn)
        .await?;

        Ok(users)
    }
}
