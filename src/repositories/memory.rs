//! In-memory entitlement store, used by tests and `--in-memory` runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{EntitlementStore, StoreError, StoreResult};
use crate::entitlement::{self, Grant, Subscription};
use crate::models::{
    users::{AdminIdentity, User, UserId},
    vouchers::Voucher,
};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    vouchers: HashMap<String, Voucher>,
}

pub struct MemoryEntitlementStore {
    admin: AdminIdentity,
    state: RwLock<State>,
}

impl MemoryEntitlementStore {
    pub fn new(admin: AdminIdentity) -> Self {
        Self {
            admin,
            state: RwLock::new(State::default()),
        }
    }

    /// Replaces a stored user wholesale.
    #[cfg(test)]
    pub async fn put_user(&self, user: User) {
        self.state.write().await.users.insert(user.user_id, user);
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn upsert_user(&self, id: UserId, username: Option<&str>) -> StoreResult<User> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .entry(id)
            .and_modify(|user| user.username = username.map(str::to_string))
            .or_insert_with(|| User::new(id, username.map(str::to_string)));

        Ok(user.clone())
    }

    async fn set_subscription(
        &self,
        id: UserId,
        expires_at: DateTime<Utc>,
        subscribed: bool,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::user_not_found(id))?;

        user.subscription_expires = Some(entitlement::format_expiry(expires_at));
        user.is_subscribed = subscribed;
        Ok(())
    }

    async fn grant_subscription(
        &self,
        id: UserId,
        grant: Grant,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::user_not_found(id))?;

        let subscription = entitlement::apply(user.subscription_expires.as_deref(), grant, now);
        user.subscription_expires = Some(subscription.expiry_string());
        user.is_subscribed = subscription.subscribed;

        Ok(subscription)
    }

    async fn expire_subscription(&self, id: UserId, now: DateTime<Utc>) -> StoreResult<bool> {
        if self.admin.is_admin(id) {
            return Ok(false);
        }

        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::user_not_found(id))?;

        if !user.is_subscribed
            || !entitlement::is_lapsed(user.subscription_expires.as_deref(), now)
        {
            return Ok(false);
        }

        let revoked = entitlement::apply(None, Grant::Revoke, now);
        user.subscription_expires = Some(revoked.expiry_string());
        user.is_subscribed = revoked.subscribed;

        Ok(true)
    }

    async fn set_subject(&self, id: UserId, subject: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::user_not_found(id))?;

        user.selected_asset = Some(subject.to_string());
        Ok(())
    }

    async fn list_entitled_users(&self, as_of: DateTime<Utc>) -> StoreResult<Vec<User>> {
        let as_of = entitlement::format_expiry(as_of);
        let state = self.state.read().await;

        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|user| {
                self.admin.is_admin(user.user_id)
                    || (user.is_subscribed
                        && user
                            .subscription_expires
                            .as_deref()
                            .is_some_and(|expiry| expiry > as_of.as_str()))
            })
            .cloned()
            .collect();
        users.sort_by_key(|user| user.user_id);

        Ok(users)
    }

    async fn list_subscribed_users(&self) -> StoreResult<Vec<User>> {
        let state = self.state.read().await;

        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|user| user.is_subscribed || self.admin.is_admin(user.user_id))
            .cloned()
            .collect();
        users.sort_by_key(|user| user.user_id);

        Ok(users)
    }

    async fn insert_voucher(&self, voucher: &Voucher) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.vouchers.contains_key(&voucher.code) {
            return Ok(false);
        }

        state.vouchers.insert(voucher.code.clone(), voucher.clone());
        Ok(true)
    }

    async fn get_voucher(&self, code: &str) -> StoreResult<Option<Voucher>> {
        Ok(self.state.read().await.vouchers.get(code).cloned())
    }

    async fn redeem_voucher(&self, code: &str) -> StoreResult<Option<u32>> {
        let mut state = self.state.write().await;

        match state.vouchers.get_mut(code) {
            Some(voucher) if !voucher.is_used => {
                voucher.is_used = true;
                Ok(Some(u32::try_from(voucher.days).unwrap_or(0)))
            }
            _ => Ok(None),
        }
    }

    async fn revoke_voucher(&self, code: &str) -> StoreResult<()> {
        if let Some(voucher) = self.state.write().await.vouchers.get_mut(code) {
            voucher.is_used = true;
        }
        Ok(())
    }
}
