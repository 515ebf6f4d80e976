use serde::{Deserialize, Serialize};

pub type UserId = i64;

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub user_id: UserId,
    pub username: Option<String>,
    pub is_subscribed: bool,
    pub subscription_expires: Option<String>,
    pub selected_asset: Option<String>,
    pub initial_balance: f64,
    pub current_profit: f64,
}

impl User {
    pub fn new(user_id: UserId, username: Option<String>) -> Self {
        Self {
            user_id,
            username,
            is_subscribed: false,
            subscription_expires: None,
            selected_asset: None,
            initial_balance: 1000.0,
            current_profit: 0.0,
        }
    }

    pub fn subject(&self) -> Option<&str> {
        self.selected_asset
            .as_deref()
            .filter(|subject| !subject.is_empty())
    }

    pub fn total_balance(&self) -> f64 {
        self.initial_balance + self.current_profit
    }
}

/// The single configured administrator. Admin status is always derived from
/// this identity and never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdminIdentity(UserId);

impl AdminIdentity {
    pub fn new(user_id: UserId) -> Self {
        Self(user_id)
    }

    pub fn id(&self) -> UserId {
        self.0
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.0 == user_id
    }
}

#[derive(Clone, Debug)]
pub struct UserStatus {
    pub user: User,
    pub is_admin: bool,
}

impl UserStatus {
    pub fn is_active(&self) -> bool {
        self.is_admin || self.user.is_subscribed
    }
}
