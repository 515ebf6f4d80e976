use chrono::{DateTime, Utc};

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Voucher {
    pub code: String,
    pub days: i32,
    pub created_at: DateTime<Utc>,
    pub is_used: bool,
}

impl Voucher {
    pub fn new(code: String, days: i32, created_at: DateTime<Utc>) -> Self {
        Self {
            code,
            days,
            created_at,
            is_used: false,
        }
    }
}

/// Codes are case-insensitive; everything is stored and compared uppercase.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
