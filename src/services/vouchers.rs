use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::ServiceError;
use crate::entitlement::PERMANENT_DAYS;
use crate::models::vouchers::{normalize_code, Voucher};
use crate::repositories::EntitlementStore;

/// 12 hex characters of a v4 uuid, retried on the (unlikely) collision.
const CODE_LENGTH: usize = 12;
const MINT_ATTEMPTS: usize = 5;
pub const MAX_VOUCHER_DAYS: u32 = PERMANENT_DAYS as u32;

#[derive(Clone)]
pub struct VoucherLedger {
    store: Arc<dyn EntitlementStore>,
}

impl VoucherLedger {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    pub async fn mint(&self, days: u32) -> Result<String, ServiceError> {
        let stored_days = match i32::try_from(days) {
            Ok(stored) if (1..=MAX_VOUCHER_DAYS).contains(&days) => stored,
            _ => {
                return Err(ServiceError::InvalidInput(format!(
                    "Voucher duration must be between 1 and {} days.",
                    MAX_VOUCHER_DAYS
                )))
            }
        };

        for _ in 0..MINT_ATTEMPTS {
            let code = generate_code();
            let voucher = Voucher::new(code.clone(), stored_days, Utc::now());

            let inserted = self
                .store
                .insert_voucher(&voucher)
                .await
                .map_err(|e| ServiceError::Repository("Vouchers".to_string(), e.to_string()))?;

            if inserted {
                log::info!("Minted {}-day voucher {}.", days, code);
                return Ok(code);
            }

            log::warn!("Voucher code collision on {}, retrying.", code);
        }

        Err(ServiceError::Internal(
            "Could not generate a unique voucher code.".to_string(),
        ))
    }

    /// Consumes the voucher and returns its duration in days. Unknown and
    /// already used codes are both `NotFound`.
    pub async fn redeem(&self, code: &str) -> Result<u32, ServiceError> {
        let code = normalize_code(code);

        let days = self
            .store
            .redeem_voucher(&code)
            .await
            .map_err(|e| ServiceError::Repository("Vouchers".to_string(), e.to_string()))?;

        match days {
            Some(days) if !(1..=MAX_VOUCHER_DAYS).contains(&days) => {
                log::warn!("Voucher {} carried an invalid duration of {} days.", code, days);
                Err(ServiceError::InvalidInput(format!(
                    "Voucher {} does not carry a valid duration.",
                    code
                )))
            }
            Some(days) => {
                log::info!("Voucher {} redeemed for {} days.", code, days);
                Ok(days)
            }
            None => Err(ServiceError::NotFound(format!("Voucher {}", code))),
        }
    }

    /// Marks the voucher as used. Unknown codes are ignored.
    pub async fn revoke(&self, code: &str) -> Result<(), ServiceError> {
        let code = normalize_code(code);

        self.store
            .revoke_voucher(&code)
            .await
            .map_err(|e| ServiceError::Repository("Vouchers".to_string(), e.to_string()))?;

        log::info!("Voucher {} revoked.", code);
        Ok(())
    }
}

fn generate_code() -> String {
    let mut code = Uuid::new_v4().simple().to_string();
    code.truncate(CODE_LENGTH);
    code.to_uppercase()
}
