use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;

use super::sweep::{SweepOrchestrator, SweepReport};
use super::vouchers::VoucherLedger;
use super::{AdvisoryClient, RequestHandler, Service, ServiceError};
use crate::entitlement::{Grant, Subscription};
use crate::models::advisory::Advisory;
use crate::models::users::{AdminIdentity, User, UserId, UserStatus};
use crate::repositories::{EntitlementStore, StoreError};

const MAX_SUBJECT_LENGTH: usize = 16;

pub struct Registration {
    pub status: UserStatus,
    pub first_contact: bool,
}

pub struct Redemption {
    pub days: u32,
    pub subscription: Subscription,
}

pub enum SubscriptionRequest {
    Register {
        user_id: UserId,
        username: Option<String>,
        response: oneshot::Sender<Result<Registration, ServiceError>>,
    },
    GetStatus {
        user_id: UserId,
        response: oneshot::Sender<Result<UserStatus, ServiceError>>,
    },
    Redeem {
        user_id: UserId,
        code: String,
        response: oneshot::Sender<Result<Redemption, ServiceError>>,
    },
    SelectSubject {
        user_id: UserId,
        subject: String,
        response: oneshot::Sender<Result<String, ServiceError>>,
    },
    InstantAdvisory {
        user_id: UserId,
        response: oneshot::Sender<Result<Option<(String, Advisory)>, ServiceError>>,
    },
    MintVoucher {
        actor: UserId,
        days: u32,
        response: oneshot::Sender<Result<String, ServiceError>>,
    },
    RevokeVoucher {
        actor: UserId,
        code: String,
        response: oneshot::Sender<Result<String, ServiceError>>,
    },
    ForceSweep {
        actor: UserId,
        response: oneshot::Sender<Result<SweepReport, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct SubscriptionRequestHandler {
    store: Arc<dyn EntitlementStore>,
    ledger: VoucherLedger,
    advisor: Arc<dyn AdvisoryClient>,
    orchestrator: Arc<SweepOrchestrator>,
    admin: AdminIdentity,
    initial_delay: Duration,
}

impl SubscriptionRequestHandler {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        ledger: VoucherLedger,
        advisor: Arc<dyn AdvisoryClient>,
        orchestrator: Arc<SweepOrchestrator>,
        admin: AdminIdentity,
        initial_delay: Duration,
    ) -> Self {
        SubscriptionRequestHandler {
            store,
            ledger,
            advisor,
            orchestrator,
            admin,
            initial_delay,
        }
    }

    /// Ensures the admin exists with a permanent subscription. The default
    /// subject is only applied when the admin has none.
    pub async fn bootstrap_admin(&self, default_subject: &str) -> Result<(), ServiceError> {
        let id = self.admin.id();
        let existing = self.store.get_user(id).await.map_err(map_store_error)?;

        if existing.is_none() {
            self.store
                .upsert_user(id, None)
                .await
                .map_err(map_store_error)?;
        }

        let subscription = self
            .store
            .grant_subscription(id, Grant::Permanent, Utc::now())
            .await
            .map_err(map_store_error)?;

        let has_subject = existing
            .as_ref()
            .and_then(User::subject)
            .is_some();
        if !has_subject {
            let subject = normalize_subject(default_subject)?;
            self.store
                .set_subject(id, &subject)
                .await
                .map_err(map_store_error)?;
        }

        log::info!(
            "Admin {} bootstrapped, access until {}.",
            id,
            subscription.expiry_string()
        );
        Ok(())
    }

    async fn register(
        &self,
        user_id: UserId,
        username: Option<String>,
    ) -> Result<Registration, ServiceError> {
        let existing = self
            .store
            .get_user(user_id)
            .await
            .map_err(map_store_error)?;

        let user = self
            .store
            .upsert_user(user_id, username.as_deref())
            .await
            .map_err(map_store_error)?;

        if existing.is_none() {
            log::info!("Registered new user {}.", user_id);
        }

        Ok(Registration {
            status: self.status_of(user),
            first_contact: existing.is_none(),
        })
    }

    async fn get_status(&self, user_id: UserId) -> Result<UserStatus, ServiceError> {
        let user = self.load_user(user_id).await?;
        Ok(self.status_of(user))
    }

    async fn redeem(&self, user_id: UserId, code: &str) -> Result<Redemption, ServiceError> {
        let days = self.ledger.redeem(code).await?;

        let subscription = self
            .store
            .grant_subscription(user_id, Grant::Days(days), Utc::now())
            .await
            .map_err(|e| {
                log::error!(
                    "Voucher {} was consumed but granting {} days to user {} failed: {}",
                    code.trim(),
                    days,
                    user_id,
                    e
                );
                map_store_error(e)
            })?;

        log::info!(
            "User {} redeemed {} days, access until {}.",
            user_id,
            days,
            subscription.expiry_string()
        );

        let user = self.load_user(user_id).await?;
        if user.subject().is_some() {
            self.orchestrator.schedule_user(user_id, self.initial_delay);
        }

        Ok(Redemption { days, subscription })
    }

    async fn select_subject(&self, user_id: UserId, raw: &str) -> Result<String, ServiceError> {
        let subject = normalize_subject(raw)?;

        self.store
            .set_subject(user_id, &subject)
            .await
            .map_err(map_store_error)?;

        let user = self.load_user(user_id).await?;
        if self.status_of(user).is_active() {
            self.orchestrator.schedule_user(user_id, self.initial_delay);
        }

        log::info!("User {} now tracks {}.", user_id, subject);
        Ok(subject)
    }

    async fn instant_advisory(
        &self,
        user_id: UserId,
    ) -> Result<Option<(String, Advisory)>, ServiceError> {
        let user = self.load_user(user_id).await?;
        let Some(subject) = user.subject() else {
            return Ok(None);
        };

        let advisory = self.advisor.predict(subject).await?;
        Ok(Some((subject.to_string(), advisory)))
    }

    async fn mint_voucher(&self, actor: UserId, days: u32) -> Result<String, ServiceError> {
        self.authorize(actor)?;
        self.ledger.mint(days).await
    }

    async fn revoke_voucher(&self, actor: UserId, code: &str) -> Result<String, ServiceError> {
        self.authorize(actor)?;
        self.ledger.revoke(code).await?;
        Ok(code.trim().to_uppercase())
    }

    async fn force_sweep(&self, actor: UserId) -> Result<SweepReport, ServiceError> {
        self.authorize(actor)?;
        log::info!("Admin {} forced an update cycle.", actor);
        self.orchestrator.run_sweep().await
    }

    fn authorize(&self, actor: UserId) -> Result<(), ServiceError> {
        if self.admin.is_admin(actor) {
            Ok(())
        } else {
            log::warn!("User {} attempted an admin operation.", actor);
            Err(ServiceError::Unauthorized(format!("User {}", actor)))
        }
    }

    async fn load_user(&self, user_id: UserId) -> Result<User, ServiceError> {
        self.store
            .get_user(user_id)
            .await
            .map_err(map_store_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("User {}", user_id)))
    }

    fn status_of(&self, user: User) -> UserStatus {
        UserStatus {
            is_admin: self.admin.is_admin(user.user_id),
            user,
        }
    }
}

fn map_store_error(e: StoreError) -> ServiceError {
    match e {
        StoreError::NotFound { entity, id } => ServiceError::NotFound(format!("{} {}", entity, id)),
        other => ServiceError::Database(other.to_string()),
    }
}

/// Uppercases and validates a market symbol such as `TSLA`, `BTC-USD` or `EUR/USD`.
pub fn normalize_subject(raw: &str) -> Result<String, ServiceError> {
    let subject = raw.trim().to_uppercase();

    let valid = !subject.is_empty()
        && subject.len() <= MAX_SUBJECT_LENGTH
        && subject
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '/'));

    if valid {
        Ok(subject)
    } else {
        Err(ServiceError::InvalidInput(format!(
            "Invalid subject: {}",
            raw.trim()
        )))
    }
}

#[async_trait]
impl RequestHandler<SubscriptionRequest> for SubscriptionRequestHandler {
    async fn handle_request(&self, request: SubscriptionRequest) {
        match request {
            SubscriptionRequest::Register {
                user_id,
                username,
                response,
            } => {
                let result = self.register(user_id, username).await;
                let _ = response.send(result);
            }
            SubscriptionRequest::GetStatus { user_id, response } => {
                let result = self.get_status(user_id).await;
                let _ = response.send(result);
            }
            SubscriptionRequest::Redeem {
                user_id,
                code,
                response,
            } => {
                let result = self.redeem(user_id, &code).await;
                let _ = response.send(result);
            }
            SubscriptionRequest::SelectSubject {
                user_id,
                subject,
                response,
            } => {
                let result = self.select_subject(user_id, &subject).await;
                let _ = response.send(result);
            }
            SubscriptionRequest::InstantAdvisory { user_id, response } => {
                let result = self.instant_advisory(user_id).await;
                let _ = response.send(result);
            }
            SubscriptionRequest::MintVoucher {
                actor,
                days,
                response,
            } => {
                let result = self.mint_voucher(actor, days).await;
                let _ = response.send(result);
            }
            SubscriptionRequest::RevokeVoucher {
                actor,
                code,
                response,
            } => {
                let result = self.revoke_voucher(actor, &code).await;
                let _ = response.send(result);
            }
            SubscriptionRequest::ForceSweep { actor, response } => {
                let result = self.force_sweep(actor).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct SubscriptionService;

impl SubscriptionService {
    pub fn new() -> Self {
        SubscriptionService {}
    }
}

#[async_trait]
impl Service<SubscriptionRequest, SubscriptionRequestHandler> for SubscriptionService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sweep::tests::{Harness, ADMIN};
    use chrono::Duration as ChronoDuration;
    use tokio::sync::mpsc;

    const DELAY: Duration = Duration::from_secs(3600);

    fn handler(harness: &Harness) -> SubscriptionRequestHandler {
        SubscriptionRequestHandler::new(
            harness.store.clone(),
            VoucherLedger::new(harness.store.clone()),
            harness.advisor.clone(),
            harness.orchestrator.clone(),
            AdminIdentity::new(ADMIN),
            DELAY,
        )
    }

    #[test]
    fn subjects_are_normalized_and_validated() {
        assert_eq!(normalize_subject(" tsla ").unwrap(), "TSLA");
        assert_eq!(normalize_subject("eur/usd").unwrap(), "EUR/USD");
        assert_eq!(normalize_subject("BTC-USD").unwrap(), "BTC-USD");
        assert!(normalize_subject("").is_err());
        assert!(normalize_subject("DROP TABLE").is_err());
        assert!(normalize_subject("ABCDEFGHIJKLMNOPQ").is_err());
    }

    #[tokio::test]
    async fn bootstrap_grants_admin_and_keeps_chosen_subject() {
        let harness = Harness::new();
        let handler = handler(&harness);

        handler.bootstrap_admin("tsla").await.unwrap();
        let admin = harness.store.get_user(ADMIN).await.unwrap().unwrap();
        assert!(admin.is_subscribed);
        assert_eq!(admin.subject(), Some("TSLA"));

        harness.store.set_subject(ADMIN, "BTC-USD").await.unwrap();
        handler.bootstrap_admin("TSLA").await.unwrap();
        let admin = harness.store.get_user(ADMIN).await.unwrap().unwrap();
        assert_eq!(admin.subject(), Some("BTC-USD"));
    }

    #[tokio::test]
    async fn register_reports_first_contact_once() {
        let harness = Harness::new();
        let handler = handler(&harness);

        let first = handler.register(10, Some("ada".to_string())).await.unwrap();
        let second = handler.register(10, Some("ada".to_string())).await.unwrap();

        assert!(first.first_contact);
        assert!(!second.first_contact);
        assert!(!second.status.is_active());
    }

    #[tokio::test]
    async fn redemption_grants_days_and_schedules_configured_users() {
        let harness = Harness::new();
        let handler = handler(&harness);
        handler.register(10, None).await.unwrap();
        handler.select_subject(10, "tsla").await.unwrap();
        assert!(!harness.registry.is_scheduled(10));

        let code = handler.mint_voucher(ADMIN, 10).await.unwrap();
        let redemption = handler.redeem(10, &code.to_lowercase()).await.unwrap();

        assert_eq!(redemption.days, 10);
        assert!(redemption.subscription.subscribed);
        let remaining = redemption.subscription.expires_at - Utc::now();
        assert!(remaining > ChronoDuration::days(9));
        assert!(harness.registry.is_scheduled(10));
    }

    #[tokio::test]
    async fn redemption_without_subject_does_not_schedule() {
        let harness = Harness::new();
        let handler = handler(&harness);
        handler.register(10, None).await.unwrap();

        let code = handler.mint_voucher(ADMIN, 30).await.unwrap();
        handler.redeem(10, &code).await.unwrap();

        assert!(harness.registry.is_empty());
        assert!(handler.get_status(10).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn second_redemption_of_a_code_fails() {
        let harness = Harness::new();
        let handler = handler(&harness);
        handler.register(10, None).await.unwrap();
        handler.register(11, None).await.unwrap();

        let code = handler.mint_voucher(ADMIN, 10).await.unwrap();
        handler.redeem(10, &code).await.unwrap();

        assert!(matches!(
            handler.redeem(11, &code).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(!handler.get_status(11).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn admin_operations_reject_other_users() {
        let harness = Harness::new();
        let handler = handler(&harness);

        assert!(matches!(
            handler.mint_voucher(10, 10).await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            handler.revoke_voucher(10, "ABC").await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            handler.force_sweep(10).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn instant_advisory_needs_a_subject() {
        let harness = Harness::new();
        let handler = handler(&harness);
        handler.register(10, None).await.unwrap();

        assert!(handler.instant_advisory(10).await.unwrap().is_none());

        handler.select_subject(10, "TSLA").await.unwrap();
        let (subject, advisory) = handler.instant_advisory(10).await.unwrap().unwrap();
        assert_eq!(subject, "TSLA");
        assert!(advisory.justification.contains("TSLA"));
        // not subscribed, so no recurring job
        assert!(!harness.registry.is_scheduled(10));
    }

    #[tokio::test]
    async fn requests_are_served_over_the_channel() {
        let harness = Harness::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut service = SubscriptionService::new();
        let handler = handler(&harness);
        tokio::spawn(async move {
            service.run(handler, &mut rx).await;
        });

        let (response_tx, response_rx) = oneshot::channel();
        tx.send(SubscriptionRequest::Register {
            user_id: 42,
            username: Some("grace".to_string()),
            response: response_tx,
        })
        .await
        .unwrap();

        let registration = response_rx.await.unwrap().unwrap();
        assert!(registration.first_contact);
        assert_eq!(registration.status.user.username.as_deref(), Some("grace"));
    }
}
