//! The sweep: evaluates entitled users, expires lapsed subscriptions and
//! delivers advisories. Each user is handled in isolation; a failure for one
//! user never stops the pass for the others.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;

use super::messages;
use super::scheduler::{JobRegistry, TickHandler};
use super::{AdvisoryClient, DeliverySink, ServiceError};
use crate::entitlement;
use crate::models::advisory::Signal;
use crate::models::users::{AdminIdentity, User, UserId};
use crate::repositories::EntitlementStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Subscription lapsed; revoked, notified and unscheduled.
    Expired,
    /// No subject configured; user was reminded to pick one.
    Unconfigured,
    Advised(Signal),
    /// The advisory call failed; a delay notice was sent instead.
    Degraded,
    /// Nothing to do, e.g. the user renewed between the snapshot and the write.
    Skipped,
    /// A store write failed for this user.
    Failed,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub outcomes: Vec<(UserId, Outcome)>,
}

impl SweepReport {
    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .count()
    }

    pub fn advised(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Advised(_)))
    }

    pub fn degraded(&self) -> usize {
        self.count(|outcome| *outcome == Outcome::Degraded)
    }

    pub fn unconfigured(&self) -> usize {
        self.count(|outcome| *outcome == Outcome::Unconfigured)
    }

    pub fn expired(&self) -> usize {
        self.count(|outcome| *outcome == Outcome::Expired)
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| *outcome == Outcome::Failed)
    }

    pub fn outcome_for(&self, user_id: UserId) -> Option<Outcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == user_id)
            .map(|(_, outcome)| *outcome)
    }
}

pub struct SweepOrchestrator {
    store: Arc<dyn EntitlementStore>,
    advisor: Arc<dyn AdvisoryClient>,
    sink: Arc<dyn DeliverySink>,
    registry: Arc<JobRegistry>,
    admin: AdminIdentity,
}

impl SweepOrchestrator {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        advisor: Arc<dyn AdvisoryClient>,
        sink: Arc<dyn DeliverySink>,
        registry: Arc<JobRegistry>,
        admin: AdminIdentity,
    ) -> Self {
        Self {
            store,
            advisor,
            sink,
            registry,
            admin,
        }
    }

    /// Full sweep over every user still holding a subscription, plus the admin.
    pub async fn run_sweep(&self) -> Result<SweepReport, ServiceError> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let candidates = self
            .store
            .list_subscribed_users()
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        let mut report = SweepReport::default();
        for user in &candidates {
            let outcome = self.process_user(user, now).await;
            report.outcomes.push((user.user_id, outcome));
        }

        log::info!(
            "Sweep finished: {} users, {} advised, {} degraded, {} unconfigured, {} expired, {} failed.",
            candidates.len(),
            report.advised(),
            report.degraded(),
            report.unconfigured(),
            report.expired(),
            report.failed()
        );

        Ok(report)
    }

    /// The sweep restricted to one user, read fresh from the store. Users who
    /// are no longer subscribed lose their job without being notified.
    pub async fn run_for_user(&self, user_id: UserId) -> Result<Outcome, ServiceError> {
        self.run_for_user_at(user_id, Utc::now()).await
    }

    pub async fn run_for_user_at(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ServiceError> {
        let user = self
            .store
            .get_user(user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        match user {
            Some(user) if user.is_subscribed || self.admin.is_admin(user_id) => {
                Ok(self.process_user(&user, now).await)
            }
            _ => {
                self.registry.cancel(user_id);
                Ok(Outcome::Skipped)
            }
        }
    }

    async fn process_user(&self, user: &User, now: DateTime<Utc>) -> Outcome {
        if !self.admin.is_admin(user.user_id)
            && entitlement::is_lapsed(user.subscription_expires.as_deref(), now)
        {
            return self.expire(user.user_id, now).await;
        }

        match user.subject() {
            Some(subject) => self.deliver_advisory(user.user_id, subject).await,
            None => {
                self.sink
                    .send(user.user_id, messages::subject_missing_notice())
                    .await;
                Outcome::Unconfigured
            }
        }
    }

    async fn expire(&self, user_id: UserId, now: DateTime<Utc>) -> Outcome {
        match self.store.expire_subscription(user_id, now).await {
            Ok(true) => {
                log::info!("Subscription expired for user {}.", user_id);
                self.sink
                    .send(user_id, messages::subscription_expired())
                    .await;
                self.registry.cancel(user_id);
                Outcome::Expired
            }
            Ok(false) => {
                log::info!(
                    "User {} was renewed before expiry could be applied.",
                    user_id
                );
                Outcome::Skipped
            }
            Err(e) => {
                log::error!("Failed to expire subscription for user {}: {}", user_id, e);
                Outcome::Failed
            }
        }
    }

    async fn deliver_advisory(&self, user_id: UserId, subject: &str) -> Outcome {
        let prediction = AssertUnwindSafe(self.advisor.predict(subject))
            .catch_unwind()
            .await;

        match prediction {
            Ok(Ok(advisory)) => {
                self.sink
                    .send(user_id, messages::periodic_advisory(subject, &advisory))
                    .await;
                log::info!("Sent periodic update to user {} for {}.", user_id, subject);
                Outcome::Advised(advisory.signal)
            }
            Ok(Err(e)) => {
                log::error!(
                    "Error generating periodic update for user {}: {}",
                    user_id,
                    e
                );
                self.sink.send(user_id, messages::advisory_delayed()).await;
                Outcome::Degraded
            }
            Err(_) => {
                log::error!(
                    "Advisory client panicked while serving user {} ({}).",
                    user_id,
                    subject
                );
                self.sink.send(user_id, messages::advisory_delayed()).await;
                Outcome::Degraded
            }
        }
    }

    /// Replaces the user's recurring job with one driven by this orchestrator.
    pub fn schedule_user(self: &Arc<Self>, user_id: UserId, initial_delay: Duration) {
        self.registry.schedule(user_id, initial_delay, self.clone());
    }

    /// Schedules a job for every entitled user with a subject. Safe to run
    /// repeatedly; existing jobs are replaced rather than duplicated.
    pub async fn restore_jobs(self: &Arc<Self>, initial_delay: Duration) -> Result<usize, ServiceError> {
        let users = self
            .store
            .list_entitled_users(Utc::now())
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        let mut restored = 0;
        for user in users.iter().filter(|user| user.subject().is_some()) {
            self.schedule_user(user.user_id, initial_delay);
            log::info!("Re-scheduled job for existing user {}.", user.user_id);
            restored += 1;
        }

        Ok(restored)
    }
}

#[async_trait]
impl TickHandler for SweepOrchestrator {
    async fn on_tick(&self, user_id: UserId) {
        match self.run_for_user(user_id).await {
            Ok(outcome) => log::debug!("Tick for user {}: {:?}", user_id, outcome),
            Err(e) => log::error!("Tick for user {} failed: {}", user_id, e),
        }
    }
}
