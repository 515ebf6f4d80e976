//! Per-user recurring jobs.
//!
//! Each user has at most one live job, keyed by a name derived from the user
//! id. Scheduling replaces any existing job of that name; cancelling stops
//! further ticks without interrupting a tick that is already running.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::users::UserId;

const JOB_PREFIX: &str = "signal_job_";

pub fn job_name(user_id: UserId) -> String {
    format!("{JOB_PREFIX}{user_id}")
}

/// Body of a recurring job. Receives only the user it serves; anything else
/// must be read fresh from the store on each tick.
#[async_trait]
pub trait TickHandler: Send + Sync + 'static {
    async fn on_tick(&self, user_id: UserId);
}

struct ScheduledJob {
    user_id: UserId,
    token: CancellationToken,
}

pub struct JobRegistry {
    jobs: DashMap<String, ScheduledJob>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl JobRegistry {
    pub fn new(interval: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts a job firing `handler` after `initial_delay` and then every
    /// interval, replacing the user's previous job if there was one. Does
    /// nothing once the registry has been shut down.
    pub fn schedule(
        &self,
        user_id: UserId,
        initial_delay: Duration,
        handler: Arc<dyn TickHandler>,
    ) {
        let name = job_name(user_id);
        if self.shutdown.is_cancelled() {
            log::warn!("Registry is shut down, not starting {}.", name);
            return;
        }

        let token = self.shutdown.child_token();
        let first_tick = Instant::now() + initial_delay;

        spawn_job(user_id, first_tick, self.interval, token.clone(), handler);

        // Insert swaps under the shard lock, so concurrent schedules for the
        // same name leave exactly one job behind.
        if let Some(previous) = self.jobs.insert(name.clone(), ScheduledJob { user_id, token }) {
            previous.token.cancel();
            log::info!("Periodic job restarted: {}", name);
        } else {
            log::info!("Periodic job started: {}", name);
        }

        // lost a race with shutdown() clearing the map
        if self.shutdown.is_cancelled() {
            self.jobs.remove(&name);
        }
    }

    /// Stops the user's job. Returns false when none was scheduled.
    pub fn cancel(&self, user_id: UserId) -> bool {
        let name = job_name(user_id);

        match self.jobs.remove(&name) {
            Some((_, job)) => {
                job.token.cancel();
                log::info!("Periodic job cancelled: {}", name);
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, user_id: UserId) -> bool {
        self.jobs.contains_key(&job_name(user_id))
    }

    pub fn scheduled_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.jobs.iter().map(|job| job.user_id).collect();
        users.sort_unstable();
        users
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Cancels every job, including ones scheduled concurrently with this call.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.jobs.clear();
        log::info!("All periodic jobs cancelled.");
    }
}

fn spawn_job(
    user_id: UserId,
    first_tick: Instant,
    period: Duration,
    token: CancellationToken,
    handler: Arc<dyn TickHandler>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    handler.on_tick(user_id).await;
                }
            }
        }

        log::debug!("Periodic job for user {} stopped.", user_id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INTERVAL: Duration = Duration::from_secs(30 * 60);

    #[derive(Default)]
    struct CountingHandler {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl TickHandler for CountingHandler {
        async fn on_tick(&self, _user_id: UserId) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingHandler {
        fn ticks(&self) -> usize {
            self.ticks.load(Ordering::SeqCst)
        }
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
        // let woken tasks run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn job_names_are_derived_from_user() {
        assert_eq!(job_name(994618750), "signal_job_994618750");
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_initial_delay_then_every_interval() {
        let registry = JobRegistry::new(INTERVAL);
        let handler = Arc::new(CountingHandler::default());

        registry.schedule(7, Duration::from_secs(5), handler.clone());

        advance(Duration::from_secs(4)).await;
        assert_eq!(handler.ticks(), 0);

        advance(Duration::from_secs(1)).await;
        assert_eq!(handler.ticks(), 1);

        advance(INTERVAL).await;
        assert_eq!(handler.ticks(), 2);

        advance(INTERVAL).await;
        assert_eq!(handler.ticks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_leaves_a_single_job() {
        let registry = JobRegistry::new(INTERVAL);
        let handler = Arc::new(CountingHandler::default());

        registry.schedule(7, Duration::from_secs(5), handler.clone());
        registry.schedule(7, Duration::from_secs(5), handler.clone());
        assert_eq!(registry.len(), 1);

        advance(Duration::from_secs(5)).await;
        assert_eq!(handler.ticks(), 1);

        assert!(registry.cancel(7));
        advance(INTERVAL * 3).await;
        assert_eq!(handler.ticks(), 1);
        assert!(!registry.is_scheduled(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_a_noop_when_absent() {
        let registry = JobRegistry::new(INTERVAL);
        assert!(!registry.cancel(99));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_for_different_users_are_independent() {
        let registry = JobRegistry::new(INTERVAL);
        let first = Arc::new(CountingHandler::default());
        let second = Arc::new(CountingHandler::default());

        registry.schedule(1, Duration::from_secs(5), first.clone());
        registry.schedule(2, Duration::from_secs(5), second.clone());
        assert_eq!(registry.scheduled_users(), vec![1, 2]);

        registry.cancel(1);
        advance(Duration::from_secs(5)).await;

        assert_eq!(first.ticks(), 0);
        assert_eq!(second.ticks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let registry = JobRegistry::new(INTERVAL);
        let handler = Arc::new(CountingHandler::default());

        registry.schedule(1, Duration::from_secs(5), handler.clone());
        registry.schedule(2, Duration::from_secs(5), handler.clone());
        registry.shutdown();

        advance(INTERVAL).await;
        assert_eq!(handler.ticks(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_after_shutdown_is_ignored() {
        let registry = JobRegistry::new(INTERVAL);
        let handler = Arc::new(CountingHandler::default());

        registry.shutdown();
        registry.schedule(1, Duration::from_secs(5), handler.clone());

        assert!(registry.is_empty());
        assert!(!registry.is_scheduled(1));
        advance(INTERVAL).await;
        assert_eq!(handler.ticks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_schedules_for_one_user_leave_one_job() {
        const RACERS: usize = 8;

        let registry = Arc::new(JobRegistry::new(Duration::from_secs(1)));
        let handler = Arc::new(CountingHandler::default());
        let barrier = Arc::new(tokio::sync::Barrier::new(RACERS));

        let racers: Vec<_> = (0..RACERS)
            .map(|_| {
                let registry = registry.clone();
                let handler = handler.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    registry.schedule(7, Duration::from_millis(50), handler);
                })
            })
            .collect();
        for racer in racers {
            racer.await.unwrap();
        }

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.scheduled_users(), vec![7]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(handler.ticks(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(handler.ticks(), 2);

        registry.shutdown();
    }
}
