use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::advisory::Advisory;
use crate::models::notifications::OutboundMessage;
use crate::models::users::{AdminIdentity, UserId};
use crate::repositories::{advisory::QuantAdvisor, telegram::TelegramApi, EntitlementStore};
use crate::settings::Settings;

mod http;
pub mod messages;
pub mod scheduler;
pub mod subscriptions;
pub mod sweep;
pub mod telegram;
pub mod vouchers;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
    #[error("External service error: {0} -> {1} => {2}")]
    ExternalService(String, String, String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Produces a trading advisory for a subject.
#[async_trait]
pub trait AdvisoryClient: Send + Sync {
    async fn predict(&self, subject: &str) -> Result<Advisory, ServiceError>;
}

/// Fire-and-forget delivery to a user. Implementations log failures instead
/// of returning them.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn send(&self, user_id: UserId, message: OutboundMessage);
}

pub async fn start_services(
    store: Arc<dyn EntitlementStore>,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let admin = AdminIdentity::new(settings.admin.telegram_id);

    let api = TelegramApi::new(
        &settings.telegram.api_url,
        &settings.telegram.bot_token,
        Duration::from_secs(settings.telegram.request_timeout_secs),
    )?;
    let bot = api
        .get_me()
        .await
        .map_err(|e| anyhow::anyhow!("Could not authenticate with Telegram: {}", e))?;
    log::info!(
        "Authenticated with Telegram as @{}.",
        bot.username.as_deref().unwrap_or(&bot.first_name)
    );

    let sink = Arc::new(telegram::TelegramSink::new(
        api.clone(),
        settings.telegram.send_attempts,
    ));
    let advisor = Arc::new(QuantAdvisor::new(&settings.advisory)?);
    let registry = Arc::new(scheduler::JobRegistry::new(Duration::from_secs(
        settings.scheduler.interval_secs,
    )));
    let orchestrator = Arc::new(sweep::SweepOrchestrator::new(
        store.clone(),
        advisor.clone(),
        sink.clone(),
        registry.clone(),
        admin,
    ));
    let ledger = vouchers::VoucherLedger::new(store.clone());

    let (subscription_tx, mut subscription_rx) = mpsc::channel(512);
    let mut subscription_service = subscriptions::SubscriptionService::new();
    let subscription_handler = subscriptions::SubscriptionRequestHandler::new(
        store,
        ledger,
        advisor,
        orchestrator.clone(),
        admin,
        Duration::from_secs(settings.scheduler.initial_delay_secs),
    );

    subscription_handler
        .bootstrap_admin(&settings.admin.default_subject)
        .await?;

    let restored = orchestrator
        .restore_jobs(Duration::from_secs(settings.scheduler.startup_delay_secs))
        .await?;
    log::info!("Restored {} periodic jobs.", restored);

    log::info!("Starting subscription service.");
    tokio::spawn(async move {
        subscription_service
            .run(subscription_handler, &mut subscription_rx)
            .await;
    });

    log::info!("Starting Telegram gateway.");
    let gateway = telegram::TelegramGateway::new(
        api,
        sink,
        subscription_tx,
        telegram::GatewayOptions {
            poll_timeout_secs: settings.telegram.poll_timeout_secs,
            contact_url: settings.telegram.contact_url,
            subjects: settings.advisory.subjects,
            voucher_days: settings.admin.voucher_days,
        },
    );
    tokio::spawn(async move {
        gateway.run().await;
    });

    log::info!("Starting HTTP server.");
    let http_registry = registry.clone();
    let listen = settings.http.listen;
    tokio::spawn(async move {
        if let Err(e) = http::start_http_server(&listen, http_registry).await {
            log::error!("HTTP server stopped: {}", e);
        }
    });

    log::info!("Started services.");

    tokio::signal::ctrl_c().await?;
    log::info!("Shutdown requested, cancelling periodic jobs.");
    registry.shutdown();

    Ok(())
}
