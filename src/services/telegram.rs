//! Telegram delivery and the chat surface driving the subscription service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use super::messages;
use super::subscriptions::{Registration, SubscriptionRequest};
use super::{DeliverySink, ServiceError};
use crate::models::notifications::OutboundMessage;
use crate::models::telegram::{BotUser, Update};
use crate::models::users::UserId;
use crate::repositories::telegram::{keyboard, TelegramApi, TelegramError};

const PARSE_MODE: &str = "Markdown";
const RETRY_DELAY: Duration = Duration::from_secs(1);
const POLL_BACKOFF: Duration = Duration::from_secs(5);

pub struct TelegramSink {
    api: TelegramApi,
    attempts: u32,
}

impl TelegramSink {
    pub fn new(api: TelegramApi, attempts: u32) -> Self {
        Self {
            api,
            attempts: attempts.max(1),
        }
    }
}

#[async_trait]
impl DeliverySink for TelegramSink {
    async fn send(&self, user_id: UserId, message: OutboundMessage) {
        let markup = message.buttons.as_deref().map(keyboard);

        for attempt in 1..=self.attempts {
            let result = self
                .api
                .send_message(user_id, &message.text, Some(PARSE_MODE), markup.as_ref())
                .await;

            match result {
                Ok(()) => return,
                Err(e) if e.is_markup_rejection() => {
                    log::warn!(
                        "Markdown rejected for user {}, resending as plain text.",
                        user_id
                    );
                    if let Err(e) = self
                        .api
                        .send_message(user_id, &message.text, None, markup.as_ref())
                        .await
                    {
                        log::error!("Failed to send message to user {}: {}", user_id, e);
                    }
                    return;
                }
                // blocked bot, unknown chat and similar will not improve on retry
                Err(e @ TelegramError::Api { .. }) => {
                    log::error!("Failed to send message to user {}: {}", user_id, e);
                    return;
                }
                Err(e) => {
                    log::warn!(
                        "Send to user {} failed (attempt {}/{}): {}",
                        user_id,
                        attempt,
                        self.attempts,
                        e
                    );
                    if attempt < self.attempts {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        log::error!("Giving up on message to user {}.", user_id);
    }
}

/// Everything a user can ask for, from either a slash command or a button.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Start,
    Menu,
    PredictNow,
    SubjectMenu,
    SelectSubject(String),
    Portfolio,
    AccessMenu,
    PromptVoucher,
    Redeem(String),
    Cancel,
    AdminPanel,
    MintVoucher(u32),
    RevokePrompt,
    Revoke(String),
    ForceSweep,
    /// Free text, consumed by a pending prompt if there is one.
    Text(String),
    Unknown,
}

/// Parses `/command[@bot] [argument]`. Returns `None` for plain text.
pub fn parse_command(text: &str) -> Option<Action> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;

    let (head, argument) = match rest.split_once(char::is_whitespace) {
        Some((head, argument)) => (head, Some(argument.trim()).filter(|a| !a.is_empty())),
        None => (rest, None),
    };
    let command = head.split('@').next().unwrap_or_default().to_lowercase();
    let argument = argument.map(str::to_string);

    let action = match (command.as_str(), argument) {
        ("start", _) => Action::Start,
        ("menu", _) => Action::Menu,
        ("predict", _) => Action::PredictNow,
        ("asset" | "subject", Some(subject)) => Action::SelectSubject(subject),
        ("asset" | "subject", None) => Action::SubjectMenu,
        ("profit", _) => Action::Portfolio,
        ("redeem", Some(code)) => Action::Redeem(code),
        ("redeem", None) => Action::PromptVoucher,
        ("cancel", _) => Action::Cancel,
        ("admin", _) => Action::AdminPanel,
        ("voucher", Some(days)) => match days.parse() {
            Ok(days) => Action::MintVoucher(days),
            Err(_) => Action::AdminPanel,
        },
        ("voucher", None) => Action::AdminPanel,
        ("revoke", Some(code)) => Action::Revoke(code),
        ("revoke", None) => Action::RevokePrompt,
        ("force", _) => Action::ForceSweep,
        _ => Action::Unknown,
    };

    Some(action)
}

pub fn parse_callback(data: &str) -> Action {
    if let Some(subject) = data.strip_prefix(messages::SELECT_ASSET_PREFIX) {
        return Action::SelectSubject(subject.to_string());
    }
    if let Some(days) = data.strip_prefix(messages::ADMIN_GEN_VOUCHER_PREFIX) {
        return days.parse().map(Action::MintVoucher).unwrap_or(Action::Unknown);
    }

    match data {
        messages::START_MENU => Action::Menu,
        messages::PREDICT_NOW => Action::PredictNow,
        messages::SET_ASSET => Action::SubjectMenu,
        messages::SHOW_PROFIT => Action::Portfolio,
        messages::BUY_ACCESS => Action::AccessMenu,
        messages::PROMPT_VOUCHER => Action::PromptVoucher,
        messages::ADMIN_PANEL => Action::AdminPanel,
        messages::ADMIN_REVOKE_PROMPT => Action::RevokePrompt,
        messages::ADMIN_FORCE_UPDATES => Action::ForceSweep,
        _ => Action::Unknown,
    }
}

/// Prompt awaiting the user's next text message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingInput {
    Voucher,
    Revoke,
}

pub struct GatewayOptions {
    pub poll_timeout_secs: u64,
    pub contact_url: Option<String>,
    pub subjects: Vec<String>,
    pub voucher_days: Vec<u32>,
}

pub struct TelegramGateway {
    api: TelegramApi,
    sink: Arc<dyn DeliverySink>,
    subscriptions: mpsc::Sender<SubscriptionRequest>,
    options: GatewayOptions,
    pending: DashMap<UserId, PendingInput>,
}

impl TelegramGateway {
    pub fn new(
        api: TelegramApi,
        sink: Arc<dyn DeliverySink>,
        subscriptions: mpsc::Sender<SubscriptionRequest>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            api,
            sink,
            subscriptions,
            options,
            pending: DashMap::new(),
        }
    }

    /// Long-polls Telegram forever, handling each update on its own task.
    pub async fn run(self) {
        let gateway = Arc::new(self);
        let mut offset = 0;

        loop {
            let updates = gateway
                .api
                .get_updates(offset, gateway.options.poll_timeout_secs)
                .await;

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);

                        let gateway = gateway.clone();
                        tokio::spawn(async move {
                            gateway.handle_update(update).await;
                        });
                    }
                }
                Err(e) => {
                    log::error!("Failed to poll Telegram updates: {}", e);
                    tokio::time::sleep(POLL_BACKOFF).await;
                }
            }
        }
    }

    async fn handle_update(&self, update: Update) {
        if let Some(query) = update.callback_query {
            if let Err(e) = self.api.answer_callback_query(&query.id, None).await {
                log::warn!("Failed to answer callback query {}: {}", query.id, e);
            }

            let action = parse_callback(query.data.as_deref().unwrap_or_default());
            self.dispatch(&query.from, action).await;
        } else if let Some(message) = update.message {
            let (Some(from), Some(text)) = (message.from, message.text) else {
                return;
            };

            let action = parse_command(&text).unwrap_or(Action::Text(text));
            self.dispatch(&from, action).await;
        }
    }

    async fn dispatch(&self, from: &BotUser, action: Action) {
        let user_id = from.id;

        let registration = self
            .request(|response| SubscriptionRequest::Register {
                user_id,
                username: from.username.clone(),
                response,
            })
            .await;

        let reply = match registration {
            Ok(registration) => self
                .respond(from, registration, action)
                .await
                .unwrap_or_else(|e| error_reply(user_id, e)),
            Err(e) => error_reply(user_id, e),
        };

        self.sink.send(user_id, reply).await;
    }

    async fn respond(
        &self,
        from: &BotUser,
        registration: Registration,
        action: Action,
    ) -> Result<OutboundMessage, ServiceError> {
        let user_id = from.id;
        let status = registration.status;

        let reply = match action {
            Action::Start => {
                self.pending.remove(&user_id);
                if registration.first_contact {
                    messages::welcome(&from.first_name, &status)
                } else {
                    messages::welcome_back(&from.first_name, &status)
                }
            }
            Action::Menu => messages::welcome_back(&from.first_name, &status),
            Action::PredictNow => {
                let Some(subject) = status.user.subject() else {
                    return Ok(messages::subject_required());
                };
                self.sink.send(user_id, messages::analyzing(subject)).await;

                let advisory = self
                    .request(|response| SubscriptionRequest::InstantAdvisory { user_id, response })
                    .await?;
                match advisory {
                    Some((subject, advisory)) => messages::instant_advisory(&subject, &advisory),
                    None => messages::subject_required(),
                }
            }
            Action::SubjectMenu => messages::subject_menu(&self.options.subjects),
            Action::SelectSubject(subject) => {
                let selected = self
                    .request(|response| SubscriptionRequest::SelectSubject {
                        user_id,
                        subject,
                        response,
                    })
                    .await;
                match selected {
                    Ok(subject) => messages::subject_set(&subject),
                    Err(ServiceError::InvalidInput(_)) => messages::invalid_subject(),
                    Err(e) => return Err(e),
                }
            }
            Action::Portfolio => messages::portfolio(&status.user),
            Action::AccessMenu => messages::access_menu(self.options.contact_url.as_deref()),
            Action::PromptVoucher => {
                self.pending.insert(user_id, PendingInput::Voucher);
                messages::voucher_prompt()
            }
            Action::Redeem(code) => self.redeem(user_id, code).await?,
            Action::Cancel => {
                self.pending.remove(&user_id);
                messages::input_cancelled()
            }
            Action::AdminPanel if status.is_admin => {
                messages::admin_panel(&self.options.voucher_days)
            }
            Action::RevokePrompt if status.is_admin => {
                self.pending.insert(user_id, PendingInput::Revoke);
                messages::revoke_prompt()
            }
            Action::AdminPanel | Action::RevokePrompt => messages::unauthorized(),
            Action::MintVoucher(days) => {
                let code = self
                    .request(|response| SubscriptionRequest::MintVoucher {
                        actor: user_id,
                        days,
                        response,
                    })
                    .await?;
                messages::voucher_minted(days, &code)
            }
            Action::Revoke(code) => self.revoke(user_id, code).await?,
            Action::ForceSweep => {
                let report = self
                    .request(|response| SubscriptionRequest::ForceSweep {
                        actor: user_id,
                        response,
                    })
                    .await?;
                messages::sweep_forced(&report)
            }
            Action::Text(text) => match self.pending.remove(&user_id) {
                Some((_, PendingInput::Voucher)) => self.redeem(user_id, text).await?,
                Some((_, PendingInput::Revoke)) => self.revoke(user_id, text).await?,
                None => messages::unknown_input(),
            },
            Action::Unknown => messages::unknown_input(),
        };

        Ok(reply)
    }

    async fn redeem(&self, user_id: UserId, code: String) -> Result<OutboundMessage, ServiceError> {
        let redemption = self
            .request(|response| SubscriptionRequest::Redeem {
                user_id,
                code,
                response,
            })
            .await;

        match redemption {
            Ok(redemption) => Ok(messages::voucher_redeemed(
                redemption.days,
                &redemption.subscription.expiry_string(),
            )),
            Err(ServiceError::NotFound(_)) => Ok(messages::voucher_rejected()),
            Err(e) => Err(e),
        }
    }

    async fn revoke(&self, user_id: UserId, code: String) -> Result<OutboundMessage, ServiceError> {
        let code = self
            .request(|response| SubscriptionRequest::RevokeVoucher {
                actor: user_id,
                code,
                response,
            })
            .await?;

        Ok(messages::voucher_revoked(&code))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> SubscriptionRequest,
    ) -> Result<T, ServiceError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.subscriptions
            .send(build(response_tx))
            .await
            .map_err(|e| ServiceError::Communication("Subscriptions".to_string(), e.to_string()))?;

        response_rx
            .await
            .map_err(|e| ServiceError::Communication("Subscriptions".to_string(), e.to_string()))?
    }
}

fn error_reply(user_id: UserId, error: ServiceError) -> OutboundMessage {
    match error {
        ServiceError::Unauthorized(_) => messages::unauthorized(),
        ServiceError::InvalidInput(reason) => OutboundMessage::text(format!("❌ {}", reason)),
        e => {
            log::error!("Failed to handle request from user {}: {}", user_id, e);
            messages::failure()
        }
    }
}
