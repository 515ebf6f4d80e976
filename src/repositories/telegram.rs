use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::models::notifications::{Button, ButtonAction};
use crate::models::telegram::{
    ApiResponse, BotUser, InlineKeyboardButton, InlineKeyboardMarkup, SendMessage, Update,
};

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("Telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Telegram API error {code}: {description}")]
    Api { code: i32, description: String },
    #[error("Telegram API returned no result for {0}")]
    EmptyResult(&'static str),
}

impl TelegramError {
    /// Telegram refuses messages whose markdown entities do not parse.
    pub fn is_markup_rejection(&self) -> bool {
        match self {
            TelegramError::Api { code, description } => {
                *code == 400 && description.contains("can't parse entities")
            }
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct TelegramApi {
    base_url: String,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(
        api_url: &str,
        bot_token: &str,
        request_timeout: Duration,
    ) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
            client,
        })
    }

    async fn call<P, T>(
        &self,
        method: &'static str,
        payload: &P,
        timeout: Option<Duration>,
    ) -> Result<T, TelegramError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        // The request URL carries the bot token, keep it out of error messages.
        let response: ApiResponse<T> = request
            .send()
            .await
            .map_err(|e| e.without_url())?
            .json()
            .await
            .map_err(|e| e.without_url())?;

        if !response.ok {
            return Err(TelegramError::Api {
                code: response.error_code.unwrap_or_default(),
                description: response.description.unwrap_or_default(),
            });
        }

        response.result.ok_or(TelegramError::EmptyResult(method))
    }

    pub async fn get_me(&self) -> Result<BotUser, TelegramError> {
        self.call("getMe", &json!({}), None).await
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        poll_timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let payload = json!({
            "offset": offset,
            "timeout": poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });

        self.call(
            "getUpdates",
            &payload,
            Some(Duration::from_secs(poll_timeout_secs + 10)),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
        reply_markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode,
            reply_markup,
        };

        let _: serde_json::Value = self.call("sendMessage", &payload, None).await?;
        Ok(())
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramError> {
        let mut payload = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }

        let _: bool = self.call("answerCallbackQuery", &payload, None).await?;
        Ok(())
    }
}

pub fn keyboard(rows: &[Vec<Button>]) -> InlineKeyboardMarkup {
    let inline_keyboard = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| match &button.action {
                    ButtonAction::Callback(data) => InlineKeyboardButton {
                        text: button.label.clone(),
                        callback_data: Some(data.clone()),
                        url: None,
                    },
                    ButtonAction::Url(url) => InlineKeyboardButton {
                        text: button.label.clone(),
                        callback_data: None,
                        url: Some(url.clone()),
                    },
                })
                .collect()
        })
        .collect();

    InlineKeyboardMarkup { inline_keyboard }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_maps_callback_and_url_buttons() {
        let markup = keyboard(&[
            vec![Button::callback("Predict", "predict_now")],
            vec![Button::url("Contact", "https://t.me/example")],
        ]);

        let encoded = serde_json::to_value(&markup).unwrap();
        assert_eq!(
            encoded,
            json!({
                "inline_keyboard": [
                    [{"text": "Predict", "callback_data": "predict_now"}],
                    [{"text": "Contact", "url": "https://t.me/example"}],
                ]
            })
        );
    }

    #[test]
    fn markup_rejection_is_detected() {
        let error = TelegramError::Api {
            code: 400,
            description: "Bad Request: can't parse entities: unexpected end".to_string(),
        };
        assert!(error.is_markup_rejection());

        let error = TelegramError::Api {
            code: 403,
            description: "Forbidden: bot was blocked by the user".to_string(),
        };
        assert!(!error.is_markup_rejection());
    }

    #[test]
    fn updates_decode_from_api_envelope() {
        let raw = json!({
            "ok": true,
            "result": [{
                "update_id": 10,
                "message": {
                    "message_id": 1,
                    "from": {"id": 42, "is_bot": false, "first_name": "Ada", "username": "ada"},
                    "chat": {"id": 42, "type": "private"},
                    "text": "/start"
                }
            }, {
                "update_id": 11,
                "callback_query": {
                    "id": "cb1",
                    "from": {"id": 42, "is_bot": false, "first_name": "Ada"},
                    "data": "set_asset"
                }
            }]
        });

        let response: ApiResponse<Vec<Update>> = serde_json::from_value(raw).unwrap();
        let updates = response.result.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[0].message.as_ref().unwrap().text.as_deref(),
            Some("/start")
        );
        assert_eq!(
            updates[1].callback_query.as_ref().unwrap().data.as_deref(),
            Some("set_asset")
        );
    }
}
