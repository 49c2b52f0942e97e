//! Minimal Telegram Bot API client.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

/// Bot API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Telegram API error: {0}")]
    Api(String),
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

/// Client for one bot token.
#[derive(Debug, Clone)]
pub struct BotApi {
    client: Client,
    base_url: String,
}

impl BotApi {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<T, ApiError> {
        debug!(method, "Telegram API request");

        let response: ApiResponse<T> = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&payload)
            .timeout(timeout)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(ApiError::Api(
                response
                    .description
                    .unwrap_or_else(|| format!("{} failed", method)),
            ));
        }

        response
            .result
            .ok_or_else(|| ApiError::Api(format!("{} returned no result", method)))
    }

    pub async fn get_me(&self) -> Result<User, ApiError> {
        self.call("getMe", json!({}), Duration::from_secs(10)).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, ApiError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
            Duration::from_secs(timeout_secs + 10),
        )
        .await
    }

    /// Send a text message, optionally with an inline keyboard.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&[Vec<InlineKeyboardButton>]>,
    ) -> Result<(), ApiError> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(keyboard) = keyboard {
            payload["reply_markup"] = json!({ "inline_keyboard": keyboard });
        }

        self.call::<Value>("sendMessage", payload, Duration::from_secs(10))
            .await
            .map(|_| ())
    }

    pub async fn answer_callback_query(&self, id: &str, text: &str) -> Result<(), ApiError> {
        self.call::<Value>(
            "answerCallbackQuery",
            json!({ "callback_query_id": id, "text": text }),
            Duration::from_secs(10),
        )
        .await
        .map(|_| ())
    }

    pub async fn set_my_commands(&self, commands: &[BotCommand]) -> Result<(), ApiError> {
        self.call::<Value>(
            "setMyCommands",
            json!({ "commands": commands }),
            Duration::from_secs(10),
        )
        .await
        .map(|_| ())
    }
}
