//! Minimal Telegram Bot API client over reqwest: `sendMessage` and long-polling `getUpdates`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::notify::{Notifier, NotifyError};

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub from: Option<Sender>,
    pub text: Option<String>,
    pub web_app_data: Option<WebAppData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebAppData {
    pub data: String,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Self {
        TelegramClient {
            http: reqwest::Client::new(),
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        }
    }

    async fn call<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<Option<T>, NotifyError> {
        let resp: ApiResponse<T> = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?
            .json()
            .await?;

        if resp.ok {
            Ok(resp.result)
        } else {
            Err(NotifyError::Api(resp.description.unwrap_or_else(|| format!("{method} failed"))))
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        self.call::<_, serde_json::Value>("sendMessage", &SendMessage { chat_id, text }, Duration::from_secs(15))
            .await
            .map(|_| ())
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, NotifyError> {
        let body = GetUpdates { offset, timeout: timeout_secs, allowed_updates: &["message"] };
        let updates = self
            .call::<_, Vec<Update>>("getUpdates", &body, Duration::from_secs(timeout_secs + 10))
            .await?;

        Ok(updates.unwrap_or_default())
    }
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        self.send_message(chat_id, text).await
    }
}
