use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::execution::Notifier;
use crate::pipeline::Shutdown;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u64 = 30;
const ERROR_BACKOFF_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
    pub from: Option<User>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub username: Option<String>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Telegram bot that fans notifications out to every chat that sent /start
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
    /// chat id -> display name
    subscribers: Arc<RwLock<HashMap<i64, String>>>,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(TELEGRAM_API_BASE, token)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(LONG_POLL_SECS + 10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Apply a /start or /stop command; other messages are ignored
    pub async fn handle_update(&self, update: &Update) {
        let Some(message) = &update.message else {
            return;
        };
        let name = message
            .from
            .as_ref()
            .and_then(|u| u.username.clone())
            .unwrap_or_else(|| message.chat.id.to_string());

        match message.text.as_deref().map(str::trim) {
            Some("/start") => {
                self.subscribers.write().await.insert(message.chat.id, name.clone());
                tracing::info!(chat_id = message.chat.id, user = %name, "Telegram user subscribed");
            }
            Some("/stop") => {
                self.subscribers.write().await.remove(&message.chat.id);
                tracing::info!(chat_id = message.chat.id, user = %name, "Telegram user unsubscribed");
            }
            _ => {}
        }
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let response: ApiResponse<Vec<Update>> = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", timeout_secs.to_string())])
            .send()
            .await
            .context("getUpdates request failed")?
            .json()
            .await
            .context("Failed to parse getUpdates response")?;

        if !response.ok {
            anyhow::bail!(
                "getUpdates rejected: {}",
                response.description.unwrap_or_default()
            );
        }
        Ok(response.result.unwrap_or_default())
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&SendMessage { chat_id, text })
            .send()
            .await
            .context("sendMessage request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("sendMessage returned {}: {}", status, body);
        }
        Ok(())
    }

    /// Long-poll for commands until shutdown
    pub async fn serve(&self, mut shutdown: Shutdown) {
        tracing::info!("🤖 Telegram bot listening for /start and /stop");
        let mut offset = 0;

        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.get_updates(offset, LONG_POLL_SECS) => polled,
            };

            match polled {
                Ok(updates) => {
                    for update in &updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("Telegram polling failed: {:#}, retrying in {}s", e, ERROR_BACKOFF_SECS);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(ERROR_BACKOFF_SECS)) => {}
                    }
                }
            }
        }

        tracing::info!("Telegram bot stopped");
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) {
        let recipients: Vec<(i64, String)> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect();

        for (chat_id, name) in recipients {
            if let Err(e) = self.send_message(chat_id, text).await {
                tracing::warn!(chat_id, user = %name, "Failed to notify user: {:#}", e);
            }
        }
    }
}

/// Notifier used when no bot is configured
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) {
        tracing::info!(target: "tickbot::notify", "{}", text);
    }
}
