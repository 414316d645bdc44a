use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Notifier;
use crate::error::TradeError;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API sender (`sendMessage` with HTML parse mode)
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Deserialize)]
struct BotResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>) -> Result<Self, TradeError> {
        Self::with_base_url(TELEGRAM_API_BASE, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, TradeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TradeError::Config(format!("telegram client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, destination: &str, text: &str) -> Result<(), TradeError> {
        if destination.is_empty() {
            return Err(TradeError::NotifyFailure("no chat id configured".to_string()));
        }

        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let response = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: destination,
                text,
                parse_mode: "HTML",
            })
            .send()
            .await
            .map_err(|e| TradeError::NotifyFailure(e.without_url().to_string()))?;

        let status = response.status();
        let body: BotResponse = response
            .json()
            .await
            .map_err(|e| TradeError::NotifyFailure(format!("http {}: {}", status, e)))?;

        if !body.ok {
            return Err(TradeError::NotifyFailure(
                body.description
                    .unwrap_or_else(|| format!("telegram answered http {}", status)),
            ));
        }

        Ok(())
    }
}
