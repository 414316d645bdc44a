// Outbound event notifications (chat messages)
pub mod messages;
pub mod telegram;

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::TradeError;

pub use telegram::TelegramNotifier;

/// Delivers a formatted text event to a destination (chat id)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: &str, text: &str) -> Result<(), TradeError>;
}

/// Best-effort sender bound to one destination
///
/// Delivery failures are logged and reported as `false`; they never reach the caller
/// as an error.
#[derive(Clone)]
pub struct Alerts {
    notifier: Arc<dyn Notifier>,
    destination: String,
}

impl Alerts {
    pub fn new(notifier: Arc<dyn Notifier>, destination: impl Into<String>) -> Self {
        Self {
            notifier,
            destination: destination.into(),
        }
    }

    pub async fn post(&self, text: &str) -> bool {
        match self.notifier.send(&self.destination, text).await {
            Ok(()) => {
                tracing::debug!(destination = %self.destination, "Notification sent");
                true
            }
            Err(e) => {
                tracing::warn!(destination = %self.destination, error = %e, "Notification not delivered");
                false
            }
        }
    }
}

/// Writes events to the log instead of a chat (no Telegram token configured)
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, destination: &str, text: &str) -> Result<(), TradeError> {
        tracing::info!(destination = %destination, "{}", text);
        Ok(())
    }
}

/// Keeps every delivered message in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message texts in delivery order
    pub fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, destination: &str, text: &str) -> Result<(), TradeError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}
