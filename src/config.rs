//! Layered settings: built-in defaults, then `tradepilot.toml`, then
//! `TRADEPILOT_*` environment variables (`__` between sections).
//!
//! The plain variables `BINANCE_API_KEY`, `BINANCE_SECRET_KEY`, `TELEGRAM_TOKEN`
//! and `TELEGRAM_CHAT_ID` win over everything else when set.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::api::binance::{Credentials, FUTURES_API_BASE, SPOT_API_BASE};
use crate::error::Result;
use crate::execution::MonitorConfig;

pub const CONFIG_FILE: &str = "tradepilot";
const ENV_PREFIX: &str = "TRADEPILOT";

/// Plain environment variables mapped onto setting keys
const LEGACY_ENV: &[(&str, &str)] = &[
    ("BINANCE_API_KEY", "binance.api_key"),
    ("BINANCE_SECRET_KEY", "binance.secret_key"),
    ("TELEGRAM_TOKEN", "telegram.token"),
    ("TELEGRAM_CHAT_ID", "telegram.chat_id"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub binance: BinanceSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    pub monitor: MonitorSettings,
    pub log_filter: String,
}

#[derive(Clone, Deserialize)]
pub struct BinanceSettings {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub spot_base_url: String,
    pub futures_base_url: String,
    pub recv_window_ms: u64,
    pub requests_per_second: u32,
}

impl std::fmt::Debug for BinanceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .field("spot_base_url", &self.spot_base_url)
            .field("futures_base_url", &self.futures_base_url)
            .field("recv_window_ms", &self.recv_window_ms)
            .field("requests_per_second", &self.requests_per_second)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramSettings {
    pub token: Option<String>,
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    pub poll_interval_secs: u64,
    pub balance_check_secs: u64,
    pub max_consecutive_errors: u32,
}

impl Settings {
    /// Read settings from the working directory and the process environment
    pub fn load() -> Result<Self> {
        Self::build(
            Some(CONFIG_FILE),
            Environment::with_prefix(ENV_PREFIX),
            |key| std::env::var(key).ok().filter(|v| !v.is_empty()),
        )
    }

    fn build(
        file: Option<&str>,
        env: Environment,
        legacy: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("binance.spot_base_url", SPOT_API_BASE)?
            .set_default("binance.futures_base_url", FUTURES_API_BASE)?
            .set_default("binance.recv_window_ms", 5000)?
            .set_default("binance.requests_per_second", 10)?
            .set_default("monitor.poll_interval_secs", 2)?
            .set_default("monitor.balance_check_secs", 10)?
            .set_default("monitor.max_consecutive_errors", 5)?
            .set_default("log_filter", "tradepilot=info")?;

        if let Some(name) = file {
            builder = builder.add_source(File::with_name(name).required(false));
        }

        builder = builder.add_source(
            env.prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in LEGACY_ENV {
            builder = builder.set_override_option(*key, legacy(var))?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// API key pair, when both halves are configured
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.binance.api_key, &self.binance.secret_key) {
            (Some(api_key), Some(secret_key)) if !api_key.is_empty() && !secret_key.is_empty() => {
                Some(Credentials {
                    api_key: api_key.clone(),
                    secret_key: secret_key.clone(),
                })
            }
            _ => None,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.monitor.poll_interval_secs),
            balance_check_interval: Duration::from_secs(self.monitor.balance_check_secs),
            max_consecutive_errors: self.monitor.max_consecutive_errors,
            ..MonitorConfig::default()
        }
    }
}
