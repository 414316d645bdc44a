//! Pre-trade trend/volatility gate.
//!
//! Classifies a pair as tradeable, or as sideways / low-volatility, from recent
//! 5-minute candles. The result is advisory: opening a position never depends on it.

use serde::Serialize;
use std::fmt;

use super::{calculate_atr, calculate_ema};
use crate::api::MarketVenue;
use crate::models::Candle;

pub const INSUFFICIENT_DATA: &str = "Insufficient data for technical analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "BULLISH"),
            Trend::Bearish => write!(f, "BEARISH"),
        }
    }
}

/// Outcome of the market-condition check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketCondition {
    pub valid: bool,
    /// Empty when valid
    pub reason: String,
    /// (EMA fast - EMA slow) / price, in percent
    pub ema_slope: Option<f64>,
    /// ATR / price, in percent
    pub atr_percent: Option<f64>,
    pub trend: Option<Trend>,
}

impl MarketCondition {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
            ema_slope: None,
            atr_percent: None,
            trend: None,
        }
    }
}

/// EMA crossover slope and ATR thresholds
#[derive(Debug, Clone)]
pub struct MarketFilter {
    pub fast_period: usize,
    pub slow_period: usize,
    pub atr_period: usize,
    /// |slope| below this (percent) is sideways
    pub sideways_threshold: f64,
    /// ATR percent below this is low volatility
    pub volatility_threshold: f64,
    pub interval: String,
    pub lookback: u16,
}

impl Default for MarketFilter {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 20,
            atr_period: 14,
            sideways_threshold: 0.15,
            volatility_threshold: 0.10,
            interval: "5m".to_string(),
            lookback: 100,
        }
    }
}

impl MarketFilter {
    /// Classify candles ordered oldest to newest
    pub fn evaluate(&self, candles: &[Candle]) -> MarketCondition {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let (Some(fast), Some(slow), Some(atr)) = (
            calculate_ema(&closes, self.fast_period),
            calculate_ema(&closes, self.slow_period),
            calculate_atr(candles, self.atr_period),
        ) else {
            return MarketCondition::rejected(INSUFFICIENT_DATA);
        };

        let current_price = match closes.last() {
            Some(price) if *price > 0.0 => *price,
            _ => return MarketCondition::rejected(INSUFFICIENT_DATA),
        };

        let ema_slope = (fast - slow) / current_price * 100.0;
        let atr_percent = atr / current_price * 100.0;

        let mut issues = Vec::new();
        if ema_slope.abs() < self.sideways_threshold {
            issues.push(format!(
                "Sideways market detected (EMA slope: {:.3}%)",
                ema_slope
            ));
        }
        if atr_percent < self.volatility_threshold {
            issues.push(format!("Low volatility (ATR: {:.3}%)", atr_percent));
        }

        MarketCondition {
            valid: issues.is_empty(),
            reason: issues.join(" | "),
            ema_slope: Some(ema_slope),
            atr_percent: Some(atr_percent),
            trend: Some(if ema_slope > 0.0 {
                Trend::Bullish
            } else {
                Trend::Bearish
            }),
        }
    }

    /// Fetch recent candles and classify them; a fetch failure is reported, not raised
    pub async fn check(&self, venue: &dyn MarketVenue, symbol: &str) -> MarketCondition {
        match venue.klines(symbol, &self.interval, self.lookback).await {
            Ok(candles) => {
                let condition = self.evaluate(&candles);
                tracing::info!(
                    symbol = %symbol,
                    valid = condition.valid,
                    ema_slope = ?condition.ema_slope,
                    atr_percent = ?condition.atr_percent,
                    "Market condition"
                );
                condition
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Market condition check failed");
                MarketCondition::rejected(format!("Error: {}", e))
            }
        }
    }
}
