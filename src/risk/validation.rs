use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TradeError};
use crate::models::{FuturesOrderRequest, SpotOrderRequest, QUOTE_ASSET};

/// Input limits for open commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLimits {
    pub min_spot_amount: Decimal,
    pub min_futures_amount: Decimal,
    pub max_leverage: u8,
    /// Above this the open still proceeds, flagged as high risk
    pub risky_leverage: u8,
}

impl Default for OrderLimits {
    fn default() -> Self {
        Self {
            min_spot_amount: dec!(5),     // $5 spot minimum
            min_futures_amount: dec!(10), // $10 keeps futures quantities above lot minimums
            max_leverage: 20,
            risky_leverage: 10,
        }
    }
}

/// Accepted input, with any non-blocking warnings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl OrderLimits {
    pub fn validate_spot(&self, request: &SpotOrderRequest) -> Result<ValidationReport> {
        let mut errors = Vec::new();

        check_pair(&request.pair, &mut errors);
        if request.amount < self.min_spot_amount {
            errors.push(format!("Amount must be ≥ ${}", self.min_spot_amount));
        }
        check_targets(
            request.amount,
            request.profit_target,
            request.stop_loss,
            &mut errors,
        );

        finish(errors, Vec::new())
    }

    pub fn validate_futures(&self, request: &FuturesOrderRequest) -> Result<ValidationReport> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        check_pair(&request.pair, &mut errors);
        if request.amount < self.min_futures_amount {
            errors.push(format!(
                "Amount must be ≥ ${} for futures trading",
                self.min_futures_amount
            ));
        }
        check_targets(
            request.amount,
            request.profit_target,
            request.stop_loss,
            &mut errors,
        );

        if request.leverage < 1 || request.leverage > self.max_leverage {
            errors.push(format!(
                "Leverage must be between 1 and {}",
                self.max_leverage
            ));
        } else if request.leverage > self.risky_leverage {
            warnings.push(format!(
                "Leverage > {}x is very risky!",
                self.risky_leverage
            ));
        }

        finish(errors, warnings)
    }
}

fn check_pair(pair: &str, errors: &mut Vec<String>) {
    if !pair.ends_with(QUOTE_ASSET) || pair.len() == QUOTE_ASSET.len() {
        errors.push(format!("Pair must end with {}", QUOTE_ASSET));
    }
}

fn check_targets(
    amount: Decimal,
    profit: Decimal,
    stop_loss: Option<Decimal>,
    errors: &mut Vec<String>,
) {
    if profit <= Decimal::ZERO {
        errors.push("Profit must be > 0".to_string());
    }

    if let Some(stop) = stop_loss {
        if stop <= Decimal::ZERO {
            errors.push("Stop loss must be > 0".to_string());
        }
        if stop >= amount {
            errors.push("Stop loss must be less than investment amount".to_string());
        }
    }
}

fn finish(errors: Vec<String>, warnings: Vec<String>) -> Result<ValidationReport> {
    if errors.is_empty() {
        Ok(ValidationReport { warnings })
    } else {
        Err(TradeError::Validation(errors))
    }
}
