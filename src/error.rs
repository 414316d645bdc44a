use rust_decimal::Decimal;
use thiserror::Error;

use crate::api::ExchangeError;
use crate::models::MarketType;

/// Error kinds surfaced by the trading engine
///
/// Callers branch on the variant, never on the message text.
#[derive(Debug, Error)]
pub enum TradeError {
    /// Bad command input. Nothing was sent to the exchange.
    #[error("invalid input: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The exchange rejected an order submission (or a funding transfer).
    #[error("order failed: {0}")]
    OrderFailure(String),

    /// Floored sell quantity is below the exchange minimum, no order sent.
    #[error("quantity {quantity} is below minimum {min_qty}")]
    InsufficientQuantity { quantity: Decimal, min_qty: Decimal },

    #[error("no open position for {0}")]
    NoOpenPosition(String),

    /// Transient market/account read failure.
    #[error("data fetch failed: {0}")]
    DataFetch(String),

    #[error("notification failed: {0}")]
    NotifyFailure(String),

    /// The single slot for this market type is already running a position.
    #[error("a {0} position is already running")]
    SlotBusy(MarketType),

    #[error("insufficient balance: need ${needed:.2}, spot ${spot:.2}, futures ${futures:.2}")]
    InsufficientBalance {
        needed: Decimal,
        spot: Decimal,
        futures: Decimal,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl TradeError {
    /// Wrap an exchange read failure as a transient data error
    pub fn data(err: ExchangeError) -> Self {
        TradeError::DataFetch(err.to_string())
    }

    /// Wrap an exchange rejection of a submitted order
    pub fn order(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Api { msg, .. } => TradeError::OrderFailure(msg),
            other => TradeError::OrderFailure(other.to_string()),
        }
    }
}

impl From<::config::ConfigError> for TradeError {
    fn from(err: ::config::ConfigError) -> Self {
        TradeError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_joins_reasons() {
        let err = TradeError::Validation(vec![
            "Pair must end with USDT".to_string(),
            "Amount must be ≥ $5".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "invalid input: Pair must end with USDT; Amount must be ≥ $5"
        );
    }

    #[test]
    fn test_order_error_keeps_exchange_text() {
        let err = TradeError::order(ExchangeError::Api {
            status: 400,
            code: -2010,
            msg: "Account has insufficient balance for requested action.".to_string(),
        });
        assert!(matches!(
            err,
            TradeError::OrderFailure(ref msg) if msg.contains("insufficient balance")
        ));
    }
}
