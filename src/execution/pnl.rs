use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::api::{FuturesAccount, SpotAccount};
use crate::error::{Result, TradeError};
use crate::models::{Position, PositionSide};

/// Unrealized spot P&L on the recorded quantity
pub fn spot_pnl(entry_price: Decimal, current_price: Decimal, quantity: Decimal) -> Decimal {
    (current_price - entry_price) * quantity
}

/// Realized amount of a closed position, signed by direction
pub fn realized_pnl(
    side: PositionSide,
    entry_price: Decimal,
    exit_price: Decimal,
    quantity: Decimal,
) -> Decimal {
    match side {
        PositionSide::Long => (exit_price - entry_price) * quantity,
        PositionSide::Short => (entry_price - exit_price) * quantity,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpotPnl {
    pub current_price: Decimal,
    pub market_value: Decimal,
    pub pnl: Decimal,
}

/// Exchange view of a derivatives position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuturesPnl {
    pub mark_price: Decimal,
    /// Exchange-computed; authoritative for target and stop checks
    pub unrealized_pnl: Decimal,
    /// Signed size as reported
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    /// Absolute size
    pub quantity: Decimal,
    pub position_closed: bool,
}

pub struct PnlEngine {
    spot: Arc<dyn SpotAccount>,
    futures: Arc<dyn FuturesAccount>,
}

impl PnlEngine {
    pub fn new(spot: Arc<dyn SpotAccount>, futures: Arc<dyn FuturesAccount>) -> Self {
        Self { spot, futures }
    }

    pub async fn spot(&self, position: &Position) -> Result<SpotPnl> {
        let current_price = self
            .spot
            .ticker_price(&position.symbol)
            .await
            .map_err(TradeError::data)?;

        Ok(SpotPnl {
            current_price,
            market_value: current_price * position.quantity,
            pnl: spot_pnl(position.entry_price, current_price, position.quantity),
        })
    }

    pub async fn futures(&self, position: &Position) -> Result<FuturesPnl> {
        let info = self
            .futures
            .position_info(&position.symbol)
            .await
            .map_err(TradeError::data)?;

        Ok(FuturesPnl {
            mark_price: info.mark_price,
            unrealized_pnl: info.unrealized_pnl,
            position_amt: info.position_amt,
            entry_price: info.entry_price,
            quantity: info.position_amt.abs(),
            position_closed: info.position_amt.is_zero(),
        })
    }
}
