use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Quote currency every tradeable pair must end with
pub const QUOTE_ASSET: &str = "USDT";

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Which of the two independent position slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    Spot,
    Futures,
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketType::Spot => write!(f, "spot"),
            MarketType::Futures => write!(f, "futures"),
        }
    }
}

/// Direction of a derivatives position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that opens this position
    pub fn entry_order(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

impl FromStr for PositionSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            other => Err(format!("Side must be LONG or SHORT, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// LOT_SIZE filter of a trading pair
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolFilters {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub step_size: Decimal,
    pub min_qty: Decimal,
}

/// One execution of an order, as reported in the order response or trade history
#[derive(Debug, Clone, PartialEq)]
pub struct TradeFill {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Immediate response to a market order submission
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: u64,
    pub symbol: String,
    pub side: OrderSide,
    pub fills: Vec<TradeFill>,
}

/// Order status as reported by the exchange after submission
#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub order_id: u64,
    pub executed_qty: Decimal,
    /// Average fill price, when the exchange has computed one
    pub avg_price: Option<Decimal>,
}

/// Derivatives position as reported by the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct FuturesPositionInfo {
    pub symbol: String,
    /// Signed size: positive long, negative short, zero flat
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Where the resolved fill price came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSource {
    ResponseFills,
    TradeHistory { attempt: u32 },
    OrderStatus,
    Ticker,
    Reference,
}

impl fmt::Display for FillSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillSource::ResponseFills => write!(f, "response fills"),
            FillSource::TradeHistory { attempt } => write!(f, "trade history (attempt {})", attempt),
            FillSource::OrderStatus => write!(f, "order status"),
            FillSource::Ticker => write!(f, "ticker"),
            FillSource::Reference => write!(f, "pre-order reference"),
        }
    }
}

/// Resolved average fill price and quantity of an executed order
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub source: FillSource,
}

/// Result of a market order after fill-price resolution
#[derive(Debug, Clone)]
pub struct Execution {
    pub symbol: String,
    pub order_id: u64,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub source: FillSource,
}

/// Command input for opening a spot position
#[derive(Debug, Clone, PartialEq)]
pub struct SpotOrderRequest {
    pub pair: String,
    /// Quote currency to spend
    pub amount: Decimal,
    pub profit_target: Decimal,
    pub stop_loss: Option<Decimal>,
}

/// Command input for opening a derivatives position
#[derive(Debug, Clone, PartialEq)]
pub struct FuturesOrderRequest {
    pub pair: String,
    pub side: PositionSide,
    /// Margin in quote currency
    pub amount: Decimal,
    pub profit_target: Decimal,
    pub leverage: u8,
    pub stop_loss: Option<Decimal>,
}

/// Why a monitor stopped watching its position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    ProfitTarget,
    StopLoss,
    ClosedExternally,
    ErrorLimit,
    CloseFailed,
    Stopped,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitReason::ProfitTarget => "profit target",
            ExitReason::StopLoss => "stop loss",
            ExitReason::ClosedExternally => "closed externally",
            ExitReason::ErrorLimit => "error limit",
            ExitReason::CloseFailed => "close failed",
            ExitReason::Stopped => "stopped",
        };
        write!(f, "{}", label)
    }
}

/// A single tracked position (one per market type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub market: MarketType,
    pub symbol: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub profit_target: Decimal,
    pub stop_loss: Option<Decimal>,
    /// Derivatives only
    pub side: Option<PositionSide>,
    /// Derivatives only
    pub leverage: Option<u8>,
    /// Margin or spend in quote currency
    pub invested: Decimal,
    pub running: bool,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Base asset of the pair (BTCUSDT -> BTC)
    pub fn base_asset(&self) -> &str {
        base_asset(&self.symbol)
    }

    /// Direction used for P&L; spot positions are always long
    pub fn direction(&self) -> PositionSide {
        self.side.unwrap_or(PositionSide::Long)
    }
}

/// Strip the quote suffix from a pair symbol
pub fn base_asset(symbol: &str) -> &str {
    symbol.strip_suffix(QUOTE_ASSET).unwrap_or(symbol)
}
