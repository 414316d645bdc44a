// Exchange collaborators: the traits the engine consumes and their implementations
pub mod binance;
pub mod paper;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{
    Candle, FuturesPositionInfo, OrderAck, OrderSide, OrderStatus, SymbolFilters, TradeFill,
};

pub use binance::{BinanceFutures, BinanceSpot};
pub use paper::PaperExchange;

/// Errors returned by exchange clients
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Exchange answered with an error payload (`{"code":…,"msg":…}`)
    #[error("exchange error {code} (http {status}): {msg}")]
    Api { status: u16, code: i64, msg: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("symbol {0} not found")]
    UnknownSymbol(String),

    #[error("API key and secret are required for signed endpoints")]
    MissingCredentials,
}

/// Market data and order endpoints shared by spot and derivatives
#[async_trait]
pub trait MarketVenue: Send + Sync {
    /// Latest traded price
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// LOT_SIZE metadata for a pair
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError>;

    /// Candles ordered oldest to newest
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Submit a market order for `quantity` base units
    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError>;

    async fn order_status(&self, symbol: &str, order_id: u64)
        -> Result<OrderStatus, ExchangeError>;

    /// Account trades belonging to one order
    async fn order_trades(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<Vec<TradeFill>, ExchangeError>;
}

/// Spot wallet
#[async_trait]
pub trait SpotAccount: MarketVenue {
    fn as_venue(&self) -> &dyn MarketVenue;

    /// Free plus locked balance of an asset
    async fn asset_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    /// Move quote currency from the spot wallet to the derivatives wallet
    async fn transfer_to_futures(&self, asset: &str, amount: Decimal)
        -> Result<(), ExchangeError>;
}

/// Derivatives (USDⓈ-M) account
#[async_trait]
pub trait FuturesAccount: MarketVenue {
    fn as_venue(&self) -> &dyn MarketVenue;

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ExchangeError>;

    async fn position_info(&self, symbol: &str) -> Result<FuturesPositionInfo, ExchangeError>;

    /// Available balance of an asset in the derivatives wallet
    async fn available_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;
}
