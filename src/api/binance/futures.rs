use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{
    format_quantity, parse_klines, BinanceRest, Credentials, ExchangeInfo, TickerPrice,
    FUTURES_API_BASE,
};
use crate::api::{ExchangeError, FuturesAccount, MarketVenue};
use crate::models::{
    Candle, FuturesPositionInfo, OrderAck, OrderSide, OrderStatus, SymbolFilters, TradeFill,
};

/// Binance USDⓈ-M futures REST client
#[derive(Clone)]
pub struct BinanceFutures {
    rest: BinanceRest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuturesOrderResponse {
    order_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuturesOrderStatus {
    order_id: u64,
    avg_price: Decimal,
    executed_qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct FuturesTrade {
    price: Decimal,
    qty: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: Decimal,
    entry_price: Decimal,
    mark_price: Decimal,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuturesBalance {
    asset: String,
    available_balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct LeverageResponse {
    leverage: u8,
}

impl BinanceFutures {
    pub fn new(
        credentials: Option<Credentials>,
        recv_window_ms: u64,
        requests_per_second: u32,
    ) -> Result<Self, ExchangeError> {
        Self::with_base_url(
            FUTURES_API_BASE,
            credentials,
            recv_window_ms,
            requests_per_second,
        )
    }

    pub fn with_base_url(
        base_url: &str,
        credentials: Option<Credentials>,
        recv_window_ms: u64,
        requests_per_second: u32,
    ) -> Result<Self, ExchangeError> {
        Ok(Self {
            rest: BinanceRest::new(base_url, credentials, recv_window_ms, requests_per_second)?,
        })
    }
}

#[async_trait]
impl MarketVenue for BinanceFutures {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let ticker: TickerPrice = self
            .rest
            .public("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(ticker.price)
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        // Futures exchangeInfo has no symbol filter; it always lists every contract
        let info: ExchangeInfo = self.rest.public("/fapi/v1/exchangeInfo", &[]).await?;
        info.filters_for(symbol)
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .rest
            .public(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        parse_klines(symbol, rows)
    }

    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        let response: FuturesOrderResponse = self
            .rest
            .signed(
                Method::POST,
                "/fapi/v1/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("side", side.to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", format_quantity(quantity)),
                ],
            )
            .await?;

        // Futures acks carry no per-fill breakdown
        Ok(OrderAck {
            order_id: response.order_id,
            symbol: symbol.to_string(),
            side,
            fills: Vec::new(),
        })
    }

    async fn order_status(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderStatus, ExchangeError> {
        let status: FuturesOrderStatus = self
            .rest
            .signed(
                Method::GET,
                "/fapi/v1/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;

        Ok(OrderStatus {
            order_id: status.order_id,
            executed_qty: status.executed_qty,
            avg_price: (status.avg_price > Decimal::ZERO).then_some(status.avg_price),
        })
    }

    async fn order_trades(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<Vec<TradeFill>, ExchangeError> {
        let trades: Vec<FuturesTrade> = self
            .rest
            .signed(
                Method::GET,
                "/fapi/v1/userTrades",
                &[
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;

        Ok(trades
            .into_iter()
            .map(|t| TradeFill {
                price: t.price,
                quantity: t.qty,
            })
            .collect())
    }
}

#[async_trait]
impl FuturesAccount for BinanceFutures {
    fn as_venue(&self) -> &dyn MarketVenue {
        self
    }

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ExchangeError> {
        let response: LeverageResponse = self
            .rest
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                &[
                    ("symbol", symbol.to_string()),
                    ("leverage", leverage.to_string()),
                ],
            )
            .await?;

        tracing::debug!(symbol = %symbol, leverage = response.leverage, "Leverage set");
        Ok(())
    }

    async fn position_info(&self, symbol: &str) -> Result<FuturesPositionInfo, ExchangeError> {
        let positions: Vec<PositionRisk> = self
            .rest
            .signed(
                Method::GET,
                "/fapi/v2/positionRisk",
                &[("symbol", symbol.to_string())],
            )
            .await?;

        // One-way mode returns a single row per symbol; no row means flat
        Ok(positions
            .into_iter()
            .find(|p| p.symbol == symbol)
            .map(|p| FuturesPositionInfo {
                symbol: p.symbol,
                position_amt: p.position_amt,
                entry_price: p.entry_price,
                mark_price: p.mark_price,
                unrealized_pnl: p.unrealized_profit,
            })
            .unwrap_or_else(|| FuturesPositionInfo {
                symbol: symbol.to_string(),
                position_amt: Decimal::ZERO,
                entry_price: Decimal::ZERO,
                mark_price: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
            }))
    }

    async fn available_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let balances: Vec<FuturesBalance> = self
            .rest
            .signed(Method::GET, "/fapi/v2/balance", &[])
            .await?;

        Ok(balances
            .into_iter()
            .find(|b| b.asset == asset)
            .map(|b| b.available_balance)
            .unwrap_or(Decimal::ZERO))
    }
}
