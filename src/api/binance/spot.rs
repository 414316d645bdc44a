use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{
    format_quantity, parse_klines, BinanceRest, Credentials, ExchangeInfo, TickerPrice,
    SPOT_API_BASE,
};
use crate::api::{ExchangeError, MarketVenue, SpotAccount};
use crate::models::{Candle, OrderAck, OrderSide, OrderStatus, SymbolFilters, TradeFill};

/// Binance spot REST client
#[derive(Clone)]
pub struct BinanceSpot {
    rest: BinanceRest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotOrderResponse {
    order_id: u64,
    #[serde(default)]
    fills: Vec<SpotFill>,
}

#[derive(Debug, Deserialize)]
struct SpotFill {
    price: Decimal,
    qty: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpotOrderStatus {
    order_id: u64,
    executed_qty: Decimal,
    cummulative_quote_qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponse {
    tran_id: u64,
}

impl BinanceSpot {
    pub fn new(
        credentials: Option<Credentials>,
        recv_window_ms: u64,
        requests_per_second: u32,
    ) -> Result<Self, ExchangeError> {
        Self::with_base_url(SPOT_API_BASE, credentials, recv_window_ms, requests_per_second)
    }

    /// Point the client at a different host (testnet, local mock server)
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
impl MarketVenue for BinanceSpot {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let ticker: TickerPrice = self
            .rest
            .public("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(ticker.price)
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        let info: ExchangeInfo = self
            .rest
            .public("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await
            .map_err(|e| match e {
                // Spot answers an unknown symbol with -1121 "Invalid symbol."
                ExchangeError::Api { code: -1121, .. } => {
                    ExchangeError::UnknownSymbol(symbol.to_string())
                }
                other => other,
            })?;
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
                "/api/v3/klines",
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
        let response: SpotOrderResponse = self
            .rest
            .signed(
                Method::POST,
                "/api/v3/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("side", side.to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", format_quantity(quantity)),
                    ("newOrderRespType", "FULL".to_string()),
                ],
            )
            .await?;

        Ok(OrderAck {
            order_id: response.order_id,
            symbol: symbol.to_string(),
            side,
            fills: response
                .fills
                .into_iter()
                .map(|f| TradeFill {
                    price: f.price,
                    quantity: f.qty,
                })
                .collect(),
        })
    }

    async fn order_status(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<OrderStatus, ExchangeError> {
        let status: SpotOrderStatus = self
            .rest
            .signed(
                Method::GET,
                "/api/v3/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;

        // Spot reports cumulative quote spent rather than an average price
        let avg_price = if status.executed_qty > Decimal::ZERO {
            Some(status.cummulative_quote_qty / status.executed_qty)
        } else {
            None
        };

        Ok(OrderStatus {
            order_id: status.order_id,
            executed_qty: status.executed_qty,
            avg_price,
        })
    }

    async fn order_trades(
        &self,
        symbol: &str,
        order_id: u64,
    ) -> Result<Vec<TradeFill>, ExchangeError> {
        let trades: Vec<SpotFill> = self
            .rest
            .signed(
                Method::GET,
                "/api/v3/myTrades",
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
impl SpotAccount for BinanceSpot {
    fn as_venue(&self) -> &dyn MarketVenue {
        self
    }

    async fn asset_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let account: AccountInfo = self
            .rest
            .signed(Method::GET, "/api/v3/account", &[])
            .await?;

        Ok(account
            .balances
            .into_iter()
            .find(|b| b.asset == asset)
            .map(|b| b.free + b.locked)
            .unwrap_or(Decimal::ZERO))
    }

    async fn transfer_to_futures(
        &self,
        asset: &str,
        amount: Decimal,
    ) -> Result<(), ExchangeError> {
        // type=1: spot account -> USDⓈ-M futures account
        let response: TransferResponse = self
            .rest
            .signed(
                Method::POST,
                "/sapi/v1/futures/transfer",
                &[
                    ("asset", asset.to_string()),
                    ("amount", format_quantity(amount)),
                    ("type", "1".to_string()),
                ],
            )
            .await?;

        tracing::info!(
            asset = %asset,
            amount = %amount,
            tran_id = response.tran_id,
            "Transferred spot -> futures"
        );
        Ok(())
    }
}
