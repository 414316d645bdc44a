//! Binance REST clients (spot and USDⓈ-M futures).
//!
//! Both clients share [`BinanceRest`], which handles rate limiting,
//! HMAC-SHA256 request signing and error payload decoding.

mod futures;
mod spot;

pub use futures::BinanceFutures;
pub use spot::BinanceSpot;

use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::ExchangeError;
use crate::models::{Candle, SymbolFilters};

pub const SPOT_API_BASE: &str = "https://api.binance.com";
pub const FUTURES_API_BASE: &str = "https://fapi.binance.com";

const REQUEST_TIMEOUT_SECS: u64 = 10;

type HmacSha256 = Hmac<Sha256>;

/// API key pair for signed endpoints
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .field("secret_key", &"***")
            .finish()
    }
}

/// Shared HTTP plumbing for one Binance API host
#[derive(Clone)]
pub(crate) struct BinanceRest {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    recv_window_ms: u64,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

/// Error body returned by Binance on rejected requests
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

impl BinanceRest {
    pub(crate) fn new(
        base_url: &str,
        credentials: Option<Credentials>,
        recv_window_ms: u64,
        requests_per_second: u32,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms,
            rate_limiter,
        })
    }

    /// Unsigned GET
    pub(crate) async fn public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let query = encode_params(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        self.rate_limiter.until_ready().await;
        let response = self.client.get(&url).send().await?;
        decode_response(response).await
    }

    /// Signed request; parameters travel in the query string for every method
    pub(crate) async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(ExchangeError::MissingCredentials)?;

        let mut query = encode_params(params);
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "recvWindow={}&timestamp={}",
            self.recv_window_ms,
            Utc::now().timestamp_millis()
        ));

        let signature = sign(&credentials.secret_key, &query)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query, signature
        );

        self.rate_limiter.until_ready().await;
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;
        decode_response(response).await
    }
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex-encoded HMAC-SHA256 of the query string
pub(crate) fn sign(secret: &str, payload: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Decode(format!("invalid secret key: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

async fn decode_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ExchangeError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(err) => ExchangeError::Api {
                status: status.as_u16(),
                code: err.code,
                msg: err.msg,
            },
            Err(_) => ExchangeError::Api {
                status: status.as_u16(),
                code: 0,
                msg: body,
            },
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| ExchangeError::Decode(format!("{}: {}", e, truncate(&body, 200))))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Render a quantity the way the order endpoints accept it (no trailing zeros)
pub(crate) fn format_quantity(quantity: Decimal) -> String {
    quantity.normalize().to_string()
}

// ============== Shared response types ==============

#[derive(Debug, Deserialize)]
pub(crate) struct TickerPrice {
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
pub(crate) enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: Decimal, min_qty: Decimal },
    #[serde(other)]
    Other,
}

impl ExchangeInfo {
    /// Extract the LOT_SIZE filter of one symbol
    pub(crate) fn filters_for(self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        let info = self
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;

        let (step_size, min_qty) = info
            .filters
            .iter()
            .find_map(|f| match f {
                SymbolFilter::LotSize { step_size, min_qty } => Some((*step_size, *min_qty)),
                SymbolFilter::Other => None,
            })
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        Ok(SymbolFilters {
            symbol: info.symbol,
            base_asset: info.base_asset,
            quote_asset: info.quote_asset,
            step_size,
            min_qty,
        })
    }
}

/// Kline rows are heterogeneous arrays: `[openTime, "open", "high", "low", "close", "volume", ...]`
pub(crate) fn parse_klines(
    symbol: &str,
    rows: Vec<Vec<serde_json::Value>>,
) -> Result<Vec<Candle>, ExchangeError> {
    rows.iter().map(|row| parse_kline(symbol, row)).collect()
}

fn parse_kline(symbol: &str, row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    let field = |idx: usize| -> Result<f64, ExchangeError> {
        row.get(idx)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| ExchangeError::Decode(format!("bad kline field {} in {:?}", idx, row)))
    };

    let open_time = row
        .first()
        .and_then(|v| v.as_i64())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or_else(|| ExchangeError::Decode(format!("bad kline open time in {:?}", row)))?;

    Ok(Candle {
        symbol: symbol.to_string(),
        open_time,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}
