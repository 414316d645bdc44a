//! In-memory exchange for dry runs and tests.
//!
//! One [`PaperExchange`] holds the whole simulated account; [`PaperExchange::spot`]
//! and [`PaperExchange::futures`] hand out the two market views that implement
//! [`SpotAccount`] and [`FuturesAccount`]. Market orders fill instantly at the
//! current price. A handful of fault knobs make the fill-resolution fallbacks and
//! the monitor's error handling reachable.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ExchangeError, FuturesAccount, MarketVenue, SpotAccount};
use crate::models::{
    base_asset, Candle, FuturesPositionInfo, MarketType, OrderAck, OrderSide, OrderStatus,
    SymbolFilters, TradeFill, QUOTE_ASSET,
};

/// An order the paper exchange accepted
#[derive(Debug, Clone, PartialEq)]
pub struct PaperOrder {
    pub order_id: u64,
    pub market: MarketType,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
}

#[derive(Default)]
struct PaperState {
    spot_prices: HashMap<String, Decimal>,
    futures_prices: HashMap<String, Decimal>,
    filters: HashMap<String, SymbolFilters>,
    candles: HashMap<String, Vec<Candle>>,
    balances: HashMap<String, Decimal>,
    futures_wallet: Decimal,
    /// symbol -> (signed amount, entry price)
    futures_positions: HashMap<String, (Decimal, Decimal)>,
    leverage: HashMap<String, u8>,
    orders: Vec<PaperOrder>,
    trades: HashMap<u64, Vec<TradeFill>>,
    transfers: Vec<Decimal>,
    next_order_id: u64,

    reject_next_order: Option<String>,
    failing_reads: u32,
    omit_response_fills: bool,
    hidden_trade_queries: u32,
    trade_queries: u32,
    balance_reads: u32,
    /// Position reads left before the derivatives position is flattened
    flatten_after_reads: Option<u32>,
    status_without_avg: bool,
}

impl PaperState {
    fn take_read_failure(&mut self) -> Result<(), ExchangeError> {
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(ExchangeError::Api {
                status: 503,
                code: -1001,
                msg: "Internal error; unable to process your request. Please try again."
                    .to_string(),
            });
        }
        Ok(())
    }

    fn price(&self, market: MarketType, symbol: &str) -> Result<Decimal, ExchangeError> {
        let prices = match market {
            MarketType::Spot => &self.spot_prices,
            MarketType::Futures => &self.futures_prices,
        };
        prices
            .get(symbol)
            .copied()
            .ok_or_else(|| invalid_symbol())
    }

    fn check_lot_size(&self, symbol: &str, quantity: Decimal) -> Result<(), ExchangeError> {
        let filters = self.filters.get(symbol).ok_or_else(invalid_symbol)?;
        let off_step = !filters.step_size.is_zero()
            && !(quantity % filters.step_size).is_zero();
        if quantity < filters.min_qty || quantity <= Decimal::ZERO || off_step {
            return Err(ExchangeError::Api {
                status: 400,
                code: -1013,
                msg: "Filter failure: LOT_SIZE".to_string(),
            });
        }
        Ok(())
    }

    fn record_order(
        &mut self,
        market: MarketType,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> OrderAck {
        self.next_order_id += 1;
        let order_id = self.next_order_id;
        let fill = TradeFill { price, quantity };

        self.orders.push(PaperOrder {
            order_id,
            market,
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
        });
        self.trades.insert(order_id, vec![fill.clone()]);

        let fills = if market == MarketType::Spot && !self.omit_response_fills {
            vec![fill]
        } else {
            Vec::new()
        };

        OrderAck {
            order_id,
            symbol: symbol.to_string(),
            side,
            fills,
        }
    }

    fn order_status(&self, order_id: u64) -> Result<OrderStatus, ExchangeError> {
        let order = self
            .orders
            .iter()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| ExchangeError::Api {
                status: 400,
                code: -2013,
                msg: "Order does not exist.".to_string(),
            })?;

        Ok(OrderStatus {
            order_id,
            executed_qty: order.quantity,
            avg_price: (!self.status_without_avg).then_some(order.price),
        })
    }

    fn order_trades(&mut self, order_id: u64) -> Vec<TradeFill> {
        self.trade_queries += 1;
        if self.hidden_trade_queries > 0 {
            self.hidden_trade_queries -= 1;
            return Vec::new();
        }
        self.trades.get(&order_id).cloned().unwrap_or_default()
    }
}

fn invalid_symbol() -> ExchangeError {
    ExchangeError::Api {
        status: 400,
        code: -1121,
        msg: "Invalid symbol.".to_string(),
    }
}

fn insufficient_balance() -> ExchangeError {
    ExchangeError::Api {
        status: 400,
        code: -2010,
        msg: "Account has insufficient balance for requested action.".to_string(),
    }
}

/// Simulated account shared by the spot and futures views
#[derive(Clone, Default)]
pub struct PaperExchange {
    state: Arc<Mutex<PaperState>>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn spot(&self) -> PaperSpot {
        PaperSpot {
            exchange: self.clone(),
        }
    }

    pub fn futures(&self) -> PaperFutures {
        PaperFutures {
            exchange: self.clone(),
        }
    }

    /// List a pair on both markets with its LOT_SIZE filter
    pub fn list_symbol(&self, symbol: &str, step_size: Decimal, min_qty: Decimal) {
        self.state().filters.insert(
            symbol.to_string(),
            SymbolFilters {
                symbol: symbol.to_string(),
                base_asset: base_asset(symbol).to_string(),
                quote_asset: QUOTE_ASSET.to_string(),
                step_size,
                min_qty,
            },
        );
    }

    pub fn set_spot_price(&self, symbol: &str, price: Decimal) {
        self.state().spot_prices.insert(symbol.to_string(), price);
    }

    pub fn set_futures_price(&self, symbol: &str, price: Decimal) {
        self.state().futures_prices.insert(symbol.to_string(), price);
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.state().candles.insert(symbol.to_string(), candles);
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.state().balances.insert(asset.to_string(), amount);
    }

    pub fn balance(&self, asset: &str) -> Decimal {
        self.state()
            .balances
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn set_futures_wallet(&self, amount: Decimal) {
        self.state().futures_wallet = amount;
    }

    pub fn futures_wallet(&self) -> Decimal {
        self.state().futures_wallet
    }

    /// Overwrite the exchange-side derivatives position
    pub fn set_futures_position(&self, symbol: &str, amount: Decimal, entry_price: Decimal) {
        self.state()
            .futures_positions
            .insert(symbol.to_string(), (amount, entry_price));
    }

    pub fn leverage(&self, symbol: &str) -> Option<u8> {
        self.state().leverage.get(symbol).copied()
    }

    pub fn orders(&self) -> Vec<PaperOrder> {
        self.state().orders.clone()
    }

    pub fn transfers(&self) -> Vec<Decimal> {
        self.state().transfers.clone()
    }

    /// Reject the next order submission with the given exchange message
    pub fn reject_next_order(&self, msg: &str) {
        self.state().reject_next_order = Some(msg.to_string());
    }

    /// Fail the next `n` account/market reads
    pub fn fail_reads(&self, n: u32) {
        self.state().failing_reads = n;
    }

    /// Spot order responses come back without the per-fill breakdown
    pub fn omit_response_fills(&self, omit: bool) {
        self.state().omit_response_fills = omit;
    }

    /// The next `n` trade-history queries return nothing
    pub fn hide_trades_for(&self, n: u32) {
        self.state().hidden_trade_queries = n;
    }

    pub fn trade_queries(&self) -> u32 {
        self.state().trade_queries
    }

    /// Spot wallet balance reads served so far
    pub fn balance_reads(&self) -> u32 {
        self.state().balance_reads
    }

    /// Answer `n` more position reads normally, then close the position
    /// as if someone flattened it on the exchange
    pub fn flatten_after_reads(&self, n: u32) {
        self.state().flatten_after_reads = Some(n);
    }

    /// Order status reports no average price
    pub fn status_without_avg(&self, hide: bool) {
        self.state().status_without_avg = hide;
    }

    fn take_rejection(state: &mut PaperState) -> Result<(), ExchangeError> {
        match state.reject_next_order.take() {
            Some(msg) => Err(ExchangeError::Api {
                status: 400,
                code: -2010,
                msg,
            }),
            None => Ok(()),
        }
    }
}

/// Spot view of a [`PaperExchange`]
#[derive(Clone)]
pub struct PaperSpot {
    exchange: PaperExchange,
}

/// Futures view of a [`PaperExchange`]
#[derive(Clone)]
pub struct PaperFutures {
    exchange: PaperExchange,
}

fn symbol_filters(state: &PaperState, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
    state
        .filters
        .get(symbol)
        .cloned()
        .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
}

fn klines(state: &PaperState, symbol: &str, limit: u16) -> Vec<Candle> {
    let candles = state.candles.get(symbol).cloned().unwrap_or_default();
    let skip = candles.len().saturating_sub(limit as usize);
    candles.into_iter().skip(skip).collect()
}

#[async_trait]
impl MarketVenue for PaperSpot {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let mut state = self.exchange.state();
        state.take_read_failure()?;
        state.price(MarketType::Spot, symbol)
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        symbol_filters(&self.exchange.state(), symbol)
    }

    async fn klines(
        &self,
        symbol: &str,
        _interval: &str,
        limit: u16,
    ) -> Result<Vec<Candle>, ExchangeError> {
        Ok(klines(&self.exchange.state(), symbol, limit))
    }

    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        let mut state = self.exchange.state();
        PaperExchange::take_rejection(&mut state)?;
        state.check_lot_size(symbol, quantity)?;
        let price = state.price(MarketType::Spot, symbol)?;
        let asset = base_asset(symbol).to_string();
        let notional = price * quantity;

        let quote = state.balances.get(QUOTE_ASSET).copied().unwrap_or_default();
        let held = state.balances.get(&asset).copied().unwrap_or_default();
        match side {
            OrderSide::Buy => {
                if quote < notional {
                    return Err(insufficient_balance());
                }
                state.balances.insert(QUOTE_ASSET.to_string(), quote - notional);
                state.balances.insert(asset, held + quantity);
            }
            OrderSide::Sell => {
                if held < quantity {
                    return Err(insufficient_balance());
                }
                state.balances.insert(asset, held - quantity);
                state.balances.insert(QUOTE_ASSET.to_string(), quote + notional);
            }
        }

        Ok(state.record_order(MarketType::Spot, symbol, side, quantity, price))
    }

    async fn order_status(
        &self,
        _symbol: &str,
        order_id: u64,
    ) -> Result<OrderStatus, ExchangeError> {
        self.exchange.state().order_status(order_id)
    }

    async fn order_trades(
        &self,
        _symbol: &str,
        order_id: u64,
    ) -> Result<Vec<TradeFill>, ExchangeError> {
        Ok(self.exchange.state().order_trades(order_id))
    }
}

#[async_trait]
impl SpotAccount for PaperSpot {
    fn as_venue(&self) -> &dyn MarketVenue {
        self
    }

    async fn asset_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let mut state = self.exchange.state();
        state.balance_reads += 1;
        state.take_read_failure()?;
        Ok(state.balances.get(asset).copied().unwrap_or_default())
    }

    async fn transfer_to_futures(
        &self,
        asset: &str,
        amount: Decimal,
    ) -> Result<(), ExchangeError> {
        let mut state = self.exchange.state();
        let available = state.balances.get(asset).copied().unwrap_or_default();
        if available < amount {
            return Err(insufficient_balance());
        }
        state.balances.insert(asset.to_string(), available - amount);
        state.futures_wallet += amount;
        state.transfers.push(amount);
        Ok(())
    }
}

#[async_trait]
impl MarketVenue for PaperFutures {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let mut state = self.exchange.state();
        state.take_read_failure()?;
        state.price(MarketType::Futures, symbol)
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        symbol_filters(&self.exchange.state(), symbol)
    }

    async fn klines(
        &self,
        symbol: &str,
        _interval: &str,
        limit: u16,
    ) -> Result<Vec<Candle>, ExchangeError> {
        Ok(klines(&self.exchange.state(), symbol, limit))
    }

    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck, ExchangeError> {
        let mut state = self.exchange.state();
        PaperExchange::take_rejection(&mut state)?;
        state.check_lot_size(symbol, quantity)?;
        let price = state.price(MarketType::Futures, symbol)?;

        let (amount, entry) = state
            .futures_positions
            .get(symbol)
            .copied()
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));
        let delta = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };
        let increases = amount.is_zero() || amount.is_sign_negative() == delta.is_sign_negative();

        if increases {
            let leverage = Decimal::from(state.leverage.get(symbol).copied().unwrap_or(1));
            if state.futures_wallet < price * quantity / leverage {
                return Err(ExchangeError::Api {
                    status: 400,
                    code: -2019,
                    msg: "Margin is insufficient.".to_string(),
                });
            }
        }

        let new_amount = amount + delta;
        let new_entry = if new_amount.is_zero() {
            Decimal::ZERO
        } else if increases {
            (entry * amount.abs() + price * quantity) / new_amount.abs()
        } else {
            entry
        };
        state
            .futures_positions
            .insert(symbol.to_string(), (new_amount, new_entry));

        Ok(state.record_order(MarketType::Futures, symbol, side, quantity, price))
    }

    async fn order_status(
        &self,
        _symbol: &str,
        order_id: u64,
    ) -> Result<OrderStatus, ExchangeError> {
        self.exchange.state().order_status(order_id)
    }

    async fn order_trades(
        &self,
        _symbol: &str,
        order_id: u64,
    ) -> Result<Vec<TradeFill>, ExchangeError> {
        Ok(self.exchange.state().order_trades(order_id))
    }
}

#[async_trait]
impl FuturesAccount for PaperFutures {
    fn as_venue(&self) -> &dyn MarketVenue {
        self
    }

    async fn set_leverage(&self, symbol: &str, leverage: u8) -> Result<(), ExchangeError> {
        let mut state = self.exchange.state();
        if !state.filters.contains_key(symbol) {
            return Err(invalid_symbol());
        }
        state.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn position_info(&self, symbol: &str) -> Result<FuturesPositionInfo, ExchangeError> {
        let mut state = self.exchange.state();
        state.take_read_failure()?;
        match state.flatten_after_reads {
            Some(0) => {
                state.flatten_after_reads = None;
                state.futures_positions.remove(symbol);
            }
            Some(n) => state.flatten_after_reads = Some(n - 1),
            None => {}
        }
        let mark_price = state.price(MarketType::Futures, symbol)?;
        let (position_amt, entry_price) = state
            .futures_positions
            .get(symbol)
            .copied()
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        Ok(FuturesPositionInfo {
            symbol: symbol.to_string(),
            position_amt,
            entry_price,
            mark_price,
            unrealized_pnl: (mark_price - entry_price) * position_amt,
        })
    }

    async fn available_balance(&self, _asset: &str) -> Result<Decimal, ExchangeError> {
        let mut state = self.exchange.state();
        state.take_read_failure()?;
        Ok(state.futures_wallet)
    }
}
