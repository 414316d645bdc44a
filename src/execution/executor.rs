use rust_decimal::Decimal;
use std::sync::Arc;

use super::fill_resolver::{FillContext, ResolutionChain};
use super::quantity::floor_to_step;
use crate::api::{FuturesAccount, MarketVenue, SpotAccount};
use crate::error::{Result, TradeError};
use crate::models::{Execution, OrderSide, PositionSide};

/// Places market orders and resolves what they actually filled at
///
/// Order submission is never retried; only fill discovery is.
pub struct OrderExecutor {
    spot: Arc<dyn SpotAccount>,
    futures: Arc<dyn FuturesAccount>,
    spot_open_chain: ResolutionChain,
    spot_close_chain: ResolutionChain,
    futures_chain: ResolutionChain,
}

impl OrderExecutor {
    pub fn new(spot: Arc<dyn SpotAccount>, futures: Arc<dyn FuturesAccount>) -> Self {
        Self {
            spot,
            futures,
            spot_open_chain: ResolutionChain::spot_open(),
            spot_close_chain: ResolutionChain::spot_close(),
            futures_chain: ResolutionChain::futures(),
        }
    }

    pub fn spot_account(&self) -> &dyn SpotAccount {
        self.spot.as_ref()
    }

    pub fn futures_account(&self) -> &dyn FuturesAccount {
        self.futures.as_ref()
    }

    /// Market buy worth `amount` quote currency
    pub async fn open_spot(&self, symbol: &str, amount: Decimal) -> Result<Execution> {
        let venue = self.spot.as_venue();
        let price = venue.ticker_price(symbol).await.map_err(TradeError::data)?;
        if price <= Decimal::ZERO {
            return Err(TradeError::DataFetch(format!("no price for {}", symbol)));
        }
        let filters = venue
            .symbol_filters(symbol)
            .await
            .map_err(TradeError::data)?;

        let quantity = floor_to_step(amount / price, filters.step_size);
        if quantity <= Decimal::ZERO || quantity < filters.min_qty {
            return Err(TradeError::OrderFailure(format!(
                "${} buys {} {}, below the minimum {}",
                amount, quantity, filters.base_asset, filters.min_qty
            )));
        }

        tracing::info!(symbol = %symbol, price = %price, quantity = %quantity, "Submitting spot buy");
        self.submit(venue, &self.spot_open_chain, symbol, OrderSide::Buy, quantity, price)
            .await
    }

    /// Market sell of `quantity`, floored to the lot step
    ///
    /// `last_price` is only a fallback for fill discovery.
    pub async fn close_spot(
        &self,
        symbol: &str,
        quantity: Decimal,
        last_price: Decimal,
    ) -> Result<Execution> {
        let venue = self.spot.as_venue();
        let filters = venue
            .symbol_filters(symbol)
            .await
            .map_err(TradeError::data)?;

        let sell_qty = floor_to_step(quantity, filters.step_size);
        if sell_qty <= Decimal::ZERO || sell_qty < filters.min_qty {
            return Err(TradeError::InsufficientQuantity {
                quantity: sell_qty,
                min_qty: filters.min_qty,
            });
        }

        tracing::info!(symbol = %symbol, quantity = %sell_qty, "Submitting spot sell");
        self.submit(
            venue,
            &self.spot_close_chain,
            symbol,
            OrderSide::Sell,
            sell_qty,
            last_price,
        )
        .await
    }

    /// Open a derivatives position with `amount` margin at `leverage`
    pub async fn open_futures(
        &self,
        symbol: &str,
        side: PositionSide,
        amount: Decimal,
        leverage: u8,
    ) -> Result<Execution> {
        self.futures
            .set_leverage(symbol, leverage)
            .await
            .map_err(TradeError::order)?;

        let venue = self.futures.as_venue();
        let price = venue.ticker_price(symbol).await.map_err(TradeError::data)?;
        if price <= Decimal::ZERO {
            return Err(TradeError::DataFetch(format!("no price for {}", symbol)));
        }
        let filters = venue
            .symbol_filters(symbol)
            .await
            .map_err(TradeError::data)?;

        let notional = amount * Decimal::from(leverage);
        let mut quantity = floor_to_step(notional / price, filters.step_size);
        if quantity < filters.min_qty {
            // Margin is already committed, so size up to the smallest tradeable lot
            tracing::warn!(
                symbol = %symbol,
                quantity = %quantity,
                min_qty = %filters.min_qty,
                "Quantity below minimum, using minimum"
            );
            quantity = filters.min_qty;
        }
        if quantity <= Decimal::ZERO {
            return Err(TradeError::OrderFailure(format!(
                "computed quantity for {} is zero",
                symbol
            )));
        }

        tracing::info!(
            symbol = %symbol,
            side = %side,
            leverage,
            price = %price,
            quantity = %quantity,
            "Submitting futures open"
        );
        self.submit(
            venue,
            &self.futures_chain,
            symbol,
            side.entry_order(),
            quantity,
            price,
        )
        .await
    }

    /// Flatten the exchange-reported derivatives position
    pub async fn close_futures(&self, symbol: &str) -> Result<Execution> {
        let info = self
            .futures
            .position_info(symbol)
            .await
            .map_err(TradeError::data)?;

        if info.position_amt.is_zero() {
            return Err(TradeError::NoOpenPosition(symbol.to_string()));
        }

        let side = if info.position_amt > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let quantity = info.position_amt.abs();

        tracing::info!(
            symbol = %symbol,
            side = %side,
            quantity = %quantity,
            mark_price = %info.mark_price,
            "Submitting futures close"
        );
        self.submit(
            self.futures.as_venue(),
            &self.futures_chain,
            symbol,
            side,
            quantity,
            info.mark_price,
        )
        .await
    }

    async fn submit(
        &self,
        venue: &dyn MarketVenue,
        chain: &ResolutionChain,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reference_price: Decimal,
    ) -> Result<Execution> {
        let ack = venue
            .market_order(symbol, side, quantity)
            .await
            .map_err(|e| {
                tracing::error!(symbol = %symbol, side = %side, quantity = %quantity, error = %e, "Order rejected");
                TradeError::order(e)
            })?;

        let fill = chain
            .resolve(&FillContext {
                venue,
                symbol,
                ack: &ack,
                requested_qty: quantity,
                reference_price,
            })
            .await;

        tracing::info!(
            symbol = %symbol,
            order_id = ack.order_id,
            side = %side,
            price = %fill.price,
            quantity = %fill.quantity,
            source = %fill.source,
            "Order filled"
        );

        Ok(Execution {
            symbol: symbol.to_string(),
            order_id: ack.order_id,
            side,
            price: fill.price,
            quantity: fill.quantity,
            source: fill.source,
        })
    }
}
