//! Fill-price discovery after a market order was accepted.
//!
//! Each [`FillResolver`] either produces a [`Fill`] or passes to the next one.
//! Resolvers never fail: read errors are logged and treated as "try next".

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;

use crate::api::MarketVenue;
use crate::models::{Fill, FillSource, OrderAck, TradeFill};

/// Everything a resolver may consult for one submitted order
pub struct FillContext<'a> {
    pub venue: &'a dyn MarketVenue,
    pub symbol: &'a str,
    pub ack: &'a OrderAck,
    pub requested_qty: Decimal,
    /// Price known before submission (pre-order ticker, last polled price or mark price)
    pub reference_price: Decimal,
}

#[async_trait]
pub trait FillResolver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, ctx: &FillContext<'_>) -> Option<Fill>;
}

/// Quantity-weighted average price and total quantity
pub fn weighted_average(fills: &[TradeFill]) -> Option<(Decimal, Decimal)> {
    let quantity: Decimal = fills.iter().map(|f| f.quantity).sum();
    if quantity <= Decimal::ZERO {
        return None;
    }
    let notional: Decimal = fills.iter().map(|f| f.price * f.quantity).sum();
    Some((notional / quantity, quantity))
}

/// Per-fill breakdown carried in the order response
pub struct ResponseFills;

#[async_trait]
impl FillResolver for ResponseFills {
    fn name(&self) -> &'static str {
        "response fills"
    }

    async fn resolve(&self, ctx: &FillContext<'_>) -> Option<Fill> {
        let (price, quantity) = weighted_average(&ctx.ack.fills)?;
        Some(Fill {
            price,
            quantity,
            source: FillSource::ResponseFills,
        })
    }
}

/// Waits between trade-history lookups
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySchedule {
    pub attempts: u32,
    /// Attempts (from the first) that use `fast_delay`
    pub fast_attempts: u32,
    pub fast_delay: Duration,
    pub slow_delay: Duration,
}

impl RetrySchedule {
    /// One lookup after a brief pause
    pub fn spot() -> Self {
        Self {
            attempts: 1,
            fast_attempts: 1,
            fast_delay: Duration::from_millis(500),
            slow_delay: Duration::from_millis(500),
        }
    }

    /// Derivatives trades can take a moment to show up
    pub fn futures() -> Self {
        Self {
            attempts: 8,
            fast_attempts: 3,
            fast_delay: Duration::from_millis(300),
            slow_delay: Duration::from_millis(500),
        }
    }

    /// Pause before the 1-based `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt <= self.fast_attempts {
            self.fast_delay
        } else {
            self.slow_delay
        }
    }
}

/// Account trades recorded against the order id
pub struct TradeHistory {
    pub schedule: RetrySchedule,
}

#[async_trait]
impl FillResolver for TradeHistory {
    fn name(&self) -> &'static str {
        "trade history"
    }

    async fn resolve(&self, ctx: &FillContext<'_>) -> Option<Fill> {
        for attempt in 1..=self.schedule.attempts {
            tokio::time::sleep(self.schedule.delay(attempt)).await;

            match ctx.venue.order_trades(ctx.symbol, ctx.ack.order_id).await {
                Ok(trades) => {
                    if let Some((price, quantity)) = weighted_average(&trades) {
                        return Some(Fill {
                            price,
                            quantity,
                            source: FillSource::TradeHistory { attempt },
                        });
                    }
                    tracing::debug!(
                        symbol = %ctx.symbol,
                        order_id = ctx.ack.order_id,
                        attempt,
                        "No trades yet for order"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        symbol = %ctx.symbol,
                        order_id = ctx.ack.order_id,
                        attempt,
                        error = %e,
                        "Trade lookup failed"
                    );
                }
            }
        }
        None
    }
}

/// Average price the exchange computed on the order itself
pub struct OrderStatusAverage;

#[async_trait]
impl FillResolver for OrderStatusAverage {
    fn name(&self) -> &'static str {
        "order status"
    }

    async fn resolve(&self, ctx: &FillContext<'_>) -> Option<Fill> {
        let status = match ctx.venue.order_status(ctx.symbol, ctx.ack.order_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(symbol = %ctx.symbol, order_id = ctx.ack.order_id, error = %e, "Order status lookup failed");
                return None;
            }
        };

        let price = status.avg_price.filter(|p| *p > Decimal::ZERO)?;
        let quantity = if status.executed_qty > Decimal::ZERO {
            status.executed_qty
        } else {
            ctx.requested_qty
        };

        Some(Fill {
            price,
            quantity,
            source: FillSource::OrderStatus,
        })
    }
}

/// Last resort: a quoted price with the requested quantity
pub struct TickerFallback {
    /// Use the pre-order reference before asking for a fresh quote
    pub reference_first: bool,
}

#[async_trait]
impl FillResolver for TickerFallback {
    fn name(&self) -> &'static str {
        "ticker"
    }

    async fn resolve(&self, ctx: &FillContext<'_>) -> Option<Fill> {
        let reference = Fill {
            price: ctx.reference_price,
            quantity: ctx.requested_qty,
            source: FillSource::Reference,
        };
        let usable_reference = ctx.reference_price > Decimal::ZERO;

        if self.reference_first && usable_reference {
            return Some(reference);
        }

        match ctx.venue.ticker_price(ctx.symbol).await {
            Ok(price) if price > Decimal::ZERO => Some(Fill {
                price,
                quantity: ctx.requested_qty,
                source: FillSource::Ticker,
            }),
            Ok(_) => usable_reference.then_some(reference),
            Err(e) => {
                tracing::warn!(symbol = %ctx.symbol, error = %e, "Ticker fallback failed");
                usable_reference.then_some(reference)
            }
        }
    }
}

/// Ordered list of resolvers, first answer wins
pub struct ResolutionChain {
    resolvers: Vec<Box<dyn FillResolver>>,
}

impl ResolutionChain {
    pub fn new(resolvers: Vec<Box<dyn FillResolver>>) -> Self {
        Self { resolvers }
    }

    /// Spot buy: the pre-order ticker is the final answer
    pub fn spot_open() -> Self {
        Self::new(vec![
            Box::new(ResponseFills),
            Box::new(TradeHistory {
                schedule: RetrySchedule::spot(),
            }),
            Box::new(OrderStatusAverage),
            Box::new(TickerFallback {
                reference_first: true,
            }),
        ])
    }

    /// Spot sell: no meaningful pre-trade average, so re-read the ticker
    pub fn spot_close() -> Self {
        Self::new(vec![
            Box::new(ResponseFills),
            Box::new(TradeHistory {
                schedule: RetrySchedule::spot(),
            }),
            Box::new(OrderStatusAverage),
            Box::new(TickerFallback {
                reference_first: false,
            }),
        ])
    }

    /// Derivatives acks carry no fills; poll trade history harder
    pub fn futures() -> Self {
        Self::new(vec![
            Box::new(TradeHistory {
                schedule: RetrySchedule::futures(),
            }),
            Box::new(OrderStatusAverage),
            Box::new(TickerFallback {
                reference_first: false,
            }),
        ])
    }

    pub async fn resolve(&self, ctx: &FillContext<'_>) -> Fill {
        for resolver in &self.resolvers {
            if let Some(fill) = resolver.resolve(ctx).await {
                return fill;
            }
            tracing::debug!(
                symbol = %ctx.symbol,
                order_id = ctx.ack.order_id,
                resolver = resolver.name(),
                "Fill not resolved, trying next"
            );
        }

        tracing::error!(
            symbol = %ctx.symbol,
            order_id = ctx.ack.order_id,
            reference_price = %ctx.reference_price,
            "Every fill resolver came up empty, using reference price"
        );
        Fill {
            price: ctx.reference_price,
            quantity: ctx.requested_qty,
            source: FillSource::Reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PaperExchange;
    use crate::models::OrderSide;
    use rust_decimal_macros::dec;

    fn exchange() -> PaperExchange {
        let exchange = PaperExchange::new();
        exchange.list_symbol("BTCUSDT", dec!(0.00001), dec!(0.00001));
        exchange.set_spot_price("BTCUSDT", dec!(40000));
        exchange.set_balance("USDT", dec!(100));
        exchange
    }

    async fn buy(exchange: &PaperExchange) -> OrderAck {
        exchange
            .spot()
            .market_order("BTCUSDT", OrderSide::Buy, dec!(0.0005))
            .await
            .unwrap()
    }

    #[test]
    fn test_weighted_average() {
        let fills = vec![
            TradeFill {
                price: dec!(100),
                quantity: dec!(1),
            },
            TradeFill {
                price: dec!(103),
                quantity: dec!(2),
            },
        ];
        assert_eq!(weighted_average(&fills), Some((dec!(102), dec!(3))));
        assert_eq!(weighted_average(&[]), None);
    }

    #[test]
    fn test_futures_schedule() {
        let schedule = RetrySchedule::futures();
        assert_eq!(schedule.delay(1), Duration::from_millis(300));
        assert_eq!(schedule.delay(3), Duration::from_millis(300));
        assert_eq!(schedule.delay(4), Duration::from_millis(500));
        assert_eq!(schedule.delay(8), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_fills_win_first() {
        let exchange = exchange();
        let spot = exchange.spot();
        let ack = buy(&exchange).await;
        let ctx = FillContext {
            venue: &spot,
            symbol: "BTCUSDT",
            ack: &ack,
            requested_qty: dec!(0.0005),
            reference_price: dec!(39990),
        };

        let fill = ResolutionChain::spot_open().resolve(&ctx).await;
        assert_eq!(fill.source, FillSource::ResponseFills);
        assert_eq!(fill.price, dec!(40000));
        assert_eq!(exchange.trade_queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_through_to_order_status() {
        let exchange = exchange();
        exchange.omit_response_fills(true);
        exchange.hide_trades_for(1);
        let spot = exchange.spot();
        let ack = buy(&exchange).await;
        let ctx = FillContext {
            venue: &spot,
            symbol: "BTCUSDT",
            ack: &ack,
            requested_qty: dec!(0.0005),
            reference_price: dec!(39990),
        };

        let fill = ResolutionChain::spot_open().resolve(&ctx).await;
        assert_eq!(fill.source, FillSource::OrderStatus);
        assert_eq!(fill.quantity, dec!(0.0005));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spot_open_degrades_to_reference() {
        let exchange = exchange();
        exchange.omit_response_fills(true);
        exchange.hide_trades_for(1);
        exchange.status_without_avg(true);
        let spot = exchange.spot();
        let ack = buy(&exchange).await;
        let ctx = FillContext {
            venue: &spot,
            symbol: "BTCUSDT",
            ack: &ack,
            requested_qty: dec!(0.0005),
            reference_price: dec!(39990),
        };

        let fill = ResolutionChain::spot_open().resolve(&ctx).await;
        assert_eq!(fill.source, FillSource::Reference);
        assert_eq!(fill.price, dec!(39990));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spot_close_prefers_fresh_ticker() {
        let exchange = exchange();
        exchange.omit_response_fills(true);
        exchange.hide_trades_for(1);
        exchange.status_without_avg(true);
        let spot = exchange.spot();
        let ack = buy(&exchange).await;
        exchange.set_spot_price("BTCUSDT", dec!(40100));
        let ctx = FillContext {
            venue: &spot,
            symbol: "BTCUSDT",
            ack: &ack,
            requested_qty: dec!(0.0005),
            reference_price: dec!(39990),
        };

        let fill = ResolutionChain::spot_close().resolve(&ctx).await;
        assert_eq!(fill.source, FillSource::Ticker);
        assert_eq!(fill.price, dec!(40100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trade_history_retries_until_visible() {
        let exchange = exchange();
        exchange.hide_trades_for(4);
        let spot = exchange.spot();
        let ack = buy(&exchange).await;
        let ctx = FillContext {
            venue: &spot,
            symbol: "BTCUSDT",
            ack: &ack,
            requested_qty: dec!(0.0005),
            reference_price: dec!(40000),
        };

        let resolver = TradeHistory {
            schedule: RetrySchedule::futures(),
        };
        let fill = resolver.resolve(&ctx).await.unwrap();
        assert_eq!(fill.source, FillSource::TradeHistory { attempt: 5 });
        assert_eq!(exchange.trade_queries(), 5);
    }
}
