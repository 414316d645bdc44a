//! Per-position polling loop.
//!
//! A monitor owns one claimed slot. Each cycle it reads P&L, checks the profit and
//! stop thresholds, and watches for the position disappearing on the exchange.
//! Every way out of the loop releases the slot and posts exactly one notification.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use super::executor::OrderExecutor;
use super::pnl::{realized_pnl, FuturesPnl, PnlEngine};
use super::position_store::PositionSlot;
use crate::error::TradeError;
use crate::models::{Execution, ExitReason, MarketType, Position};
use crate::notify::{messages, Alerts};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Spot only: how often the wallet balance is re-read
    pub balance_check_interval: Duration,
    pub max_consecutive_errors: u32,
    /// Derivatives size drift that triggers a local correction
    pub quantity_tolerance: Decimal,
    /// Derivatives entry-price drift that triggers a local correction
    pub entry_tolerance: Decimal,
    /// Spot balance below this share of the recorded quantity means sold elsewhere
    pub external_close_ratio: Decimal,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            balance_check_interval: Duration::from_secs(10),
            max_consecutive_errors: 5,
            quantity_tolerance: dec!(0.001),
            entry_tolerance: dec!(0.00001),
            external_close_ratio: dec!(0.01),
        }
    }
}

/// How a monitor ended
#[derive(Debug, Clone)]
pub struct MonitorOutcome {
    pub reason: ExitReason,
    /// Position as last seen by the monitor (after any reconciliation)
    pub position: Position,
    pub exit: Option<Execution>,
    pub realized_pnl: Option<Decimal>,
}

impl MonitorOutcome {
    pub(crate) fn without_exit(reason: ExitReason, position: Position) -> Self {
        Self {
            reason,
            position,
            exit: None,
            realized_pnl: None,
        }
    }
}

/// Inclusive profit-target / stop-loss check
pub fn check_thresholds(
    pnl: Decimal,
    profit_target: Decimal,
    stop_loss: Option<Decimal>,
) -> Option<ExitReason> {
    if pnl >= profit_target {
        return Some(ExitReason::ProfitTarget);
    }
    match stop_loss {
        Some(stop) if pnl <= -stop => Some(ExitReason::StopLoss),
        _ => None,
    }
}

/// Corrected (quantity, entry price) when the exchange disagrees beyond tolerance
pub fn reconcile_target(
    local_quantity: Decimal,
    local_entry: Decimal,
    remote: &FuturesPnl,
    config: &MonitorConfig,
) -> Option<(Decimal, Decimal)> {
    let quantity_drift = (remote.quantity - local_quantity).abs() > config.quantity_tolerance;
    let entry_drift = (remote.entry_price - local_entry).abs() > config.entry_tolerance;
    (quantity_drift || entry_drift).then_some((remote.quantity, remote.entry_price))
}

/// Sleep between cycles that returns early when the slot is released
struct PollTimer {
    running: watch::Receiver<bool>,
    slot: Arc<PositionSlot>,
    id: Uuid,
}

impl PollTimer {
    async fn pause(&mut self, duration: Duration) {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return,
                changed = self.running.changed() => {
                    if changed.is_err() || !self.slot.is_owned_by(self.id) {
                        return;
                    }
                }
            }
        }
    }
}

enum Cycle {
    Continue,
    Exit(MonitorOutcome),
}

pub struct PositionMonitor {
    slot: Arc<PositionSlot>,
    id: Uuid,
    position: Position,
    executor: Arc<OrderExecutor>,
    pnl: Arc<PnlEngine>,
    alerts: Alerts,
    config: MonitorConfig,
}

impl PositionMonitor {
    pub fn new(
        slot: Arc<PositionSlot>,
        position: Position,
        executor: Arc<OrderExecutor>,
        pnl: Arc<PnlEngine>,
        alerts: Alerts,
        config: MonitorConfig,
    ) -> Self {
        Self {
            slot,
            id: position.id,
            position,
            executor,
            pnl,
            alerts,
            config,
        }
    }

    pub async fn run(mut self) -> MonitorOutcome {
        tracing::info!(
            market = %self.position.market,
            symbol = %self.position.symbol,
            entry_price = %self.position.entry_price,
            quantity = %self.position.quantity,
            profit_target = %self.position.profit_target,
            stop_loss = ?self.position.stop_loss,
            "Monitoring position"
        );

        let mut timer = PollTimer {
            running: self.slot.subscribe(),
            slot: Arc::clone(&self.slot),
            id: self.id,
        };
        let mut consecutive_errors = 0u32;
        let mut last_balance_check: Option<Instant> = None;

        let outcome = loop {
            if !self.slot.is_owned_by(self.id) {
                break self.stopped().await;
            }

            let cycle = match self.position.market {
                MarketType::Spot => self.spot_cycle(&mut last_balance_check).await,
                MarketType::Futures => self.futures_cycle().await,
            };

            match cycle {
                Ok(Cycle::Exit(outcome)) => break outcome,
                Ok(Cycle::Continue) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        symbol = %self.position.symbol,
                        attempt = consecutive_errors,
                        max = self.config.max_consecutive_errors,
                        error = %e,
                        "Monitor cycle failed"
                    );
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        break self.error_limit(consecutive_errors, &e).await;
                    }
                }
            }

            timer.pause(self.config.poll_interval).await;
        };

        tracing::info!(
            market = %outcome.position.market,
            symbol = %outcome.position.symbol,
            reason = %outcome.reason,
            realized_pnl = ?outcome.realized_pnl,
            "Monitor terminated"
        );
        outcome
    }

    async fn spot_cycle(
        &mut self,
        last_balance_check: &mut Option<Instant>,
    ) -> Result<Cycle, TradeError> {
        let due = last_balance_check
            .map_or(true, |at| at.elapsed() >= self.config.balance_check_interval);

        if due {
            *last_balance_check = Some(Instant::now());
            let balance = self
                .executor
                .spot_account()
                .asset_balance(self.position.base_asset())
                .await
                .map_err(TradeError::data)?;

            if balance < self.position.quantity * self.config.external_close_ratio {
                tracing::warn!(
                    symbol = %self.position.symbol,
                    balance = %balance,
                    quantity = %self.position.quantity,
                    "Spot position closed externally"
                );
                self.slot.release(self.id);
                self.alerts
                    .post(&messages::closed_externally(&self.position, Some(balance)))
                    .await;
                return Ok(Cycle::Exit(MonitorOutcome::without_exit(
                    ExitReason::ClosedExternally,
                    self.position.clone(),
                )));
            }
        }

        let snapshot = self.pnl.spot(&self.position).await?;
        tracing::debug!(
            symbol = %self.position.symbol,
            price = %snapshot.current_price,
            pnl = %snapshot.pnl,
            target = %self.position.profit_target,
            "Spot poll"
        );

        match check_thresholds(
            snapshot.pnl,
            self.position.profit_target,
            self.position.stop_loss,
        ) {
            Some(trigger) => Ok(Cycle::Exit(
                self.close_spot(trigger, snapshot.pnl, snapshot.current_price)
                    .await,
            )),
            None => Ok(Cycle::Continue),
        }
    }

    async fn close_spot(
        &mut self,
        trigger: ExitReason,
        pnl: Decimal,
        last_price: Decimal,
    ) -> MonitorOutcome {
        tracing::info!(symbol = %self.position.symbol, trigger = %trigger, pnl = %pnl, "Closing spot position");

        // Fees can leave slightly less than the recorded fill in the wallet
        let quantity = match self
            .executor
            .spot_account()
            .asset_balance(self.position.base_asset())
            .await
        {
            Ok(balance) if balance < self.position.quantity => balance,
            Ok(_) => self.position.quantity,
            Err(e) => {
                tracing::warn!(symbol = %self.position.symbol, error = %e, "Balance read before sell failed, using recorded quantity");
                self.position.quantity
            }
        };

        let result = self
            .executor
            .close_spot(&self.position.symbol, quantity, last_price)
            .await;
        self.finish_close(trigger, pnl, result).await
    }

    async fn futures_cycle(&mut self) -> Result<Cycle, TradeError> {
        let snapshot = self.pnl.futures(&self.position).await?;

        if snapshot.position_closed {
            return Ok(Cycle::Exit(self.closed_externally().await));
        }

        if let Some((quantity, entry_price)) = reconcile_target(
            self.position.quantity,
            self.position.entry_price,
            &snapshot,
            &self.config,
        ) {
            tracing::info!(
                symbol = %self.position.symbol,
                quantity_from = %self.position.quantity,
                quantity_to = %quantity,
                entry_from = %self.position.entry_price,
                entry_to = %entry_price,
                "Reconciled position with exchange"
            );
            self.position.quantity = quantity;
            self.position.entry_price = entry_price;
            self.slot.reconcile(self.id, quantity, entry_price);
        }

        tracing::debug!(
            symbol = %self.position.symbol,
            mark_price = %snapshot.mark_price,
            unrealized_pnl = %snapshot.unrealized_pnl,
            quantity = %snapshot.quantity,
            target = %self.position.profit_target,
            "Futures poll"
        );

        match check_thresholds(
            snapshot.unrealized_pnl,
            self.position.profit_target,
            self.position.stop_loss,
        ) {
            Some(trigger) => {
                tracing::info!(symbol = %self.position.symbol, trigger = %trigger, pnl = %snapshot.unrealized_pnl, "Closing futures position");
                let result = self.executor.close_futures(&self.position.symbol).await;
                if let Err(TradeError::NoOpenPosition(_)) = result {
                    return Ok(Cycle::Exit(self.closed_externally().await));
                }
                Ok(Cycle::Exit(
                    self.finish_close(trigger, snapshot.unrealized_pnl, result)
                        .await,
                ))
            }
            None => Ok(Cycle::Continue),
        }
    }

    async fn finish_close(
        &mut self,
        trigger: ExitReason,
        pnl: Decimal,
        result: Result<Execution, TradeError>,
    ) -> MonitorOutcome {
        self.slot.release(self.id);

        match result {
            Ok(exit) => {
                // Spot realizes what was actually sold; derivatives use the
                // reconciled size since the close flattens the whole position
                let quantity = match self.position.market {
                    MarketType::Spot => exit.quantity,
                    MarketType::Futures => self.position.quantity,
                };
                let realized = realized_pnl(
                    self.position.direction(),
                    self.position.entry_price,
                    exit.price,
                    quantity,
                );

                self.alerts
                    .post(&messages::position_closed(
                        &self.position,
                        trigger,
                        &exit,
                        realized,
                    ))
                    .await;

                MonitorOutcome {
                    reason: trigger,
                    position: self.position.clone(),
                    exit: Some(exit),
                    realized_pnl: Some(realized),
                }
            }
            Err(e) => {
                tracing::error!(
                    symbol = %self.position.symbol,
                    trigger = %trigger,
                    error = %e,
                    "Close failed, position left open on exchange"
                );
                self.alerts
                    .post(&messages::close_failed(&self.position, trigger, pnl, &e))
                    .await;
                MonitorOutcome::without_exit(ExitReason::CloseFailed, self.position.clone())
            }
        }
    }

    async fn closed_externally(&mut self) -> MonitorOutcome {
        tracing::warn!(symbol = %self.position.symbol, "Futures position closed externally");
        self.slot.release(self.id);
        self.alerts
            .post(&messages::closed_externally(&self.position, None))
            .await;
        MonitorOutcome::without_exit(ExitReason::ClosedExternally, self.position.clone())
    }

    async fn error_limit(&mut self, failures: u32, last_error: &TradeError) -> MonitorOutcome {
        tracing::error!(
            symbol = %self.position.symbol,
            failures,
            error = %last_error,
            "Too many consecutive monitor errors, giving up"
        );
        self.slot.release(self.id);
        self.alerts
            .post(&messages::error_limit(
                &self.position,
                failures,
                &last_error.to_string(),
            ))
            .await;
        MonitorOutcome::without_exit(ExitReason::ErrorLimit, self.position.clone())
    }

    async fn stopped(&mut self) -> MonitorOutcome {
        tracing::info!(symbol = %self.position.symbol, "Monitoring stopped externally");
        self.alerts
            .post(&messages::monitoring_stopped(&self.position))
            .await;
        self.position.running = false;
        MonitorOutcome::without_exit(ExitReason::Stopped, self.position.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PaperExchange;
    use crate::execution::position_store::PositionSlot;
    use crate::models::PositionSide;
    use crate::notify::MemoryNotifier;
    use chrono::Utc;

    #[test]
    fn test_thresholds_are_inclusive() {
        assert_eq!(
            check_thresholds(dec!(0.5), dec!(0.5), None),
            Some(ExitReason::ProfitTarget)
        );
        assert_eq!(
            check_thresholds(dec!(-1.00), dec!(2), Some(dec!(1))),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(check_thresholds(dec!(-0.9999), dec!(2), Some(dec!(1))), None);
        assert_eq!(check_thresholds(dec!(-50), dec!(2), None), None);
    }

    fn remote(quantity: Decimal, entry_price: Decimal) -> FuturesPnl {
        FuturesPnl {
            mark_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            position_amt: quantity,
            entry_price,
            quantity,
            position_closed: false,
        }
    }

    #[test]
    fn test_reconcile_quantity_tolerance() {
        let config = MonitorConfig::default();

        assert_eq!(
            reconcile_target(dec!(10.0), dec!(2000), &remote(dec!(10.002), dec!(2000)), &config),
            Some((dec!(10.002), dec!(2000)))
        );
        assert_eq!(
            reconcile_target(dec!(10.0), dec!(2000), &remote(dec!(10.0005), dec!(2000)), &config),
            None
        );
    }

    #[test]
    fn test_reconcile_entry_tolerance() {
        let config = MonitorConfig::default();

        assert_eq!(
            reconcile_target(dec!(1), dec!(2000), &remote(dec!(1), dec!(2000.5)), &config),
            Some((dec!(1), dec!(2000.5)))
        );
        assert_eq!(
            reconcile_target(dec!(1), dec!(2000), &remote(dec!(1), dec!(2000.000005)), &config),
            None
        );
    }

    struct Harness {
        exchange: PaperExchange,
        notifier: MemoryNotifier,
        slot: Arc<PositionSlot>,
        monitor: PositionMonitor,
    }

    fn harness(exchange: PaperExchange, position: Position) -> Harness {
        let spot = Arc::new(exchange.spot());
        let futures = Arc::new(exchange.futures());
        let executor = Arc::new(OrderExecutor::new(spot.clone(), futures.clone()));
        let pnl = Arc::new(PnlEngine::new(spot, futures));
        let notifier = MemoryNotifier::new();
        let alerts = Alerts::new(Arc::new(notifier.clone()), "chat");

        let slot = Arc::new(PositionSlot::new(position.market));
        let position = slot.try_claim().unwrap().commit(position);
        let monitor = PositionMonitor::new(
            slot.clone(),
            position,
            executor,
            pnl,
            alerts,
            MonitorConfig::default(),
        );

        Harness {
            exchange,
            notifier,
            slot,
            monitor,
        }
    }

    fn spot_harness() -> Harness {
        let exchange = PaperExchange::new();
        exchange.list_symbol("BTCUSDT", dec!(0.00001), dec!(0.00001));
        exchange.set_spot_price("BTCUSDT", dec!(40000));
        exchange.set_balance("BTC", dec!(0.0005));

        harness(
            exchange,
            Position {
                id: Uuid::nil(),
                market: MarketType::Spot,
                symbol: "BTCUSDT".to_string(),
                entry_price: dec!(40000),
                quantity: dec!(0.0005),
                profit_target: dec!(0.5),
                stop_loss: None,
                side: None,
                leverage: None,
                invested: dec!(20),
                running: true,
                opened_at: Utc::now(),
            },
        )
    }

    fn futures_harness() -> Harness {
        let exchange = PaperExchange::new();
        exchange.list_symbol("ETHUSDT", dec!(0.001), dec!(0.001));
        exchange.set_futures_price("ETHUSDT", dec!(2000));
        exchange.set_futures_wallet(dec!(100));
        exchange.set_futures_position("ETHUSDT", dec!(0.05), dec!(2000));

        harness(
            exchange,
            Position {
                id: Uuid::nil(),
                market: MarketType::Futures,
                symbol: "ETHUSDT".to_string(),
                entry_price: dec!(2000),
                quantity: dec!(0.05),
                profit_target: dec!(2),
                stop_loss: Some(dec!(1)),
                side: Some(PositionSide::Long),
                leverage: Some(10),
                invested: dec!(10),
                running: true,
                opened_at: Utc::now(),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_exhaustion_sends_no_order() {
        let h = spot_harness();
        h.exchange.fail_reads(5);

        let outcome = h.monitor.run().await;

        assert_eq!(outcome.reason, ExitReason::ErrorLimit);
        assert!(h.exchange.orders().is_empty());
        assert!(!h.slot.is_running());
        assert_eq!(h.notifier.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_below_limit_recover() {
        let h = spot_harness();
        h.exchange.fail_reads(4);
        h.exchange.set_spot_price("BTCUSDT", dec!(41000));

        let outcome = h.monitor.run().await;

        // 4 failures, then a clean cycle hits the target
        assert_eq!(outcome.reason, ExitReason::ProfitTarget);
        assert_eq!(h.exchange.orders().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_release_wakes_monitor() {
        let h = spot_harness();
        let slot = h.slot.clone();
        let handle = tokio::spawn(h.monitor.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        slot.force_release();
        let outcome = handle.await.unwrap();

        assert_eq!(outcome.reason, ExitReason::Stopped);
        assert!(h.exchange.orders().is_empty());
        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Monitoring Stopped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_failure_terminates_and_releases() {
        let h = spot_harness();
        h.exchange.set_spot_price("BTCUSDT", dec!(41000));
        h.exchange.reject_next_order("Market is closed.");

        let outcome = h.monitor.run().await;

        assert_eq!(outcome.reason, ExitReason::CloseFailed);
        assert!(!h.slot.is_running());
        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Market is closed."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spot_balance_rechecked_every_ten_seconds() {
        let h = spot_harness();
        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(h.monitor.run());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.exchange.balance_reads(), 1);
        h.exchange.set_balance("BTC", dec!(0));

        // Price polls continue in between without touching the balance
        tokio::time::sleep_until(start + Duration::from_secs(8) + Duration::from_millis(500)).await;
        assert!(h.slot.is_running());
        assert_eq!(h.exchange.balance_reads(), 1);

        let outcome = handle.await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(outcome.reason, ExitReason::ClosedExternally);
        assert!(elapsed >= Duration::from_secs(10), "ended after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(12), "ended after {:?}", elapsed);
        assert_eq!(h.exchange.balance_reads(), 2);
        assert!(h.exchange.orders().is_empty());
        assert!(!h.slot.is_running());

        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Position Closed Externally"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_futures_flat_on_poll_ends_without_order() {
        let h = futures_harness();
        h.exchange
            .set_futures_position("ETHUSDT", Decimal::ZERO, Decimal::ZERO);

        let outcome = h.monitor.run().await;

        assert_eq!(outcome.reason, ExitReason::ClosedExternally);
        assert!(outcome.exit.is_none());
        assert!(outcome.realized_pnl.is_none());
        assert!(h.exchange.orders().is_empty());
        assert!(!h.slot.is_running());

        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Position Closed Externally"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_futures_flattened_before_close_ends_without_order() {
        let h = futures_harness();
        // (1980 - 2000) * 0.05 = -1, exactly the stop
        h.exchange.set_futures_price("ETHUSDT", dec!(1980));
        // The poll sees the position, the close read finds it gone
        h.exchange.flatten_after_reads(1);

        let outcome = h.monitor.run().await;

        assert_eq!(outcome.reason, ExitReason::ClosedExternally);
        assert!(outcome.exit.is_none());
        assert!(h.exchange.orders().is_empty());
        assert!(!h.slot.is_running());

        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Position Closed Externally"));
        assert!(!messages[0].contains("STOP LOSS"));
    }
}
