//! Command surface: open, status and stop for the two position slots.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::executor::OrderExecutor;
use super::monitor::{MonitorConfig, MonitorOutcome, PositionMonitor};
use super::pnl::{FuturesPnl, PnlEngine, SpotPnl};
use super::position_store::{PositionSlot, PositionStore};
use crate::api::{ExchangeError, FuturesAccount, MarketVenue, SpotAccount};
use crate::error::{Result, TradeError};
use crate::indicators::{MarketCondition, MarketFilter};
use crate::models::{
    Execution, ExitReason, FuturesOrderRequest, MarketType, Position, SpotOrderRequest,
    QUOTE_ASSET,
};
use crate::notify::{messages, Alerts};
use crate::risk::OrderLimits;

/// A position that filled and is now being watched
pub struct OpenedPosition {
    pub position: Position,
    /// Advisory only; the trade went ahead regardless
    pub market: MarketCondition,
    /// Non-blocking validation warnings (e.g. high leverage)
    pub warnings: Vec<String>,
    /// Resolves when the monitor terminates
    pub monitor: JoinHandle<MonitorOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub enum LivePnl {
    Spot(SpotPnl),
    Futures(FuturesPnl),
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionStatus {
    pub position: Position,
    /// None when the live read failed
    pub live: Option<LivePnl>,
}

pub struct TradingEngine {
    store: Arc<PositionStore>,
    executor: Arc<OrderExecutor>,
    pnl: Arc<PnlEngine>,
    alerts: Alerts,
    filter: MarketFilter,
    limits: OrderLimits,
    monitor_config: MonitorConfig,
}

impl TradingEngine {
    pub fn new(
        spot: Arc<dyn SpotAccount>,
        futures: Arc<dyn FuturesAccount>,
        alerts: Alerts,
    ) -> Self {
        Self {
            store: Arc::new(PositionStore::new()),
            executor: Arc::new(OrderExecutor::new(spot.clone(), futures.clone())),
            pnl: Arc::new(PnlEngine::new(spot, futures)),
            alerts,
            filter: MarketFilter::default(),
            limits: OrderLimits::default(),
            monitor_config: MonitorConfig::default(),
        }
    }

    pub fn with_monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    pub fn with_limits(mut self, limits: OrderLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_filter(mut self, filter: MarketFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    pub fn is_running(&self, market: MarketType) -> bool {
        self.store.slot(market).is_running()
    }

    /// Market condition for a pair, without trading
    pub async fn analyze(&self, market: MarketType, pair: &str) -> MarketCondition {
        let venue = match market {
            MarketType::Spot => self.executor.spot_account().as_venue(),
            MarketType::Futures => self.executor.futures_account().as_venue(),
        };
        self.filter.check(venue, pair).await
    }

    pub async fn open_spot(&self, request: SpotOrderRequest) -> Result<OpenedPosition> {
        let report = self.limits.validate_spot(&request)?;
        let venue = self.executor.spot_account().as_venue();
        ensure_listed(venue, &request.pair).await?;

        let slot = self.store.slot(MarketType::Spot);
        let claim = slot.try_claim()?;
        let id = claim.id();

        let condition = self.filter.check(venue, &request.pair).await;
        if !condition.valid {
            tracing::warn!(symbol = %request.pair, reason = %condition.reason, "Market condition warning, proceeding");
        }

        let execution = self.executor.open_spot(&request.pair, request.amount).await?;

        let position = claim.commit(Position {
            id,
            market: MarketType::Spot,
            symbol: request.pair.clone(),
            entry_price: execution.price,
            quantity: execution.quantity,
            profit_target: request.profit_target,
            stop_loss: request.stop_loss,
            side: None,
            leverage: None,
            invested: request.amount,
            running: true,
            opened_at: chrono::Utc::now(),
        });

        Ok(self
            .start_monitor(slot, position, &execution, condition, report.warnings)
            .await)
    }

    pub async fn open_futures(&self, request: FuturesOrderRequest) -> Result<OpenedPosition> {
        let report = self.limits.validate_futures(&request)?;
        let venue = self.executor.futures_account().as_venue();
        ensure_listed(venue, &request.pair).await?;

        let slot = self.store.slot(MarketType::Futures);
        let claim = slot.try_claim()?;
        let id = claim.id();

        let condition = self.filter.check(venue, &request.pair).await;
        if !condition.valid {
            tracing::warn!(symbol = %request.pair, reason = %condition.reason, "Market condition warning, proceeding");
        }

        self.fund_margin(request.amount).await?;

        let execution = self
            .executor
            .open_futures(&request.pair, request.side, request.amount, request.leverage)
            .await?;

        let position = claim.commit(Position {
            id,
            market: MarketType::Futures,
            symbol: request.pair.clone(),
            entry_price: execution.price,
            quantity: execution.quantity,
            profit_target: request.profit_target,
            stop_loss: request.stop_loss,
            side: Some(request.side),
            leverage: Some(request.leverage),
            invested: request.amount,
            running: true,
            opened_at: chrono::Utc::now(),
        });

        Ok(self
            .start_monitor(slot, position, &execution, condition, report.warnings)
            .await)
    }

    /// Top up the derivatives wallet from spot so it holds at least `amount`
    async fn fund_margin(&self, amount: Decimal) -> Result<()> {
        let available = self
            .executor
            .futures_account()
            .available_balance(QUOTE_ASSET)
            .await
            .map_err(TradeError::data)?;
        if available >= amount {
            return Ok(());
        }

        let shortfall = amount - available;
        let spot = self
            .executor
            .spot_account()
            .asset_balance(QUOTE_ASSET)
            .await
            .map_err(TradeError::data)?;
        if spot < shortfall {
            return Err(TradeError::InsufficientBalance {
                needed: shortfall,
                spot,
                futures: available,
            });
        }

        tracing::info!(amount = %shortfall, "Transferring margin from spot to futures");
        self.executor
            .spot_account()
            .transfer_to_futures(QUOTE_ASSET, shortfall)
            .await
            .map_err(TradeError::order)
    }

    async fn start_monitor(
        &self,
        slot: &Arc<PositionSlot>,
        position: Position,
        execution: &Execution,
        market: MarketCondition,
        warnings: Vec<String>,
    ) -> OpenedPosition {
        if !position.running {
            // stop() landed between the claim and the fill
            tracing::warn!(
                market = %position.market,
                symbol = %position.symbol,
                order_id = execution.order_id,
                quantity = %position.quantity,
                "Position filled after monitoring was stopped, not monitoring"
            );
            self.alerts
                .post(&messages::fill_not_monitored(&position))
                .await;
            let outcome = MonitorOutcome::without_exit(ExitReason::Stopped, position.clone());
            return OpenedPosition {
                position,
                market,
                warnings,
                monitor: tokio::spawn(async move { outcome }),
            };
        }

        tracing::info!(
            market = %position.market,
            symbol = %position.symbol,
            order_id = execution.order_id,
            entry_price = %position.entry_price,
            quantity = %position.quantity,
            fill_source = %execution.source,
            "Position opened"
        );
        self.alerts
            .post(&messages::position_opened(
                &position,
                &market,
                self.monitor_config.poll_interval,
            ))
            .await;

        let monitor = PositionMonitor::new(
            Arc::clone(slot),
            position.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.pnl),
            self.alerts.clone(),
            self.monitor_config.clone(),
        );

        OpenedPosition {
            position,
            market,
            warnings,
            monitor: tokio::spawn(monitor.run()),
        }
    }

    pub async fn spot_status(&self) -> Option<PositionStatus> {
        let position = self.store.slot(MarketType::Spot).snapshot()?;
        let live = match self.pnl.spot(&position).await {
            Ok(snapshot) => Some(LivePnl::Spot(snapshot)),
            Err(e) => {
                tracing::warn!(symbol = %position.symbol, error = %e, "Live spot P&L unavailable");
                None
            }
        };
        Some(PositionStatus { position, live })
    }

    pub async fn futures_status(&self) -> Option<PositionStatus> {
        let position = self.store.slot(MarketType::Futures).snapshot()?;
        let live = match self.pnl.futures(&position).await {
            Ok(snapshot) => Some(LivePnl::Futures(snapshot)),
            Err(e) => {
                tracing::warn!(symbol = %position.symbol, error = %e, "Live futures P&L unavailable");
                None
            }
        };
        Some(PositionStatus { position, live })
    }

    /// Release a slot without closing anything on the exchange
    pub fn stop(&self, market: MarketType) -> Option<Position> {
        let released = self.store.slot(market).force_release();
        if released.is_some() {
            tracing::info!(market = %market, "Monitoring stop requested");
        }
        released
    }
}

async fn ensure_listed(venue: &dyn MarketVenue, pair: &str) -> Result<()> {
    match venue.symbol_filters(pair).await {
        Ok(_) => Ok(()),
        Err(ExchangeError::UnknownSymbol(_)) | Err(ExchangeError::Api { .. }) => Err(
            TradeError::Validation(vec![format!("Pair {} not found on Binance", pair)]),
        ),
        Err(e) => Err(TradeError::data(e)),
    }
}
