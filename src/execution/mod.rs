// Order execution, position tracking and monitoring
pub mod engine;
pub mod executor;
pub mod fill_resolver;
pub mod monitor;
pub mod pnl;
pub mod position_store;
pub mod quantity;

pub use engine::{LivePnl, OpenedPosition, PositionStatus, TradingEngine};
pub use executor::OrderExecutor;
pub use fill_resolver::{FillContext, FillResolver, ResolutionChain, RetrySchedule};
pub use monitor::{check_thresholds, MonitorConfig, MonitorOutcome, PositionMonitor};
pub use pnl::{realized_pnl, spot_pnl, FuturesPnl, PnlEngine, SpotPnl};
pub use position_store::{PositionSlot, PositionStore, SlotClaim};
pub use quantity::floor_to_step;
