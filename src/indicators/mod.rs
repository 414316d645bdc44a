// Technical indicators module
// EMA and ATR feed the pre-trade market filter

pub mod atr;
pub mod market_filter;
pub mod moving_average;

pub use atr::{calculate_atr, true_ranges};
pub use market_filter::{MarketCondition, MarketFilter, Trend};
pub use moving_average::{calculate_ema, calculate_sma};
