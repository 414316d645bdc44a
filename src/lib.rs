// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod notify;
pub mod risk;

// Re-export commonly used types
pub use error::{Result, TradeError};
pub use execution::TradingEngine;
pub use models::*;
