// Risk management module: open-command input limits
pub mod validation;

pub use validation::{OrderLimits, ValidationReport};
