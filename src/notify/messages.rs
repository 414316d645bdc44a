//! HTML-subset message templates for position events.
//!
//! Money is shown with 4 decimals, prices and quantities with 8.

use rust_decimal::Decimal;
use std::fmt::Write;
use std::time::Duration;

use crate::error::TradeError;
use crate::indicators::MarketCondition;
use crate::models::{Execution, ExitReason, MarketType, Position};

fn header(position: &Position) -> String {
    let mut text = format!("Pair: {}\n", position.symbol);
    if let Some(side) = position.side {
        let _ = writeln!(text, "Side: {}", side);
    }
    if let Some(leverage) = position.leverage {
        let _ = writeln!(text, "Leverage: {}x", leverage);
    }
    text
}

fn venue(position: &Position) -> &'static str {
    match position.market {
        MarketType::Spot => "Spot",
        MarketType::Futures => "Futures",
    }
}

pub fn position_opened(
    position: &Position,
    condition: &MarketCondition,
    poll_interval: Duration,
) -> String {
    let mut text = format!("✅ <b>{} Trade Started</b>\n\n", venue(position));
    text.push_str(&header(position));
    let _ = writeln!(text, "Entry Price: ${:.8}", position.entry_price);
    let _ = writeln!(text, "Quantity: {:.8}", position.quantity);
    let _ = writeln!(text, "Invested: ${:.4}", position.invested);
    let _ = writeln!(text, "Profit Target: ${:.4}", position.profit_target);
    match position.stop_loss {
        Some(stop) => {
            let _ = writeln!(text, "Stop Loss: ${:.4}", stop);
        }
        None => text.push_str("Stop Loss: none\n"),
    }
    if !condition.valid {
        let _ = write!(text, "\n⚠️ Market warning: {}\n", condition.reason);
    }
    let _ = write!(text, "\nMonitoring every {:?}.", poll_interval);
    text
}

/// Profit target or stop loss reached and the closing order filled
pub fn position_closed(
    position: &Position,
    reason: ExitReason,
    exit: &Execution,
    realized: Decimal,
) -> String {
    // Losses are reported as a positive amount under the loss label
    let (title, label, amount, footer) = match reason {
        ExitReason::StopLoss => (
            "🛑 <b>STOP LOSS TRIGGERED!</b>",
            "Actual Loss",
            -realized,
            "Position closed to prevent further losses.",
        ),
        _ => (
            "💰 <b>PROFIT TARGET HIT!</b>",
            "Actual Profit",
            realized,
            "✅ Trade completed successfully!",
        ),
    };

    let mut text = format!("{} ({})\n\n", title, venue(position));
    text.push_str(&header(position));
    let _ = writeln!(text, "Entry Price: ${:.8}", position.entry_price);
    let _ = writeln!(text, "Exit Price: ${:.8}", exit.price);
    let _ = writeln!(text, "Quantity: {:.8}", exit.quantity);
    let _ = writeln!(text, "{}: ${:.4}", label, amount);
    let _ = write!(text, "\n{}", footer);
    text
}

/// The close order for a triggered exit could not be placed
pub fn close_failed(
    position: &Position,
    trigger: ExitReason,
    pnl: Decimal,
    error: &TradeError,
) -> String {
    let mut text = format!("⚠️ <b>CLOSE ORDER FAILED!</b> ({})\n\n", venue(position));
    text.push_str(&header(position));
    let _ = writeln!(text, "Trigger: {}", trigger);
    let _ = writeln!(text, "P&L at trigger: ${:.4}", pnl);
    let _ = writeln!(text, "Attempted Quantity: {:.8}", position.quantity);
    let _ = writeln!(text, "Error: {}", error);
    text.push_str("\nThe position is still open on the exchange. Close it manually.");
    text
}

pub fn closed_externally(position: &Position, balance: Option<Decimal>) -> String {
    let mut text = format!("⚠️ <b>Position Closed Externally</b> ({})\n\n", venue(position));
    let _ = writeln!(
        text,
        "Detected that {} position was closed outside the bot.",
        position.symbol
    );
    let _ = writeln!(text, "Original quantity: {:.8}", position.quantity);
    if let Some(balance) = balance {
        let _ = writeln!(text, "Current balance: {:.8}", balance);
    }
    text.push_str("\nTrade monitoring stopped.");
    text
}

pub fn error_limit(position: &Position, failures: u32, last_error: &str) -> String {
    let mut text = format!("⚠️ <b>Monitoring Failed</b> ({})\n\n", venue(position));
    text.push_str(&header(position));
    let _ = writeln!(
        text,
        "Failed to fetch market data {} times in a row.",
        failures
    );
    let _ = writeln!(text, "Last error: {}", last_error);
    text.push_str("\nMonitoring stopped. The position is still open on the exchange.");
    text
}

pub fn monitoring_stopped(position: &Position) -> String {
    let mut text = format!("⏹ <b>Monitoring Stopped</b> ({})\n\n", venue(position));
    text.push_str(&header(position));
    text.push_str("No order was sent. The position is still open on the exchange.");
    text
}

/// The order filled after the slot was stopped, so nothing is watching it
pub fn fill_not_monitored(position: &Position) -> String {
    let mut text = format!("⚠️ <b>Trade Filled, Not Monitored</b> ({})\n\n", venue(position));
    text.push_str(&header(position));
    let _ = writeln!(text, "Entry Price: ${:.8}", position.entry_price);
    let _ = writeln!(text, "Quantity: {:.8}", position.quantity);
    text.push_str("\nMonitoring was stopped while the order was being placed. Manage the position manually.");
    text
}
