use anyhow::Context;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;

use tradepilot::api::{BinanceFutures, BinanceSpot};
use tradepilot::config::Settings;
use tradepilot::execution::{MonitorOutcome, OpenedPosition, TradingEngine};
use tradepilot::models::{FuturesOrderRequest, MarketType, PositionSide, SpotOrderRequest};
use tradepilot::notify::{Alerts, LogNotifier, Notifier, TelegramNotifier};

#[derive(Parser)]
#[command(name = "tradepilot", version, about = "Single-position spot and futures trader with automatic exits")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Buy a spot pair and sell at the profit target or stop loss
    Spot {
        /// Pair ending in USDT, e.g. BTCUSDT
        pair: String,
        /// USDT to spend
        amount: Decimal,
        /// Profit in USDT at which to sell
        profit: Decimal,
        /// Loss in USDT at which to sell
        #[arg(long)]
        stop_loss: Option<Decimal>,
    },
    /// Open a USDⓈ-M futures position and close it at the profit target or stop loss
    Futures {
        pair: String,
        /// LONG or SHORT
        side: PositionSide,
        /// USDT margin
        amount: Decimal,
        profit: Decimal,
        /// 1 to 20
        leverage: u8,
        #[arg(long)]
        stop_loss: Option<Decimal>,
    },
    /// Show the EMA/ATR market condition for a pair
    Analyze {
        pair: String,
        #[arg(long)]
        futures: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let settings = Settings::load().context("failed to load settings")?;
    setup_logging(&settings.log_filter);

    let engine = build_engine(&settings)?;

    match cli.command {
        Command::Spot {
            pair,
            amount,
            profit,
            stop_loss,
        } => {
            let opened = engine
                .open_spot(SpotOrderRequest {
                    pair: pair.to_uppercase(),
                    amount,
                    profit_target: profit,
                    stop_loss,
                })
                .await?;
            supervise(&engine, MarketType::Spot, opened).await
        }
        Command::Futures {
            pair,
            side,
            amount,
            profit,
            leverage,
            stop_loss,
        } => {
            let opened = engine
                .open_futures(FuturesOrderRequest {
                    pair: pair.to_uppercase(),
                    side,
                    amount,
                    profit_target: profit,
                    leverage,
                    stop_loss,
                })
                .await?;
            supervise(&engine, MarketType::Futures, opened).await
        }
        Command::Analyze { pair, futures } => {
            let market = if futures {
                MarketType::Futures
            } else {
                MarketType::Spot
            };
            let condition = engine.analyze(market, &pair.to_uppercase()).await;
            println!("{}", serde_json::to_string_pretty(&condition)?);
            Ok(())
        }
    }
}

fn setup_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_engine(settings: &Settings) -> anyhow::Result<TradingEngine> {
    let credentials = settings.credentials();
    if credentials.is_none() {
        tracing::warn!("BINANCE_API_KEY / BINANCE_SECRET_KEY not set, signed endpoints will fail");
    }

    let spot = BinanceSpot::with_base_url(
        &settings.binance.spot_base_url,
        credentials.clone(),
        settings.binance.recv_window_ms,
        settings.binance.requests_per_second,
    )?;
    let futures = BinanceFutures::with_base_url(
        &settings.binance.futures_base_url,
        credentials,
        settings.binance.recv_window_ms,
        settings.binance.requests_per_second,
    )?;

    let notifier: Arc<dyn Notifier> = match &settings.telegram.token {
        Some(token) => Arc::new(TelegramNotifier::new(token.clone())?),
        None => {
            tracing::warn!("TELEGRAM_TOKEN not set, notifications go to the log");
            Arc::new(LogNotifier)
        }
    };
    let chat_id = settings.telegram.chat_id.clone().unwrap_or_default();
    if chat_id.is_empty() && settings.telegram.token.is_some() {
        tracing::warn!("TELEGRAM_CHAT_ID not set, Telegram notifications will be dropped");
    }

    Ok(TradingEngine::new(Arc::new(spot), Arc::new(futures), Alerts::new(notifier, chat_id))
        .with_monitor_config(settings.monitor_config()))
}

/// Wait for the monitor to finish; Ctrl+C releases the slot without closing
async fn supervise(
    engine: &TradingEngine,
    market: MarketType,
    mut opened: OpenedPosition,
) -> anyhow::Result<()> {
    let position = &opened.position;
    println!(
        "Opened {} {} at {} (qty {}), target ${}, stop {}",
        market,
        position.symbol,
        position.entry_price,
        position.quantity,
        position.profit_target,
        position
            .stop_loss
            .map(|s| format!("${}", s))
            .unwrap_or_else(|| "none".to_string())
    );
    if !opened.market.valid {
        println!("Market warning: {}", opened.market.reason);
    }
    for warning in &opened.warnings {
        println!("Warning: {}", warning);
    }

    let outcome: MonitorOutcome = tokio::select! {
        outcome = &mut opened.monitor => outcome?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, stopping monitor (position stays open)");
            engine.stop(market);
            opened.monitor.await?
        }
    };

    match (outcome.exit, outcome.realized_pnl) {
        (Some(exit), Some(realized)) => println!(
            "Closed ({}) at {} qty {}, realized ${:.4}",
            outcome.reason, exit.price, exit.quantity, realized
        ),
        _ => println!("Monitoring ended: {}", outcome.reason),
    }
    Ok(())
}
