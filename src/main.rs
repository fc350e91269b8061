//! Options Trade Engine - Main Entry Point
//!
//! Runs the strategies of one account live or against the paper broker.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use options_trade_engine::config::Config;
use options_trade_engine::engine::{Connections, Engine};
use options_trade_engine::exchange::Order;
use options_trade_engine::persistence::{SqliteTradeStore, StoredTrade};
use options_trade_engine::strategy::StrategyRegistry;
use options_trade_engine::trade::{Trade, TradeState};
use options_trade_engine::utils::TradingCalendar;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Options Trade Engine CLI
#[derive(Parser)]
#[command(name = "options-trade-engine")]
#[command(version, about = "Trade and order lifecycle engine for intraday index options")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured strategies for an account
    Run {
        /// Account id, overrides `account.id` from the config
        #[arg(short, long)]
        account: String,

        /// Broker session token
        #[arg(short = 't', long, default_value = "")]
        access_token: String,

        /// Route orders to the in-memory paper broker
        #[arg(long)]
        paper: bool,
    },

    /// Show persisted trades and pnl
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "data/trades.db")]
        db: String,

        /// Show every order leg
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show each strategy's lots for a date
    Lots {
        /// Trading date (YYYY-MM-DD)
        #[arg(short, long)]
        date: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            account,
            access_token,
            paper,
        } => {
            init_logging()?;
            run(account, &access_token, paper).await
        }
        Commands::Status { db, verbose } => show_status(&db, verbose),
        Commands::Lots { date } => show_lots(&date),
    }
}

async fn run(account: String, access_token: &str, paper: bool) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║         Options Trade Engine v{}                        ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let mut config = Config::load()?;
    config.account.id = account;
    config.manager.paper |= paper;
    config.validate()?;
    log_config(&config);

    if config.manager.paper {
        info!("📝 PAPER TRADING MODE - orders go to the in-memory broker");
    } else {
        warn!("⚠️  LIVE TRADING MODE - Real money at risk!");
    }

    let connections = Connections::from_config(&config, access_token)?;
    let engine = Engine::start(&config, connections).await?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("🛑 Shutdown signal received");
                break;
            }
            _ = status.tick() => log_status(&engine.handle().trades()),
        }
    }

    engine.shutdown().await?;
    info!("👋 Engine stopped, final snapshot saved");
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "options-trade-engine.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer flushing for the lifetime of the process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("options_trade_engine=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Account:          {} ({})", config.account.id, config.account.broker);
    info!("   Multiplier:       {}x", config.account.multiplier);
    info!(
        "   Market:           {} - {}, square-off {}",
        config.market.open, config.market.close, config.market.square_off
    );
    info!("   Cycle:            {}s", config.manager.cycle_secs);
    info!("   Chase:            {}%", config.manager.chase_pct);
    info!("   Snapshots:        {:?}", config.manager.snapshot_backend);
    for strategy in &config.strategies {
        info!(
            "   Strategy:         {} [{}] {} {}-{}{}",
            strategy.id,
            strategy.kind,
            strategy.underlying,
            strategy.start,
            strategy.stop,
            if strategy.enabled { "" } else { " (disabled)" }
        );
    }
}

fn log_status(trades: &[Trade]) {
    let count = |state: TradeState| trades.iter().filter(|t| t.state() == state).count();
    let pnl: Decimal = trades.iter().map(|t| t.pnl).sum();

    info!("┌─ 📊 Status");
    info!(
        "│  Trades: {} active, {} waiting, {} completed, {} cancelled, {} disabled",
        count(TradeState::Active),
        count(TradeState::Created),
        count(TradeState::Completed),
        count(TradeState::Cancelled),
        count(TradeState::Disabled)
    );
    info!("└─ PnL: {:.2}", pnl);
}

/// Show persisted trades from the SQLite store.
fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    use std::path::Path;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              TRADE ENGINE STATUS                           ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The engine has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let store = SqliteTradeStore::new(db_path)?;
    let history = store.history(None)?;
    if history.is_empty() {
        println!("\n❌ No saved trades found in database.");
        return Ok(());
    }

    let mut by_day: BTreeMap<(NaiveDate, String), Vec<&StoredTrade>> = BTreeMap::new();
    for stored in &history {
        by_day
            .entry((stored.trading_day, stored.account_id.clone()))
            .or_default()
            .push(stored);
    }

    for ((day, account), stored) in &by_day {
        let pnl: Decimal = stored.iter().map(|s| s.trade.pnl).sum();
        println!("\n📅 {} - {}", day, account);
        println!("   ├─ Trades: {}", stored.len());
        println!("   └─ PnL:    {:.2}", pnl);

        for StoredTrade { trade, .. } in stored.iter().copied() {
            println!("   ┌─ {}", trade.trade_id);
            println!(
                "   ├─ {} {} x{} ({} filled)",
                trade.direction,
                trade.symbol,
                trade.qty(),
                trade.filled_qty()
            );
            println!(
                "   ├─ Entry: {:.2}  Exit: {:.2}  SL: {:.2}  Target: {:.2}",
                trade.entry,
                trade.exit,
                trade.stop_loss(),
                trade.target
            );
            match trade.exit_reason() {
                Some(reason) => println!("   ├─ State: {} ({})", trade.state(), reason),
                None => println!("   ├─ State: {}", trade.state()),
            }
            println!("   └─ PnL: {:.2} ({:.2}%)", trade.pnl, trade.pnl_pct);

            if verbose {
                print_orders("Entry", &trade.entry_orders);
                print_orders("Stop-loss", &trade.sl_orders);
                print_orders("Exit", &trade.target_orders);
            }
        }
    }

    Ok(())
}

fn print_orders(leg: &str, orders: &[Order]) {
    for order in orders {
        println!(
            "       {:<10} {} {:?} {}/{} @ {:.2} (trigger {:.2}) {}",
            leg,
            order.order_id,
            order.order_type,
            order.filled_qty,
            order.qty,
            order.price,
            order.trigger_price,
            order.status
        );
    }
}

/// Show the lots each configured strategy would trade on a date.
fn show_lots(date: &str) -> Result<()> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{date}', expected YYYY-MM-DD"))?;
    let config = Config::load()?;
    config.validate()?;

    let calendar = Arc::new(TradingCalendar::new(&config.market)?);
    let instances = StrategyRegistry::with_builtin().build(
        &config.strategies,
        config.account.multiplier,
        Arc::clone(&calendar),
    )?;

    println!("📅 Lots for {} ({})", date, date.format("%A"));
    if calendar.is_holiday(date) {
        println!("   Market closed, no trading");
        return Ok(());
    }
    for instance in &instances {
        println!(
            "   ├─ {:<20} {:<10} {}",
            instance.id(),
            instance.config().underlying,
            instance.lots_for(date)
        );
    }
    Ok(())
}
