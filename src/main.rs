//! Funding Diff Hedger - Main Entry Point
//!
//! Runs the hedger against live Binance and Gate.io accounts, or one of the
//! operator utilities.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use funding_diff_hedger::alert;
use funding_diff_hedger::clock::{Clock, SystemClock};
use funding_diff_hedger::config::Config;
use funding_diff_hedger::exchange::{BinanceClient, GateClient, VenueClient};
use funding_diff_hedger::persistence::{MismatchStore, TradeJournal};
use funding_diff_hedger::position::{recover_positions, PositionLedger};
use funding_diff_hedger::scheduler::{refresh_mismatch_list, Scheduler};
use funding_diff_hedger::strategy::FundingRateAggregator;
use funding_diff_hedger::utils::to_basis_points;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Funding Diff Hedger CLI
#[derive(Parser)]
#[command(name = "funding-diff-hedger")]
#[command(version, about = "Cross-venue funding differential hedging on Binance and Gate.io")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hedger (default)
    Run,

    /// Print current entry candidates without trading
    Scan {
        /// Override the configured entry threshold
        #[arg(short, long)]
        threshold: Option<Decimal>,
    },

    /// Rebuild the funding-interval mismatch list now
    RefreshMismatch,

    /// Show journal rows for a symbol
    Journal {
        /// Symbol, e.g. BTCUSDT
        symbol: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    config.validate()?;

    init_logging(&config.paths.log_dir)?;

    match cli.command {
        None | Some(Commands::Run) => run(config).await,
        Some(Commands::Scan { threshold }) => scan(&config, threshold).await,
        Some(Commands::RefreshMismatch) => {
            let (primary, secondary) = venues(&config)?;
            let aggregator = FundingRateAggregator::new(primary, secondary);
            let store = MismatchStore::new(&config.paths.mismatch_file);
            let mismatches = refresh_mismatch_list(&aggregator, &store).await?;
            for symbol in mismatches {
                println!("{}", symbol);
            }
            Ok(())
        }
        Some(Commands::Journal { symbol }) => show_journal(&config, &symbol),
    }
}

async fn run(config: Config) -> Result<()> {
    info!("═══════════════════════════════════════════════════════════");
    info!("  🚀 FUNDING DIFF HEDGER STARTING");
    info!("  Primary: Binance USDⓈ-M | Secondary: Gate.io USDT");
    info!("═══════════════════════════════════════════════════════════");
    log_config(&config);

    let (primary, secondary) = venues(&config)?;
    let journal = Arc::new(TradeJournal::new(&config.paths.journal_db)?);
    let alerter: Arc<dyn alert::Alerter> = Arc::from(alert::from_config(&config.alert)?);
    let ledger = Arc::new(PositionLedger::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let scheduler = Arc::new(Scheduler::new(
        &config,
        primary.clone(),
        secondary.clone(),
        ledger.clone(),
        journal,
        alerter.clone(),
        clock.clone(),
    ));

    // Rebuild the ledger from the venues before any loop starts
    let view = scheduler
        .aggregator()
        .fetch()
        .await
        .context("Initial funding fetch failed")?;
    let report = recover_positions(
        primary.as_ref(),
        secondary.as_ref(),
        &view,
        &ledger,
        alerter.as_ref(),
        clock.now(),
    )
    .await
    .context("Position recovery failed")?;
    info!(
        "🔄 [RECOVERY] Restored {} hedges: {:?}",
        report.restored.len(),
        report.restored
    );
    for breach in &report.breaches {
        error!("🚨 [RECOVERY] {}", breach);
    }

    // Shutdown flag shared by every loop
    let shutdown = scheduler.shutdown_handle();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("🛑 Shutdown signal received");
        shutdown_signal.store(true, Ordering::SeqCst);
    });

    scheduler.run().await?;

    let open = ledger.snapshot();
    if !open.is_empty() {
        warn!(
            "⚠️  {} hedges still open at shutdown; they are recovered on next start",
            open.len()
        );
    }
    for halt in ledger.halted() {
        warn!("⛔ [HALTED] {}", halt.breach);
    }

    info!("👋 Funding Diff Hedger shutdown complete");
    Ok(())
}

fn venues(config: &Config) -> Result<(Arc<dyn VenueClient>, Arc<dyn VenueClient>)> {
    let primary: Arc<dyn VenueClient> = Arc::new(BinanceClient::new(&config.binance)?);
    let secondary: Arc<dyn VenueClient> = Arc::new(GateClient::new(&config.gate)?);
    Ok((primary, secondary))
}

/// Print the ranked candidate table for the next funding instant.
async fn scan(config: &Config, threshold: Option<Decimal>) -> Result<()> {
    let (primary, secondary) = venues(config)?;
    let view = FundingRateAggregator::new(primary, secondary).fetch().await?;
    let threshold = threshold.unwrap_or(config.strategy.entry_threshold);

    let Some(instant) = view.next_funding_instant() else {
        println!("No funding schedule available");
        return Ok(());
    };

    let candidates = view.candidates(instant, threshold);
    println!(
        "Next funding {} | {} shared symbols | {} candidates >= {}",
        instant,
        view.rows.len(),
        candidates.len(),
        threshold
    );
    println!(
        "{:<14} {:>10} {:>10} {:>10}  {}",
        "SYMBOL", "BINANCE", "GATE", "DIFF(bp)", "DIRECTION"
    );
    for row in candidates {
        println!(
            "{:<14} {:>9.4}% {:>9.4}% {:>10.1}  {}",
            row.symbol,
            row.primary.funding_rate * dec!(100),
            row.secondary.funding_rate * dec!(100),
            to_basis_points(row.fr_diff),
            row.direction()
        );
    }
    Ok(())
}

fn show_journal(config: &Config, symbol: &str) -> Result<()> {
    let journal = TradeJournal::new(&config.paths.journal_db)?;
    let entries = journal.entries(symbol)?;
    if entries.is_empty() {
        println!("No journal rows for {}", symbol);
        return Ok(());
    }
    for entry in entries {
        println!(
            "{} {:<3} {:<12} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.venue,
            entry.action,
            entry.payload
        );
    }
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging(log_dir: &str) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::hourly(log_dir, "funding-hedger.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("funding_diff_hedger=debug".parse()?)
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
    let strategy = &config.strategy;
    let exit = &config.exit;
    info!("📋 Configuration:");
    info!(
        "   Entry / Exit Threshold: {:.4}% / {:.4}%",
        strategy.entry_threshold * dec!(100),
        strategy.exit_threshold * dec!(100)
    );
    info!("   Trade Amount: ${} per leg", strategy.trade_amount);
    info!("   Leverage: {}x", strategy.leverage);
    info!(
        "   Funding Buffer: {}s (min {}s)",
        strategy.funding_buffer_secs, strategy.min_time_to_funding_secs
    );
    info!(
        "   Exit: profit {}, stop {:.2}%, timeout {}s",
        exit.profit_threshold,
        exit.stop_loss_fraction * dec!(100),
        exit.timeout_secs
    );
    info!("   Journal: {}", config.paths.journal_db);
    info!("   Mismatch list: {}", config.paths.mismatch_file);
}
