//! Configuration management for the funding differential hedger.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Binance USDⓈ-M futures credentials (primary venue)
    #[serde(default)]
    pub binance: VenueCredentials,
    /// Gate.io USDT futures credentials (secondary venue)
    #[serde(default)]
    pub gate: VenueCredentials,
    /// Entry signal and sizing parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Unwind parameters
    #[serde(default)]
    pub exit: ExitConfig,
    /// Operator alert channel
    #[serde(default)]
    pub alert: AlertConfig,
    /// File locations
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueCredentials {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// REST base URL override (production endpoint when unset)
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Minimum |frDiff| to open a hedge
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: Decimal,
    /// frDiff level that counts as a signal reversal for an open hedge
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: Decimal,
    /// Notional budget per leg in USDT
    #[serde(default = "default_trade_amount")]
    pub trade_amount: Decimal,
    /// Leverage applied on both venues (must stay 1)
    #[serde(default = "default_leverage")]
    pub leverage: u8,
    /// Start the entry sequence when funding is closer than this
    #[serde(default = "default_funding_buffer_secs")]
    pub funding_buffer_secs: u64,
    /// Stop evaluating candidates when funding is closer than this
    #[serde(default = "default_min_time_to_funding_secs")]
    pub min_time_to_funding_secs: u64,
    /// Entry loop sleep when no funding event is near
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
    /// Entry loop sleep inside the funding buffer window
    #[serde(default = "default_active_interval_secs")]
    pub active_interval_secs: u64,
    /// Maximum hedges opened in a single entry tick
    #[serde(default = "default_max_entries_per_tick")]
    pub max_entries_per_tick: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Exit monitor cadence
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Resting exit orders older than this are forced to market
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Worst-case normalised PnL that triggers a break-even exit
    #[serde(default = "default_profit_threshold")]
    pub profit_threshold: Decimal,
    /// Stop distance from the primary leg's entry price (0 disables the stop)
    #[serde(default = "default_stop_loss_fraction")]
    pub stop_loss_fraction: Decimal,
    /// Wait after the funding instant before exit triggers may fire
    #[serde(default = "default_funding_grace_secs")]
    pub funding_grace_secs: u64,
    /// Price window used for local-extremum timing
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: u64,
    /// Samples required in the window before an extremum counts
    #[serde(default = "default_min_lookback_samples")]
    pub min_lookback_samples: usize,
    /// Order book levels fetched for worst-case PnL
    #[serde(default = "default_order_book_depth")]
    pub order_book_depth: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Telegram bot token; alerts only go to the log when unset
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_journal_db")]
    pub journal_db: String,
    #[serde(default = "default_mismatch_file")]
    pub mismatch_file: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

// Default value functions
fn default_entry_threshold() -> Decimal {
    Decimal::new(5, 4) // 0.0005
}

fn default_exit_threshold() -> Decimal {
    Decimal::new(5, 4) // 0.0005
}

fn default_trade_amount() -> Decimal {
    Decimal::new(20, 0) // 20 USDT per leg
}

fn default_leverage() -> u8 {
    1
}

fn default_funding_buffer_secs() -> u64 {
    90
}

fn default_min_time_to_funding_secs() -> u64 {
    30
}

fn default_idle_interval_secs() -> u64 {
    120
}

fn default_active_interval_secs() -> u64 {
    10
}

fn default_max_entries_per_tick() -> usize {
    1
}

fn default_poll_interval_secs() -> u64 {
    25
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_profit_threshold() -> Decimal {
    Decimal::new(5, 4) // 0.0005
}

fn default_stop_loss_fraction() -> Decimal {
    Decimal::new(7, 3) // 0.007 (0.7%)
}

fn default_funding_grace_secs() -> u64 {
    60
}

fn default_lookback_secs() -> u64 {
    300
}

fn default_min_lookback_samples() -> usize {
    3
}

fn default_order_book_depth() -> u32 {
    5
}

fn default_journal_db() -> String {
    "data/trade_journal.db".to_string()
}

fn default_mismatch_file() -> String {
    "output/mismatch_symbols.txt".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("FDH"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.strategy.leverage == 1,
            "leverage is fixed at 1x, got {}",
            self.strategy.leverage
        );

        anyhow::ensure!(
            self.strategy.trade_amount > Decimal::ZERO,
            "trade_amount must be positive"
        );

        anyhow::ensure!(
            self.strategy.entry_threshold >= Decimal::ZERO
                && self.strategy.exit_threshold >= Decimal::ZERO,
            "thresholds must be non-negative"
        );

        anyhow::ensure!(
            self.strategy.exit_threshold <= self.strategy.entry_threshold,
            "exit_threshold must not exceed entry_threshold"
        );

        anyhow::ensure!(
            self.strategy.min_time_to_funding_secs < self.strategy.funding_buffer_secs,
            "min_time_to_funding_secs must be below funding_buffer_secs"
        );

        anyhow::ensure!(
            self.exit.poll_interval_secs > 0 && self.exit.timeout_secs > 0,
            "exit poll interval and timeout must be positive"
        );

        anyhow::ensure!(
            self.exit.stop_loss_fraction >= Decimal::ZERO
                && self.exit.stop_loss_fraction < Decimal::ONE,
            "stop_loss_fraction must be between 0 and 1"
        );

        Ok(())
    }
}

impl StrategyConfig {
    pub fn funding_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.funding_buffer_secs as i64)
    }

    pub fn min_time_to_funding(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_time_to_funding_secs as i64)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn active_interval(&self) -> Duration {
        Duration::from_secs(self.active_interval_secs)
    }
}

impl ExitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_secs as i64)
    }

    pub fn funding_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.funding_grace_secs as i64)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lookback_secs as i64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binance: VenueCredentials::default(),
            gate: VenueCredentials::default(),
            strategy: StrategyConfig::default(),
            exit: ExitConfig::default(),
            alert: AlertConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            entry_threshold: default_entry_threshold(),
            exit_threshold: default_exit_threshold(),
            trade_amount: default_trade_amount(),
            leverage: default_leverage(),
            funding_buffer_secs: default_funding_buffer_secs(),
            min_time_to_funding_secs: default_min_time_to_funding_secs(),
            idle_interval_secs: default_idle_interval_secs(),
            active_interval_secs: default_active_interval_secs(),
            max_entries_per_tick: default_max_entries_per_tick(),
        }
    }
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
            profit_threshold: default_profit_threshold(),
            stop_loss_fraction: default_stop_loss_fraction(),
            funding_grace_secs: default_funding_grace_secs(),
            lookback_secs: default_lookback_secs(),
            min_lookback_samples: default_min_lookback_samples(),
            order_book_depth: default_order_book_depth(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            journal_db: default_journal_db(),
            mismatch_file: default_mismatch_file(),
            log_dir: default_log_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_leverage_must_be_one() {
        let mut config = Config::default();
        config.strategy.leverage = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exit_threshold_above_entry_rejected() {
        let mut config = Config::default();
        config.strategy.exit_threshold = dec!(0.001);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_defaults_fill_missing_sections() {
        let config: Config = serde_json::from_str(r#"{"strategy": {"trade_amount": "50"}}"#)
            .expect("partial config should deserialize");
        assert_eq!(config.strategy.trade_amount, dec!(50));
        assert_eq!(config.strategy.entry_threshold, dec!(0.0005));
        assert!(config.gate.base_url.is_none());
        assert_eq!(config.exit.timeout_secs, 300);
    }
}
