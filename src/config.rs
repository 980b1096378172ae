//! Configuration loading and validation

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

use crate::analysis::strategies::StrategyKind;
use crate::consensus::ConsensusParams;
// Re-export risk parameters so callers configure and tune through one type
pub use crate::risk::RiskParameters;

lazy_static! {
    static ref SYMBOL_RE: Regex = Regex::new(r"^[A-Z0-9]{5,20}$").unwrap();
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyConfig>,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub risk: RiskParameters,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

/// Exchange connectivity and credentials
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key; normally supplied via BINANCE_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// API secret; normally supplied via BINANCE_API_SECRET
    #[serde(default = "default_api_secret")]
    pub api_secret: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    /// Asset balances are quoted in, e.g. USDT
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
}

/// Watchlist and cycle cadence
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<String>,
    /// Candle interval for the primary pass, e.g. "15m"
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Optional higher timeframe re-checked for trend strategies
    #[serde(default)]
    pub confirmation_interval: Option<String>,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    /// Composite signal strength required before execution
    #[serde(default = "default_min_signal_strength")]
    pub min_signal_strength: f64,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    #[serde(default = "default_max_positions_per_symbol")]
    pub max_positions_per_symbol: usize,
}

/// One strategy entry in the roster
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    #[serde(default = "default_strategy_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Consensus thresholds; mapped onto [`ConsensusParams`]
#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_min_signals_required")]
    pub min_signals_required: usize,
    #[serde(default = "default_min_agreement_ratio")]
    pub min_agreement_ratio: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_score_floor")]
    pub score_floor: f64,
    /// Seconds a strategy signal stays in the voting window
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Seconds a symbol is blocked from re-entry after an execution
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl ConsensusConfig {
    pub fn params(&self) -> ConsensusParams {
        ConsensusParams {
            min_signals_required: self.min_signals_required,
            min_agreement_ratio: self.min_agreement_ratio,
            min_confidence: self.min_confidence,
            score_floor: self.score_floor,
            window_secs: self.window_secs,
            cooldown_secs: self.cooldown_secs,
        }
    }
}

/// Open-position stop/take polling
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Journal directory and paging
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Simulated exchange for dry runs
#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_starting_balance")]
    pub starting_balance: f64,
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}
fn default_api_key() -> String {
    std::env::var("BINANCE_API_KEY").unwrap_or_default()
}
fn default_api_secret() -> String {
    std::env::var("BINANCE_API_SECRET").unwrap_or_default()
}
fn default_recv_window_ms() -> u64 {
    5000
}
fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_watchlist() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}
fn default_interval() -> String {
    "15m".to_string()
}
fn default_candle_limit() -> u32 {
    100
}
fn default_cycle_interval_ms() -> u64 {
    60_000
}
fn default_min_signal_strength() -> f64 {
    60.0
}
fn default_max_open_positions() -> usize {
    5
}
fn default_max_positions_per_symbol() -> usize {
    1
}

fn default_strategy_weight() -> f64 {
    1.0
}

fn default_strategies() -> Vec<StrategyConfig> {
    StrategyKind::ALL
        .iter()
        .map(|kind| StrategyConfig {
            id: kind.id().to_string(),
            weight: default_strategy_weight(),
            enabled: true,
        })
        .collect()
}

fn default_min_signals_required() -> usize {
    1
}
fn default_min_agreement_ratio() -> f64 {
    0.6
}
fn default_min_confidence() -> f64 {
    0.6
}
fn default_score_floor() -> f64 {
    0.3
}
fn default_window_secs() -> u64 {
    300
}
fn default_cooldown_secs() -> u64 {
    900
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_data_dir() -> String {
    "data".to_string()
}
fn default_page_size() -> usize {
    10
}

fn default_starting_balance() -> f64 {
    10_000.0
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix ROTOR_)
            .add_source(
                config::Environment::with_prefix("ROTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for symbol in &self.analysis.watchlist {
            if !SYMBOL_RE.is_match(symbol) {
                anyhow::bail!("Invalid symbol in watchlist: {}", symbol);
            }
        }

        if self.analysis.cycle_interval_ms < 1000 {
            anyhow::bail!("cycle_interval_ms must be at least 1000");
        }

        if self.analysis.candle_limit < 50 {
            anyhow::bail!("candle_limit must be at least 50 for indicator warm-up");
        }

        if !(0.0..=100.0).contains(&self.analysis.min_signal_strength) {
            anyhow::bail!("min_signal_strength must be between 0 and 100");
        }

        if self.analysis.max_open_positions == 0 {
            anyhow::bail!("max_open_positions must be positive");
        }

        for strategy in &self.strategies {
            if StrategyKind::from_id(&strategy.id).is_none() {
                anyhow::bail!("Unknown strategy id: {}", strategy.id);
            }
            if strategy.weight <= 0.0 {
                anyhow::bail!("Strategy weight must be positive: {}", strategy.id);
            }
        }

        if !(0.0..=1.0).contains(&self.consensus.min_agreement_ratio) {
            anyhow::bail!("min_agreement_ratio must be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&self.consensus.min_confidence) {
            anyhow::bail!("min_confidence must be between 0 and 1");
        }
        if self.consensus.min_signals_required == 0 {
            anyhow::bail!("min_signals_required must be positive");
        }

        if self.risk.stop_loss_percent <= 0.0 || self.risk.stop_loss_percent >= 100.0 {
            anyhow::bail!("stop_loss_percent must be between 0 and 100");
        }
        if self.risk.take_profit_percent <= 0.0 {
            anyhow::bail!("take_profit_percent must be positive");
        }
        if self.risk.max_position_size_percent <= 0.0
            || self.risk.max_position_size_percent > 100.0
        {
            anyhow::bail!("max_position_size_percent must be between 0 and 100");
        }
        if self.risk.max_leverage < 1.0 {
            anyhow::bail!("max_leverage must be at least 1");
        }
        let configured_rr = self.risk.take_profit_percent / self.risk.stop_loss_percent;
        if configured_rr < self.risk.min_risk_reward_ratio {
            anyhow::bail!(
                "take_profit/stop_loss ratio {:.2} is below min_risk_reward_ratio {:.2}",
                configured_rr,
                self.risk.min_risk_reward_ratio
            );
        }

        if self.monitor.poll_interval_ms < 1000 {
            anyhow::bail!("monitor poll_interval_ms must be at least 1000");
        }

        if self.storage.page_size == 0 {
            anyhow::bail!("storage page_size must be positive");
        }

        if self.paper.enabled && self.paper.starting_balance <= 0.0 {
            anyhow::bail!("paper starting_balance must be positive");
        }

        Ok(())
    }

    /// Strategy entries that are enabled, resolved to kinds with weights
    pub fn enabled_strategies(&self) -> Vec<(StrategyKind, f64)> {
        self.strategies
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|s| StrategyKind::from_id(&s.id).map(|kind| (kind, s.weight)))
            .collect()
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Exchange:
    base_url: {}
    quote_asset: {}
    api_key: {}
  Analysis:
    watchlist: {:?}
    interval: {}
    confirmation_interval: {:?}
    cycle_interval: {}ms
    min_signal_strength: {}
  Strategies:
    enabled: {:?}
  Consensus:
    min_signals: {}
    min_agreement: {}
    min_confidence: {}
    cooldown: {}s
  Risk:
    max_position_size: {}%
    stop_loss: {}%
    take_profit: {}%
    max_daily_loss: {}%
    max_drawdown: {}%
  Monitor:
    enabled: {}
    poll_interval: {}ms
  Storage:
    data_dir: {}
  Paper:
    enabled: {}
"#,
            mask_url(&self.exchange.base_url),
            self.exchange.quote_asset,
            if self.exchange.api_key.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.analysis.watchlist,
            self.analysis.interval,
            self.analysis.confirmation_interval,
            self.analysis.cycle_interval_ms,
            self.analysis.min_signal_strength,
            self.strategies
                .iter()
                .filter(|s| s.enabled)
                .map(|s| s.id.as_str())
                .collect::<Vec<_>>(),
            self.consensus.min_signals_required,
            self.consensus.min_agreement_ratio,
            self.consensus.min_confidence,
            self.consensus.cooldown_secs,
            self.risk.max_position_size_percent,
            self.risk.stop_loss_percent,
            self.risk.take_profit_percent,
            self.risk.max_daily_loss_percent,
            self.risk.max_drawdown_percent,
            self.monitor.enabled,
            self.monitor.poll_interval_ms,
            self.storage.data_dir,
            self.paper.enabled,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_api_key(),
            api_secret: default_api_secret(),
            recv_window_ms: default_recv_window_ms(),
            quote_asset: default_quote_asset(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            watchlist: default_watchlist(),
            interval: default_interval(),
            confirmation_interval: None,
            candle_limit: default_candle_limit(),
            cycle_interval_ms: default_cycle_interval_ms(),
            min_signal_strength: default_min_signal_strength(),
            max_open_positions: default_max_open_positions(),
            max_positions_per_symbol: default_max_positions_per_symbol(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_signals_required: default_min_signals_required(),
            min_agreement_ratio: default_min_agreement_ratio(),
            min_confidence: default_min_confidence(),
            score_floor: default_score_floor(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            page_size: default_page_size(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            starting_balance: default_starting_balance(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            analysis: AnalysisConfig::default(),
            strategies: default_strategies(),
            consensus: ConsensusConfig::default(),
            risk: RiskParameters::default(),
            monitor: MonitorConfig::default(),
            storage: StorageConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_roster_enables_all_strategies() {
        let config = Config::default();
        assert_eq!(config.enabled_strategies().len(), StrategyKind::ALL.len());
    }

    #[test]
    fn test_rejects_malformed_symbol() {
        let mut config = Config::default();
        config.analysis.watchlist = vec!["btcusdt".to_string()];
        assert!(config.validate().is_err());

        config.analysis.watchlist = vec!["BTC".to_string()];
        assert!(config.validate().is_err());

        config.analysis.watchlist = vec!["BTCUSDT".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_fast_cycle_interval() {
        let mut config = Config::default();
        config.analysis.cycle_interval_ms = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_strategy_id() {
        let mut config = Config::default();
        config.strategies.push(StrategyConfig {
            id: "momentum_ultra".to_string(),
            weight: 1.0,
            enabled: true,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_stop_take_below_rr_floor() {
        let mut config = Config::default();
        config.risk.stop_loss_percent = 4.0;
        // 6 / 4 = 1.5, below the default floor of 2.0
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_low_candle_limit() {
        let mut config = Config::default();
        config.analysis.candle_limit = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_watchlist_passes_static_validation() {
        // An empty watchlist is a runtime error at engine start, not a
        // config parse failure; operators can supply it via env later.
        let mut config = Config::default();
        config.analysis.watchlist.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_consensus_params_mapping() {
        let config = Config::default();
        let params = config.consensus.params();
        assert_eq!(params.min_signals_required, 1);
        assert_eq!(params.cooldown_secs, 900);
    }

    #[test]
    fn test_masked_display_hides_credentials() {
        let mut config = Config::default();
        config.exchange.api_key = "live-key".to_string();
        let display = config.masked_display();
        assert!(!display.contains("live-key"));
        assert!(display.contains("***"));
    }
}
