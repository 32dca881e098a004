use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BotError, Result};
use crate::exchange::AccountKind;
use crate::strategy::resolution::ResolutionStep;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub instruments: InstrumentConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Account to trade on after connecting
    #[serde(default)]
    pub account_type: AccountKind,
    /// Hard deadline for ordinary broker calls in seconds
    #[serde(default = "default_api_timeout")]
    pub api_timeout_secs: u64,
    /// Consecutive timed-out calls tolerated before a full reconnect
    #[serde(default = "default_max_freeze_count")]
    pub max_freeze_count: u32,
}

fn default_api_timeout() -> u64 {
    15
}

fn default_max_freeze_count() -> u32 {
    5
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            account_type: AccountKind::default(),
            api_timeout_secs: default_api_timeout(),
            max_freeze_count: default_max_freeze_count(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// RSI lookback
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    /// RSI at or below this level emits a put
    #[serde(default = "default_oversold")]
    pub oversold_level: f64,
    /// RSI at or above this level emits a call
    #[serde(default = "default_overbought")]
    pub overbought_level: f64,
    /// Candle size used for the closes feeding the indicator
    #[serde(default = "default_candle_timeframe")]
    pub candle_timeframe_secs: u64,
    /// Number of closes requested per evaluation
    #[serde(default = "default_candle_count")]
    pub candle_count: usize,
    /// Contract duration
    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: u32,
    /// Minimum minutes between two accepted signals on the same pair
    #[serde(default = "default_min_signal_gap")]
    pub min_time_between_signals_mins: i64,
}

fn default_rsi_period() -> usize {
    14
}

fn default_oversold() -> f64 {
    35.0
}

fn default_overbought() -> f64 {
    65.0
}

fn default_candle_timeframe() -> u64 {
    300
}

fn default_candle_count() -> usize {
    100
}

fn default_expiry_minutes() -> u32 {
    5
}

fn default_min_signal_gap() -> i64 {
    60
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            oversold_level: default_oversold(),
            overbought_level: default_overbought(),
            candle_timeframe_secs: default_candle_timeframe(),
            candle_count: default_candle_count(),
            expiry_minutes: default_expiry_minutes(),
            min_time_between_signals_mins: default_min_signal_gap(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    /// Fraction of current balance staked per trade (e.g., 0.05 = 5%)
    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: Decimal,
    /// Lower clamp for the stake
    #[serde(default = "default_min_position_size")]
    pub min_position_size: Decimal,
    /// Upper clamp for the stake
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    /// Losses in a row before the pair is locked for the day
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    /// Drawdown from initial capital that halts trading for good
    #[serde(default = "default_absolute_stop_loss_pct")]
    pub absolute_stop_loss_pct: Decimal,
    /// Drawdown from the month's starting capital that halts the month
    #[serde(default = "default_monthly_stop_loss_pct")]
    pub monthly_stop_loss_pct: Decimal,
}

fn default_position_size_pct() -> Decimal {
    dec!(0.05)
}

fn default_min_position_size() -> Decimal {
    dec!(5000)
}

fn default_max_position_size() -> Decimal {
    dec!(10000)
}

fn default_max_consecutive_losses() -> u32 {
    999
}

fn default_absolute_stop_loss_pct() -> Decimal {
    dec!(0.75)
}

fn default_monthly_stop_loss_pct() -> Decimal {
    dec!(0.40)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            position_size_pct: default_position_size_pct(),
            min_position_size: default_min_position_size(),
            max_position_size: default_max_position_size(),
            max_consecutive_losses: default_max_consecutive_losses(),
            absolute_stop_loss_pct: default_absolute_stop_loss_pct(),
            monthly_stop_loss_pct: default_monthly_stop_loss_pct(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentConfig {
    /// Currency pairs to trade, without broker suffix
    #[serde(default = "default_pairs")]
    pub pairs: Vec<String>,
    /// Broker asset suffixes tried for each pair, in order
    #[serde(default = "default_allowed_suffixes")]
    pub allowed_suffixes: Vec<String>,
    /// Suffix tried before the others when set
    #[serde(default)]
    pub priority_suffix: Option<String>,
    /// Seconds between tradable-instrument refreshes
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

fn default_pairs() -> Vec<String> {
    [
        "AUDCHF", "CADCHF", "EURAUD", "EURCAD", "EURCHF", "GBPAUD", "GBPCAD", "GBPCHF", "GBPNZD",
        "NZDUSD", "EURGBP", "EURJPY", "GBPUSD", "USDJPY",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_allowed_suffixes() -> Vec<String> {
    vec!["-OTC".to_string(), "-op".to_string(), String::new()]
}

fn default_refresh_secs() -> u64 {
    300
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            pairs: default_pairs(),
            allowed_suffixes: default_allowed_suffixes(),
            priority_suffix: None,
            refresh_secs: default_refresh_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolutionConfig {
    /// Settlement lag after expiry during which nothing is queried
    #[serde(default = "default_grace_secs")]
    pub grace_secs: i64,
    /// Age after expiry from which the async result query is attempted
    #[serde(default = "default_async_after_secs")]
    pub async_query_after_secs: i64,
    /// Age after expiry at which an unresolved order is booked as a loss
    #[serde(default = "default_resolution_timeout_secs")]
    pub timeout_secs: i64,
    /// Hard deadline for the async result query
    #[serde(default = "default_async_query_timeout_secs")]
    pub async_query_timeout_secs: u64,
    /// Balance moves smaller than this are treated as noise
    #[serde(default = "default_balance_epsilon")]
    pub balance_epsilon: Decimal,
    /// Payout percent used when the broker does not report one
    #[serde(default = "default_payout_pct")]
    pub default_payout_pct: Decimal,
    /// Detection strategies, tried in order
    #[serde(default = "ResolutionStep::default_chain")]
    pub steps: Vec<ResolutionStep>,
}

fn default_grace_secs() -> i64 {
    10
}

fn default_async_after_secs() -> i64 {
    20
}

fn default_resolution_timeout_secs() -> i64 {
    120
}

fn default_async_query_timeout_secs() -> u64 {
    3
}

fn default_balance_epsilon() -> Decimal {
    dec!(0.1)
}

fn default_payout_pct() -> Decimal {
    dec!(85)
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            async_query_after_secs: default_async_after_secs(),
            timeout_secs: default_resolution_timeout_secs(),
            async_query_timeout_secs: default_async_query_timeout_secs(),
            balance_epsilon: default_balance_epsilon(),
            default_payout_pct: default_payout_pct(),
            steps: ResolutionStep::default_chain(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Periodic checkpoint cadence in ticks
    #[serde(default = "default_save_every_ticks")]
    pub save_every_ticks: u64,
    /// Bounded wait for the loop to exit on stop
    #[serde(default = "default_stop_join_timeout")]
    pub stop_join_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_save_every_ticks() -> u64 {
    30
}

fn default_stop_join_timeout() -> u64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            save_every_ticks: default_save_every_ticks(),
            stop_join_timeout_secs: default_stop_join_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// JSON state file
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("strategy_state.json")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Partial update issued by an external control surface while running.
/// Unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigUpdate {
    pub position_size_pct: Option<Decimal>,
    pub min_position_size: Option<Decimal>,
    pub max_position_size: Option<Decimal>,
    pub oversold_level: Option<f64>,
    pub overbought_level: Option<f64>,
    pub min_time_between_signals_mins: Option<i64>,
    pub pairs: Option<Vec<String>>,
    pub monthly_stop_loss_pct: Option<Decimal>,
    pub absolute_stop_loss_pct: Option<Decimal>,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("BINOPT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (BINOPT_RISK__MIN_POSITION_SIZE, etc.)
            .add_source(
                Environment::with_prefix("BINOPT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load and validate, failing fast on any inconsistent threshold
    pub fn load_validated<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let cfg = Self::load_from(config_dir)?;
        cfg.validate().map_err(BotError::InvalidConfig)?;
        Ok(cfg)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let s = &self.strategy;
        if s.rsi_period < 2 {
            errors.push("rsi_period must be at least 2".to_string());
        }
        if !(0.0..=100.0).contains(&s.oversold_level) || !(0.0..=100.0).contains(&s.overbought_level)
        {
            errors.push("RSI levels must be within 0..=100".to_string());
        }
        if s.oversold_level >= s.overbought_level {
            errors.push(format!(
                "oversold_level ({}) must be below overbought_level ({})",
                s.oversold_level, s.overbought_level
            ));
        }
        if s.candle_count <= s.rsi_period {
            errors.push("candle_count must exceed rsi_period".to_string());
        }
        if s.expiry_minutes == 0 {
            errors.push("expiry_minutes must be positive".to_string());
        }
        if s.min_time_between_signals_mins < 0 {
            errors.push("min_time_between_signals_mins must not be negative".to_string());
        }

        let r = &self.risk;
        if r.position_size_pct <= Decimal::ZERO || r.position_size_pct > Decimal::ONE {
            errors.push("position_size_pct must be in (0, 1]".to_string());
        }
        if r.min_position_size <= Decimal::ZERO {
            errors.push("min_position_size must be positive".to_string());
        }
        if r.min_position_size > r.max_position_size {
            errors.push(format!(
                "min_position_size ({}) exceeds max_position_size ({})",
                r.min_position_size, r.max_position_size
            ));
        }
        if r.max_consecutive_losses == 0 {
            errors.push("max_consecutive_losses must be positive".to_string());
        }
        for (name, pct) in [
            ("absolute_stop_loss_pct", r.absolute_stop_loss_pct),
            ("monthly_stop_loss_pct", r.monthly_stop_loss_pct),
        ] {
            if pct <= Decimal::ZERO || pct > Decimal::ONE {
                errors.push(format!("{name} must be in (0, 1]"));
            }
        }

        if self.instruments.pairs.is_empty() {
            errors.push("at least one instrument pair is required".to_string());
        }
        if self.instruments.allowed_suffixes.is_empty() {
            errors.push("allowed_suffixes must not be empty".to_string());
        }

        let res = &self.resolution;
        if res.grace_secs < 0 {
            errors.push("grace_secs must not be negative".to_string());
        }
        if res.async_query_after_secs < res.grace_secs {
            errors.push("async_query_after_secs must not be below grace_secs".to_string());
        }
        if res.timeout_secs <= res.async_query_after_secs {
            errors.push("timeout_secs must exceed async_query_after_secs".to_string());
        }
        if res.async_query_timeout_secs == 0 {
            errors.push("async_query_timeout_secs must be positive".to_string());
        }
        if res.balance_epsilon < Decimal::ZERO {
            errors.push("balance_epsilon must not be negative".to_string());
        }
        if res.default_payout_pct < Decimal::ZERO {
            errors.push("default_payout_pct must not be negative".to_string());
        }
        if res.steps.last() != Some(&ResolutionStep::Timeout) {
            errors.push("resolution steps must end with `timeout`".to_string());
        }

        if self.broker.api_timeout_secs == 0 {
            errors.push("api_timeout_secs must be positive".to_string());
        }
        if self.scheduler.poll_interval_secs == 0 {
            errors.push("poll_interval_secs must be positive".to_string());
        }
        if self.scheduler.save_every_ticks == 0 {
            errors.push("save_every_ticks must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Produce the configuration that results from applying `update`.
    /// The current configuration is left untouched when the result is invalid.
    pub fn with_update(&self, update: &ConfigUpdate) -> Result<Self> {
        let mut next = self.clone();
        if let Some(v) = update.position_size_pct {
            next.risk.position_size_pct = v;
        }
        if let Some(v) = update.min_position_size {
            next.risk.min_position_size = v;
        }
        if let Some(v) = update.max_position_size {
            next.risk.max_position_size = v;
        }
        if let Some(v) = update.oversold_level {
            next.strategy.oversold_level = v;
        }
        if let Some(v) = update.overbought_level {
            next.strategy.overbought_level = v;
        }
        if let Some(v) = update.min_time_between_signals_mins {
            next.strategy.min_time_between_signals_mins = v;
        }
        if let Some(v) = &update.pairs {
            next.instruments.pairs = v.iter().map(|p| p.trim().to_uppercase()).collect();
        }
        if let Some(v) = update.monthly_stop_loss_pct {
            next.risk.monthly_stop_loss_pct = v;
        }
        if let Some(v) = update.absolute_stop_loss_pct {
            next.risk.absolute_stop_loss_pct = v;
        }
        next.validate().map_err(BotError::InvalidConfig)?;
        Ok(next)
    }
}
