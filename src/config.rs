//! Configuration types for hydra-engine

use crate::retry::RetryPolicy;
use crate::telemetry::LogFormat;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub engine: EngineConfig,
    /// Traded instruments keyed by broker symbol
    pub symbols: BTreeMap<String, SymbolConfig>,
    pub risk: RiskConfig,
    pub kill_switch: KillSwitchConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub brain: BrainConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    pub market: MarketConfig,
    pub telemetry: TelemetryConfig,
}

/// Engine loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub mode: ExecutionMode,
    /// Seconds between the end of one cycle and the start of the next
    pub loop_interval_secs: u64,
    /// PENDING trades older than this are resolved by the reconciliation sweep
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Bound on a single order submission round trip
    #[serde(default = "default_order_timeout")]
    pub order_timeout_secs: u64,
    /// Quotes older than this are treated as missing
    #[serde(default = "default_max_quote_age")]
    pub max_quote_age_secs: u64,
    #[serde(default = "default_timeframe")]
    pub candle_timeframe: String,
    #[serde(default = "default_candle_count")]
    pub candle_count: usize,
    /// Upper bound for the delay between cycles after repeated transient failures
    #[serde(default = "default_max_cycle_backoff")]
    pub max_cycle_backoff_secs: u64,
    /// Starting balance of the shadow registry
    #[serde(default = "default_dry_run_balance")]
    pub dry_run_balance: Decimal,
}

fn default_pending_timeout() -> u64 {
    60
}
fn default_reconcile_interval() -> u64 {
    30
}
fn default_order_timeout() -> u64 {
    10
}
fn default_max_quote_age() -> u64 {
    30
}
fn default_timeframe() -> String {
    "H1".to_string()
}
fn default_candle_count() -> usize {
    200
}
fn default_max_cycle_backoff() -> u64 {
    300
}
fn default_dry_run_balance() -> Decimal {
    Decimal::new(10_000, 0)
}

/// Execution mode: shadow registry or real broker
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    DryRun,
    Live,
}

impl ExecutionMode {
    pub fn is_dry_run(self) -> bool {
        self == ExecutionMode::DryRun
    }
}

/// Per-instrument trading parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SymbolConfig {
    /// Lot size requested by default for this instrument
    pub lot_size: Decimal,
    pub sl_atr_mult: Decimal,
    pub tp_atr_mult: Decimal,
    /// Units per lot
    #[serde(default = "default_contract_size")]
    pub contract_size: Decimal,
    /// Whether the instrument is exposed to weekend/gap risk.
    /// Required for every instrument.
    pub weekend_gap_risk: bool,
}

fn default_contract_size() -> Decimal {
    Decimal::new(100_000, 0)
}

/// A live-mode lot cap applying from `min_equity` upwards
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EquityTier {
    pub min_equity: Decimal,
    pub max_lots: Decimal,
}

/// Pre-trade risk configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    /// Live caps, ascending by `min_equity`
    pub equity_tiers: Vec<EquityTier>,
    /// Fixed cap used only in dry-run mode
    pub dry_run_max_lots: Decimal,
    /// Percentage of the strategy's allocated equity risked per trade
    pub risk_per_trade_pct: Decimal,
    pub max_open_positions: usize,
    #[serde(default = "default_min_lots")]
    pub min_lots: Decimal,
    #[serde(default = "default_min_lots")]
    pub lot_step: Decimal,
}

fn default_min_lots() -> Decimal {
    Decimal::new(1, 2)
}

/// Kill switch ceilings, in percent
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KillSwitchConfig {
    pub max_drawdown_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
}

/// Weekend window used for instruments flagged with gap risk (UTC hours)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalendarConfig {
    #[serde(default = "default_friday_cutoff")]
    pub friday_cutoff_hour_utc: u32,
    #[serde(default = "default_sunday_open")]
    pub sunday_open_hour_utc: u32,
}

fn default_friday_cutoff() -> u32 {
    20
}
fn default_sunday_open() -> u32 {
    22
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            friday_cutoff_hour_utc: default_friday_cutoff(),
            sunday_open_hour_utc: default_sunday_open(),
        }
    }
}

/// Decision and learning configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrainConfig {
    #[serde(default = "default_adx_threshold")]
    pub adx_trend_threshold: f64,
    /// ATR as a percentage of price above which a non-trending market is VOLATILE
    #[serde(default = "default_volatility_atr_pct")]
    pub volatility_atr_pct: f64,
    /// Signals below this confidence are not eligible
    #[serde(default)]
    pub min_confidence: f64,
    #[serde(default = "default_true")]
    pub auto_allocation: bool,
    #[serde(default = "default_rebalance_every")]
    pub rebalance_every_trades: u32,
}

fn default_adx_threshold() -> f64 {
    25.0
}
fn default_volatility_atr_pct() -> f64 {
    0.5
}
fn default_true() -> bool {
    true
}
fn default_rebalance_every() -> u32 {
    10
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            adx_trend_threshold: default_adx_threshold(),
            volatility_atr_pct: default_volatility_atr_pct(),
            min_confidence: 0.0,
            auto_allocation: true,
            rebalance_every_trades: default_rebalance_every(),
        }
    }
}

/// Allocation scoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllocationConfig {
    /// Percentage reserved for each under-sampled strategy
    #[serde(default = "default_floor_pct")]
    pub floor_pct: Decimal,
    /// Strategies with fewer closed trades are under-sampled
    #[serde(default = "default_min_trades")]
    pub min_trades: u32,
    #[serde(default = "default_pf_cap")]
    pub profit_factor_cap: Decimal,
    /// Weight of the recent profit factor in the blend (0..=1)
    #[serde(default = "default_recency_weight")]
    pub recency_weight: Decimal,
}

fn default_floor_pct() -> Decimal {
    Decimal::new(5, 0)
}
fn default_min_trades() -> u32 {
    20
}
fn default_pf_cap() -> Decimal {
    Decimal::new(3, 0)
}
fn default_recency_weight() -> Decimal {
    Decimal::new(4, 1)
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            floor_pct: default_floor_pct(),
            min_trades: default_min_trades(),
            profit_factor_cap: default_pf_cap(),
            recency_weight: default_recency_weight(),
        }
    }
}

/// Cross-process relay selection
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelayKind {
    /// In-process only
    #[default]
    None,
    /// WebSocket relay hub
    Ws,
}

/// Event bus configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default)]
    pub relay: RelayKind,
    /// URL of the relay hub, e.g. ws://127.0.0.1:7878
    #[serde(default)]
    pub hub_url: Option<String>,
    /// Address the hub binds to
    #[serde(default = "default_hub_listen")]
    pub hub_listen: String,
}

fn default_hub_listen() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            relay: RelayKind::None,
            hub_url: None,
            hub_listen: default_hub_listen(),
        }
    }
}

/// Persistent store selection
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./state")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Json,
            path: default_store_path(),
        }
    }
}

/// Market data bridge configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketConfig {
    pub base_url: String,
    #[serde(default = "default_market_timeout")]
    pub timeout_ms: u64,
}

fn default_market_timeout() -> u64 {
    5_000
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    pub metrics_port: Option<u16>,
}

/// Configuration errors found after parsing
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no symbols configured")]
    NoSymbols,
    #[error("at least one live equity tier is required")]
    NoEquityTiers,
    #[error("equity tiers must be strictly ascending by min_equity")]
    TiersNotAscending,
    #[error("dry-run cap {dry_run} exceeds the smallest live cap {live}")]
    DryRunCapTooLarge { dry_run: Decimal, live: Decimal },
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
    #[error("recency_weight must be within 0..=1")]
    RecencyWeightOutOfRange,
    #[error("relay 'ws' requires bus.hub_url")]
    MissingHubUrl,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// The embedded example configuration
    pub fn example() -> anyhow::Result<Self> {
        let config: Config = toml::from_str(include_str!("../config.toml.example"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot be acted on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        if self.risk.equity_tiers.is_empty() {
            return Err(ConfigError::NoEquityTiers);
        }
        if self
            .risk
            .equity_tiers
            .windows(2)
            .any(|w| w[1].min_equity <= w[0].min_equity)
        {
            return Err(ConfigError::TiersNotAscending);
        }
        let smallest_live = self
            .risk
            .equity_tiers
            .iter()
            .map(|t| t.max_lots)
            .min()
            .unwrap_or_default();
        if self.risk.dry_run_max_lots > smallest_live {
            return Err(ConfigError::DryRunCapTooLarge {
                dry_run: self.risk.dry_run_max_lots,
                live: smallest_live,
            });
        }
        if self.risk.lot_step <= Decimal::ZERO {
            return Err(ConfigError::NotPositive {
                field: "risk.lot_step",
            });
        }
        if self.risk.risk_per_trade_pct <= Decimal::ZERO {
            return Err(ConfigError::NotPositive {
                field: "risk.risk_per_trade_pct",
            });
        }
        if self.kill_switch.max_drawdown_pct <= Decimal::ZERO
            || self.kill_switch.max_daily_loss_pct <= Decimal::ZERO
        {
            return Err(ConfigError::NotPositive {
                field: "kill_switch",
            });
        }
        if self.engine.loop_interval_secs == 0 {
            return Err(ConfigError::NotPositive {
                field: "engine.loop_interval_secs",
            });
        }
        if self.allocation.recency_weight < Decimal::ZERO
            || self.allocation.recency_weight > Decimal::ONE
        {
            return Err(ConfigError::RecencyWeightOutOfRange);
        }
        if self.bus.relay == RelayKind::Ws && self.bus.hub_url.is_none() {
            return Err(ConfigError::MissingHubUrl);
        }
        Ok(())
    }

    /// Symbols in configuration order
    pub fn symbol_names(&self) -> Vec<String> {
        self.symbols.keys().cloned().collect()
    }
}
