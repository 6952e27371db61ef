//! Bot configuration and loading

use std::path::PathBuf;

use config::{Config, File};
use serde::Deserialize;

use crate::errors::{BotError, BotResult};

/// Grid strategy variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StrategyKind {
    /// Accumulate base currency by selling slightly less than was bought
    #[serde(rename = "GridHODL", alias = "gridhodl")]
    GridHodl,
    /// Sell exactly the bought volume, realizing profit in quote currency
    #[serde(rename = "GridSell", alias = "gridsell")]
    GridSell,
    /// GridHODL plus an extra sell order above the highest buy
    #[serde(rename = "SWING", alias = "swing")]
    Swing,
    /// Pure cost averaging, never sells
    #[serde(rename = "cDCA", alias = "cdca")]
    Cdca,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyKind::GridHodl => "GridHODL",
            StrategyKind::GridSell => "GridSell",
            StrategyKind::Swing => "SWING",
            StrategyKind::Cdca => "cDCA",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gridhodl" | "grid_hodl" => Ok(StrategyKind::GridHodl),
            "gridsell" | "grid_sell" => Ok(StrategyKind::GridSell),
            "swing" => Ok(StrategyKind::Swing),
            "cdca" => Ok(StrategyKind::Cdca),
            other => Err(BotError::Configuration(format!(
                "Unknown strategy '{other}'"
            ))),
        }
    }
}

/// Per-instance tunables of the grid engine
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Display name used in notifications
    pub name: String,
    /// Instance identifier; every order and table row is scoped by it
    pub userref: u32,
    /// Which of the four grid variants to run
    pub strategy: StrategyKind,
    pub base_currency: String,
    pub quote_currency: String,
    /// Quote amount allocated per grid level
    pub amount_per_grid: f64,
    /// Grid spacing as a fraction (0.01 = 1%)
    pub interval: f64,
    /// Number of concurrently open buy orders to maintain
    #[serde(default = "default_n_open_buy_orders")]
    pub n_open_buy_orders: usize,
    /// Stop placing buys once the open-order value reaches this amount
    #[serde(default = "default_max_investment")]
    pub max_investment: f64,
    /// Maker fee as a fraction; taken from the asset pair info when unset
    #[serde(default)]
    pub fee: Option<f64>,
    /// Trailing stop profit percentage as a fraction; None disables TSP
    #[serde(default)]
    pub trailing_stop_profit: Option<f64>,
    /// Disable the 600 s no-ticker watchdog
    #[serde(default)]
    pub skip_price_timeout: bool,
    /// Log order decisions without touching the exchange
    #[serde(default)]
    pub dry_run: bool,
    /// Path of the persisted state snapshot; None keeps state in memory only
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

fn default_n_open_buy_orders() -> usize {
    5
}

fn default_max_investment() -> f64 {
    f64::INFINITY
}

impl BotConfig {
    /// Validate the tunables; called once at startup.
    pub fn validate(&self) -> BotResult<()> {
        if self.name.is_empty() {
            return Err(BotError::Configuration("'name' must not be empty".into()));
        }
        if self.amount_per_grid <= 0.0 {
            return Err(BotError::Configuration(
                "'amount_per_grid' must be positive".into(),
            ));
        }
        if self.interval <= 0.0 || self.interval >= 1.0 {
            return Err(BotError::Configuration(
                "'interval' must be a fraction in (0, 1)".into(),
            ));
        }
        if self.n_open_buy_orders == 0 {
            return Err(BotError::Configuration(
                "'n_open_buy_orders' must be at least 1".into(),
            ));
        }
        if self.max_investment <= 0.0 {
            return Err(BotError::Configuration(
                "'max_investment' must be positive".into(),
            ));
        }
        if let Some(fee) = self.fee {
            if !(0.0..1.0).contains(&fee) {
                return Err(BotError::Configuration(
                    "'fee' must be a fraction in [0, 1)".into(),
                ));
            }
        }
        if let Some(tsp) = self.trailing_stop_profit {
            if tsp <= 0.0 || tsp >= 1.0 {
                return Err(BotError::Configuration(
                    "'trailing_stop_profit' must be a fraction in (0, 1)".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Top-level settings file
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Engine tunables
    pub bot: BotConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Settings {
    /// Load settings from a configuration file.
    ///
    /// Environment variables override the file, e.g.
    /// `GRIDLOOP_BOT__AMOUNT_PER_GRID=100`.
    pub fn new(config_path: &str) -> BotResult<Self> {
        let s = Config::builder()
            .add_source(File::with_name(config_path))
            .add_source(config::Environment::with_prefix("GRIDLOOP").separator("__"))
            .build()
            .map_err(|e| BotError::Configuration(e.to_string()))?;

        let settings: Settings = s
            .try_deserialize()
            .map_err(|e| BotError::Configuration(e.to_string()))?;
        settings.bot.validate()?;
        Ok(settings)
    }
}
