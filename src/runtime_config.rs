// =============================================================================
// Runtime Configuration — symbols, capital, refresh cadence, provider settings
// =============================================================================
//
// The presentation layer owns and edits this value; the refresh orchestrator
// only ever receives read-only snapshots of it.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::types::Symbol;

/// Smallest capital per signal (USDT) the desk will size against.
pub const MIN_CAPITAL: f64 = 5.0;

/// Rejected configuration edit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("invalid symbol '{0}': expected <BASE>USDT")]
    InvalidSymbol(String),

    #[error("refresh interval {0} ms is not one of 60000, 300000, 500000, 1000000")]
    InvalidInterval(u64),
}

// =============================================================================
// RefreshInterval
// =============================================================================

/// Allowed auto-refresh periods. Serialised as milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum RefreshInterval {
    OneMinute,
    FiveMinutes,
    FiveHundredSeconds,
    ThousandSeconds,
}

impl RefreshInterval {
    pub const ALL: [RefreshInterval; 4] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FiveHundredSeconds,
        Self::ThousandSeconds,
    ];

    pub fn as_millis(self) -> u64 {
        match self {
            Self::OneMinute => 60_000,
            Self::FiveMinutes => 300_000,
            Self::FiveHundredSeconds => 500_000,
            Self::ThousandSeconds => 1_000_000,
        }
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.as_millis())
    }
}

impl Default for RefreshInterval {
    fn default() -> Self {
        Self::FiveMinutes
    }
}

impl TryFrom<u64> for RefreshInterval {
    type Error = ConfigError;

    fn try_from(ms: u64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|iv| iv.as_millis() == ms)
            .ok_or(ConfigError::InvalidInterval(ms))
    }
}

impl From<RefreshInterval> for u64 {
    fn from(value: RefreshInterval) -> Self {
        value.as_millis()
    }
}

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<Symbol> {
    ["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT"]
        .iter()
        .filter_map(|s| Symbol::parse(s).ok())
        .collect()
}

fn default_capital() -> f64 {
    20.0
}

fn default_provider_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_kline_interval_minutes() -> u32 {
    5
}

fn default_kline_limit() -> u32 {
    30
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- What to derive -----------------------------------------------------

    /// Symbols in display order. Unique.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<Symbol>,

    /// Posted margin per signal in USDT, never below [`MIN_CAPITAL`].
    #[serde(default = "default_capital")]
    pub capital_per_signal: f64,

    // --- When to derive -----------------------------------------------------

    #[serde(default, rename = "refresh_interval_ms")]
    pub refresh_interval: RefreshInterval,

    #[serde(default = "default_true")]
    pub auto_refresh: bool,

    // --- Provider -----------------------------------------------------------

    #[serde(default = "default_provider_base_url")]
    pub provider_base_url: String,

    /// Candle bucket size in minutes.
    #[serde(default = "default_kline_interval_minutes")]
    pub kline_interval_minutes: u32,

    /// Candles requested per symbol.
    #[serde(default = "default_kline_limit")]
    pub kline_limit: u32,

    /// Upper bound on any single provider request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    // --- Control API --------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            capital_per_signal: default_capital(),
            refresh_interval: RefreshInterval::default(),
            auto_refresh: true,
            provider_base_url: default_provider_base_url(),
            kline_interval_minutes: default_kline_interval_minutes(),
            kline_limit: default_kline_limit(),
            request_timeout_ms: default_request_timeout_ms(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        config.normalise();

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            capital = config.capital_per_signal,
            auto_refresh = config.auto_refresh,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `SIGNAL_DESK_*` environment overrides. Invalid symbols in the
    /// override list are skipped.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(syms) = std::env::var("SIGNAL_DESK_SYMBOLS") {
            let parsed: Vec<Symbol> = syms
                .split(',')
                .filter_map(|s| Symbol::parse(s).ok())
                .collect();
            if !parsed.is_empty() {
                self.symbols = parsed;
            }
        }
        if let Ok(addr) = std::env::var("SIGNAL_DESK_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("SIGNAL_DESK_PROVIDER_URL") {
            self.provider_base_url = url;
        }
        self.normalise();
    }

    /// Enforce invariants a hand-edited file may violate: unique symbols
    /// (first occurrence wins) and the capital floor.
    pub fn normalise(&mut self) {
        let mut seen = Vec::with_capacity(self.symbols.len());
        self.symbols.retain(|s| {
            if seen.contains(s) {
                false
            } else {
                seen.push(s.clone());
                true
            }
        });
        self.set_capital(self.capital_per_signal);
    }

    /// Append `raw` to the symbol set. Returns `Ok(false)` when it is already
    /// present.
    pub fn add_symbol(&mut self, raw: &str) -> Result<bool, ConfigError> {
        let symbol = Symbol::parse(raw)?;
        if self.symbols.contains(&symbol) {
            return Ok(false);
        }
        self.symbols.push(symbol);
        Ok(true)
    }

    /// Remove `raw` from the symbol set. Returns whether anything was removed.
    pub fn remove_symbol(&mut self, raw: &str) -> bool {
        let before = self.symbols.len();
        let wanted = raw.trim().to_uppercase();
        self.symbols.retain(|s| s.as_str() != wanted);
        self.symbols.len() != before
    }

    /// Set capital per signal, clamping anything non-finite or below the floor.
    pub fn set_capital(&mut self, capital: f64) {
        self.capital_per_signal = if capital.is_finite() {
            capital.max(MIN_CAPITAL)
        } else {
            MIN_CAPITAL
        };
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        let names: Vec<&str> = cfg.symbols.iter().map(Symbol::as_str).collect();
        assert_eq!(names, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT"]);
        assert_eq!(cfg.capital_per_signal, 20.0);
        assert_eq!(cfg.refresh_interval.as_millis(), 300_000);
        assert!(cfg.auto_refresh);
        assert_eq!(cfg.kline_interval_minutes, 5);
        assert_eq!(cfg.kline_limit, 30);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ethusdt"], "refresh_interval_ms": 60000, "auto_refresh": false }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec![Symbol::parse("ETHUSDT").unwrap()]);
        assert_eq!(cfg.refresh_interval, RefreshInterval::OneMinute);
        assert!(!cfg.auto_refresh);
        assert_eq!(cfg.capital_per_signal, 20.0);
    }

    #[test]
    fn rejects_unknown_interval_and_bad_symbol() {
        assert!(serde_json::from_str::<RuntimeConfig>(r#"{ "refresh_interval_ms": 1234 }"#).is_err());
        assert!(serde_json::from_str::<RuntimeConfig>(r#"{ "symbols": ["BTCUSD"] }"#).is_err());
        assert_eq!(
            RefreshInterval::try_from(42),
            Err(ConfigError::InvalidInterval(42))
        );
    }

    #[test]
    fn interval_roundtrips_as_millis() {
        for iv in RefreshInterval::ALL {
            assert_eq!(RefreshInterval::try_from(iv.as_millis()), Ok(iv));
        }
        let json = serde_json::to_value(RuntimeConfig::default()).unwrap();
        assert_eq!(json["refresh_interval_ms"], 300_000);
    }

    #[test]
    fn add_symbol_validates_and_dedupes() {
        let mut cfg = RuntimeConfig::default();
        assert_eq!(cfg.add_symbol(" dogeusdt "), Ok(true));
        assert_eq!(cfg.symbols.last().unwrap().as_str(), "DOGEUSDT");
        assert_eq!(cfg.add_symbol("DOGEUSDT"), Ok(false));
        assert_eq!(cfg.symbols.len(), 5);
        assert!(cfg.add_symbol("DOGEBTC").is_err());
        assert_eq!(cfg.add_symbol("   "), Err(ConfigError::EmptySymbol));
    }

    #[test]
    fn remove_symbol_preserves_order() {
        let mut cfg = RuntimeConfig::default();
        assert!(cfg.remove_symbol("ethusdt"));
        assert!(!cfg.remove_symbol("ETHUSDT"));
        let names: Vec<&str> = cfg.symbols.iter().map(Symbol::as_str).collect();
        assert_eq!(names, vec!["BTCUSDT", "SOLUSDT", "XRPUSDT"]);
    }

    #[test]
    fn capital_is_clamped() {
        let mut cfg = RuntimeConfig::default();
        cfg.set_capital(1.0);
        assert_eq!(cfg.capital_per_signal, MIN_CAPITAL);
        cfg.set_capital(f64::NAN);
        assert_eq!(cfg.capital_per_signal, MIN_CAPITAL);
        cfg.set_capital(100.0);
        assert_eq!(cfg.capital_per_signal, 100.0);
    }

    #[test]
    fn normalise_dedupes_loaded_symbols() {
        let json = r#"{ "symbols": ["BTCUSDT", "btcusdt", "ETHUSDT"], "capital_per_signal": 0 }"#;
        let mut cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        cfg.normalise();
        assert_eq!(cfg.symbols.len(), 2);
        assert_eq!(cfg.capital_per_signal, MIN_CAPITAL);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "signal_desk_cfg_{}.json",
            std::process::id()
        ));
        let mut cfg = RuntimeConfig::default();
        cfg.auto_refresh = false;
        cfg.add_symbol("ADAUSDT").unwrap();
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, cfg);
    }
}
