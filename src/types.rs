// =============================================================================
// Shared types used across the signal desk
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::runtime_config::ConfigError;

/// Suffix every tradable linear-futures symbol carries.
pub const QUOTE_SUFFIX: &str = "USDT";

// =============================================================================
// Symbol
// =============================================================================

/// A validated trading-pair identifier such as `BTCUSDT`.
///
/// Equality is exact string match. Construction trims and upper-cases the
/// input, so `" ethusdt "` and `"ETHUSDT"` name the same symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let s = raw.trim().to_uppercase();
        if s.is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        match s.strip_suffix(QUOTE_SUFFIX) {
            Some(base) if !base.is_empty() => Ok(Self(s)),
            _ => Err(ConfigError::InvalidSymbol(s)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Side
// =============================================================================

/// Trade direction of a derived signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// `+1.0` for longs, `-1.0` for shorts. Multiplies a signed price move.
    pub fn direction(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

// =============================================================================
// Signal
// =============================================================================

/// Fully derived trading parameters for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalSuccess {
    pub symbol: Symbol,
    pub side: Side,
    pub entry: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub leverage: u32,
    /// Posted margin in USDT.
    pub position_size_usdt: f64,
    pub profit_target_usdt: f64,
    pub risk_usdt: f64,
    pub live_price: f64,
    pub change_24h_pct: f64,
    pub rationale: String,
}

/// A symbol whose fetch failed during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalFailure {
    pub symbol: Symbol,
    pub error: String,
}

/// Outcome of one symbol's pipeline in one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Signal {
    Success(SignalSuccess),
    Failure(SignalFailure),
}

impl Signal {
    pub fn failure(symbol: Symbol, error: impl Into<String>) -> Self {
        Self::Failure(SignalFailure {
            symbol,
            error: error.into(),
        })
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Success(s) => &s.symbol,
            Self::Failure(f) => &f.symbol,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}
