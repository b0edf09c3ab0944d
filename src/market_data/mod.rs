// =============================================================================
// Market Data — typed snapshots and the provider contract
// =============================================================================
//
// Two reads per symbol feed the signal generator:
//   1. Ticker  — current last/mark price and 24h stats.
//   2. Klines  — a short candle series, oldest first, for SMA / ATR.
//
// Records are produced fresh on every fetch and never mutated afterwards.
// No retry, caching or rate limiting happens at this layer.
// =============================================================================

pub mod bybit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Symbol;

pub use bybit::BybitClient;

/// One OHLC price bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start time (ms since epoch) as reported by the provider.
    pub start_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// Non-negative finite values with `low <= {open, close} <= high`.
    pub fn is_well_formed(&self) -> bool {
        let values = [self.open, self.high, self.low, self.close];
        values.iter().all(|v| v.is_finite() && *v >= 0.0)
            && self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
    }
}

/// Chronologically ordered (oldest first) candle series.
pub type KlineSeries = Vec<Candle>;

/// Snapshot of a linear contract's current market state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: Symbol,
    pub last_price: f64,
    pub mark_price: f64,
    pub change_24h_pct: f64,
    pub turnover_24h: f64,
}

/// Which provider read produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Ticker,
    Klines,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ticker => write!(f, "Ticker"),
            Self::Klines => write!(f, "Klines"),
        }
    }
}

/// Failure of a single provider round trip.
///
/// The display text is what a failing symbol shows in place of its signal,
/// so `DataUnavailable` stays short; the transport detail is kept alongside.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketDataError {
    #[error("{endpoint} fetch failed")]
    DataUnavailable { endpoint: Endpoint, detail: String },

    #[error("{endpoint} response malformed: {detail}")]
    MalformedResponse { endpoint: Endpoint, detail: String },
}

impl MarketDataError {
    pub fn unavailable(endpoint: Endpoint, detail: impl Into<String>) -> Self {
        Self::DataUnavailable {
            endpoint,
            detail: detail.into(),
        }
    }

    pub fn malformed(endpoint: Endpoint, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            endpoint,
            detail: detail.into(),
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::DataUnavailable { detail, .. } | Self::MalformedResponse { detail, .. } => detail,
        }
    }
}

/// Read-only market data provider.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Ticker, MarketDataError>;

    /// Candles oldest first, regardless of the provider's native ordering.
    async fn fetch_klines(
        &self,
        symbol: &Symbol,
        interval_minutes: u32,
        limit: u32,
    ) -> Result<KlineSeries, MarketDataError>;
}
