// =============================================================================
// Signal Generator — momentum direction, volatility-banded leverage
// =============================================================================
//
// Maps one symbol's ticker + klines + capital to a trade setup.
//
// Pipeline:
//   1. Direction from SMA(3) vs SMA(9) of closes (LONG when history is short)
//   2. Leverage band from ATR(14) as % of price (50x when ATR is unknown)
//   3. Take-profit at the move that returns 100% on margin: 100 / leverage %
//   4. Stop-loss at most half that distance, ATR-tightened, floored at 60%
//      of the half distance
//   5. Notional sizing, profit target and risk in USDT
//   6. One-line rationale
//
// Pure and deterministic: identical inputs yield identical output.
// =============================================================================

use crate::indicators::{atr, sma, DEFAULT_ATR_PERIOD};
use crate::market_data::{Candle, Ticker};
use crate::types::{Side, SignalSuccess, Symbol};

const FAST_MA_PERIOD: usize = 3;
const SLOW_MA_PERIOD: usize = 9;

/// Leverage used when ATR is the "unknown" sentinel.
pub const DEFAULT_LEVERAGE: u32 = 50;

/// `(exclusive upper bound on ATR %, leverage)`, checked in order.
const LEVERAGE_BANDS: [(f64, u32); 3] = [(0.15, 75), (0.30, 60), (0.60, 45)];
const MIN_BAND_LEVERAGE: u32 = 30;

/// Stop is never tightened below this fraction of the half-reward distance.
const STOP_FLOOR_FRACTION: f64 = 0.6;
/// Fraction of ATR % used as the volatility stop.
const ATR_STOP_FRACTION: f64 = 0.8;

/// Guard for the reward-to-risk division.
const RR_EPSILON: f64 = 1e-9;

/// Map ATR as a percentage of price to a leverage tier.
///
/// Thresholds are strict `<`, so a boundary value lands in the lower
/// (riskier-volatility) tier: `0.15` maps to 60x, not 75x.
pub fn leverage_for_atr_pct(atr_pct: f64) -> u32 {
    LEVERAGE_BANDS
        .iter()
        .find(|(bound, _)| atr_pct < *bound)
        .map(|(_, lev)| *lev)
        .unwrap_or(MIN_BAND_LEVERAGE)
}

/// Price move (percent of entry) that returns 100% on posted margin.
pub fn required_move_pct(leverage: u32) -> f64 {
    100.0 / leverage as f64
}

/// Stop distance in percent of entry.
///
/// `atr_stop_pct` is `None` when ATR is unknown, in which case the half
/// reward distance is used in its place.
pub fn stop_pct(required_move_pct: f64, atr_stop_pct: Option<f64>) -> f64 {
    let half = required_move_pct / 2.0;
    let atr_stop = atr_stop_pct.unwrap_or(half);
    half.min((ATR_STOP_FRACTION * atr_stop).max(STOP_FLOOR_FRACTION * half))
}

/// USDT PnL of `notional` for a price move of `move_fraction`, rounded to cents.
pub fn notional_pnl(notional: f64, move_fraction: f64) -> f64 {
    round_cents(notional * move_fraction)
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Derive a trade setup for `symbol`.
///
/// `klines` must be oldest first. `capital` is the posted margin per signal
/// and is expected to be already clamped to the configured minimum.
pub fn generate(symbol: &Symbol, ticker: &Ticker, klines: &[Candle], capital: f64) -> SignalSuccess {
    let price = ticker.last_price;
    let closes: Vec<f64> = klines.iter().map(|c| c.close).collect();

    // ── 1. Direction ─────────────────────────────────────────────────────
    let side = match (sma(&closes, FAST_MA_PERIOD), sma(&closes, SLOW_MA_PERIOD)) {
        (Some(fast), Some(slow)) if fast < slow => Side::Short,
        _ => Side::Long,
    };

    // ── 2. Leverage band ─────────────────────────────────────────────────
    let atr_value = atr(klines, DEFAULT_ATR_PERIOD);
    let leverage = if atr_value > 0.0 {
        leverage_for_atr_pct(100.0 * atr_value / price)
    } else {
        DEFAULT_LEVERAGE
    };

    // ── 3. Target ────────────────────────────────────────────────────────
    let move_pct = required_move_pct(leverage);
    let entry = price;
    let take_profit = entry * (1.0 + side.direction() * move_pct / 100.0);

    // ── 4. Stop ──────────────────────────────────────────────────────────
    let atr_stop_pct = (atr_value > 0.0).then(|| 100.0 * atr_value / entry);
    let stop = stop_pct(move_pct, atr_stop_pct);
    let stop_loss = entry * (1.0 - side.direction() * stop / 100.0);

    // ── 5. Sizing ────────────────────────────────────────────────────────
    let notional = capital * leverage as f64;
    let profit_target_usdt = notional_pnl(notional, (take_profit - entry).abs() / entry);
    let risk_usdt = notional_pnl(notional, (entry - stop_loss).abs() / entry);

    // ── 6. Rationale ─────────────────────────────────────────────────────
    let momentum = match side {
        Side::Long => "up",
        Side::Short => "down",
    };
    let reward_to_risk = profit_target_usdt / risk_usdt.max(RR_EPSILON);
    let rationale = format!("Momentum {momentum}; atr={atr_value:.4}; rr {reward_to_risk:.2}x");

    SignalSuccess {
        symbol: symbol.clone(),
        side,
        entry,
        take_profit,
        stop_loss,
        leverage,
        position_size_usdt: capital,
        profit_target_usdt,
        risk_usdt,
        live_price: price,
        change_24h_pct: ticker.change_24h_pct,
        rationale,
    }
}
