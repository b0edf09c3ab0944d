// =============================================================================
// Average True Range (ATR) — simple trailing mean
// =============================================================================
//
// True Range (TR) for each bar after the first:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the arithmetic mean of the last `period` TR values (no Wilder
// smoothing). Default period: 14.
//
// With fewer than `period + 1` candles the result is `0.0`. That is a
// sentinel for "volatility unknown", never a real reading; callers branch on
// it explicitly.
// =============================================================================

use crate::market_data::Candle;

pub const DEFAULT_ATR_PERIOD: usize = 14;

/// True range of `candle` relative to the previous bar's close.
fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    let hl = candle.high - candle.low;
    let hc = (candle.high - prev_close).abs();
    let lc = (candle.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Mean true range over the last `period` bar pairs of `candles` (oldest first).
///
/// Returns `0.0` when `period` is zero or fewer than `period + 1` candles are
/// available.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return 0.0;
    }

    let tr_values: Vec<f64> = candles
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close))
        .collect();

    let window = &tr_values[tr_values.len() - period..];
    window.iter().sum::<f64>() / period as f64
}
