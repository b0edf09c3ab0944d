// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================

/// Arithmetic mean of the last `period` values.
///
/// Returns `None` when fewer than `period` values exist or `period` is zero.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}
