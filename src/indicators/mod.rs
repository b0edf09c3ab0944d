// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator functions over a fixed candle window.
// Insufficient history is a legitimate outcome, not an error: `sma` returns
// `None`, `atr` returns the `0.0` "volatility unknown" sentinel.

pub mod atr;
pub mod sma;

pub use atr::{atr, DEFAULT_ATR_PERIOD};
pub use sma::sma;
