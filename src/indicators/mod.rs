// Streaming indicators
// EMA with pluggable smoothing and MACD built on top of it

pub mod macd;
pub mod moving_average;

pub use macd::MacdEvaluator;
pub use moving_average::{ema, standard_alpha, AlphaFn, EmaEvaluator};
