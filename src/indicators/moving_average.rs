/// Maps a smoothing period to the EMA weight of the newest observation
pub type AlphaFn = fn(usize) -> f64;

/// Standard smoothing-period convention: `2 / (period + 1)`
pub fn standard_alpha(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

/// One EMA step: `alpha * x + (1 - alpha) * prev`
pub fn ema(prev: f64, x: f64, alpha: f64) -> f64 {
    alpha * x + (1.0 - alpha) * prev
}

/// Streaming exponential moving average
///
/// The first observation becomes the value directly; there is no SMA seed.
#[derive(Debug, Clone)]
pub struct EmaEvaluator {
    period: usize,
    alpha: f64,
    count: u64,
    value: f64,
}

impl EmaEvaluator {
    pub fn new(period: usize) -> Self {
        Self::with_alpha_fn(period, standard_alpha)
    }

    pub fn with_alpha_fn(period: usize, alpha_fn: AlphaFn) -> Self {
        Self {
            period,
            alpha: alpha_fn(period),
            count: 0,
            value: 0.0,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        self.value = if self.count == 0 {
            x
        } else {
            ema(self.value, x, self.alpha)
        };
        self.count += 1;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}
