use super::moving_average::EmaEvaluator;

pub const DEFAULT_SHORT_PERIOD: usize = 12;
pub const DEFAULT_LONG_PERIOD: usize = 26;
pub const DEFAULT_SIGNAL_PERIOD: usize = 9;

/// MACD line (`short EMA - long EMA`) plus its EMA signal line
#[derive(Debug, Clone)]
pub struct MacdEvaluator {
    short: EmaEvaluator,
    long: EmaEvaluator,
    signal: EmaEvaluator,
}

impl MacdEvaluator {
    pub fn new(short_period: usize, long_period: usize, signal_period: usize) -> Self {
        Self {
            short: EmaEvaluator::new(short_period),
            long: EmaEvaluator::new(long_period),
            signal: EmaEvaluator::new(signal_period),
        }
    }

    pub fn update(&mut self, x: f64) {
        let macd = self.short.update(x) - self.long.update(x);
        self.signal.update(macd);
    }

    pub fn macd(&self) -> f64 {
        self.short.value() - self.long.value()
    }

    pub fn signal(&self) -> f64 {
        self.signal.value()
    }

    pub fn count(&self) -> u64 {
        self.signal.count()
    }

    pub fn periods(&self) -> (usize, usize, usize) {
        (self.short.period(), self.long.period(), self.signal.period())
    }
}

impl Default for MacdEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_SHORT_PERIOD, DEFAULT_LONG_PERIOD, DEFAULT_SIGNAL_PERIOD)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) const SERIES: [f64; 74] = [
        10.0, 7.0, 8.0, 9.0, 7.0, 1.0, 30.0, 12.0, 11.0, 8.0, 9.0, 16.0, 17.0, 18.0, 20.0, 30.0,
        32.0, 43.0, 55.0, 30.0, 20.0, 15.0, 12.0, 10.0, 8.0, 10.0, 9.0, 5.0, 7.0, 2.0, 6.0, 1.0,
        10.0, 13.0, 16.0, 24.0, 22.0, 17.0, 10.0, 20.0, 15.0, 9.0, 10.0, 7.0, 8.0, 9.0, 7.0, 1.0,
        30.0, 12.0, 11.0, 8.0, 9.0, 16.0, 19.0, 20.0, 15.0, 16.0, 17.0, 18.0, 20.0, 30.0, 32.0,
        43.0, 55.0, 30.0, 20.0, 15.0, 12.0, 10.0, 8.0, 10.0, 9.0, 5.0,
    ];

    #[test]
    fn test_macd_over_series() {
        let mut evaluator = MacdEvaluator::default();
        for &v in SERIES.iter() {
            evaluator.update(v);
        }

        assert_relative_eq!(evaluator.macd(), -2.0481284566795406, epsilon = 1e-9);
        assert_relative_eq!(evaluator.signal(), 0.7133144817168429, epsilon = 1e-9);
        assert_eq!(evaluator.count(), 74);
    }

    #[test]
    fn test_first_update_is_flat() {
        let mut evaluator = MacdEvaluator::default();
        evaluator.update(100.0);

        assert_eq!(evaluator.macd(), 0.0);
        assert_eq!(evaluator.signal(), 0.0);
    }
}
