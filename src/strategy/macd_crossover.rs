use super::{Strategy, StrategySnapshot};
use crate::indicators::MacdEvaluator;

/// Signals on the update where the MACD line crosses its signal line
#[derive(Debug, Clone)]
pub struct MacdStrategy {
    macd: MacdEvaluator,
    prev_macd: f64,
    prev_signal: f64,
}

impl MacdStrategy {
    pub fn new(short_period: usize, long_period: usize, signal_period: usize) -> Self {
        Self {
            macd: MacdEvaluator::new(short_period, long_period, signal_period),
            prev_macd: 0.0,
            prev_signal: 0.0,
        }
    }
}

impl Default for MacdStrategy {
    fn default() -> Self {
        Self {
            macd: MacdEvaluator::default(),
            prev_macd: 0.0,
            prev_signal: 0.0,
        }
    }
}

impl Strategy for MacdStrategy {
    fn update(&mut self, price: f64) {
        self.prev_macd = self.macd.macd();
        self.prev_signal = self.macd.signal();
        self.macd.update(price);
    }

    fn long(&self) -> bool {
        self.prev_macd < self.prev_signal && self.macd.macd() > self.macd.signal()
    }

    fn short(&self) -> bool {
        self.prev_macd > self.prev_signal && self.macd.macd() < self.macd.signal()
    }

    fn name(&self) -> &str {
        "macd"
    }

    fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot::Macd {
            macd: self.macd.macd(),
            signal: self.macd.signal(),
            count: self.macd.count(),
        }
    }
}
