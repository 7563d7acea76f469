use super::{Strategy, StrategySnapshot};
use crate::indicators::EmaEvaluator;

/// Long while the last price is above its EMA, short while below
#[derive(Debug, Clone)]
pub struct EmaStrategy {
    ema: EmaEvaluator,
    last_price: Option<f64>,
}

impl EmaStrategy {
    pub fn new(period: usize) -> Self {
        Self {
            ema: EmaEvaluator::new(period),
            last_price: None,
        }
    }
}

impl Strategy for EmaStrategy {
    fn update(&mut self, price: f64) {
        self.ema.update(price);
        self.last_price = Some(price);
    }

    fn long(&self) -> bool {
        self.last_price.is_some_and(|p| p > self.ema.value())
    }

    fn short(&self) -> bool {
        self.last_price.is_some_and(|p| p < self.ema.value())
    }

    fn name(&self) -> &str {
        "ema"
    }

    fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot::Ema {
            period: self.ema.period(),
            value: self.ema.value(),
            last_price: self.last_price,
            count: self.ema.count(),
        }
    }
}
