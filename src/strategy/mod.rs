// Trading strategy module
pub mod ema_threshold;
pub mod macd_crossover;
pub mod unanimous;

pub use ema_threshold::EmaStrategy;
pub use macd_crossover::MacdStrategy;
pub use unanimous::UnanimousStrategy;

use serde::{Deserialize, Serialize};

use crate::error::StrategyError;
use crate::indicators::macd::{DEFAULT_LONG_PERIOD, DEFAULT_SHORT_PERIOD, DEFAULT_SIGNAL_PERIOD};
use crate::models::Decision;

/// Streaming directional strategy, fed one close price per candle
pub trait Strategy: Send + Sync {
    fn update(&mut self, price: f64);

    /// Long edge after the latest update
    fn long(&self) -> bool;

    /// Short edge after the latest update
    fn short(&self) -> bool;

    fn decision(&self) -> Decision {
        match (self.long(), self.short()) {
            (true, false) => Decision::Long,
            (false, true) => Decision::Short,
            _ => Decision::Neutral,
        }
    }

    fn name(&self) -> &str;

    /// Point-in-time indicator values for monitoring
    fn snapshot(&self) -> StrategySnapshot;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySnapshot {
    Ema {
        period: usize,
        value: f64,
        last_price: Option<f64>,
        count: u64,
    },
    Macd {
        macd: f64,
        signal: f64,
        count: u64,
    },
    Unanimous {
        members: Vec<StrategySnapshot>,
    },
}

/// Strategy definition as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Ema {
        period: usize,
    },
    Macd {
        #[serde(default = "default_short")]
        short_period: usize,
        #[serde(default = "default_long")]
        long_period: usize,
        #[serde(default = "default_signal")]
        signal_period: usize,
    },
    Unanimous {
        members: Vec<StrategyConfig>,
    },
}

fn default_short() -> usize {
    DEFAULT_SHORT_PERIOD
}

fn default_long() -> usize {
    DEFAULT_LONG_PERIOD
}

fn default_signal() -> usize {
    DEFAULT_SIGNAL_PERIOD
}

fn check_period(period: usize) -> Result<usize, StrategyError> {
    if period < 2 {
        return Err(StrategyError::InvalidPeriod(period));
    }
    Ok(period)
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), StrategyError> {
        match self {
            StrategyConfig::Ema { period } => check_period(*period).map(|_| ()),
            StrategyConfig::Macd {
                short_period,
                long_period,
                signal_period,
            } => {
                check_period(*short_period)?;
                check_period(*long_period)?;
                check_period(*signal_period)?;
                if short_period >= long_period {
                    return Err(StrategyError::InvertedMacdPeriods {
                        short: *short_period,
                        long: *long_period,
                    });
                }
                Ok(())
            }
            StrategyConfig::Unanimous { members } => {
                if members.is_empty() {
                    return Err(StrategyError::EmptyComposite);
                }
                members.iter().try_for_each(StrategyConfig::validate)
            }
        }
    }

    pub fn build(&self) -> Result<Box<dyn Strategy>, StrategyError> {
        self.validate()?;
        Ok(self.build_unchecked())
    }

    fn build_unchecked(&self) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::Ema { period } => Box::new(EmaStrategy::new(*period)),
            StrategyConfig::Macd {
                short_period,
                long_period,
                signal_period,
            } => Box::new(MacdStrategy::new(*short_period, *long_period, *signal_period)),
            StrategyConfig::Unanimous { members } => Box::new(UnanimousStrategy::new(
                members.iter().map(StrategyConfig::build_unchecked).collect(),
            )),
        }
    }
}

impl Default for StrategyConfig {
    /// MACD(12, 26, 9)
    fn default() -> Self {
        StrategyConfig::Macd {
            short_period: DEFAULT_SHORT_PERIOD,
            long_period: DEFAULT_LONG_PERIOD,
            signal_period: DEFAULT_SIGNAL_PERIOD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json() {
        let config: StrategyConfig = serde_json::from_str(
            r#"{"kind":"unanimous","members":[{"kind":"ema","period":100},{"kind":"macd"}]}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            StrategyConfig::Unanimous {
                members: vec![StrategyConfig::Ema { period: 100 }, StrategyConfig::default()],
            }
        );

        let strategy = config.build().unwrap();
        assert_eq!(strategy.name(), "unanimous");
        assert_eq!(strategy.decision(), Decision::Neutral);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert_eq!(
            StrategyConfig::Ema { period: 1 }.build().err(),
            Some(StrategyError::InvalidPeriod(1))
        );
        assert_eq!(
            StrategyConfig::Macd {
                short_period: 26,
                long_period: 12,
                signal_period: 9
            }
            .validate(),
            Err(StrategyError::InvertedMacdPeriods { short: 26, long: 12 })
        );
        assert_eq!(
            StrategyConfig::Unanimous { members: vec![] }.validate(),
            Err(StrategyError::EmptyComposite)
        );
        assert_eq!(
            StrategyConfig::Unanimous {
                members: vec![StrategyConfig::Ema { period: 0 }]
            }
            .validate(),
            Err(StrategyError::InvalidPeriod(0))
        );
    }

    #[test]
    fn test_snapshot_serializes_tagged() {
        let mut strategy = StrategyConfig::Ema { period: 3 }.build().unwrap();
        strategy.update(10.0);

        let json = serde_json::to_value(strategy.snapshot()).unwrap();
        assert_eq!(json["kind"], "ema");
        assert_eq!(json["value"], 10.0);
    }
}
