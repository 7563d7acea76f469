use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ParamsError;
use crate::models::OrderSide;

pub const DEFAULT_TRADING_QUANTITY: u32 = 100;

/// Order sizing and pricing knobs tunable at runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradingParams {
    pub quantity: u32,
    /// Fraction added to (buy) or taken from (sell) the close price
    pub price_multiplier: f64,
}

impl TradingParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.quantity == 0 {
            return Err(ParamsError::ZeroQuantity);
        }
        if !(self.price_multiplier.is_finite()
            && (0.0..1.0).contains(&self.price_multiplier))
        {
            return Err(ParamsError::MultiplierOutOfRange(self.price_multiplier));
        }
        Ok(())
    }

    /// `close * (1 + m)` when buying, `close * (1 - m)` when selling
    pub fn limit_price(&self, close: f64, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => close * (1.0 + self.price_multiplier),
            OrderSide::Sell => close * (1.0 - self.price_multiplier),
        }
    }
}

impl Default for TradingParams {
    fn default() -> Self {
        Self {
            quantity: DEFAULT_TRADING_QUANTITY,
            price_multiplier: 0.0,
        }
    }
}

/// Atomically swapped parameter snapshot shared by the admin surface and the processor
#[derive(Debug, Clone)]
pub struct SharedParams(Arc<ArcSwap<TradingParams>>);

impl SharedParams {
    pub fn new(params: TradingParams) -> Result<Self, ParamsError> {
        params.validate()?;
        Ok(Self(Arc::new(ArcSwap::from_pointee(params))))
    }

    pub fn load(&self) -> TradingParams {
        **self.0.load()
    }

    pub fn set_quantity(&self, quantity: u32) -> Result<TradingParams, ParamsError> {
        self.update(|p| TradingParams { quantity, ..p })
    }

    pub fn set_multiplier(&self, price_multiplier: f64) -> Result<TradingParams, ParamsError> {
        self.update(|p| TradingParams {
            price_multiplier,
            ..p
        })
    }

    fn update(
        &self,
        change: impl Fn(TradingParams) -> TradingParams,
    ) -> Result<TradingParams, ParamsError> {
        // Validate against the current value first so a bad request never lands
        change(self.load()).validate()?;
        let previous = self.0.rcu(|current| change(**current));
        let updated = change(*previous);
        tracing::info!(
            quantity = updated.quantity,
            price_multiplier = updated.price_multiplier,
            "Trading parameters updated"
        );
        Ok(updated)
    }
}

impl Default for SharedParams {
    fn default() -> Self {
        Self(Arc::new(ArcSwap::from_pointee(TradingParams::default())))
    }
}
