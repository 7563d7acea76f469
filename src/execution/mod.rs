// Candle aggregation and order execution
pub mod candle_aggregator;
pub mod params;
pub mod ports;
pub mod processor;

pub use candle_aggregator::{aggregate, CandleAggregator, Candles};
pub use params::{SharedParams, TradingParams};
pub use ports::{Notifier, OrderGateway, OrderStore};
pub use processor::{CandleOutcome, OrderProcessor, ProcessorSnapshot, ProcessorStats};
