use tokio::sync::mpsc;

use crate::models::{Candle, CandlePeriod, PriceEvent};
use crate::pipeline::Shutdown;

/// Folds ordered price events into closed candles
///
/// Holds at most one in-progress candle. A tick for a different instrument
/// closes the current candle just like a tick from a later bucket does.
#[derive(Debug)]
pub struct CandleAggregator {
    period: CandlePeriod,
    current: Option<Candle>,
    late_ticks: u64,
}

impl CandleAggregator {
    pub fn new(period: CandlePeriod) -> Self {
        Self {
            period,
            current: None,
            late_ticks: 0,
        }
    }

    /// Ticks dropped because their bucket had already closed
    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Absorb one event, returning the previous candle if this event closed it
    pub fn push(&mut self, event: &PriceEvent) -> Option<Candle> {
        let bucket = self.period.truncate(event.timestamp);

        match self.current.as_mut() {
            Some(candle) if candle.instrument == event.instrument => {
                if bucket == candle.bucket_start {
                    candle.absorb(event);
                    return None;
                }
                if bucket < candle.bucket_start {
                    self.late_ticks += 1;
                    tracing::debug!(
                        instrument = %event.instrument,
                        tick = %event.timestamp,
                        bucket = %candle.bucket_start,
                        "Dropping tick for closed bucket"
                    );
                    return None;
                }
            }
            _ => {}
        }

        self.current
            .replace(Candle::open_with(event, self.period, bucket))
    }

    /// Emit the in-progress candle, if any
    pub fn flush(&mut self) -> Option<Candle> {
        self.current.take()
    }
}

/// Lazy candle sequence over a sequence of price events
pub struct Candles<I> {
    events: I,
    aggregator: CandleAggregator,
    done: bool,
}

impl<I> Iterator for Candles<I>
where
    I: Iterator<Item = PriceEvent>,
{
    type Item = Candle;

    fn next(&mut self) -> Option<Candle> {
        if self.done {
            return None;
        }

        for event in self.events.by_ref() {
            if let Some(candle) = self.aggregator.push(&event) {
                return Some(candle);
            }
        }

        self.done = true;
        self.aggregator.flush()
    }
}

pub fn aggregate<I>(events: I, period: CandlePeriod) -> Candles<I::IntoIter>
where
    I: IntoIterator<Item = PriceEvent>,
{
    Candles {
        events: events.into_iter(),
        aggregator: CandleAggregator::new(period),
        done: false,
    }
}

/// Aggregator stage. Flushes the last candle only when upstream ends, not on cancellation.
pub async fn run_aggregator(
    mut events: mpsc::Receiver<PriceEvent>,
    candles: mpsc::Sender<Candle>,
    period: CandlePeriod,
    mut shutdown: Shutdown,
) -> u64 {
    let mut aggregator = CandleAggregator::new(period);
    let mut emitted = 0u64;

    loop {
        let closed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => aggregator.push(&event),
                None => {
                    if let Some(last) = aggregator.flush() {
                        if candles.send(last).await.is_ok() {
                            emitted += 1;
                        }
                    }
                    break;
                }
            },
        };

        if let Some(candle) = closed {
            tracing::debug!(
                instrument = %candle.instrument,
                bucket = %candle.bucket_start,
                close = candle.close,
                trades = candle.trades,
                "Candle closed"
            );
            let sent = tokio::select! {
                biased;
                _ = shutdown.cancelled() => false,
                sent = candles.send(candle) => sent.is_ok(),
            };
            if !sent {
                break;
            }
            emitted += 1;
        }
    }

    tracing::info!(
        candles = emitted,
        late_ticks = aggregator.late_ticks(),
        period = %period,
        "Aggregator stopped"
    );
    emitted
}
