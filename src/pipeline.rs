//! Stage wiring: reader → validator → aggregator → processor.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::execution::candle_aggregator::run_aggregator;
use crate::execution::processor::{OrderProcessor, ProcessorStats};
use crate::feed::connection::Dialer;
use crate::feed::reader::FeedReader;
use crate::feed::validator::{run_validator, ValidatorStats};
use crate::models::CandlePeriod;

/// Receiving side of the pipeline-wide cancellation signal
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered (or every trigger is gone)
    pub async fn cancelled(&mut self) {
        loop {
            let cancelled = *self.rx.borrow_and_update();
            if cancelled {
                return;
            }
            // Err means every trigger dropped, which counts as shutdown
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, Shutdown { rx })
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub period: CandlePeriod,
    pub queue_capacity: usize,
}

/// Handles of the four running stages
pub struct PipelineTasks {
    pub reader: JoinHandle<Result<(), crate::error::ConnectionError>>,
    pub validator: JoinHandle<ValidatorStats>,
    pub aggregator: JoinHandle<u64>,
    pub processor: JoinHandle<ProcessorStats>,
}

#[derive(Debug)]
pub struct PipelineReport {
    pub reader: Result<(), crate::error::ConnectionError>,
    pub validator: ValidatorStats,
    pub candles: u64,
    pub processor: ProcessorStats,
}

/// Start every stage connected by bounded queues
pub fn spawn<D>(
    reader: FeedReader<D>,
    processor: OrderProcessor,
    options: PipelineOptions,
    trigger: ShutdownTrigger,
) -> PipelineTasks
where
    D: Dialer + 'static,
    D::Stream: 'static,
{
    let capacity = options.queue_capacity.max(1);
    let (frames_tx, frames_rx) = mpsc::channel(capacity);
    let (events_tx, events_rx) = mpsc::channel(capacity);
    let (candles_tx, candles_rx) = mpsc::channel(capacity);

    let reader = {
        let shutdown = trigger.subscribe();
        let trigger = trigger.clone();
        tokio::spawn(async move { reader.run(frames_tx, shutdown, trigger).await })
    };

    let validator = tokio::spawn(run_validator(frames_rx, events_tx, trigger.subscribe()));

    let aggregator = tokio::spawn(run_aggregator(
        events_rx,
        candles_tx,
        options.period,
        trigger.subscribe(),
    ));

    let processor = {
        let shutdown = trigger.subscribe();
        tokio::spawn(async move { processor.run(candles_rx, shutdown).await })
    };

    PipelineTasks {
        reader,
        validator,
        aggregator,
        processor,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("pipeline did not stop within {0:?}")]
    GraceExpired(Duration),

    #[error("pipeline stage panicked: {0}")]
    Panicked(#[from] tokio::task::JoinError),
}

impl PipelineTasks {
    /// Wait for every stage to return, bounded by `grace`
    pub async fn join_with_grace(self, grace: Duration) -> Result<PipelineReport, JoinError> {
        let all = async {
            let (reader, validator, candles, processor) =
                tokio::try_join!(self.reader, self.validator, self.aggregator, self.processor)?;
            Ok::<_, tokio::task::JoinError>(PipelineReport {
                reader,
                validator,
                candles,
                processor,
            })
        };

        match timeout(grace, all).await {
            Ok(report) => Ok(report?),
            Err(_) => {
                tracing::error!(?grace, "Pipeline stages still running after grace period");
                Err(JoinError::GraceExpired(grace))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_reaches_every_subscriber() {
        let (trigger, mut first) = shutdown_channel();
        let mut second = trigger.subscribe();
        assert!(!first.is_cancelled());

        trigger.trigger();

        first.cancelled().await;
        second.cancelled().await;
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_cancelled_pending_until_triggered() {
        use tokio_test::{assert_pending, assert_ready, task};

        let (trigger, mut shutdown) = shutdown_channel();
        let mut waiting = task::spawn(async move { shutdown.cancelled().await });

        assert_pending!(waiting.poll());
        trigger.trigger();
        assert!(waiting.is_woken());
        assert_ready!(waiting.poll());
    }

    #[tokio::test]
    async fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, mut shutdown) = shutdown_channel();
        drop(trigger);

        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .unwrap();
    }
}
