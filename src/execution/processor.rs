use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::params::SharedParams;
use super::ports::{Notifier, OrderGateway, OrderStore};
use crate::models::{Candle, Decision, Order, OrderSide};
use crate::pipeline::Shutdown;
use crate::strategy::{Strategy, StrategySnapshot};

/// What happened to one candle
#[derive(Debug, Clone, PartialEq)]
pub enum CandleOutcome {
    /// First candle of the run; not fed to the strategy
    WarmUp,
    Neutral,
    SubmitFailed,
    NotPlaced { status: String },
    Placed { order_id: String },
    /// Order is live but the store write failed
    PlacedUnpersisted { order_id: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub candles: u64,
    pub signals: u64,
    pub submit_failures: u64,
    pub not_placed: u64,
    pub placed: u64,
    pub persist_failures: u64,
}

/// Monitoring view published after every candle
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessorSnapshot {
    pub strategy: Option<StrategySnapshot>,
    pub last_candle: Option<Candle>,
    pub last_decision: Option<Decision>,
    pub stats: ProcessorStats,
}

/// Turns candles into orders
pub struct OrderProcessor {
    strategy: Box<dyn Strategy>,
    gateway: Arc<dyn OrderGateway>,
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    params: SharedParams,
    skip_warmup: bool,
    seen_first: bool,
    stats: ProcessorStats,
    snapshots: watch::Sender<ProcessorSnapshot>,
}

impl OrderProcessor {
    pub fn new(
        strategy: Box<dyn Strategy>,
        gateway: Arc<dyn OrderGateway>,
        store: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        params: SharedParams,
    ) -> Self {
        let (snapshots, _) = watch::channel(ProcessorSnapshot::default());
        Self {
            strategy,
            gateway,
            store,
            notifier,
            params,
            skip_warmup: true,
            seen_first: false,
            stats: ProcessorStats::default(),
            snapshots,
        }
    }

    pub fn with_warmup_skip(mut self, skip: bool) -> Self {
        self.skip_warmup = skip;
        self
    }

    pub fn snapshots(&self) -> watch::Receiver<ProcessorSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }

    pub async fn handle_candle(&mut self, candle: &Candle) -> CandleOutcome {
        self.stats.candles += 1;

        let first = !self.seen_first;
        self.seen_first = true;
        if first && self.skip_warmup {
            tracing::debug!(instrument = %candle.instrument, bucket = %candle.bucket_start, "Skipping warm-up candle");
            self.publish(candle, None);
            return CandleOutcome::WarmUp;
        }

        self.strategy.update(candle.close);
        let decision = self.strategy.decision();
        tracing::debug!(
            instrument = %candle.instrument,
            close = candle.close,
            ?decision,
            "Strategy updated"
        );

        let outcome = match decision {
            Decision::Long => self.trade(candle, OrderSide::Buy).await,
            Decision::Short => self.trade(candle, OrderSide::Sell).await,
            Decision::Neutral => CandleOutcome::Neutral,
        };

        self.publish(candle, Some(decision));
        outcome
    }

    async fn trade(&mut self, candle: &Candle, side: OrderSide) -> CandleOutcome {
        self.stats.signals += 1;

        let params = self.params.load();
        let price = params.limit_price(candle.close, side);
        let order = Order::immediate_or_cancel(side, &candle.instrument, price, params.quantity);

        tracing::info!(
            side = %side,
            instrument = %order.instrument,
            size = order.size,
            limit_price = order.limit_price,
            "📈 Signal, submitting order"
        );

        let response = match self.gateway.submit(&order).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.submit_failures += 1;
                tracing::error!(client_order_id = %order.client_order_id, "Order submission failed: {}", e);
                return CandleOutcome::SubmitFailed;
            }
        };

        if !response.is_placed() {
            self.stats.not_placed += 1;
            tracing::info!(order_id = %response.order_id, status = %response.status, "Order not placed");
            return CandleOutcome::NotPlaced {
                status: response.status,
            };
        }

        self.stats.placed += 1;
        tracing::info!("✅ {}", response);

        let persisted = match self.store.persist(&response).await {
            Ok(()) => true,
            Err(e) => {
                self.stats.persist_failures += 1;
                tracing::error!(
                    target: "tickbot::reconciliation",
                    order_id = %response.order_id,
                    client_order_id = %response.order.client_order_id,
                    "Placed order was not persisted: {}",
                    e
                );
                false
            }
        };

        self.notifier.notify(&response.to_string()).await;

        if persisted {
            CandleOutcome::Placed {
                order_id: response.order_id,
            }
        } else {
            CandleOutcome::PlacedUnpersisted {
                order_id: response.order_id,
            }
        }
    }

    fn publish(&self, candle: &Candle, decision: Option<Decision>) {
        let snapshot = ProcessorSnapshot {
            strategy: Some(self.strategy.snapshot()),
            last_candle: Some(candle.clone()),
            last_decision: decision,
            stats: self.stats,
        };
        self.snapshots.send_replace(snapshot);
    }

    /// Processor stage; an in-flight candle is always finished before observing shutdown
    pub async fn run(mut self, mut candles: mpsc::Receiver<Candle>, mut shutdown: Shutdown) -> ProcessorStats {
        loop {
            let candle = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                candle = candles.recv() => match candle {
                    Some(candle) => candle,
                    None => break,
                },
            };

            self.handle_candle(&candle).await;
        }

        tracing::info!(
            candles = self.stats.candles,
            placed = self.stats.placed,
            submit_failures = self.stats.submit_failures,
            persist_failures = self.stats.persist_failures,
            "Processor stopped"
        );
        self.stats
    }
}
