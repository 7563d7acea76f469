use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tickbot::api::{KrakenClient, KrakenCredentials, LogNotifier, TelegramNotifier};
use tickbot::config::Settings;
use tickbot::db::{MemoryOrderStore, PostgresOrderStore};
use tickbot::execution::{Notifier, OrderProcessor, OrderStore, SharedParams};
use tickbot::feed::{FeedHandle, FeedReader, ResilientConnection, WsDialer};
use tickbot::pipeline::{self, shutdown_channel, JoinError, PipelineOptions};
use tickbot::server::{self, AppState};
use tickbot::Result;

#[derive(Parser, Debug)]
#[command(name = "tickbot", about = "Candle-driven futures trading bot")]
struct Cli {
    /// Extra config file layered over config/tickbot.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the instruments to subscribe to at startup
    #[arg(short, long)]
    instrument: Vec<String>,

    /// Log filter (RUST_LOG syntax); takes precedence over RUST_LOG
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.log.as_deref());

    tracing::info!("🚀 TickBot starting");

    let mut settings = Settings::load(cli.config.as_deref())?;
    if !cli.instrument.is_empty() {
        settings.trading.instruments = cli.instrument.clone();
        settings.validate()?;
    }

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Feed: {} ({})", settings.exchange.ws_url, settings.exchange.feed);
    tracing::info!("  Instruments: {}", settings.trading.instruments.join(", "));
    tracing::info!("  Candle period: {}", settings.trading.period);
    tracing::info!("  Strategy: {:?}", settings.strategy);
    tracing::info!(
        "  Quantity: {}  Price multiplier: {}",
        settings.trading.quantity,
        settings.trading.price_multiplier
    );

    let store = connect_order_store(&settings).await;
    let (notifier, telegram) = build_notifier(&settings)?;

    let gateway = Arc::new(KrakenClient::new(
        settings.exchange.rest_url.clone(),
        KrakenCredentials {
            public_key: settings.exchange.public_key.clone(),
            private_key: settings.exchange.private_key.clone(),
        },
        settings.exchange.orders_per_second,
        settings.exchange.price_precision,
    )?);

    let params = SharedParams::new(settings.trading.params())?;
    let strategy = settings.strategy.build()?;
    let processor = OrderProcessor::new(strategy, gateway, store, notifier, params.clone())
        .with_warmup_skip(settings.trading.skip_warmup_candle);
    let snapshots = processor.snapshots();

    tracing::info!("🔌 Connecting to {}", settings.exchange.ws_url);
    let connection = ResilientConnection::open(
        WsDialer::new(settings.exchange.ws_url.clone()),
        settings.exchange.connection_options(),
    )
    .await?;

    let (feed, commands) = FeedHandle::channel();
    let mut reader = FeedReader::new(connection, commands);
    reader
        .connection_mut()
        .subscribe(&settings.trading.instruments)
        .await?;
    tracing::info!("✅ Subscribed to {}", settings.trading.instruments.join(", "));

    let (trigger, mut shutdown) = shutdown_channel();
    let tasks = pipeline::spawn(
        reader,
        processor,
        PipelineOptions {
            period: settings.trading.period,
            queue_capacity: settings.pipeline.queue_capacity,
        },
        trigger.clone(),
    );

    let server_task = {
        let state = AppState {
            feed,
            params,
            snapshots,
            shutdown: trigger.clone(),
        };
        let addr = settings.server_address()?;
        let shutdown = trigger.subscribe();
        tokio::spawn(async move {
            if let Err(e) = server::serve(addr, state, shutdown).await {
                tracing::error!("Admin API stopped: {}", e);
            }
        })
    };

    let telegram_task = telegram.map(|bot| {
        let shutdown = trigger.subscribe();
        tokio::spawn(async move { bot.serve(shutdown).await })
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("🛑 Ctrl-C received, shutting down");
        }
        _ = shutdown.cancelled() => {
            tracing::info!("🛑 Shutdown requested");
        }
    }
    trigger.trigger();

    let grace = settings.pipeline.shutdown_grace();
    let outcome = tasks.join_with_grace(grace).await;

    let _ = server_task.await;
    if let Some(task) = telegram_task {
        let _ = task.await;
    }

    match outcome {
        Ok(report) => {
            tracing::info!(
                "📈 Frames accepted: {}, rejected: {}, candles: {}",
                report.validator.accepted,
                report.validator.rejected,
                report.candles
            );
            tracing::info!(
                "📈 Signals: {}, orders placed: {}, submit failures: {}",
                report.processor.signals,
                report.processor.placed,
                report.processor.submit_failures
            );
            if let Err(e) = report.reader {
                tracing::error!("Feed reader stopped with error: {}", e);
                return Err(e.into());
            }
            tracing::info!("👋 TickBot stopped");
            Ok(())
        }
        Err(e @ JoinError::GraceExpired(_)) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

const DEFAULT_LOG_FILTER: &str = "tickbot=info";

/// `--log`, then `RUST_LOG`, then the default
fn log_filter(explicit: Option<&str>) -> EnvFilter {
    match explicit {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    }
}

fn setup_logging(explicit: Option<&str>) {
    tracing_subscriber::fmt().with_env_filter(log_filter(explicit)).init();
}

async fn connect_order_store(settings: &Settings) -> Arc<dyn OrderStore> {
    let Some(database_url) = settings.database.url.as_deref() else {
        tracing::warn!("No database configured, continuing without persistence");
        return Arc::new(MemoryOrderStore::new());
    };

    match PostgresOrderStore::new(database_url).await {
        Ok(store) => {
            tracing::info!("Postgres persistence enabled (orders)");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Postgres ({}), continuing without persistence",
                e
            );
            Arc::new(MemoryOrderStore::new())
        }
    }
}

fn build_notifier(settings: &Settings) -> Result<(Arc<dyn Notifier>, Option<TelegramNotifier>)> {
    match settings.telegram.bot_token.as_deref() {
        Some(token) if !token.is_empty() => {
            let bot = TelegramNotifier::new(token)?;
            tracing::info!("📨 Telegram notifications enabled");
            Ok((Arc::new(bot.clone()), Some(bot)))
        }
        _ => {
            tracing::warn!("No Telegram bot token configured, notifications go to the log");
            Ok((Arc::new(LogNotifier), None))
        }
    }
}
