//! Administrative HTTP surface.

mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::{Ack, StatusReport};

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

use crate::execution::{ProcessorSnapshot, SharedParams};
use crate::feed::FeedHandle;
use crate::pipeline::{Shutdown, ShutdownTrigger};

pub struct AppState {
    pub feed: FeedHandle,
    pub params: SharedParams,
    pub snapshots: watch::Receiver<ProcessorSnapshot>,
    pub shutdown: ShutdownTrigger,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/subscribe/{pair}", post(handlers::subscribe))
        .route("/unsubscribe/{pair}", post(handlers::unsubscribe))
        .route("/quantity/{value}", post(handlers::set_quantity))
        .route("/multiplier/{value}", post(handlers::set_multiplier))
        .route("/shutdown", post(handlers::shutdown))
        .route("/status", get(handlers::status))
        .with_state(Arc::new(state))
}

/// Serve the admin API until shutdown
pub async fn serve(addr: SocketAddr, state: AppState, mut shutdown: Shutdown) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("🌐 Admin API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
