//! Capabilities the processor consumes from outside collaborators.

use async_trait::async_trait;

use crate::error::{GatewayError, StoreError};
use crate::models::{Order, OrderResponse};

/// Authenticated order transport
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit(&self, order: &Order) -> Result<OrderResponse, GatewayError>;
}

/// Durable storage of placed orders
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn persist(&self, response: &OrderResponse) -> Result<(), StoreError>;
}

/// Best-effort fan-out; implementations log their own per-recipient failures
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}
