use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::execution::OrderStore;
use crate::models::OrderResponse;

/// Process-local order store used when no database is configured
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: Mutex<Vec<OrderResponse>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<OrderResponse> {
        self.orders
            .lock()
            .map(|orders| orders.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn persist(&self, response: &OrderResponse) -> Result<(), StoreError> {
        let mut orders = self
            .orders
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !orders.iter().any(|o| o.order_id == response.order_id) {
            orders.push(response.clone());
        }
        Ok(())
    }
}
