use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::execution::OrderStore;
use crate::models::OrderResponse;
use crate::Result;

/// Placed order as stored in the `orders` table
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    pub order_id: String,
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub size: i64,
    pub limit_price: Decimal,
    pub status: String,
    pub received_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Postgres store for placed orders
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Connect and run pending migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres, orders table ready");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a placed order; a repeated `order_id` is ignored
    pub async fn save_order(&self, response: &OrderResponse) -> std::result::Result<(), StoreError> {
        let limit_price = Decimal::from_f64(response.order.limit_price).ok_or_else(|| {
            StoreError::InvalidValue(format!("limit price {}", response.order.limit_price))
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, client_order_id, symbol, side, order_type,
                size, limit_price, status, received_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(&response.order_id)
        .bind(response.order.client_order_id)
        .bind(&response.order.instrument)
        .bind(response.order.side.as_str())
        .bind(response.order.order_type.as_str())
        .bind(i64::from(response.order.size))
        .bind(limit_price)
        .bind(&response.status)
        .bind(response.received_time)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(order_id = %response.order_id, "Order already stored");
        } else {
            tracing::debug!(order_id = %response.order_id, "Saved order to Postgres");
        }

        Ok(())
    }

    /// Most recent orders first
    pub async fn recent_orders(&self, limit: i64) -> std::result::Result<Vec<StoredOrder>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, client_order_id, symbol, side, order_type,
                   size, limit_price, status, received_time, created_at
            FROM orders
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let orders = rows
            .iter()
            .map(|row| StoredOrder {
                order_id: row.get("order_id"),
                client_order_id: row.get("client_order_id"),
                symbol: row.get("symbol"),
                side: row.get("side"),
                order_type: row.get("order_type"),
                size: row.get("size"),
                limit_price: row.get("limit_price"),
                status: row.get("status"),
                received_time: row.get("received_time"),
                created_at: row.get("created_at"),
            })
            .collect();

        Ok(orders)
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn persist(&self, response: &OrderResponse) -> std::result::Result<(), StoreError> {
        self.save_order(response).await
    }
}
