use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::execution::OrderGateway;
use crate::models::{Order, OrderResponse, STATUS_PLACED};

pub const KRAKEN_FUTURES_REST: &str = "https://futures.kraken.com/derivatives";
const SEND_ORDER_ENDPOINT: &str = "/api/v3/sendorder";
const RESULT_SUCCESS: &str = "success";

type KrakenRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone)]
pub struct KrakenCredentials {
    pub public_key: String,
    /// Base64-encoded API secret
    pub private_key: String,
}

/// Kraken Futures order transport
#[derive(Clone)]
pub struct KrakenClient {
    client: Client,
    base_url: String,
    credentials: KrakenCredentials,
    price_precision: usize,
    rate_limiter: Arc<KrakenRateLimiter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendOrderResponse {
    result: String,
    send_status: Option<SendStatus>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendStatus {
    #[serde(rename = "order_id")]
    order_id: Option<String>,
    status: String,
    received_time: Option<DateTime<Utc>>,
}

/// `Authent` header: base64(HMAC-SHA512(base64decode(secret), SHA256(post_data + endpoint)))
pub fn generate_authent(
    private_key: &str,
    endpoint: &str,
    post_data: &str,
) -> Result<String, GatewayError> {
    let digest = Sha256::new()
        .chain_update(post_data.as_bytes())
        .chain_update(endpoint.as_bytes())
        .finalize();

    let secret = BASE64
        .decode(private_key)
        .map_err(|e| GatewayError::Signing(format!("private key is not base64: {}", e)))?;

    let mut mac = Hmac::<Sha512>::new_from_slice(&secret)
        .map_err(|e| GatewayError::Signing(e.to_string()))?;
    mac.update(&digest);

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

impl KrakenClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: KrakenCredentials,
        orders_per_second: u32,
        price_precision: usize,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let rate = NonZeroU32::new(orders_per_second)
            .ok_or_else(|| GatewayError::Config("orders_per_second must be positive".to_string()))?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate)));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            price_precision,
            rate_limiter,
        })
    }

    /// Form-encoded order parameters, keys in lexical order
    pub fn order_query(&self, order: &Order) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("cliOrdId", &order.client_order_id.to_string())
            .append_pair(
                "limitPrice",
                &format!("{:.*}", self.price_precision, order.limit_price),
            )
            .append_pair("orderType", order.order_type.as_str())
            .append_pair("side", order.side.as_str())
            .append_pair("size", &order.size.to_string())
            .append_pair("symbol", &order.instrument)
            .finish()
    }

    pub async fn send_order(&self, order: &Order) -> Result<OrderResponse, GatewayError> {
        let query = self.order_query(order);
        let authent = generate_authent(&self.credentials.private_key, SEND_ORDER_ENDPOINT, &query)?;
        let url = format!("{}{}?{}", self.base_url, SEND_ORDER_ENDPOINT, query);

        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(&url)
            .header("APIKey", &self.credentials.public_key)
            .header("Authent", authent)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::trace!(%status, body = %body, "sendorder response");

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SendOrderResponse =
            serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))?;

        if parsed.result != RESULT_SUCCESS {
            return Err(GatewayError::Rejected {
                reason: parsed.error.unwrap_or(parsed.result),
            });
        }

        let send_status = parsed
            .send_status
            .ok_or_else(|| GatewayError::Decode("missing sendStatus".to_string()))?;

        // Rejected orders may come back without an id; placed ones never do
        let order_id = match send_status.order_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None if send_status.status == STATUS_PLACED => {
                return Err(GatewayError::Decode("placed order without order_id".to_string()));
            }
            None => String::new(),
        };

        Ok(OrderResponse {
            order_id,
            status: send_status.status,
            received_time: send_status.received_time,
            order: order.clone(),
        })
    }
}

#[async_trait]
impl OrderGateway for KrakenClient {
    async fn submit(&self, order: &Order) -> Result<OrderResponse, GatewayError> {
        self.send_order(order).await
    }
}
