//! Typed failures for each stage of the bot.

use thiserror::Error;

use crate::feed::connection::{DialError, StreamError};

/// Failures of the resilient market-data connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot establish connection: handshake failed {attempts} times")]
    CannotEstablish { attempts: u32 },

    #[error("dial failed: {0}")]
    Dial(String),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("subscription limit of {limit} reached (subscribed: {current:?})")]
    SubscriptionLimit { limit: usize, current: Vec<String> },

    #[error("subscription request names no instruments")]
    EmptySubscription,

    #[error("resubscribe failed after {attempts} consecutive reconnects")]
    ResubscribeFailed { attempts: u32 },

    #[error("failed to encode subscription request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("feed reader is not running")]
    FeedClosed,
}

impl ConnectionError {
    /// Caller mistakes leave the connection usable; everything else ends the pipeline
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ConnectionError::SubscriptionLimit { .. }
                | ConnectionError::EmptySubscription
                | ConnectionError::FeedClosed
        )
    }
}

impl From<DialError> for ConnectionError {
    fn from(err: DialError) -> Self {
        ConnectionError::Dial(err.to_string())
    }
}

/// Failures of the order transport
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("order rejected by exchange: {reason}")]
    Rejected { reason: String },

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid gateway configuration: {0}")]
    Config(String),
}

/// Failures writing placed orders to durable storage
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("value cannot be stored: {0}")]
    InvalidValue(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Malformed or inconsistent configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration `{key}`: {reason}")]
    Invalid { key: String, reason: String },

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Params(#[from] ParamsError),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Invalid strategy definitions
#[derive(Debug, Error, PartialEq)]
pub enum StrategyError {
    #[error("period must be at least 2, got {0}")]
    InvalidPeriod(usize),

    #[error("MACD short period ({short}) must be below long period ({long})")]
    InvertedMacdPeriods { short: usize, long: usize },

    #[error("composite strategy needs at least one member")]
    EmptyComposite,
}

/// Rejected runtime trading parameters
#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("trading quantity must be positive")]
    ZeroQuantity,

    #[error("price multiplier must be within [0, 1), got {0}")]
    MultiplierOutOfRange(f64),
}
