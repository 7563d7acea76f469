//! Subscription-oriented duplex connection that survives drops.
//!
//! Handshake-class dial failures are retried up to a bound; any other dial
//! failure is fatal. While connected, a read or write that fails with a
//! going-away or abnormal closure triggers one transparent redial and the
//! caller is told via [`Inbound::Reconnected`] / [`Delivery::Reconnected`].

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::time::{sleep, Duration};

use super::subscriptions::{SubscriptionSet, DEFAULT_SUBSCRIPTION_LIMIT};
use crate::error::ConnectionError;

/// Kraken's bound on handshake retries
pub const DEFAULT_MAX_HANDSHAKE_RETRIES: u32 = 13;
const MAX_RESUBSCRIBE_ATTEMPTS: u32 = 3;

const SUBSCRIBE_EVENT: &str = "subscribe";
const UNSUBSCRIBE_EVENT: &str = "unsubscribe";

/// How a peer (or the network) ended the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Normal,
    GoingAway,
    Abnormal,
    Other(u16),
}

impl fmt::Display for CloseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseKind::Normal => f.write_str("normal closure"),
            CloseKind::GoingAway => f.write_str("going away"),
            CloseKind::Abnormal => f.write_str("abnormal closure"),
            CloseKind::Other(code) => write!(f, "close code {}", code),
        }
    }
}

#[derive(Debug, Error)]
pub enum DialError {
    /// Server answered but refused or botched the upgrade
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection closed: {0}")]
    Closed(CloseKind),

    #[error("stream error: {0}")]
    Other(String),
}

impl StreamError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StreamError::Closed(CloseKind::GoingAway) | StreamError::Closed(CloseKind::Abnormal)
        )
    }
}

/// One established duplex session
#[async_trait]
pub trait FrameStream: Send {
    /// Next data frame; control frames are handled internally
    async fn read_frame(&mut self) -> Result<Vec<u8>, StreamError>;

    async fn send_text(&mut self, payload: String) -> Result<(), StreamError>;

    async fn close(&mut self) -> Result<(), StreamError>;
}

/// Opens sessions to one fixed endpoint
#[async_trait]
pub trait Dialer: Send + Sync {
    type Stream: FrameStream;

    async fn dial(&self) -> Result<Self::Stream, DialError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_handshake_retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    fn backoff(&self) -> Duration {
        let jitter_cap = self.retry_delay.as_millis() as u64 / 5;
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        self.retry_delay + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_handshake_retries: DEFAULT_MAX_HANDSHAKE_RETRIES,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Feed name sent in subscription requests
    pub feed: String,
    pub retry: RetryPolicy,
    pub subscription_limit: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            feed: "trade".to_string(),
            retry: RetryPolicy::default(),
            subscription_limit: DEFAULT_SUBSCRIPTION_LIMIT,
        }
    }
}

/// Result of a successful read
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Frame(Vec<u8>),
    /// The session was replaced; subscriptions must be reasserted
    Reconnected,
}

/// Result of a successful write
#[derive(Debug, PartialEq)]
pub enum Delivery {
    Sent,
    /// The write failed and the session was replaced; the payload was not delivered
    Reconnected,
}

#[derive(Serialize)]
struct SubscriptionRequest<'a> {
    event: &'a str,
    feed: &'a str,
    product_ids: &'a [String],
}

pub struct ResilientConnection<D: Dialer> {
    dialer: D,
    options: ConnectionOptions,
    stream: Option<D::Stream>,
    subscriptions: SubscriptionSet,
    reconnects: u64,
}

impl<D: Dialer> ResilientConnection<D> {
    /// Dial the endpoint, retrying handshake failures
    pub async fn open(dialer: D, options: ConnectionOptions) -> Result<Self, ConnectionError> {
        let subscriptions = SubscriptionSet::new(options.subscription_limit);
        let mut connection = Self {
            dialer,
            options,
            stream: None,
            subscriptions,
            reconnects: 0,
        };

        let stream = Self::dial_with_retry(&connection.dialer, connection.options.retry).await?;
        connection.stream = Some(stream);
        tracing::info!(feed = %connection.options.feed, "Market data connection established");

        Ok(connection)
    }

    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Borrows only the dialer, so the stream type need not be `Sync`
    async fn dial_with_retry(dialer: &D, retry: RetryPolicy) -> Result<D::Stream, ConnectionError> {
        let mut failures: u32 = 0;

        loop {
            match dialer.dial().await {
                Ok(stream) => return Ok(stream),
                Err(DialError::Handshake(reason)) => {
                    failures += 1;
                    if failures > retry.max_handshake_retries {
                        return Err(ConnectionError::CannotEstablish { attempts: failures });
                    }
                    tracing::warn!(
                        "Handshake failed ({}), retry {}/{}",
                        reason,
                        failures,
                        retry.max_handshake_retries
                    );
                    sleep(retry.backoff()).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn redial(&mut self) -> Result<(), ConnectionError> {
        // A dropped redial leaves no stream behind, so the next call redials again
        self.stream = None;
        let stream = Self::dial_with_retry(&self.dialer, self.options.retry).await?;
        self.stream = Some(stream);
        self.reconnects += 1;
        tracing::info!(reconnects = self.reconnects, "Reconnected to market data feed");
        Ok(())
    }

    /// Read the next data frame, redialing once on a recoverable close
    pub async fn read_frame(&mut self) -> Result<Inbound, ConnectionError> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.read_frame().await,
            None => Err(StreamError::Closed(CloseKind::Abnormal)),
        };

        match result {
            Ok(frame) => Ok(Inbound::Frame(frame)),
            Err(err) if err.is_recoverable() => {
                tracing::warn!(error = %err, "Read failed, redialing");
                self.redial().await?;
                Ok(Inbound::Reconnected)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Write a text payload, redialing once on a recoverable close
    pub async fn send(&mut self, payload: String) -> Result<Delivery, ConnectionError> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.send_text(payload).await,
            None => Err(StreamError::Closed(CloseKind::Abnormal)),
        };

        match result {
            Ok(()) => Ok(Delivery::Sent),
            Err(err) if err.is_recoverable() => {
                tracing::warn!(error = %err, "Write failed, redialing");
                self.redial().await?;
                Ok(Delivery::Reconnected)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn request(&self, event: &str, instruments: &[String]) -> Result<String, ConnectionError> {
        let request = SubscriptionRequest {
            event,
            feed: &self.options.feed,
            product_ids: instruments,
        };
        Ok(serde_json::to_string(&request)?)
    }

    pub async fn subscribe(&mut self, instruments: &[String]) -> Result<(), ConnectionError> {
        let added = self.subscriptions.admit(instruments)?;

        let outcome = match self.request(SUBSCRIBE_EVENT, instruments) {
            Ok(payload) => match self.send(payload).await {
                Ok(Delivery::Sent) => Ok(()),
                Ok(Delivery::Reconnected) => self.resubscribe().await,
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(?instruments, "Subscribed");
                Ok(())
            }
            Err(err) => {
                self.subscriptions.rollback(&added);
                Err(err)
            }
        }
    }

    /// Drop instruments from the set (even unknown ones) and tell the exchange
    pub async fn unsubscribe(&mut self, instruments: &[String]) -> Result<(), ConnectionError> {
        if instruments.is_empty() {
            return Err(ConnectionError::EmptySubscription);
        }

        let removed = self.subscriptions.remove(instruments);
        tracing::info!(?instruments, removed = removed.len(), "Unsubscribed");

        let payload = self.request(UNSUBSCRIBE_EVENT, instruments)?;
        match self.send(payload).await? {
            Delivery::Sent => Ok(()),
            Delivery::Reconnected => self.resubscribe().await,
        }
    }

    /// Replay the whole subscription set on the current session
    pub async fn resubscribe(&mut self) -> Result<(), ConnectionError> {
        for attempt in 1..=MAX_RESUBSCRIBE_ATTEMPTS {
            if self.subscriptions.is_empty() {
                return Ok(());
            }

            let instruments = self.subscriptions.snapshot();
            let payload = self.request(SUBSCRIBE_EVENT, &instruments)?;

            match self.send(payload).await? {
                Delivery::Sent => {
                    tracing::info!(?instruments, attempt, "Resubscribed after reconnect");
                    return Ok(());
                }
                Delivery::Reconnected => continue,
            }
        }

        Err(ConnectionError::ResubscribeFailed {
            attempts: MAX_RESUBSCRIBE_ATTEMPTS,
        })
    }

    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        if let Some(mut stream) = self.stream.take() {
            stream.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Session {
        reads: Vec<Result<Vec<u8>, StreamError>>,
        send_failures: Vec<StreamError>,
    }

    #[derive(Clone, Default)]
    struct Wire {
        sent: Arc<Mutex<Vec<String>>>,
        dials: Arc<AtomicU32>,
    }

    impl Wire {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        fn dials(&self) -> u32 {
            self.dials.load(Ordering::SeqCst)
        }
    }

    struct FakeDialer {
        sessions: Mutex<VecDeque<Result<Session, DialError>>>,
        wire: Wire,
    }

    impl FakeDialer {
        fn new(sessions: Vec<Result<Session, DialError>>) -> (Self, Wire) {
            let wire = Wire::default();
            let dialer = Self {
                sessions: Mutex::new(sessions.into()),
                wire: wire.clone(),
            };
            (dialer, wire)
        }
    }

    struct FakeStream {
        reads: VecDeque<Result<Vec<u8>, StreamError>>,
        send_failures: VecDeque<StreamError>,
        wire: Wire,
    }

    #[async_trait]
    impl FrameStream for FakeStream {
        async fn read_frame(&mut self) -> Result<Vec<u8>, StreamError> {
            self.reads
                .pop_front()
                .unwrap_or(Err(StreamError::Closed(CloseKind::Normal)))
        }

        async fn send_text(&mut self, payload: String) -> Result<(), StreamError> {
            if let Some(err) = self.send_failures.pop_front() {
                return Err(err);
            }
            self.wire.sent.lock().unwrap().push(payload);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), StreamError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Dialer for FakeDialer {
        type Stream = FakeStream;

        async fn dial(&self) -> Result<FakeStream, DialError> {
            self.wire.dials.fetch_add(1, Ordering::SeqCst);
            let next = self
                .sessions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DialError::Other("no more sessions".to_string())));

            next.map(|session| FakeStream {
                reads: session.reads.into(),
                send_failures: session.send_failures.into(),
                wire: self.wire.clone(),
            })
        }
    }

    fn options(max_retries: u32) -> ConnectionOptions {
        ConnectionOptions {
            retry: RetryPolicy {
                max_handshake_retries: max_retries,
                retry_delay: Duration::ZERO,
            },
            ..Default::default()
        }
    }

    fn handshake() -> Result<Session, DialError> {
        Err(DialError::Handshake("HTTP 503".to_string()))
    }

    fn instruments(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_open_retries_handshake_failures() {
        let (dialer, wire) = FakeDialer::new(vec![handshake(), handshake(), Ok(Session::default())]);

        let connection = ResilientConnection::open(dialer, options(13)).await;

        assert!(connection.is_ok());
        assert_eq!(wire.dials(), 3);
    }

    #[tokio::test]
    async fn test_open_gives_up_after_bound() {
        let (dialer, wire) = FakeDialer::new(vec![handshake(), handshake(), handshake(), handshake()]);

        let err = ResilientConnection::open(dialer, options(2))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ConnectionError::CannotEstablish { attempts: 3 }));
        assert_eq!(wire.dials(), 3);
    }

    #[tokio::test]
    async fn test_non_handshake_dial_error_is_not_retried() {
        let (dialer, wire) = FakeDialer::new(vec![
            Err(DialError::Other("connection refused".to_string())),
            Ok(Session::default()),
        ]);

        let err = ResilientConnection::open(dialer, options(13))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ConnectionError::Dial(_)));
        assert!(err.is_fatal());
        assert_eq!(wire.dials(), 1);
    }

    #[tokio::test]
    async fn test_read_redials_on_abnormal_closure() {
        let (dialer, wire) = FakeDialer::new(vec![
            Ok(Session {
                reads: vec![
                    Ok(b"first".to_vec()),
                    Err(StreamError::Closed(CloseKind::Abnormal)),
                ],
                ..Default::default()
            }),
            Ok(Session {
                reads: vec![Ok(b"second".to_vec())],
                ..Default::default()
            }),
        ]);
        let mut connection = ResilientConnection::open(dialer, options(13)).await.unwrap();

        assert_eq!(
            connection.read_frame().await.unwrap(),
            Inbound::Frame(b"first".to_vec())
        );
        assert_eq!(connection.read_frame().await.unwrap(), Inbound::Reconnected);
        assert_eq!(
            connection.read_frame().await.unwrap(),
            Inbound::Frame(b"second".to_vec())
        );
        assert_eq!(connection.reconnects(), 1);
        assert_eq!(wire.dials(), 2);
    }

    #[tokio::test]
    async fn test_read_normal_closure_is_fatal() {
        let (dialer, _wire) = FakeDialer::new(vec![Ok(Session {
            reads: vec![Err(StreamError::Closed(CloseKind::Normal))],
            ..Default::default()
        })]);
        let mut connection = ResilientConnection::open(dialer, options(13)).await.unwrap();

        let err = connection.read_frame().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Stream(StreamError::Closed(CloseKind::Normal))));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_subscribe_sends_request() {
        let (dialer, wire) = FakeDialer::new(vec![Ok(Session::default())]);
        let mut connection = ResilientConnection::open(dialer, options(13)).await.unwrap();

        connection.subscribe(&instruments(&["PI_XBTUSD"])).await.unwrap();

        assert_eq!(
            wire.sent(),
            vec![r#"{"event":"subscribe","feed":"trade","product_ids":["PI_XBTUSD"]}"#.to_string()]
        );
        assert!(connection.subscriptions().contains("PI_XBTUSD"));
    }

    #[tokio::test]
    async fn test_second_subscription_rejected_without_side_effects() {
        let (dialer, wire) = FakeDialer::new(vec![Ok(Session::default())]);
        let mut connection = ResilientConnection::open(dialer, options(13)).await.unwrap();
        connection.subscribe(&instruments(&["PI_XBTUSD"])).await.unwrap();

        let err = connection
            .subscribe(&instruments(&["PI_ETHUSD"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::SubscriptionLimit { .. }));
        assert!(!err.is_fatal());
        assert_eq!(connection.subscriptions().snapshot(), instruments(&["PI_XBTUSD"]));
        assert_eq!(wire.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_instrument_is_ok() {
        let (dialer, wire) = FakeDialer::new(vec![Ok(Session::default())]);
        let mut connection = ResilientConnection::open(dialer, options(13)).await.unwrap();

        connection
            .unsubscribe(&instruments(&["PI_XBTUSD"]))
            .await
            .unwrap();

        assert!(connection.subscriptions().is_empty());
        assert_eq!(
            wire.sent(),
            vec![r#"{"event":"unsubscribe","feed":"trade","product_ids":["PI_XBTUSD"]}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_subscribe_write_failure_redials_and_replays_set() {
        let (dialer, wire) = FakeDialer::new(vec![
            Ok(Session {
                send_failures: vec![StreamError::Closed(CloseKind::GoingAway)],
                ..Default::default()
            }),
            Ok(Session::default()),
        ]);
        let mut connection = ResilientConnection::open(dialer, options(13)).await.unwrap();

        connection.subscribe(&instruments(&["PI_XBTUSD"])).await.unwrap();

        assert_eq!(wire.dials(), 2);
        assert_eq!(wire.sent().len(), 1);
        assert!(wire.sent()[0].contains("PI_XBTUSD"));
        assert_eq!(connection.reconnects(), 1);
    }

    #[tokio::test]
    async fn test_fatal_write_failure_rolls_back_subscription() {
        let (dialer, _wire) = FakeDialer::new(vec![Ok(Session {
            send_failures: vec![StreamError::Other("broken pipe".to_string())],
            ..Default::default()
        })]);
        let mut connection = ResilientConnection::open(dialer, options(13)).await.unwrap();

        let err = connection
            .subscribe(&instruments(&["PI_XBTUSD"]))
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(connection.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_failed_replay_after_redial_rolls_back_subscription() {
        let (dialer, wire) = FakeDialer::new(vec![
            Ok(Session {
                send_failures: vec![StreamError::Closed(CloseKind::GoingAway)],
                ..Default::default()
            }),
            Ok(Session {
                send_failures: vec![StreamError::Closed(CloseKind::Normal)],
                ..Default::default()
            }),
        ]);
        let mut connection = ResilientConnection::open(dialer, options(13)).await.unwrap();

        let err = connection
            .subscribe(&instruments(&["PI_XBTUSD"]))
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(wire.dials(), 2);
        assert!(wire.sent().is_empty());
        assert!(connection.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_after_read_reconnect() {
        let (dialer, wire) = FakeDialer::new(vec![
            Ok(Session {
                reads: vec![Err(StreamError::Closed(CloseKind::GoingAway))],
                ..Default::default()
            }),
            Ok(Session::default()),
        ]);
        let mut connection = ResilientConnection::open(dialer, options(13)).await.unwrap();
        connection.subscribe(&instruments(&["PI_XBTUSD"])).await.unwrap();

        assert_eq!(connection.read_frame().await.unwrap(), Inbound::Reconnected);
        connection.resubscribe().await.unwrap();

        let sent = wire.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
    }

    #[tokio::test]
    async fn test_resubscribe_with_empty_set_sends_nothing() {
        let (dialer, wire) = FakeDialer::new(vec![Ok(Session::default())]);
        let mut connection = ResilientConnection::open(dialer, options(13)).await.unwrap();

        connection.resubscribe().await.unwrap();
        assert!(wire.sent().is_empty());
    }
}
