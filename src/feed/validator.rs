use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::models::PriceEvent;
use crate::pipeline::Shutdown;

/// Log the reject counter every this many rejects
const REJECT_LOG_EVERY: u64 = 100;

/// Loose shape of a trade message; everything optional so bad frames are filtered, not errors
#[derive(Debug, Deserialize)]
struct RawTick {
    time: Option<f64>,
    product_id: Option<String>,
    price: Option<f64>,
    qty: Option<f64>,
}

/// Decode one inbound frame into a price event
///
/// Subscription acks, heartbeats and anything missing a required field are
/// rejected with `None`. `time` is epoch milliseconds.
pub fn validate(frame: &[u8]) -> Option<PriceEvent> {
    let raw: RawTick = serde_json::from_slice(frame).ok()?;

    let time = raw.time.filter(|t| t.is_finite() && *t > 0.0)?;
    let instrument = raw.product_id.filter(|id| !id.trim().is_empty())?;
    let price = raw.price.filter(|p| p.is_finite() && *p > 0.0)?;
    let quantity = raw.qty.filter(|q| q.is_finite() && *q >= 0.0)?;

    let timestamp = Utc.timestamp_millis_opt(time as i64).single()?;

    Some(PriceEvent {
        instrument,
        timestamp,
        price,
        quantity,
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Validator stage: frames in, price events out
pub async fn run_validator(
    mut frames: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<PriceEvent>,
    mut shutdown: Shutdown,
) -> ValidatorStats {
    let mut stats = ValidatorStats::default();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        match validate(&frame) {
            Some(event) => {
                stats.accepted += 1;
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    sent = events.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            None => {
                stats.rejected += 1;
                tracing::debug!(frame = %String::from_utf8_lossy(&frame), "Dropped non-tick frame");
                if stats.rejected % REJECT_LOG_EVERY == 0 {
                    tracing::debug!(rejected = stats.rejected, "Validator reject counter");
                }
            }
        }
    }

    tracing::info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        "Validator stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shutdown_channel;

    const TRADE: &str = r#"{"feed":"trade","product_id":"PI_XBTUSD","uid":"f6e4","side":"buy","type":"fill","seq":3,"time":1638372020000,"qty":150.0,"price":57012.5}"#;

    #[test]
    fn test_valid_trade() {
        let event = validate(TRADE.as_bytes()).unwrap();

        assert_eq!(event.instrument, "PI_XBTUSD");
        assert_eq!(event.price, 57012.5);
        assert_eq!(event.quantity, 150.0);
        assert_eq!(event.timestamp.timestamp_millis(), 1638372020000);
    }

    #[test]
    fn test_rejects_control_frames() {
        let frames = [
            r#"{"event":"subscribed","feed":"trade","product_ids":["PI_XBTUSD"]}"#,
            r#"{"event":"info","version":1}"#,
            r#"{"feed":"heartbeat","time":1638372020000}"#,
            "not json",
            "",
        ];
        for frame in frames {
            assert!(validate(frame.as_bytes()).is_none(), "accepted {}", frame);
        }
    }

    #[test]
    fn test_rejects_out_of_range_fields() {
        let frames = [
            r#"{"product_id":"PI_XBTUSD","time":1638372020000,"qty":1.0,"price":0}"#,
            r#"{"product_id":"PI_XBTUSD","time":1638372020000,"qty":1.0,"price":-5.0}"#,
            r#"{"product_id":"PI_XBTUSD","time":1638372020000,"qty":-1.0,"price":5.0}"#,
            r#"{"product_id":"","time":1638372020000,"qty":1.0,"price":5.0}"#,
            r#"{"product_id":"PI_XBTUSD","time":0,"qty":1.0,"price":5.0}"#,
            r#"{"product_id":"PI_XBTUSD","time":"yesterday","qty":1.0,"price":5.0}"#,
        ];
        for frame in frames {
            assert!(validate(frame.as_bytes()).is_none(), "accepted {}", frame);
        }
    }

    #[test]
    fn test_zero_quantity_allowed() {
        let frame = r#"{"product_id":"PI_XBTUSD","time":1638372020000,"qty":0,"price":5.0}"#;
        assert_eq!(validate(frame.as_bytes()).unwrap().quantity, 0.0);
    }

    #[tokio::test]
    async fn test_stage_filters_and_counts() {
        let (frames_tx, frames_rx) = mpsc::channel(4);
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let (_trigger, shutdown) = shutdown_channel();
        let stage = tokio::spawn(run_validator(frames_rx, events_tx, shutdown));

        frames_tx.send(b"{\"event\":\"info\"}".to_vec()).await.unwrap();
        frames_tx.send(TRADE.as_bytes().to_vec()).await.unwrap();
        drop(frames_tx);

        let event = events_rx.recv().await.unwrap();
        assert_eq!(event.instrument, "PI_XBTUSD");
        assert!(events_rx.recv().await.is_none());

        let stats = stage.await.unwrap();
        assert_eq!(stats, ValidatorStats { accepted: 1, rejected: 1 });
    }
}
