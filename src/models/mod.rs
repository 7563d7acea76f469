use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A validated trade tick for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEvent {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
}

/// Fixed candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandlePeriod {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "2m")]
    TwoMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "10m")]
    TenMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl CandlePeriod {
    pub const ALL: [CandlePeriod; 9] = [
        CandlePeriod::OneMinute,
        CandlePeriod::TwoMinutes,
        CandlePeriod::FiveMinutes,
        CandlePeriod::TenMinutes,
        CandlePeriod::FifteenMinutes,
        CandlePeriod::ThirtyMinutes,
        CandlePeriod::OneHour,
        CandlePeriod::FourHours,
        CandlePeriod::OneDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CandlePeriod::OneMinute => "1m",
            CandlePeriod::TwoMinutes => "2m",
            CandlePeriod::FiveMinutes => "5m",
            CandlePeriod::TenMinutes => "10m",
            CandlePeriod::FifteenMinutes => "15m",
            CandlePeriod::ThirtyMinutes => "30m",
            CandlePeriod::OneHour => "1h",
            CandlePeriod::FourHours => "4h",
            CandlePeriod::OneDay => "1d",
        }
    }

    /// Length of one bucket in milliseconds
    pub fn as_millis(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            CandlePeriod::OneMinute => MINUTE,
            CandlePeriod::TwoMinutes => 2 * MINUTE,
            CandlePeriod::FiveMinutes => 5 * MINUTE,
            CandlePeriod::TenMinutes => 10 * MINUTE,
            CandlePeriod::FifteenMinutes => 15 * MINUTE,
            CandlePeriod::ThirtyMinutes => 30 * MINUTE,
            CandlePeriod::OneHour => 60 * MINUTE,
            CandlePeriod::FourHours => 240 * MINUTE,
            CandlePeriod::OneDay => 1440 * MINUTE,
        }
    }

    /// Floor a timestamp to the start of its bucket (epoch-aligned)
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let period_ms = self.as_millis();
        let floored = ts.timestamp_millis().div_euclid(period_ms) * period_ms;
        Utc.timestamp_millis_opt(floored).single().unwrap_or(ts)
    }
}

impl fmt::Display for CandlePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandlePeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CandlePeriod::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| format!("unknown candle period '{}'", s))
    }
}

/// OHLC summary of all ticks in one bucket for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub period: CandlePeriod,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: u32,
    pub bucket_start: DateTime<Utc>,
}

impl Candle {
    /// Start a new candle seeded by the first tick of a bucket
    pub fn open_with(event: &PriceEvent, period: CandlePeriod, bucket_start: DateTime<Utc>) -> Self {
        Self {
            instrument: event.instrument.clone(),
            period,
            open: event.price,
            high: event.price,
            low: event.price,
            close: event.price,
            volume: event.quantity,
            trades: 1,
            bucket_start,
        }
    }

    /// Fold another tick of the same bucket into the candle
    pub fn absorb(&mut self, event: &PriceEvent) {
        self.high = self.high.max(event.price);
        self.low = self.low.min(event.price);
        self.close = event.price;
        self.volume += event.quantity;
        self.trades += 1;
    }
}

/// Directional decision produced by a strategy for one candle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Long,
    Short,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Immediate-or-cancel limit order
    #[serde(rename = "ioc")]
    ImmediateOrCancel,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::ImmediateOrCancel => "ioc",
        }
    }
}

/// Outbound order instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: Uuid,
    pub order_type: OrderType,
    pub instrument: String,
    pub side: OrderSide,
    pub size: u32,
    pub limit_price: f64,
}

impl Order {
    pub fn immediate_or_cancel(side: OrderSide, instrument: &str, limit_price: f64, size: u32) -> Self {
        Self {
            client_order_id: Uuid::new_v4(),
            order_type: OrderType::ImmediateOrCancel,
            instrument: instrument.to_string(),
            side,
            size,
            limit_price,
        }
    }
}

/// Status the exchange reports for an accepted order
pub const STATUS_PLACED: &str = "placed";

/// Exchange acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: String,
    pub received_time: Option<DateTime<Utc>>,
    pub order: Order,
}

impl OrderResponse {
    pub fn is_placed(&self) -> bool {
        self.status == STATUS_PLACED
    }
}

impl fmt::Display for OrderResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order {} {}: {} {} x{} @ {}",
            self.order_id,
            self.status,
            self.order.side,
            self.order.instrument,
            self.order.size,
            self.order.limit_price
        )?;
        if let Some(ts) = self.received_time {
            write!(f, " ({})", ts.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 12, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_truncate_to_period() {
        let ts = at(15, 23, 47);
        assert_eq!(CandlePeriod::OneMinute.truncate(ts), at(15, 23, 0));
        assert_eq!(CandlePeriod::TwoMinutes.truncate(ts), at(15, 22, 0));
        assert_eq!(CandlePeriod::TenMinutes.truncate(ts), at(15, 20, 0));
        assert_eq!(CandlePeriod::OneHour.truncate(ts), at(15, 0, 0));
        assert_eq!(CandlePeriod::OneDay.truncate(ts), at(0, 0, 0));
    }

    #[test]
    fn test_truncate_is_idempotent_on_boundary() {
        let boundary = at(15, 20, 0);
        assert_eq!(CandlePeriod::TenMinutes.truncate(boundary), boundary);
    }

    #[test]
    fn test_period_parse_roundtrip() {
        for period in CandlePeriod::ALL {
            assert_eq!(period.as_str().parse::<CandlePeriod>().unwrap(), period);
        }
        assert!("3m".parse::<CandlePeriod>().is_err());
    }

    #[test]
    fn test_period_deserializes_from_label() {
        let period: CandlePeriod = serde_json::from_str("\"10m\"").unwrap();
        assert_eq!(period, CandlePeriod::TenMinutes);
    }

    #[test]
    fn test_candle_absorb_keeps_bounds() {
        let first = PriceEvent {
            instrument: "PI_XBTUSD".to_string(),
            timestamp: at(15, 20, 20),
            price: 100.0,
            quantity: 2.0,
        };
        let mut candle = Candle::open_with(&first, CandlePeriod::OneMinute, at(15, 20, 0));

        for (price, qty) in [(104.0, 1.0), (97.0, 0.5), (101.0, 0.0)] {
            candle.absorb(&PriceEvent { price, quantity: qty, ..first.clone() });
        }

        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.high, 104.0);
        assert_eq!(candle.low, 97.0);
        assert_eq!(candle.close, 101.0);
        assert_eq!(candle.volume, 3.5);
        assert_eq!(candle.trades, 4);
    }

    #[test]
    fn test_order_response_display() {
        let response = OrderResponse {
            order_id: "abc-123".to_string(),
            status: STATUS_PLACED.to_string(),
            received_time: None,
            order: Order::immediate_or_cancel(OrderSide::Buy, "PI_XBTUSD", 50100.5, 10),
        };

        assert!(response.is_placed());
        assert_eq!(
            response.to_string(),
            "Order abc-123 placed: buy PI_XBTUSD x10 @ 50100.5"
        );
    }
}
