//! Layered settings: serde defaults, `config/tickbot.toml`, an explicit file, then
//! `TICKBOT_*` environment variables (`__` separates nested keys).

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::api::kraken::KRAKEN_FUTURES_REST;
use crate::error::ConfigError;
use crate::execution::params::{TradingParams, DEFAULT_TRADING_QUANTITY};
use crate::feed::connection::{ConnectionOptions, RetryPolicy, DEFAULT_MAX_HANDSHAKE_RETRIES};
use crate::feed::subscriptions::DEFAULT_SUBSCRIPTION_LIMIT;
use crate::models::CandlePeriod;
use crate::strategy::StrategyConfig;

const DEFAULT_CONFIG_FILE: &str = "config/tickbot";
const ENV_PREFIX: &str = "TICKBOT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub ws_url: String,
    pub rest_url: String,
    pub feed: String,
    pub max_handshake_retries: u32,
    pub retry_delay_ms: u64,
    pub subscription_limit: usize,
    pub public_key: String,
    pub private_key: String,
    pub orders_per_second: u32,
    pub price_precision: usize,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            ws_url: "wss://futures.kraken.com/ws/v1".to_string(),
            rest_url: KRAKEN_FUTURES_REST.to_string(),
            feed: "trade".to_string(),
            max_handshake_retries: DEFAULT_MAX_HANDSHAKE_RETRIES,
            retry_delay_ms: 1000,
            subscription_limit: DEFAULT_SUBSCRIPTION_LIMIT,
            public_key: String::new(),
            private_key: String::new(),
            orders_per_second: 5,
            price_precision: 1,
        }
    }
}

impl ExchangeSettings {
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            feed: self.feed.clone(),
            retry: RetryPolicy {
                max_handshake_retries: self.max_handshake_retries,
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            },
            subscription_limit: self.subscription_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub instruments: Vec<String>,
    pub period: CandlePeriod,
    pub quantity: u32,
    pub price_multiplier: f64,
    pub skip_warmup_candle: bool,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            instruments: vec!["PI_XBTUSD".to_string()],
            period: CandlePeriod::OneMinute,
            quantity: DEFAULT_TRADING_QUANTITY,
            price_multiplier: 0.0,
            skip_warmup_candle: true,
        }
    }
}

impl TradingSettings {
    pub fn params(&self) -> TradingParams {
        TradingParams {
            quantity: self.quantity,
            price_multiplier: self.price_multiplier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            shutdown_grace_secs: 3,
        }
    }
}

impl PipelineSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub trading: TradingSettings,
    pub strategy: StrategyConfig,
    pub pipeline: PipelineSettings,
    pub database: DatabaseSettings,
    pub telegram: TelegramSettings,
    pub server: ServerSettings,
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("trading.instruments")
        .try_parsing(true)
}

impl Settings {
    /// Load every layer and validate the result
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Settings = builder.add_source(environment()).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML document over the defaults, without file or env layers
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ws_url = url::Url::parse(&self.exchange.ws_url)
            .map_err(|e| ConfigError::invalid("exchange.ws_url", e.to_string()))?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            return Err(ConfigError::invalid(
                "exchange.ws_url",
                format!("unsupported scheme '{}'", ws_url.scheme()),
            ));
        }
        url::Url::parse(&self.exchange.rest_url)
            .map_err(|e| ConfigError::invalid("exchange.rest_url", e.to_string()))?;

        if self.exchange.feed.trim().is_empty() {
            return Err(ConfigError::invalid("exchange.feed", "must not be empty"));
        }
        if self.exchange.subscription_limit == 0 {
            return Err(ConfigError::invalid("exchange.subscription_limit", "must be at least 1"));
        }
        if self.exchange.orders_per_second == 0 {
            return Err(ConfigError::invalid("exchange.orders_per_second", "must be positive"));
        }

        if self.trading.instruments.iter().all(|i| i.trim().is_empty()) {
            return Err(ConfigError::invalid("trading.instruments", "at least one instrument is required"));
        }
        if self.trading.instruments.len() > self.exchange.subscription_limit {
            return Err(ConfigError::invalid(
                "trading.instruments",
                format!(
                    "{} instruments exceed the subscription limit of {}",
                    self.trading.instruments.len(),
                    self.exchange.subscription_limit
                ),
            ));
        }
        self.trading.params().validate()?;

        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::invalid("pipeline.queue_capacity", "must be at least 1"));
        }

        self.strategy.validate()?;

        self.server
            .address
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("server.address", e.to_string()))?;

        Ok(())
    }

    pub fn server_address(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .address
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::invalid("server.address", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ParamsError, StrategyError};

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();

        assert_eq!(settings.exchange.max_handshake_retries, 13);
        assert_eq!(settings.trading.quantity, 100);
        assert_eq!(settings.pipeline.queue_capacity, 1);
        assert_eq!(settings.strategy, StrategyConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let settings = Settings::from_toml_str(
            r#"
            [trading]
            instruments = ["PI_ETHUSD"]
            period = "10m"
            quantity = 5
            price_multiplier = 0.001

            [strategy]
            kind = "unanimous"

            [[strategy.members]]
            kind = "ema"
            period = 100

            [[strategy.members]]
            kind = "macd"
            short_period = 12
            long_period = 26
            signal_period = 9
            "#,
        )
        .unwrap();

        assert_eq!(settings.trading.instruments, vec!["PI_ETHUSD".to_string()]);
        assert_eq!(settings.trading.period, CandlePeriod::TenMinutes);
        assert_eq!(settings.trading.quantity, 5);
        assert_eq!(settings.exchange.feed, "trade");
        assert!(matches!(settings.strategy, StrategyConfig::Unanimous { ref members } if members.len() == 2));
    }

    #[test]
    fn test_rejects_too_many_instruments() {
        let err = Settings::from_toml_str(
            r#"
            [trading]
            instruments = ["PI_XBTUSD", "PI_ETHUSD"]
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "trading.instruments"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.trading.quantity = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Params(ParamsError::ZeroQuantity))
        ));

        let mut settings = Settings::default();
        settings.strategy = StrategyConfig::Ema { period: 1 };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Strategy(StrategyError::InvalidPeriod(1)))
        ));

        let mut settings = Settings::default();
        settings.exchange.ws_url = "https://futures.kraken.com".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.pipeline.queue_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_period_fails_to_load() {
        let err = Settings::from_toml_str(
            r#"
            [trading]
            period = "3m"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
