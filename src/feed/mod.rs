pub mod connection;
pub mod reader;
pub mod subscriptions;
pub mod validator;
pub mod websocket;

pub use connection::{
    CloseKind, ConnectionOptions, Delivery, DialError, Dialer, FrameStream, Inbound,
    ResilientConnection, RetryPolicy, StreamError,
};
pub use reader::{FeedCommand, FeedHandle, FeedReader, FeedStatus};
pub use subscriptions::SubscriptionSet;
pub use validator::{validate, ValidatorStats};
pub use websocket::{WsDialer, WsStream};
