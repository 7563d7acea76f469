pub mod kraken;
pub mod telegram;

pub use kraken::{generate_authent, KrakenClient, KrakenCredentials};
pub use telegram::{LogNotifier, TelegramNotifier};
