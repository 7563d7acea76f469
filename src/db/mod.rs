pub mod memory;
pub mod postgres;

pub use memory::MemoryOrderStore;
pub use postgres::{PostgresOrderStore, StoredOrder};
