pub mod catalog;
pub mod client;
pub mod config;
pub mod entity_metadata;
pub mod executor;
pub mod key_types;
pub mod query_builders;
pub mod types;

pub use client::Engine;
pub use config::EngineConfig;
pub use entity_metadata::*;
pub use executor::{MemoryStore, QueryExecutor, SeaOrmExecutor};
pub use key_types::RowKey;
pub use query_builders::*;
pub use types::*;
