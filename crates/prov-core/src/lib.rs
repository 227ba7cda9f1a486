pub mod config;
pub mod types;

pub use config::{CleanupConfig, ConfigError, LogConfig, LogFormat, ProvConfig, StoreConfig};
pub use types::*;
