pub mod config;
pub mod error;
pub mod redact;
pub mod types;

pub use config::{Config, ConfigError, Environment, PlatformConfig, QueueTuning, RetrySettings};
pub use error::GatewayError;
pub use redact::*;
pub use types::*;
