//! Infrastructure concerns: configuration and logging.

pub mod config;
pub mod logging;

pub use config::{DetectionConfig, LoggingConfig, SentinelConfig};
pub use logging::init_logging;
