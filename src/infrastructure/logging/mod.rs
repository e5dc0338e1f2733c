//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON/pretty formatting, dual file+stdout layers
//! - Log rotation
//! - Secret scrubbing

pub mod config;
pub mod logger;
pub mod rotation;
pub mod secret_scrubbing;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
