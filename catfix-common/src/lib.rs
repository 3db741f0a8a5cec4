//! # catfix Common Library
//!
//! Shared code for the catfix crates:
//! - Error and result types
//! - Bootstrap configuration (TOML file, environment overrides, compiled defaults)

pub mod config;
pub mod error;

pub use config::{AppConfig, CacheConfig, LoggingConfig, RetrySettings, ServiceConfig};
pub use error::{Error, Result};
