//! Core types, configuration, and utilities for the login relay.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_DATABASE_ROOT, DEFAULT_LOG_LEVEL, DEFAULT_TOKEN_ISSUER, DEFAULT_TOKEN_TTL_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
