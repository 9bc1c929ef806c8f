//! Error types raised while starting the gateway.
//!
//! Request handling has its own taxonomy in [`crate::protocol::types::ProtocolError`] and
//! [`crate::protocol::upstream::UpstreamError`]; this enum covers configuration, logging
//! and listener failures that stop the process before or outside any request.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitStableError {
    /// Configuration is present but unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// TOML configuration file failed to parse.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The upstream HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Binding or serving the listener failed.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    /// The tracing subscriber could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),
}
