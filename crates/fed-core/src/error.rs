//! Error handling for engine configuration.

use thiserror::Error;

/// Result type alias using the configuration error type.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while building an engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was set to a value that could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },

    /// A configuration value is outside its allowed range.
    #[error("configuration error: {0}")]
    OutOfRange(String),
}
