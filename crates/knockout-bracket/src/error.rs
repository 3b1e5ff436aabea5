//! Error types for the knockout bracket library
//!
//! The reconstruction itself never fails: sparse or malformed token lists
//! degrade to a partial bracket plus report findings. Errors only arise at the
//! edges where the library touches the outside world: reading a configuration
//! file, decoding a token list, or encoding the output.
//!
//! # Examples
//!
//! ```no_run
//! use knockout_bracket::{BracketConfig, BracketError};
//!
//! match BracketConfig::load("bracket.toml") {
//!     Ok(config) => log::debug!("loaded config: {config:?}"),
//!     Err(BracketError::ConfigError { reason }) => log::warn!("bad config: {reason}"),
//!     Err(e) => log::warn!("other error: {e}"),
//! }
//! ```

use thiserror::Error;

/// Errors raised at the boundaries of the bracket engine.
#[derive(Error, Debug)]
pub enum BracketError {
    /// Invalid configuration
    ///
    /// A tolerance is negative or not finite, or a TOML document has the
    /// wrong shape.
    #[error("Invalid configuration: {reason}")]
    ConfigError {
        /// What is wrong with the configuration
        reason: String,
    },

    /// A token list could not be decoded from JSON.
    #[error("Failed to decode positioned tokens: {source}")]
    TokenDecodeError {
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// The bracket output could not be serialized.
    #[error("Failed to serialize bracket output: {source}")]
    SerializationError {
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// File system error while reading configuration or token files.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BracketError {
    /// Check if this is a configuration error
    #[inline]
    #[must_use = "error type check result should be used"]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigError { .. })
    }

    /// Check if this is a token decoding error
    #[inline]
    #[must_use = "error type check result should be used"]
    pub const fn is_token_decode_error(&self) -> bool {
        matches!(self, Self::TokenDecodeError { .. })
    }

    /// Check if this is an I/O error
    #[inline]
    #[must_use = "error type check result should be used"]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::IoError(_))
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }
}

/// Result type alias for fallible bracket-engine operations
pub type Result<T> = std::result::Result<T, BracketError>;
