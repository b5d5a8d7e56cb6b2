//! Error types for the relay.

use thiserror::Error;

use royale_core::error::GameError;

/// Result type alias using [`RelayError`].
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay, client and session errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("Malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    /// Config file could not be read or parsed.
    #[error("Failed to load config '{path}': {message}")]
    Config {
        /// Config file path.
        path: String,
        /// Error message.
        message: String,
    },

    /// The peer or an internal task hung up.
    #[error("Connection closed")]
    Closed,

    /// The simulation refused an operation.
    #[error(transparent)]
    Game(#[from] GameError),

    /// A log subscription could not be opened.
    #[error("Subscription failed: {0}")]
    Subscription(String),
}
