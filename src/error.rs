use thiserror::Error;

/// Result type for MonoZone operations
pub type Result<T> = std::result::Result<T, MonozoneError>;

/// Errors that can occur when talking to the amplifier
#[derive(Error, Debug)]
pub enum MonozoneError {
    /// Unit id outside 1..=6, rejected before any I/O
    #[error("Invalid unit: {0} (expected 1-6)")]
    InvalidUnit(u8),

    /// Could not open the bridge connection (refused, timed out, OS error)
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// No status line arrived before the exchange deadline
    #[error("Response timeout")]
    ResponseTimeout,

    /// Bytes arrived but could not be decoded into a zone state
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// I/O error on the bridge stream
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The bridge closed the stream mid-exchange
    #[error("Connection closed")]
    ConnectionClosed,

    /// Some units in a bulk operation failed; all units were attempted
    #[error("Operation failed for units {failed:?}")]
    PartialFailure {
        /// Units whose operation failed, ascending
        failed: Vec<u8>,
    },

    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),
}

impl MonozoneError {
    /// Whether this error tears the connection down
    pub fn is_disconnecting(&self) -> bool {
        matches!(
            self,
            MonozoneError::ResponseTimeout
                | MonozoneError::Transport(_)
                | MonozoneError::ConnectionClosed
        )
    }
}
