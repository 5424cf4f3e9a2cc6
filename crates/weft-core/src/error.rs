//! Error types shared across weft crates.

/// The result type used throughout weft-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by core types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier failed to parse.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },
}

impl Error {
    /// Creates an [`Error::InvalidId`] with the given message.
    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::InvalidId {
            message: message.into(),
        }
    }
}
