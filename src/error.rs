//! Error types for threadstore operations.

use crate::message::MessageId;
use thiserror::Error;

/// Result type alias for threadstore operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Main error type for threadstore operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Caller-supplied input is invalid (empty or oversized content).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced message id (target or parent) does not exist.
    #[error("Message {0} not found")]
    NotFound(MessageId),

    /// Persistence backend failure, propagated unchanged.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record encoding/decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Creates a new invalid argument error.
    pub fn invalid_argument<T: ToString>(msg: T) -> Self {
        Self::InvalidArgument(msg.to_string())
    }

    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Creates a new serialization error.
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StoreError::NotFound(MessageId::from_raw(42));
        assert_eq!(err.to_string(), "Message 42 not found");
    }

    #[test]
    fn test_constructor_helpers() {
        assert!(matches!(
            StoreError::invalid_argument("empty"),
            StoreError::InvalidArgument(_)
        ));
        assert!(matches!(StoreError::storage("io"), StoreError::Storage(_)));
    }
}
