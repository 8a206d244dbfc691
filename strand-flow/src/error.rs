//! Flow utility error types.

/// Flow utility error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },
}

/// Result type for flow utility operations.
pub type FlowResult<T> = Result<T, FlowError>;
