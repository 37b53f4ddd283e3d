//! Error types for the webcal sync engine.

use thiserror::Error;

/// Why a transport could not deliver a feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The local-network-access policy refused the target.
    #[error("Blocked by local network access policy: {0}")]
    PolicyBlocked(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),
}

/// Why a single calendar object was rejected during denormalization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    #[error("Object contains more than one component type ({0} and {1})")]
    MixedComponents(String, String),

    #[error("Invalid {property} value '{value}'")]
    InvalidDate { property: String, value: String },

    #[error("Invalid DURATION value '{0}'")]
    InvalidDuration(String),
}

/// Errors that can occur in webcal operations.
#[derive(Error, Debug)]
pub enum WebcalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("jCal parse error: {0}")]
    JcalParse(String),

    #[error("xCal parse error: {0}")]
    XcalParse(String),

    #[error("Invalid subscription source: {0}")]
    InvalidSource(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid calendar object '{uid}': {error}")]
    InvalidObject { uid: String, error: ObjectError },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for webcal operations.
pub type WebcalResult<T> = Result<T, WebcalError>;
