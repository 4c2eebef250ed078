//! Error types for Arogya.

/// Top-level error type for the backend. Subsystems return their own enums;
/// this rollup is the boundary type the bootstrap propagates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },
}

/// Messaging-channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send on channel {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Authentication failed for channel {channel} (access token expired or invalid)")]
    AuthFailed { channel: String },

    #[error("Media fetch failed: {reason}")]
    MediaFetch { reason: String },

    #[error("Invalid inbound payload: {0}")]
    InvalidPayload(String),
}

/// Result type alias for the backend.
pub type Result<T> = std::result::Result<T, Error>;
