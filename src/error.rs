//! Error types for inbound email processing.

/// Top-level error type for the ingestion core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Entry error: {0}")]
    Entry(#[from] EntryError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outcome of a failed entry create/update.
///
/// The decision engine matches on the variant to pick a recovery step.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("Validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("Image failed to process: {0}")]
    ImageProcessing(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl EntryError {
    /// Human-readable error text for the failed-entry notification.
    pub fn to_sentence(&self) -> String {
        match self {
            Self::Validation(messages) => match messages.as_slice() {
                [] => String::new(),
                [only] => only.clone(),
                [head @ .., last] => format!("{} and {}", head.join(", "), last),
            },
            other => other.to_string(),
        }
    }
}

/// Outbound notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Transport failed: {0}")]
    Transport(String),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid inbound email: {0}")]
    InvalidEmail(String),

    #[error("Entry could not be created after encoding repair: {0}")]
    EncodingRepairFailed(#[source] EntryError),
}

/// Result type alias for the ingestion core.
pub type Result<T> = std::result::Result<T, Error>;
