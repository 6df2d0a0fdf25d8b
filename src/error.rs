//! Error types for the relay.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("MIME error: {0}")]
    Mime(#[from] MimeError),

    #[error("Mailbox API error: {0}")]
    Graph(#[from] GraphError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

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

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),
}

/// Event bus errors.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Handler for {event} failed: {reason}")]
    Handler { event: String, reason: String },

    #[error("Event worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("publish_sync called from the event worker thread for {event}")]
    ReentrantSync { event: String },
}

/// MIME parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum MimeError {
    #[error("message could not be parsed as MIME")]
    Unparseable,
}

/// Mailbox REST API errors.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("no access token returned: {0}")]
    NoToken(String),

    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation} transport error: {reason}")]
    Transport {
        operation: &'static str,
        reason: String,
    },

    #[error("invalid mailbox API URL: {0}")]
    InvalidUrl(String),

    #[error("{operation} returned an unexpected body: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },
}

impl GraphError {
    /// Upstream statuses the submitting client should retry later.
    pub fn is_transient(&self) -> bool {
        match self {
            GraphError::Status { status, .. } => matches!(status, 429 | 503 | 504),
            GraphError::Transport { .. } => true,
            _ => false,
        }
    }
}

/// Delivery pipeline failures, one per failed state.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Error parsing email content: {0}")]
    Parse(#[from] MimeError),

    #[error("Failed to acquire access token: {0}")]
    Token(GraphError),

    #[error("Failed to create draft message: {0}")]
    CreateDraft(GraphError),

    #[error("Failed to create upload session for {attachment}: {source}")]
    UploadSession {
        attachment: String,
        #[source]
        source: GraphError,
    },

    #[error("Failed to send draft message: {0}")]
    Send(GraphError),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
