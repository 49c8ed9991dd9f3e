use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnderwriteError {
    // Intake errors
    #[error("Applicant validation failed: {0}")]
    Validation(String),

    // Worker setup errors
    #[error("Failed to launch worker {worker}: {message}")]
    Launch { worker: String, message: String },

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    // RPC errors
    #[error("RPC timeout after {timeout_ms}ms: {capability}")]
    RpcTimeout { capability: String, timeout_ms: u64 },

    #[error("RPC execution failed: {capability}: {kind}: {message}")]
    RpcExecution {
        capability: String,
        kind: String,
        message: String,
    },

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // Node adapter errors
    #[error("Input missing for node {node}: {field}")]
    InputMissing { node: String, field: String },

    #[error("Schema violation in node {node}: {message}")]
    SchemaViolation { node: String, message: String },

    #[error("Record field already written: {0}")]
    FieldAlreadyWritten(String),

    // Executor errors
    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Run exceeded deadline ({0}ms)")]
    DeadlineExceeded(u64),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UnderwriteError {
    /// Stable name of the error kind, used in run reports and wire error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Launch { .. } => "LaunchError",
            Self::UnknownCapability(_) => "UnknownCapability",
            Self::RpcTimeout { .. } => "RPCTimeout",
            Self::RpcExecution { .. } => "RPCExecutionError",
            Self::ChannelClosed(_) => "ChannelClosed",
            Self::Protocol(_) => "ProtocolError",
            Self::InputMissing { .. } => "InputMissing",
            Self::SchemaViolation { .. } => "SchemaViolation",
            Self::FieldAlreadyWritten(_) => "FieldAlreadyWritten",
            Self::Graph(_) => "GraphError",
            Self::DeadlineExceeded(_) => "DeadlineExceeded",
            Self::Config(_) | Self::ConfigNotFound(_) => "ConfigError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
        }
    }

    /// Whether repeating the same call could plausibly succeed.
    ///
    /// Only timeouts qualify: a closed channel is never reopened and an
    /// execution error is the worker's considered answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RpcTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, UnderwriteError>;
