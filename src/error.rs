use thiserror::Error;

/// Main error type for the coordinator and workers
#[derive(Error, Debug)]
pub enum ScanError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Wire errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        last_error: String,
    },

    // Scan source errors
    #[error("Scan source error: {0}")]
    Source(String),

    // Evaluation errors
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for ScanError
pub type Result<T> = std::result::Result<T, ScanError>;

/// Faults in the line/blob framing or the handshake.
///
/// A protocol error only ever aborts the connection it happened on.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("connection closed mid-frame")]
    UnexpectedEof,

    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("blob of {len} bytes exceeds limit of {max}")]
    BlobTooLarge { len: usize, max: usize },

    #[error("handshake rejected: {0}")]
    Rejected(String),

    #[error("unexpected handshake reply: {0:?}")]
    BadHandshake(String),

    #[error("line would contain a newline: {0:?}")]
    EmbeddedNewline(String),

    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Map an I/O error from a framed read, folding short reads into `UnexpectedEof`.
    pub fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::UnexpectedEof
        } else {
            ProtocolError::Io(err)
        }
    }
}
