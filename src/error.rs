//! Error types for ESL operations

use thiserror::Error;

/// Result type alias for ESL operations
pub type EslResult<T> = Result<T, EslError>;

/// Error taxonomy for the event socket and channel layers.
///
/// Connection-level failures are fatal to the [`EventSocket`](crate::EventSocket):
/// every pending waiter completes with the same error and subsequent
/// operations fail immediately. Command-level failures are scoped to the
/// operation that produced them.
#[derive(Error, Debug)]
pub enum EslError {
    /// IO error from the underlying TCP stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Socket closed by FreeSWITCH or torn down locally
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection refused by the server ACL (text/rude-rejection)
    #[error("Connection rejected: {reason}")]
    Rejected { reason: String },

    /// `auth` reply was `-ERR`
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Operation issued before the auth handshake completed
    #[error("Authentication pending")]
    AuthPending,

    /// Malformed frame, unexpected frame kind, or content-length violation
    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    /// Reply was `-ERR <msg>`, or an api body began with `-ERR`/`-USAGE`
    #[error("Command failed: {reply_text}")]
    CommandFailed { reply_text: String },

    /// Awaited completion not produced within the deadline
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Event subscriber fell behind the broadcaster and was cut off
    #[error("Event subscriber lagged {missed} events behind")]
    SlowConsumer { missed: u64 },

    /// Background job's socket disconnected before BACKGROUND_JOB arrived
    #[error("Background job {job_uuid} never completed")]
    JobLost { job_uuid: String },

    /// Genuinely illegal call, e.g. a command on a disposed channel
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    /// JSON event body could not be parsed
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML event body could not be parsed
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Header block was not valid UTF-8
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Parse buffer exceeded its limit; protocol desync
    #[error("Buffer overflow: {size} bytes exceeds limit {limit}")]
    BufferOverflow { size: usize, limit: usize },

    /// Header line without a `:` separator
    #[error("Invalid header line: {header}")]
    InvalidHeader { header: String },
}

impl EslError {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid-operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Fatal errors tear down the socket; everything else is scoped to
    /// the failing operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EslError::Io(_)
                | EslError::ConnectionClosed
                | EslError::Rejected { .. }
                | EslError::AuthenticationFailed { .. }
                | EslError::ProtocolError { .. }
                | EslError::BufferOverflow { .. }
        )
    }
}
