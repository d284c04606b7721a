//! Error types for Ferrum
//!
//! Errors are layered the same way the pipeline is: framing problems live in
//! [`FrameError`], anything that breaks the console connection is a
//! [`TransportError`], persistence failures are a [`StorageError`], and
//! [`FerrumError`] ties them together with the scripting and lifecycle errors.

use thiserror::Error;

/// Result type alias for Ferrum operations
pub type Result<T> = std::result::Result<T, FerrumError>;

/// Main error type for Ferrum operations
#[derive(Error, Debug)]
pub enum FerrumError {
    /// Console transport failure (connection must be dropped)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The remote script reported an error
    #[error("Script error: {message}")]
    Script { message: String },

    /// The script reply was not the JSON document we expected
    #[error("Malformed script reply: {0}")]
    MalformedReply(#[source] serde_json::Error),

    /// Persistence error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Series used before `initialize()` completed
    #[error("Series '{series}' is not initialized")]
    NotInitialized { series: String },
}

impl FerrumError {
    /// Whether this error means the console connection can no longer be used.
    pub fn invalidates_connection(&self) -> bool {
        matches!(self, FerrumError::Transport(_))
    }

    /// Short, stable name of the error kind for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FerrumError::Transport(e) => e.kind(),
            FerrumError::Script { .. } => "script",
            FerrumError::MalformedReply(_) => "malformed_reply",
            FerrumError::Storage(_) => "storage",
            FerrumError::Config(_) => "config",
            FerrumError::NotInitialized { .. } => "not_initialized",
        }
    }
}

/// Errors while reading or writing a single console packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Stream ended before the announced number of bytes arrived
    #[error("Truncated frame: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// Size field is negative or too small to hold id, type and terminators
    #[error("Invalid frame size: {0}")]
    InvalidSize(i32),

    /// Body terminator is not 0x00
    #[error("Expected zero body terminator, got 0x{0:02x}")]
    BadBodyTerminator(u8),

    /// Packet terminator is not 0x00
    #[error("Expected zero packet terminator, got 0x{0:02x}")]
    BadPacketTerminator(u8),

    /// Numeric type does not exist in this direction
    #[error("Unknown packet type {value} (response: {response})")]
    UnknownPacketType { value: i32, response: bool },

    /// Body contains bytes outside 0x01..=0x7f
    #[error("Body is not NUL-free ASCII (offending byte at offset {offset})")]
    NonAsciiBody { offset: usize },
}

/// Errors that invalidate a console connection
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket failure, including connect and read timeouts
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame on the wire
    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    /// Server rejected the password
    #[error("Authentication failed: expected response id {expected}, got {actual}")]
    Authentication { expected: i32, actual: i32 },

    /// Response id does not match the request id
    #[error("Id mismatch: got {actual} vs. expected {expected}")]
    Correlation { expected: i32, actual: i32 },
}

impl TransportError {
    /// Short, stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Io(e) if is_timeout(e) => "timeout",
            TransportError::Io(_) => "io",
            TransportError::Frame(_) => "framing",
            TransportError::Authentication { .. } => "authentication",
            TransportError::Correlation { .. } => "correlation",
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

/// Errors raised by a persistence backend
#[derive(Error, Debug)]
pub enum StorageError {
    /// A bucket already exists at this tick
    #[error("Duplicate tick {tick} for resolution '{resolution}'")]
    DuplicateTick { resolution: String, tick: u64 },

    /// Storage for this resolution was never created
    #[error("Unknown resolution: {0}")]
    UnknownResolution(String),

    /// Stored dimensions could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend-specific failure
    #[error("Backend error: {0}")]
    Backend(String),
}
