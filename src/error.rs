//! Error types shared by the connection layer, the dispatcher and the
//! protocol state machines.
//!
//! Parsing errors are turned into shutdown side effects by the session types;
//! only application errors returned from a job ever reach the dispatcher.

use thiserror::Error;

use crate::websocket::CloseCode;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by connections, jobs and protocol parsers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in a text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared frame size.
        size: u64,
        /// Maximum allowed size.
        max: u64,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Accumulated message size.
        size: u64,
        /// Maximum allowed size.
        max: u64,
    },

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(u64),

    /// Unmasked client frame.
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Masked server frame.
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Graceful WebSocket close requested with a status code.
    ///
    /// Returned by message handlers to close the session cleanly instead of
    /// dropping the connection.
    #[error("WebSocket close: {code:?} ({reason})")]
    Close {
        /// Status code sent in the close frame.
        code: CloseCode,
        /// Reason sent in the close frame.
        reason: String,
    },

    /// Invalid WebSocket upgrade handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Header value contains characters that cannot be written.
    #[error("Invalid header value for {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Malformed HTTP message.
    #[error("Malformed HTTP: {0}")]
    MalformedHttp(String),

    /// HTTP response exceeds configured maximum.
    #[error("Response too large: {size} bytes (max: {max})")]
    ResponseTooLarge {
        /// Accumulated size.
        size: u64,
        /// Maximum allowed size.
        max: u64,
    },

    /// Writing to a connection after shutdown was requested.
    #[error("Connection {0} has been shut down")]
    ShutdownRequested(u64),

    /// Enqueueing on a dispatcher that is stopped.
    #[error("Job dispatcher is stopped")]
    DispatcherStopped,

    /// A job panicked while running.
    #[error("Job panicked: {0}")]
    JobPanicked(String),

    /// Application-level failure reported by a handler.
    #[error("Application error: {0}")]
    Application(String),

    /// A message field ran past the end of the packet.
    #[error("End of stream while reading {message}.{field}")]
    EndOfStream {
        /// Message name.
        message: String,
        /// Field name.
        field: String,
    },

    /// Bytes left over after the last field of a packet.
    #[error("Junk after packet {message}")]
    JunkAfterPacket {
        /// Message name.
        message: String,
    },

    /// A value does not match the schema it is encoded with.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Close status a WebSocket session reports for this error.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::Close { code, .. } => *code,
            Error::MessageTooLarge { .. } | Error::FrameTooLarge { .. } => CloseCode::MessageTooBig,
            Error::InvalidUtf8 => CloseCode::InvalidPayload,
            Error::Io(_) => CloseCode::GoingAway,
            Error::Application(_) | Error::JobPanicked(_) => CloseCode::InternalError,
            _ => CloseCode::ProtocolError,
        }
    }

    /// Whether the error is the peer's fault at the framing level.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        !matches!(
            self,
            Error::Io(_)
                | Error::Application(_)
                | Error::JobPanicked(_)
                | Error::ShutdownRequested(_)
                | Error::DispatcherStopped
                | Error::Config(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Self {
        Error::MalformedHttp(err.to_string())
    }
}
