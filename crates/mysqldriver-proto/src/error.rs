//! Error types for driver operations.

use std::fmt;

/// The primary error type for all driver operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed data source or unsupported connection parameters
    Config(ConfigError),
    /// Connection-related errors (dial, authentication, broken stream)
    Connection(ConnectionError),
    /// Structured error reported by the server in an ERR packet
    Server(ServerError),
    /// Protocol errors (malformed or unexpected packets)
    Protocol(ProtocolError),
    /// A column value could not be converted to the requested type
    Decode(DecodeError),
    /// The pool has been shut down
    PoolClosed,
    /// A read, write or dial deadline expired
    Timeout,
    /// The operation was cancelled through a `CancelToken`
    Cancelled,
    /// I/O errors that don't belong to a specific phase
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection refused
    Refused,
    /// Authentication failed
    Authentication,
    /// Connection lost, closed or no longer usable
    Disconnected,
}

/// Error reported by the server.
///
/// Server errors leave the session usable: the ERR packet terminates the
/// exchange cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// MySQL error code (e.g. 1146 for ER_NO_SUCH_TABLE)
    pub code: u16,
    /// SQL state (5 characters, empty for pre-4.1 style packets)
    pub sql_state: String,
    /// Human readable message
    pub message: String,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// Zero-based column position within the row
    pub column: usize,
    /// Name of the requested Rust type
    pub expected: &'static str,
    /// The raw value, lossily converted to text
    pub value: String,
}

impl Error {
    /// Is this an error after which the connection must not be reused?
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Protocol(_)
                | Error::Io(_)
                | Error::Timeout
                | Error::Cancelled
        )
    }

    /// Is this a structured server error?
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server(_))
    }

    /// Get the server error, if this is one.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Error::Server(e) => Some(e),
            _ => None,
        }
    }

    /// Get SQLSTATE if available (e.g., "42S02" for a missing table)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(e) if !e.sql_state.is_empty() => Some(&e.sql_state),
            _ => None,
        }
    }
}

impl ServerError {
    /// Check if this is a unique constraint violation.
    pub fn is_duplicate_key(&self) -> bool {
        // ER_DUP_ENTRY
        self.code == 1062
    }

    /// Check if this is a foreign key constraint violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        self.code == 1451 || self.code == 1452
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Server(e) => write!(f, "Server error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Decode(e) => write!(f, "Decode error: {}", e),
            Error::PoolClosed => write!(f, "can't get connection from the closed pool"),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Server(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sql_state.is_empty() {
            write!(f, "Error {}: {}", self.code, self.message)
        } else {
            write!(
                f,
                "Error {} (SQLSTATE {}): {}",
                self.code, self.sql_state, self.message
            )
        }
    }
}

impl std::error::Error for ServerError {}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "can't parse {:?} in column {} as {}",
            self.value, self.column, self.expected
        )
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

// Helper functions for creating errors

pub(crate) fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
    })
}

pub(crate) fn auth_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: msg.into(),
        source: None,
    })
}

/// Error for commands issued on a connection that was closed or broken.
pub fn disconnected_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: msg.into(),
        source: None,
    })
}

/// Map a stream failure to an error, keeping deadlines distinguishable.
pub(crate) fn io_error(context: &str, err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: format!("{}: {}", context, err),
            source: Some(Box::new(err)),
        }),
    }
}
