//! MySQL client protocol for the `mysqldriver` crates.
//!
//! This crate implements the parts of the MySQL wire protocol the driver
//! needs, directly over a blocking byte stream:
//!
//! - Packet framing with sequence numbers over a buffered, counted transport
//! - Authentication (mysql_native_password, caching_sha2_password)
//! - Text protocol queries with streamed result sets
//! - OK / ERR / EOF packet parsing
//!
//! It has no notion of pooling or connection validity; those live in
//! `mysqldriver` and `mysqldriver-pool`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::net::TcpStream;
//! use mysqldriver_proto::{HandshakeParams, Session};
//!
//! let stream = TcpStream::connect("127.0.0.1:3306")?;
//! let mut session = Session::new(Box::new(stream));
//! session.handshake(&HandshakeParams { user: "root", password: "", database: "test" })?;
//! session.ping()?;
//! ```

pub mod auth;
pub mod error;
#[cfg(any(test, feature = "test-internals"))]
pub mod mock;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, DecodeError, Error, ProtocolError, Result,
    ServerError,
};
pub use protocol::{OkPacket, read_column_value};
pub use session::{HandshakeParams, QueryResponse, ServerInfo, Session};
pub use transport::{CancelToken, Stats, Transport};
pub use types::{ColumnDef, FieldType};
