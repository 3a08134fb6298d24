//! Low-overhead MySQL driver.
//!
//! Connections are synchronous and single-owner. Results are streamed: a
//! [`Rows`] cursor reads one row at a time into a reused buffer and typed
//! accessors parse column values in place, so reading a result set allocates
//! almost nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! use mysqldriver::{Config, Conn};
//!
//! let config = Config::from_data_source("root@tcp(127.0.0.1:3306)/test")?;
//! let mut conn = Conn::connect(&config)?;
//!
//! conn.exec("INSERT INTO people (name, age) VALUES ('alice', 30)")?;
//!
//! let mut rows = conn.query("SELECT name, age FROM people")?;
//! while rows.advance() {
//!     let name = rows.string();
//!     let age = rows.i32();
//!     println!("{name}: {age}");
//! }
//! rows.into_result()?;
//! ```
//!
//! Pooling lives in the `mysqldriver-pool` crate.

pub mod config;
pub mod conn;
pub mod convert;
pub mod row;
pub mod rows;

pub use config::Config;
pub use conn::{Conn, DialError};
pub use convert::{FromColumn, parse_bool};
pub use mysqldriver_proto::{
    CancelToken, ColumnDef, ConfigError, ConnectionError, ConnectionErrorKind, DecodeError,
    Error, FieldType, OkPacket, ProtocolError, Result, ServerError, Stats, Transport,
};
pub use row::Row;
pub use rows::Rows;
