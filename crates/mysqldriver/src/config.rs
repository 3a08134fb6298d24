//! Connection configuration.
//!
//! A [`Config`] is usually parsed from a data source string of the form
//!
//! ```text
//! [user[:password]]@protocol(address)[/database]
//! ```
//!
//! e.g. `root:secret@tcp(127.0.0.1:3306)/test` or
//! `app@unix(/var/run/mysqld/mysqld.sock)/app`. Timeouts, the charset and a
//! cancel token can then be set with the builder methods.

use std::str::FromStr;
use std::time::Duration;

use mysqldriver_proto::{CancelToken, ConfigError, Error, Result};

/// Charset applied with `SET NAMES` right after the handshake.
pub const DEFAULT_CHARSET: &str = "utf8mb4";

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Username for authentication
    pub user: String,
    /// Password for authentication (empty for none)
    pub password: String,
    /// Network protocol: `tcp` or `unix`
    pub protocol: String,
    /// `host:port` for tcp, socket path for unix
    pub address: String,
    /// Default schema (empty for none)
    pub database: String,
    /// Charset name used in `SET NAMES`
    pub charset: String,
    /// Deadline for establishing the transport
    pub connect_timeout: Option<Duration>,
    /// Deadline for each blocking read
    pub read_timeout: Option<Duration>,
    /// Deadline for each blocking write
    pub write_timeout: Option<Duration>,
    /// Cancellation shared by every connection built from this config
    pub cancel_token: Option<CancelToken>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            protocol: "tcp".to_string(),
            address: "127.0.0.1:3306".to_string(),
            database: String::new(),
            charset: DEFAULT_CHARSET.to_string(),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            cancel_token: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a data source string.
    pub fn from_data_source(data_source: &str) -> Result<Self> {
        let Some((credentials, server)) = data_source.split_once('@') else {
            return Err(config_error(data_source, "missing '@'"));
        };

        let (user, password) = credentials.split_once(':').unwrap_or((credentials, ""));

        let Some((protocol, rest)) = server.split_once('(') else {
            return Err(config_error(data_source, "missing '(' after the protocol"));
        };
        // socket paths contain '/', so the address ends at ')'
        let Some((address, rest)) = rest.split_once(')') else {
            return Err(config_error(data_source, "missing closing ')' after the address"));
        };
        let database = match rest.strip_prefix('/') {
            Some(database) => database,
            None if rest.is_empty() => "",
            None => return Err(config_error(data_source, "expected '/' before the database")),
        };

        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
            protocol: protocol.to_string(),
            address: address.to_string(),
            database: database.to_string(),
            ..Self::default()
        })
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the protocol (`tcp` or `unix`).
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set the address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the charset used in `SET NAMES`.
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the write timeout.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Attach a cancel token.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel_token = Some(token);
        self
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_data_source(s)
    }
}

fn config_error(data_source: &str, reason: &str) -> Error {
    // never echo the password
    let redacted = match data_source.split_once('@') {
        Some((credentials, server)) => {
            let user = credentials.split_once(':').map_or(credentials, |(u, _)| u);
            format!("{}@{}", user, server)
        }
        None => data_source.to_string(),
    };
    Error::Config(ConfigError {
        message: format!("invalid data source {:?}: {}", redacted, reason),
    })
}
