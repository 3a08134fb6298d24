//! A single authenticated connection.
//!
//! A connection tracks two flags. `valid` is cleared as soon as the byte
//! stream can no longer be trusted (I/O failure, malformed packet, timeout,
//! cancellation, abandoned result set); `closed` is set once the transport
//! has been shut down. Server ERR packets leave the connection valid.

use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};

use mysqldriver_proto::error::disconnected_error;
use mysqldriver_proto::protocol::Command;
use mysqldriver_proto::{
    CancelToken, ConfigError, ConnectionError, ConnectionErrorKind, Error, HandshakeParams,
    OkPacket, QueryResponse, Result, Session, Stats, Transport,
};

use crate::config::Config;
use crate::rows::Rows;

/// A connection to a MySQL server.
#[derive(Debug)]
pub struct Conn {
    pub(crate) session: Session,
    pub(crate) valid: bool,
    closed: bool,
}

/// Failure to establish a connection.
///
/// When the failure happened after the transport was opened (handshake,
/// authentication, charset) the connection is returned alongside the error,
/// already marked invalid, so callers can inspect or close it. A pool's dial
/// hook failure also returns the connection, but leaves it valid.
#[derive(Debug)]
pub struct DialError {
    pub error: Error,
    pub conn: Option<Conn>,
}

impl DialError {
    pub fn into_parts(self) -> (Error, Option<Conn>) {
        (self.error, self.conn)
    }
}

impl From<Error> for DialError {
    fn from(error: Error) -> Self {
        Self { error, conn: None }
    }
}

impl From<DialError> for Error {
    fn from(err: DialError) -> Self {
        err.error
    }
}

impl fmt::Display for DialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for DialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl Conn {
    /// Dial the configured address and authenticate.
    ///
    /// This performs the complete connection setup:
    /// 1. Transport connection (tcp or unix)
    /// 2. Handshake and authentication
    /// 3. `SET NAMES <charset>`
    #[tracing::instrument(
        level = "debug",
        skip(config),
        fields(protocol = %config.protocol, address = %config.address)
    )]
    pub fn connect(config: &Config) -> std::result::Result<Self, DialError> {
        if let Some(token) = &config.cancel_token {
            token.check()?;
        }
        let transport = dial(config)?;
        Self::from_transport(transport, config)
    }

    /// Authenticate over an already connected transport.
    pub fn from_transport(
        transport: Box<dyn Transport>,
        config: &Config,
    ) -> std::result::Result<Self, DialError> {
        let mut conn = Self {
            session: Session::new(transport),
            valid: true,
            closed: false,
        };
        conn.session.set_cancel_token(config.cancel_token.clone());

        match conn.establish(config) {
            Ok(()) => {
                tracing::debug!(
                    connection_id = conn.connection_id(),
                    server_version = %conn.server_version(),
                    "Connection established"
                );
                Ok(conn)
            }
            Err(error) => {
                tracing::debug!(error = %error, "Connection setup failed");
                conn.valid = false;
                Err(DialError {
                    error,
                    conn: Some(conn),
                })
            }
        }
    }

    fn establish(&mut self, config: &Config) -> Result<()> {
        self.session
            .set_timeouts(config.read_timeout, config.write_timeout)?;
        self.session.handshake(&HandshakeParams {
            user: &config.user,
            password: &config.password,
            database: &config.database,
        })?;
        self.session.set_charset(&config.charset)
    }

    /// Run a statement that returns rows.
    ///
    /// The returned cursor borrows the connection until it is dropped; the
    /// result set must be read to the end (or [`Rows::drain`]ed) to keep the
    /// connection reusable.
    pub fn query(&mut self, sql: &str) -> Result<Rows<'_>> {
        self.ensure_usable()?;
        tracing::trace!(sql, "query");
        let response = self
            .session
            .write_command(Command::Query, sql.as_bytes())
            .and_then(|()| self.session.query_result_set());
        match self.track(response)? {
            QueryResponse::Ok(_) => Ok(Rows::empty(self)),
            QueryResponse::ResultSet(columns) => Ok(Rows::new(self, columns)),
        }
    }

    /// Run a statement that doesn't return rows.
    pub fn exec(&mut self, sql: &str) -> Result<OkPacket> {
        self.ensure_usable()?;
        tracing::trace!(sql, "exec");
        let response = self
            .session
            .write_command(Command::Query, sql.as_bytes())
            .and_then(|()| self.session.read_ok());
        self.track(response)
    }

    /// Check the server is alive.
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_usable()?;
        let response = self.session.ping();
        self.track(response)
    }

    /// Close the connection.
    ///
    /// The first call sends `COM_QUIT` and shuts the transport down; later
    /// calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::debug!(connection_id = self.connection_id(), "Closing connection");
        self.session.close()
    }

    /// Whether the byte stream is still in sync with the server.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// I/O statistics since the last reset.
    pub fn stats(&self) -> Stats {
        self.session.stats()
    }

    pub fn reset_stats(&mut self) {
        self.session.reset_stats();
    }

    pub fn server_version(&self) -> &str {
        &self.session.server_info().server_version
    }

    pub fn connection_id(&self) -> u32 {
        self.session.server_info().connection_id
    }

    /// Replace the cancel token observed by this connection.
    pub fn set_cancel_token(&mut self, token: Option<CancelToken>) {
        self.session.set_cancel_token(token);
    }

    fn ensure_usable(&mut self) -> Result<()> {
        if self.closed {
            self.valid = false;
            return Err(disconnected_error("connection is closed"));
        }
        if !self.valid {
            return Err(disconnected_error(
                "connection is in an invalid state and can't be reused",
            ));
        }
        Ok(())
    }

    /// Invalidate the connection on any error that leaves the stream unusable.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if !matches!(err, Error::Server(_)) {
                self.valid = false;
            }
        }
        result
    }
}

/// Open the transport described by `config`.
fn dial(config: &Config) -> Result<Box<dyn Transport>> {
    match config.protocol.as_str() {
        "tcp" => dial_tcp(config).map(|s| Box::new(s) as Box<dyn Transport>),
        #[cfg(unix)]
        "unix" => std::os::unix::net::UnixStream::connect(&config.address)
            .map(|s| Box::new(s) as Box<dyn Transport>)
            .map_err(|e| connect_error(&config.address, e)),
        other => Err(Error::Config(ConfigError {
            message: format!("unsupported protocol {:?}", other),
        })),
    }
}

fn dial_tcp(config: &Config) -> Result<TcpStream> {
    let stream = match config.connect_timeout {
        None => TcpStream::connect(&config.address)
            .map_err(|e| connect_error(&config.address, e))?,
        Some(timeout) => {
            let addrs = config
                .address
                .to_socket_addrs()
                .map_err(|e| connect_error(&config.address, e))?;
            let mut last_err = None;
            let mut connected = None;
            for addr in addrs {
                match TcpStream::connect_timeout(&addr, timeout) {
                    Ok(stream) => {
                        connected = Some(stream);
                        break;
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            match (connected, last_err) {
                (Some(stream), _) => stream,
                (None, Some(e)) => return Err(connect_error(&config.address, e)),
                (None, None) => {
                    return Err(Error::Connection(ConnectionError {
                        kind: ConnectionErrorKind::Connect,
                        message: format!("{} resolved to no addresses", config.address),
                        source: None,
                    }));
                }
            }
        }
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn connect_error(address: &str, err: std::io::Error) -> Error {
    let kind = match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => return Error::Timeout,
        std::io::ErrorKind::ConnectionRefused => ConnectionErrorKind::Refused,
        _ => ConnectionErrorKind::Connect,
    };
    Error::Connection(ConnectionError {
        kind,
        message: format!("Failed to connect to {}: {}", address, err),
        source: Some(Box::new(err)),
    })
}
