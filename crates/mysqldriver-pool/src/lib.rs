//! Connection pooling for `mysqldriver`.
//!
//! [`Db`] keeps up to `capacity` idle connections. [`Db::acquire`] hands out
//! an idle connection or dials a new one; it never waits for capacity, so the
//! number of checked-out connections is not bounded by the pool. Connections
//! coming back through [`Db::release`] are kept only while they are still
//! usable and there is room for them.
//!
//! ```rust,ignore
//! use mysqldriver_pool::Db;
//!
//! let db = Db::new("root@tcp(127.0.0.1:3306)/test", 10)?;
//! let mut conn = db.acquire()?;
//! conn.exec("DELETE FROM sessions WHERE expired")?;
//! db.release(conn)?;
//! ```

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use mysqldriver::{Config, Conn, DialError, Error, Result};

/// Callback run on every freshly dialed connection before it is handed out.
pub type DialHook = dyn Fn(&mut Conn) -> Result<()> + Send + Sync;

/// Function used to open new connections.
pub type Dialer = dyn Fn(&Config) -> std::result::Result<Conn, DialError> + Send + Sync;

/// A pool of idle MySQL connections.
pub struct Db {
    config: Config,
    capacity: usize,
    idle: Mutex<IdleConns>,
    on_dial: Option<Box<DialHook>>,
    dialer: Box<Dialer>,
}

impl Db {
    /// Create a pool from a data source string such as
    /// `user:password@tcp(127.0.0.1:3306)/database`.
    ///
    /// Nothing is dialed until the first [`acquire`](Self::acquire).
    pub fn new(data_source: &str, pool_size: usize) -> Result<Self> {
        let config = Config::from_data_source(data_source)?;
        Ok(Self::with_config(config, pool_size))
    }

    /// Create a pool from an assembled configuration.
    pub fn with_config(config: Config, pool_size: usize) -> Self {
        Self {
            config,
            capacity: pool_size,
            idle: Mutex::new(IdleConns::new(pool_size)),
            on_dial: None,
            dialer: Box::new(Conn::connect),
        }
    }

    /// Run `hook` on every new connection, e.g. to set session variables.
    ///
    /// A failing hook fails the [`acquire`](Self::acquire) call. The
    /// connection is still handed back in the [`DialError`], untouched, so
    /// the caller can close it or release it into the pool.
    pub fn on_dial<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Conn) -> Result<()> + Send + Sync + 'static,
    {
        self.on_dial = Some(Box::new(hook));
        self
    }

    /// Replace the function that opens new connections.
    pub fn with_dialer<F>(mut self, dialer: F) -> Self
    where
        F: Fn(&Config) -> std::result::Result<Conn, DialError> + Send + Sync + 'static,
    {
        self.dialer = Box::new(dialer);
        self
    }

    /// Take an idle connection, or dial a new one when none is idle.
    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.config.address))]
    pub fn acquire(&self) -> std::result::Result<Conn, DialError> {
        match self.idle.lock().pop() {
            Popped::Idle(conn) => return Ok(conn),
            Popped::Closed => return Err(Error::PoolClosed.into()),
            Popped::Empty => {}
        }

        tracing::debug!("No idle connection, dialing");
        let mut conn = (self.dialer)(&self.config)?;
        if let Some(hook) = &self.on_dial {
            if let Err(error) = hook(&mut conn) {
                tracing::debug!(error = %error, "Dial hook failed");
                return Err(DialError {
                    error,
                    conn: Some(conn),
                });
            }
        }
        Ok(conn)
    }

    /// Give a connection back to the pool.
    ///
    /// Invalid connections are closed. A usable connection is kept idle when
    /// there is room, and closed otherwise. The returned error is the close
    /// error, if any.
    pub fn release(&self, mut conn: Conn) -> Result<()> {
        if !conn.is_valid() {
            tracing::debug!(
                connection_id = conn.connection_id(),
                "Discarding invalid connection"
            );
            return conn.close();
        }
        if conn.is_closed() {
            return Ok(());
        }

        conn.reset_stats();
        let rejected = self.idle.lock().try_push(conn);
        match rejected {
            Ok(()) => Ok(()),
            Err(Rejected::Full(mut conn)) => {
                tracing::debug!(
                    connection_id = conn.connection_id(),
                    capacity = self.capacity,
                    "Pool is full, closing connection"
                );
                conn.close()
            }
            Err(Rejected::Closed(mut conn)) => {
                tracing::debug!(
                    connection_id = conn.connection_id(),
                    "Pool is shut down, closing connection"
                );
                conn.close()
            }
        }
    }

    /// Close the pool and every idle connection.
    ///
    /// Returns the errors of the connections that failed to close. Calling
    /// it again does nothing.
    pub fn shutdown(&self) -> Vec<Error> {
        let idle = {
            let mut idle = self.idle.lock();
            if idle.closed {
                return Vec::new();
            }
            idle.closed = true;
            idle.conns.drain(..).collect::<Vec<_>>()
        };

        tracing::debug!(idle = idle.len(), "Shutting down pool");
        let mut errors = Vec::new();
        for mut conn in idle {
            if let Err(error) = conn.close() {
                tracing::warn!(
                    connection_id = conn.connection_id(),
                    error = %error,
                    "Failed to close idle connection"
                );
                errors.push(error);
            }
        }
        errors
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().conns.len()
    }

    /// Maximum number of idle connections.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.idle.lock().closed
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let idle = self.idle.lock();
        f.debug_struct("Db")
            .field("address", &self.config.address)
            .field("capacity", &self.capacity)
            .field("idle", &idle.conns.len())
            .field("closed", &idle.closed)
            .field("on_dial", &self.on_dial.is_some())
            .finish_non_exhaustive()
    }
}

/// Bounded idle buffer.
struct IdleConns {
    conns: VecDeque<Conn>,
    capacity: usize,
    closed: bool,
}

enum Popped {
    Idle(Conn),
    Empty,
    Closed,
}

/// A connection the idle buffer refused to take.
enum Rejected {
    Full(Conn),
    Closed(Conn),
}

impl IdleConns {
    fn new(capacity: usize) -> Self {
        Self {
            conns: VecDeque::with_capacity(capacity),
            capacity,
            closed: false,
        }
    }

    fn pop(&mut self) -> Popped {
        if self.closed {
            return Popped::Closed;
        }
        match self.conns.pop_front() {
            Some(conn) => Popped::Idle(conn),
            None => Popped::Empty,
        }
    }

    fn try_push(&mut self, conn: Conn) -> std::result::Result<(), Rejected> {
        if self.closed {
            return Err(Rejected::Closed(conn));
        }
        if self.conns.len() >= self.capacity {
            return Err(Rejected::Full(conn));
        }
        self.conns.push_back(conn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mysqldriver::{Config, Conn, ConnectionErrorKind, Error};
    use mysqldriver_proto::mock::{MockHandle, ScriptBuilder};
    use parking_lot::Mutex;

    use super::Db;

    /// Dialer over scripted transports; records every connection it opens.
    #[derive(Clone, Default)]
    struct Dials {
        handles: Arc<Mutex<Vec<MockHandle>>>,
        count: Arc<AtomicUsize>,
    }

    impl Dials {
        fn pool(&self, size: usize, script: fn() -> ScriptBuilder) -> Db {
            let dials = self.clone();
            Db::with_config(Config::new(), size).with_dialer(move |config| {
                dials.count.fetch_add(1, Ordering::SeqCst);
                let transport = script().transport();
                dials.handles.lock().push(transport.handle());
                Conn::from_transport(Box::new(transport), config)
            })
        }

        fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }

        fn handle(&self, i: usize) -> MockHandle {
            self.handles.lock()[i].clone()
        }
    }

    fn idle_server() -> ScriptBuilder {
        ScriptBuilder::new().handshake()
    }

    fn server_with_ok() -> ScriptBuilder {
        ScriptBuilder::new().handshake().ok()
    }

    #[test]
    fn test_new_parses_without_dialing() {
        let db = Db::new("root:pw@tcp(127.0.0.1:3306)/test", 4).unwrap();
        assert_eq!(db.capacity(), 4);
        assert_eq!(db.idle_count(), 0);
        assert_eq!(db.config().user, "root");
        assert_eq!(db.config().database, "test");
        assert!(!db.is_closed());
    }

    #[test]
    fn test_new_rejects_malformed_data_source() {
        let err = Db::new("root-tcp(127.0.0.1:3306)", 4).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_acquire_reuses_released_connections() {
        let dials = Dials::default();
        let db = dials.pool(3, idle_server);

        let a = db.acquire().unwrap();
        let b = db.acquire().unwrap();
        assert_eq!(dials.count(), 2);

        db.release(a).unwrap();
        db.release(b).unwrap();
        assert_eq!(db.idle_count(), 2);

        let c = db.acquire().unwrap();
        let d = db.acquire().unwrap();
        assert_eq!(dials.count(), 2);
        assert_eq!(db.idle_count(), 0);

        let e = db.acquire().unwrap();
        assert_eq!(dials.count(), 3);

        for conn in [c, d, e] {
            db.release(conn).unwrap();
        }
        assert_eq!(db.idle_count(), 3);
    }

    #[test]
    fn test_release_beyond_capacity_closes() {
        let dials = Dials::default();
        let db = dials.pool(1, idle_server);

        let a = db.acquire().unwrap();
        let b = db.acquire().unwrap();
        db.release(a).unwrap();
        db.release(b).unwrap();

        assert_eq!(db.idle_count(), 1);
        assert!(!dials.handle(0).is_closed());
        assert!(dials.handle(1).is_closed());
    }

    #[test]
    fn test_zero_capacity_pool_closes_everything() {
        let dials = Dials::default();
        let db = dials.pool(0, idle_server);

        let conn = db.acquire().unwrap();
        db.release(conn).unwrap();
        assert_eq!(db.idle_count(), 0);
        assert!(dials.handle(0).is_closed());
    }

    #[test]
    fn test_release_invalid_connection_closes_it() {
        let dials = Dials::default();
        let db = dials.pool(2, idle_server);

        let mut conn = db.acquire().unwrap();
        // the script is exhausted, so the read hits EOF
        assert!(conn.exec("SELECT 1").is_err());
        assert!(!conn.is_valid());
        db.release(conn).unwrap();

        assert_eq!(db.idle_count(), 0);
        assert!(dials.handle(0).is_closed());

        db.acquire().unwrap();
        assert_eq!(dials.count(), 2);
    }

    #[test]
    fn test_release_already_closed_connection() {
        let dials = Dials::default();
        let db = dials.pool(2, idle_server);

        let mut conn = db.acquire().unwrap();
        conn.close().unwrap();
        db.release(conn).unwrap();
        assert_eq!(db.idle_count(), 0);
    }

    #[test]
    fn test_release_resets_stats() {
        let dials = Dials::default();
        let db = dials.pool(1, server_with_ok);

        let mut conn = db.acquire().unwrap();
        conn.exec("DO 1").unwrap();
        assert!(conn.stats().syscalls > 0);
        db.release(conn).unwrap();

        let conn = db.acquire().unwrap();
        assert_eq!(conn.stats().syscalls, 0);
    }

    #[test]
    fn test_server_error_keeps_connection_pooled() {
        let dials = Dials::default();
        let db = dials.pool(1, || {
            ScriptBuilder::new()
                .handshake()
                .err(1062, "23000", "Duplicate entry '1' for key 'PRIMARY'")
        });

        let mut conn = db.acquire().unwrap();
        let err = conn.exec("INSERT INTO t VALUES (1)").unwrap_err();
        assert!(err.is_server_error());
        db.release(conn).unwrap();
        assert_eq!(db.idle_count(), 1);
        assert!(!dials.handle(0).is_closed());
    }

    #[test]
    fn test_shutdown_closes_idle_connections() {
        let dials = Dials::default();
        let db = dials.pool(2, idle_server);

        let a = db.acquire().unwrap();
        let b = db.acquire().unwrap();
        db.release(a).unwrap();
        db.release(b).unwrap();

        assert!(db.shutdown().is_empty());
        assert!(db.is_closed());
        assert_eq!(db.idle_count(), 0);
        assert!(dials.handle(0).is_closed());
        assert!(dials.handle(1).is_closed());

        // idempotent
        assert!(db.shutdown().is_empty());
    }

    #[test]
    fn test_acquire_after_shutdown_never_dials() {
        let dials = Dials::default();
        let db = dials.pool(2, idle_server);
        db.shutdown();

        let err = db.acquire().unwrap_err();
        assert!(matches!(err.error, Error::PoolClosed));
        assert!(err.conn.is_none());
        assert_eq!(dials.count(), 0);
    }

    #[test]
    fn test_release_after_shutdown_closes() {
        let dials = Dials::default();
        let db = dials.pool(2, idle_server);

        let conn = db.acquire().unwrap();
        db.shutdown();
        db.release(conn).unwrap();

        assert_eq!(db.idle_count(), 0);
        assert!(dials.handle(0).is_closed());
    }

    #[test]
    fn test_dial_failure_returns_partial_connection() {
        let dials = Dials::default();
        let db = dials.pool(2, || {
            ScriptBuilder::new()
                .greeting("mysql_native_password")
                .err_in_stream(1045, "28000", "Access denied for user 'root'")
        });

        let (error, conn) = db.acquire().unwrap_err().into_parts();
        match error {
            Error::Connection(e) => assert_eq!(e.kind, ConnectionErrorKind::Authentication),
            other => panic!("unexpected: {other:?}"),
        }
        let conn = conn.unwrap();
        assert!(!conn.is_valid());

        db.release(conn).unwrap();
        assert_eq!(db.idle_count(), 0);
        assert!(dials.handle(0).is_closed());
    }

    #[test]
    fn test_dial_hook_runs_on_new_connections_only() {
        let dials = Dials::default();
        let hooked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hooked);
        let db = dials
            .pool(1, server_with_ok)
            .on_dial(move |conn| {
                counter.fetch_add(1, Ordering::SeqCst);
                conn.exec("SET time_zone = '+00:00'").map(|_| ())
            });

        let conn = db.acquire().unwrap();
        db.release(conn).unwrap();
        let conn = db.acquire().unwrap();
        db.release(conn).unwrap();

        assert_eq!(hooked.load(Ordering::SeqCst), 1);
        assert_eq!(dials.count(), 1);
        assert_eq!(
            dials.handle(0).queries(),
            vec!["SET NAMES utf8mb4", "SET time_zone = '+00:00'"]
        );
    }

    #[test]
    fn test_dial_hook_error_returns_usable_connection() {
        let dials = Dials::default();
        let db = dials
            .pool(1, server_with_ok)
            .on_dial(|_| Err(Error::Timeout));

        let (error, conn) = db.acquire().unwrap_err().into_parts();
        assert!(matches!(error, Error::Timeout));
        let mut conn = conn.unwrap();
        assert!(conn.is_valid());
        conn.exec("DO 1").unwrap();

        db.release(conn).unwrap();
        assert_eq!(db.idle_count(), 1);
        assert!(!dials.handle(0).is_closed());
    }

    #[test]
    fn test_db_is_shared_across_threads() {
        let dials = Dials::default();
        let db = Arc::new(dials.pool(4, idle_server));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    let conn = db.acquire().unwrap();
                    db.release(conn).unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(dials.count() <= 4);
        assert_eq!(db.idle_count(), dials.count());
    }
}
