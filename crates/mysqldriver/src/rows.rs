//! Sequential result set cursor.
//!
//! Rows are read one at a time into the connection's packet buffer and
//! columns are read left to right from the current row:
//!
//! ```rust,ignore
//! let mut rows = conn.query("SELECT id, name, married FROM people")?;
//! while rows.advance() {
//!     let id = rows.i64();        // columns in select order
//!     let name = rows.string();
//!     let married = rows.bool();
//! }
//! rows.into_result()?;
//! ```
//!
//! Conversion and stream errors never panic. They are latched on the cursor,
//! end the iteration and are reported by [`Rows::last_error`] /
//! [`Rows::into_result`]. A read that fails returns the zero value with the
//! NULL flag unset; only a NULL sent by the server sets it.

use std::collections::HashMap;
use std::ops::Range;

use mysqldriver_proto::{ColumnDef, DecodeError, Error, ProtocolError, Result, read_column_value};

use crate::conn::Conn;
use crate::convert::{FromColumn, display_value};
use crate::row::Row;

/// Cursor over the rows of one result set.
///
/// The cursor holds the connection exclusively. Dropping it before the last
/// row has been read leaves unread packets on the stream, so the connection
/// is marked invalid; use [`Rows::drain`] to keep it reusable.
#[derive(Debug)]
pub struct Rows<'c> {
    conn: &'c mut Conn,
    columns: Vec<ColumnDef>,
    pub(crate) names: Option<HashMap<String, usize>>,
    /// Location of every column read so far in the current row
    pub(crate) values: Vec<(Range<usize>, bool)>,
    offset: usize,
    state: CursorState,
}

/// Position and outcome of the iteration.
#[derive(Debug, Default)]
struct CursorState {
    on_row: bool,
    done: bool,
    error: Option<Error>,
}

impl CursorState {
    /// Record the first error and stop the iteration. Stopping a cursor that
    /// still has unread packets invalidates the connection; a server ERR
    /// terminates the result set cleanly.
    fn latch(&mut self, conn_valid: &mut bool, err: Error) {
        if !self.done && !matches!(err, Error::Server(_)) {
            *conn_valid = false;
        }
        self.on_row = false;
        self.done = true;
        if self.error.is_none() {
            tracing::debug!(error = %err, "Result set error");
            self.error = Some(err);
        }
    }
}

macro_rules! column_accessors {
    ($($null:ident, $plain:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Read the next column as `", stringify!($ty), "` with its NULL indicator.")]
            pub fn $null(&mut self) -> ($ty, bool) {
                self.null_value()
            }

            #[doc = concat!("Read the next column as `", stringify!($ty), "`; NULL reads as the zero value.")]
            pub fn $plain(&mut self) -> $ty {
                self.$null().0
            }
        )*
    };
}

impl<'c> Rows<'c> {
    pub(crate) fn new(conn: &'c mut Conn, columns: Vec<ColumnDef>) -> Self {
        let values = Vec::with_capacity(columns.len());
        Self {
            conn,
            columns,
            names: None,
            values,
            offset: 0,
            state: CursorState::default(),
        }
    }

    /// Cursor for a statement that produced no result set.
    pub(crate) fn empty(conn: &'c mut Conn) -> Self {
        let mut rows = Self::new(conn, Vec::new());
        rows.state.done = true;
        rows
    }

    /// Column metadata of the result set.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Move to the next row.
    ///
    /// Returns `false` at the end of the result set or once an error has been
    /// latched, and keeps returning `false` afterwards.
    pub fn advance(&mut self) -> bool {
        if self.state.done {
            return false;
        }
        self.state.on_row = false;
        self.values.clear();
        match self.conn.session.next_row() {
            Ok(true) => {
                self.offset = 0;
                self.state.on_row = true;
                true
            }
            Ok(false) => {
                self.state.done = true;
                false
            }
            Err(err) => {
                self.latch(err);
                false
            }
        }
    }

    /// The first error observed by the cursor, if any.
    pub fn last_error(&self) -> Option<&Error> {
        self.state.error.as_ref()
    }

    /// Finish with the latched error, if any.
    pub fn into_result(mut self) -> Result<()> {
        match self.state.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Read and discard the remaining rows, then report the latched error.
    pub fn drain(mut self) -> Result<()> {
        while self.advance() {}
        self.into_result()
    }

    /// Snapshot of the current row with by-name access.
    ///
    /// Columns that have not been read yet are read first, so the cursor is
    /// positioned at the end of the row afterwards. Without a current row the
    /// snapshot is empty and a protocol error is latched.
    pub fn row(&mut self) -> Row<'_, 'c> {
        if !self.state.on_row {
            self.latch(no_current_row());
        }
        while self.state.on_row && self.values.len() < self.columns.len() {
            if self.next_column().is_none() {
                break;
            }
        }
        if self.names.is_none() {
            let names = self
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| (c.name.clone(), i))
                .collect();
            self.names = Some(names);
        }
        Row::new(self)
    }

    /// Read the next column as raw bytes with its NULL indicator.
    ///
    /// NULL reads as an empty slice. A failed read also returns an empty
    /// slice, with the flag unset, and latches the error.
    pub fn null_bytes(&mut self) -> (&[u8], bool) {
        match self.next_column() {
            Some((range, null)) => (&self.conn.session.payload()[range], null),
            None => (&[], false),
        }
    }

    /// Read the next column as raw bytes; NULL reads as an empty slice.
    pub fn bytes(&mut self) -> &[u8] {
        self.null_bytes().0
    }

    /// Read the next column as a string borrowed from the row buffer.
    pub fn null_str(&mut self) -> (&str, bool) {
        let column = self.values.len();
        match self.next_column() {
            Some((range, null)) => self.decode_str(column, range, null),
            None => ("", false),
        }
    }

    /// Read the next column as a borrowed string; NULL reads as `""`.
    pub fn str(&mut self) -> &str {
        self.null_str().0
    }

    column_accessors! {
        null_string, string => String;
        null_i8, i8 => i8;
        null_i16, i16 => i16;
        null_i32, i32 => i32;
        null_i64, i64 => i64;
        null_isize, isize => isize;
        null_u8, u8 => u8;
        null_u16, u16 => u16;
        null_u32, u32 => u32;
        null_u64, u64 => u64;
        null_f32, f32 => f32;
        null_f64, f64 => f64;
        null_bool, bool => bool;
    }

    fn null_value<T: FromColumn>(&mut self) -> (T, bool) {
        let column = self.values.len();
        let Some((range, null)) = self.next_column() else {
            return (T::default(), false);
        };
        if null {
            return (T::default(), true);
        }
        let bytes = &self.conn.session.payload()[range];
        match T::from_column(bytes) {
            Some(value) => (value, false),
            None => {
                let value = display_value(bytes);
                self.latch_decode(column, T::TYPE_NAME, value);
                (T::default(), false)
            }
        }
    }

    /// Locate the next column of the current row.
    fn next_column(&mut self) -> Option<(Range<usize>, bool)> {
        if !self.state.on_row {
            self.latch(no_current_row());
            return None;
        }
        if self.values.len() >= self.columns.len() {
            self.latch(protocol_error(format!(
                "all {} columns of the row have already been read",
                self.columns.len()
            )));
            return None;
        }
        match read_column_value(self.conn.session.payload(), self.offset) {
            Some((range, next, null)) => {
                self.offset = next;
                self.values.push((range.clone(), null));
                Some((range, null))
            }
            None => {
                let column = self.values.len();
                self.latch(protocol_error(format!(
                    "row packet ends inside column {}",
                    column
                )));
                None
            }
        }
    }

    /// Bytes of a column located earlier in the current row.
    pub(crate) fn value_bytes(&self, range: Range<usize>) -> &[u8] {
        &self.conn.session.payload()[range]
    }

    /// Column `column` of the current row, already located, as a string.
    pub(crate) fn decode_str(
        &mut self,
        column: usize,
        range: Range<usize>,
        null: bool,
    ) -> (&str, bool) {
        match std::str::from_utf8(&self.conn.session.payload()[range.clone()]) {
            Ok(text) => (text, null),
            Err(_) => {
                let value = display_value(&self.conn.session.payload()[range]);
                let err = Error::Decode(DecodeError {
                    column,
                    expected: "utf-8 string",
                    value,
                });
                self.state.latch(&mut self.conn.valid, err);
                ("", false)
            }
        }
    }

    pub(crate) fn latch_decode(&mut self, column: usize, expected: &'static str, value: String) {
        self.latch(Error::Decode(DecodeError {
            column,
            expected,
            value,
        }));
    }

    fn latch(&mut self, err: Error) {
        self.state.latch(&mut self.conn.valid, err);
    }
}

impl Drop for Rows<'_> {
    fn drop(&mut self) {
        if !self.state.done {
            tracing::warn!(
                connection_id = self.conn.connection_id(),
                "Result set dropped before the last row; connection can't be reused"
            );
            self.conn.valid = false;
        }
    }
}

fn no_current_row() -> Error {
    protocol_error("no current row; call advance() first")
}

fn protocol_error(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use mysqldriver_proto::mock::ScriptBuilder;

    fn connect(script: ScriptBuilder) -> Conn {
        Conn::from_transport(Box::new(script.transport()), &Config::new()).unwrap()
    }

    fn people() -> ScriptBuilder {
        ScriptBuilder::new()
            .handshake()
            .columns(&["id", "name", "score", "married"])
            .text_row(&["1", "alice", "9.5", "1"])
            .row(&[Some("2"), None, None, Some("false")])
            .eof()
    }

    #[test]
    fn test_sequential_reads() {
        let mut conn = connect(people());
        let mut rows = conn.query("SELECT * FROM people").unwrap();
        assert_eq!(rows.columns().len(), 4);

        assert!(rows.advance());
        assert_eq!(rows.i64(), 1);
        assert_eq!(rows.str(), "alice");
        assert_eq!(rows.f64(), 9.5);
        assert!(rows.bool());

        assert!(rows.advance());
        assert_eq!(rows.null_i32(), (2, false));
        assert_eq!(rows.null_string(), (String::new(), true));
        assert_eq!(rows.f32(), 0.0);
        assert_eq!(rows.null_bool(), (false, false));

        assert!(!rows.advance());
        assert!(!rows.advance());
        assert!(rows.last_error().is_none());
        rows.into_result().unwrap();
        assert!(conn.is_valid());
    }

    #[test]
    fn test_null_forms() {
        let script = ScriptBuilder::new()
            .handshake()
            .columns(&["a", "b", "c"])
            .row(&[None, None, None])
            .eof();
        let mut conn = connect(script);
        let mut rows = conn.query("SELECT NULL, NULL, NULL").unwrap();
        assert!(rows.advance());
        assert_eq!(rows.null_bytes(), (&[][..], true));
        assert_eq!(rows.u64(), 0);
        assert_eq!(rows.null_str(), ("", true));
        rows.drain().unwrap();
    }

    #[test]
    fn test_decode_error_latches_without_panicking() {
        let script = ScriptBuilder::new()
            .handshake()
            .columns(&["n"])
            .text_row(&["abc"])
            .text_row(&["2"])
            .eof();
        let mut conn = connect(script);
        let mut rows = conn.query("SELECT n FROM t").unwrap();
        assert!(rows.advance());
        assert_eq!(rows.null_f64(), (0.0, false));
        match rows.last_error() {
            Some(Error::Decode(e)) => {
                assert_eq!(e.column, 0);
                assert_eq!(e.expected, "f64");
                assert_eq!(e.value, "abc");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!rows.advance());
        assert!(rows.into_result().is_err());
        assert!(!conn.is_valid());
    }

    #[test]
    fn test_first_error_wins() {
        let script = ScriptBuilder::new()
            .handshake()
            .columns(&["a", "b"])
            .text_row(&["x", "y"])
            .eof();
        let mut conn = connect(script);
        let mut rows = conn.query("SELECT a, b FROM t").unwrap();
        assert!(rows.advance());
        rows.i32();
        rows.u8();
        assert!(matches!(rows.last_error(), Some(Error::Decode(e)) if e.column == 0));
    }

    #[test]
    fn test_reading_past_last_column() {
        let script = ScriptBuilder::new()
            .handshake()
            .columns(&["a"])
            .text_row(&["1"])
            .eof();
        let mut conn = connect(script);
        let mut rows = conn.query("SELECT a FROM t").unwrap();
        assert!(rows.advance());
        assert_eq!(rows.i32(), 1);
        assert_eq!(rows.null_bytes(), (&[][..], false));
        assert!(matches!(rows.last_error(), Some(Error::Protocol(_))));
        assert!(!rows.advance());
    }

    #[test]
    fn test_invalid_utf8_str() {
        let script = ScriptBuilder::new()
            .handshake()
            .columns(&["a"])
            .binary_row(&[Some(&[0xff, 0xfe][..])])
            .eof();
        let mut conn = connect(script);
        let mut rows = conn.query("SELECT a FROM t").unwrap();
        assert!(rows.advance());
        assert_eq!(rows.null_str(), ("", false));
        assert!(matches!(rows.last_error(), Some(Error::Decode(_))));
    }

    #[test]
    fn test_server_error_mid_stream_keeps_conn_valid() {
        let script = ScriptBuilder::new()
            .handshake()
            .columns(&["a"])
            .text_row(&["1"])
            .err_in_stream(1317, "70100", "Query execution was interrupted")
            .ok();
        let mut conn = connect(script);
        let mut rows = conn.query("SELECT a FROM t").unwrap();
        assert!(rows.advance());
        assert!(!rows.advance());
        let err = rows.into_result().unwrap_err();
        assert_eq!(err.server_error().map(|e| e.code), Some(1317));
        assert!(conn.is_valid());
        conn.exec("DO 1").unwrap();
    }

    #[test]
    fn test_truncated_stream_invalidates() {
        let script = ScriptBuilder::new()
            .handshake()
            .columns(&["a"])
            .text_row(&["1"]);
        let mut conn = connect(script);
        let mut rows = conn.query("SELECT a FROM t").unwrap();
        assert!(rows.advance());
        assert!(!rows.advance());
        assert!(rows.last_error().unwrap().is_connection_error());
        drop(rows);
        assert!(!conn.is_valid());
    }

    #[test]
    fn test_query_server_error() {
        let script = ScriptBuilder::new()
            .handshake()
            .err(1146, "42S02", "Table 'test.nope' doesn't exist");
        let mut conn = connect(script);
        let err = conn.query("SELECT * FROM nope").unwrap_err();
        assert_eq!(err.sqlstate(), Some("42S02"));
        assert!(conn.is_valid());
    }

    #[test]
    fn test_statement_without_result_set() {
        let mut conn = connect(ScriptBuilder::new().handshake().ok_with(1, 0));
        let mut rows = conn.query("UPDATE t SET a = 1").unwrap();
        assert!(rows.columns().is_empty());
        assert!(!rows.advance());
        drop(rows);
        assert!(conn.is_valid());
    }

    #[test]
    fn test_dropping_unfinished_cursor_invalidates() {
        let mut conn = connect(people());
        {
            let mut rows = conn.query("SELECT * FROM people").unwrap();
            assert!(rows.advance());
        }
        assert!(!conn.is_valid());
    }

    #[test]
    fn test_drain_keeps_conn_reusable() {
        let mut conn = connect(people().ok());
        let mut rows = conn.query("SELECT * FROM people").unwrap();
        assert!(rows.advance());
        rows.drain().unwrap();
        assert!(conn.is_valid());
        conn.exec("DO 1").unwrap();
    }

    #[test]
    fn test_reading_without_advance() {
        let mut conn = connect(people());
        let mut rows = conn.query("SELECT * FROM people").unwrap();
        assert_eq!(rows.i64(), 0);
        assert!(matches!(rows.last_error(), Some(Error::Protocol(_))));
        assert!(!rows.advance());
    }

    #[test]
    fn test_reading_after_last_row_keeps_conn_valid() {
        let mut conn = connect(people().ok());
        let mut rows = conn.query("SELECT * FROM people").unwrap();
        while rows.advance() {}
        assert_eq!(rows.str(), "");
        assert!(matches!(rows.last_error(), Some(Error::Protocol(_))));
        drop(rows);
        assert!(conn.is_valid());
        conn.exec("DO 1").unwrap();
    }

    #[test]
    fn test_reads_after_decode_error_are_not_null() {
        let script = ScriptBuilder::new()
            .handshake()
            .columns(&["a", "b", "c"])
            .text_row(&["x", "bob", "3"])
            .eof();
        let mut conn = connect(script);
        let mut rows = conn.query("SELECT a, b, c FROM t").unwrap();
        assert!(rows.advance());
        assert_eq!(rows.i32(), 0);
        assert_eq!(rows.null_string(), (String::new(), false));
        assert_eq!(rows.null_str(), ("", false));
        assert!(matches!(rows.last_error(), Some(Error::Decode(e)) if e.column == 0));
    }

    #[test]
    fn test_row_after_last_row_latches_error() {
        let mut conn = connect(people().ok());
        let mut rows = conn.query("SELECT * FROM people").unwrap();
        while rows.advance() {}
        assert!(rows.last_error().is_none());

        let row = rows.row();
        assert_eq!(row.null_bytes("id"), (&[][..], false));
        assert!(matches!(rows.last_error(), Some(Error::Protocol(_))));
        drop(rows);
        assert!(conn.is_valid());
    }

    #[test]
    fn test_unsigned_and_wide_integers() {
        let script = ScriptBuilder::new()
            .handshake()
            .columns(&["a", "b", "c"])
            .text_row(&["18446744073709551615", "-9223372036854775808", "255"])
            .eof();
        let mut conn = connect(script);
        let mut rows = conn.query("SELECT a, b, c").unwrap();
        assert!(rows.advance());
        assert_eq!(rows.u64(), u64::MAX);
        assert_eq!(rows.i64(), i64::MIN);
        assert_eq!(rows.u8(), 255);
        rows.drain().unwrap();
    }
}
