//! By-name access to the current row.

use std::fmt::Write as _;

use crate::convert::{FromColumn, display_value};
use crate::rows::Rows;

/// Snapshot of the current row of a [`Rows`] cursor.
///
/// ```rust,ignore
/// let mut rows = conn.query("SELECT id, name, age FROM people")?;
/// while rows.advance() {
///     let id = rows.i64();       // read the first column
///     let mut row = rows.row();  // read the rest
///     let age = row.i32("age");
///     println!("{} {} {}", id, row.str("name"), age);
/// }
/// ```
///
/// Looking up a column that is not part of the result set is a programming
/// error and panics, listing the available columns. Conversion errors are
/// latched on the cursor like sequential reads.
#[derive(Debug)]
pub struct Row<'r, 'c> {
    rows: &'r mut Rows<'c>,
}

macro_rules! named_accessors {
    ($($null:ident, $plain:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Column `name` as `", stringify!($ty), "` with its NULL indicator.")]
            pub fn $null(&mut self, name: &str) -> ($ty, bool) {
                self.null_value(name)
            }

            #[doc = concat!("Column `name` as `", stringify!($ty), "`; NULL reads as the zero value.")]
            pub fn $plain(&mut self, name: &str) -> $ty {
                self.$null(name).0
            }
        )*
    };
}

impl<'r, 'c> Row<'r, 'c> {
    pub(crate) fn new(rows: &'r mut Rows<'c>) -> Self {
        Self { rows }
    }

    /// Position of column `name` in the result set.
    pub fn get_index(&self, name: &str) -> Option<usize> {
        self.rows.names.as_ref()?.get(name).copied()
    }

    /// Column `name` as raw bytes with its NULL indicator.
    ///
    /// A snapshot taken without a current row has no values; its reads
    /// return an empty slice with the flag unset.
    ///
    /// # Panics
    ///
    /// Panics if the result set has no column called `name`.
    pub fn null_bytes(&self, name: &str) -> (&[u8], bool) {
        let index = self.index(name);
        match self.rows.values.get(index) {
            Some((range, null)) => (self.rows.value_bytes(range.clone()), *null),
            None => (&[], false),
        }
    }

    /// Column `name` as raw bytes; NULL reads as an empty slice.
    pub fn bytes(&self, name: &str) -> &[u8] {
        self.null_bytes(name).0
    }

    /// Column `name` as a string borrowed from the row buffer.
    pub fn null_str(&mut self, name: &str) -> (&str, bool) {
        let index = self.index(name);
        match self.rows.values.get(index).cloned() {
            Some((range, null)) => self.rows.decode_str(index, range, null),
            None => ("", false),
        }
    }

    /// Column `name` as a borrowed string; NULL reads as `""`.
    pub fn str(&mut self, name: &str) -> &str {
        self.null_str(name).0
    }

    named_accessors! {
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

    fn null_value<T: FromColumn>(&mut self, name: &str) -> (T, bool) {
        let index = self.index(name);
        let Some((range, null)) = self.rows.values.get(index).cloned() else {
            return (T::default(), false);
        };
        if null {
            return (T::default(), true);
        }
        let bytes = self.rows.value_bytes(range);
        match T::from_column(bytes) {
            Some(value) => (value, false),
            None => {
                let value = display_value(bytes);
                self.rows.latch_decode(index, T::TYPE_NAME, value);
                (T::default(), false)
            }
        }
    }

    fn index(&self, name: &str) -> usize {
        match self.get_index(name) {
            Some(index) => index,
            None => panic!("{}", missing_column_message(name, &*self.rows)),
        }
    }
}

fn missing_column_message(name: &str, rows: &Rows<'_>) -> String {
    let mut msg = format!("column \"{}\" doesn't exist.", name);
    if !rows.columns().is_empty() {
        msg.push_str(" Available columns are: ");
        for (i, column) in rows.columns().iter().enumerate() {
            if i > 0 {
                msg.push_str(", ");
            }
            let _ = write!(msg, "\"{}\"", column.name);
        }
    }
    msg
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::conn::Conn;
    use mysqldriver_proto::Error;
    use mysqldriver_proto::mock::ScriptBuilder;

    fn connect(script: ScriptBuilder) -> Conn {
        Conn::from_transport(Box::new(script.transport()), &Config::new()).unwrap()
    }

    fn people() -> ScriptBuilder {
        ScriptBuilder::new()
            .handshake()
            .columns(&["id", "name", "age", "nickname"])
            .row(&[Some("7"), Some("bob"), Some("41"), None])
            .eof()
            .ok()
    }

    #[test]
    fn test_row_by_name() {
        let mut conn = connect(people());
        let mut rows = conn.query("SELECT id, name, age, nickname FROM people").unwrap();
        assert!(rows.advance());
        let mut row = rows.row();
        assert_eq!(row.i64("id"), 7);
        assert_eq!(row.str("name"), "bob");
        assert_eq!(row.null_u32("age"), (41, false));
        assert_eq!(row.null_string("nickname"), (String::new(), true));
        assert_eq!(row.bytes("nickname"), b"");
        assert_eq!(row.get_index("age"), Some(2));
        assert_eq!(row.get_index("missing"), None);
        rows.drain().unwrap();
        assert!(conn.is_valid());
    }

    #[test]
    fn test_row_after_partial_read_matches_sequential_values() {
        let mut conn = connect(people());
        let mut rows = conn.query("SELECT id, name, age, nickname FROM people").unwrap();
        assert!(rows.advance());
        let id = rows.bytes().to_vec();
        let row = rows.row();
        assert_eq!(row.bytes("id"), id.as_slice());
        assert_eq!(row.null_bytes("name"), (&b"bob"[..], false));
        assert_eq!(row.null_bytes("nickname"), (&[][..], true));

        assert!(!rows.advance());
        rows.drain().unwrap();
        conn.exec("DO 1").unwrap();
    }

    #[test]
    fn test_row_decode_error_latches_on_cursor() {
        let mut conn = connect(people());
        let mut rows = conn.query("SELECT id, name, age, nickname FROM people").unwrap();
        assert!(rows.advance());
        let mut row = rows.row();
        assert_eq!(row.null_i32("name"), (0, false));
        match rows.last_error() {
            Some(Error::Decode(e)) => {
                assert_eq!(e.column, 1);
                assert_eq!(e.value, "bob");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_row_after_decode_error_reports_no_null() {
        let mut conn = connect(people());
        let mut rows = conn.query("SELECT id, name, age, nickname FROM people").unwrap();
        assert!(rows.advance());
        assert!(!rows.bool());
        let mut row = rows.row();
        assert_eq!(row.null_bytes("name"), (&[][..], false));
        assert_eq!(row.null_str("name"), ("", false));
        assert_eq!(row.null_i64("age"), (0, false));
        assert!(matches!(rows.last_error(), Some(Error::Decode(e)) if e.column == 0));
    }

    #[test]
    #[should_panic(
        expected = "column \"email\" doesn't exist. Available columns are: \"id\", \"name\", \"age\", \"nickname\""
    )]
    fn test_missing_column_panics_with_available_columns() {
        let mut conn = connect(people());
        let mut rows = conn.query("SELECT id, name, age, nickname FROM people").unwrap();
        assert!(rows.advance());
        let row = rows.row();
        row.bytes("email");
    }
}
