//! Conversions from text-protocol column values.
//!
//! The text protocol sends every value as its decimal or literal string
//! form, so conversions parse bytes straight from the packet buffer.

/// A type that can be read from a text-protocol column value.
///
/// NULL maps to [`Default::default`].
pub trait FromColumn: Sized + Default {
    /// Type name used in decode errors.
    const TYPE_NAME: &'static str;

    /// Parse a non-NULL value, `None` when the bytes are not a valid
    /// representation of `Self`.
    fn from_column(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_from_column_parse {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromColumn for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);

                fn from_column(bytes: &[u8]) -> Option<Self> {
                    std::str::from_utf8(bytes).ok()?.parse().ok()
                }
            }
        )*
    };
}

impl_from_column_parse!(i8, i16, i32, i64, isize, u8, u16, u32, u64, f32, f64);

impl FromColumn for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_column(bytes: &[u8]) -> Option<Self> {
        parse_bool(bytes)
    }
}

impl FromColumn for String {
    const TYPE_NAME: &'static str = "utf-8 string";

    fn from_column(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }
}

/// Parse a boolean the way MySQL clients print them.
///
/// Accepts `1 t T true TRUE True` and `0 f F false FALSE False`.
pub fn parse_bool(bytes: &[u8]) -> Option<bool> {
    match bytes {
        b"1" | b"t" | b"T" | b"true" | b"TRUE" | b"True" => Some(true),
        b"0" | b"f" | b"F" | b"false" | b"FALSE" | b"False" => Some(false),
        _ => None,
    }
}

/// Lossy rendering of a value for error messages.
pub(crate) fn display_value(bytes: &[u8]) -> String {
    const MAX: usize = 64;
    let text = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX)]);
    if bytes.len() > MAX {
        format!("{}...", text)
    } else {
        text.into_owned()
    }
}
