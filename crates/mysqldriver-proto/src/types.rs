//! Column metadata sent ahead of every text protocol result set.
//!
//! The driver decodes values from their text form, so the type code is only
//! carried through for callers that want to inspect it.

/// Wire type code of a result set column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    VarChar,
    Bit,
    Json,
    NewDecimal,
    Enum,
    Set,
    TinyBlob,
    MediumBlob,
    LongBlob,
    Blob,
    VarString,
    String,
    Geometry,
    /// A code this driver has no name for, kept as sent.
    Other(u8),
}

const CODES: &[(u8, FieldType)] = &[
    (0x00, FieldType::Decimal),
    (0x01, FieldType::Tiny),
    (0x02, FieldType::Short),
    (0x03, FieldType::Long),
    (0x04, FieldType::Float),
    (0x05, FieldType::Double),
    (0x06, FieldType::Null),
    (0x07, FieldType::Timestamp),
    (0x08, FieldType::LongLong),
    (0x09, FieldType::Int24),
    (0x0A, FieldType::Date),
    (0x0B, FieldType::Time),
    (0x0C, FieldType::DateTime),
    (0x0D, FieldType::Year),
    (0x0F, FieldType::VarChar),
    (0x10, FieldType::Bit),
    (0xF5, FieldType::Json),
    (0xF6, FieldType::NewDecimal),
    (0xF7, FieldType::Enum),
    (0xF8, FieldType::Set),
    (0xF9, FieldType::TinyBlob),
    (0xFA, FieldType::MediumBlob),
    (0xFB, FieldType::LongBlob),
    (0xFC, FieldType::Blob),
    (0xFD, FieldType::VarString),
    (0xFE, FieldType::String),
    (0xFF, FieldType::Geometry),
];

impl FieldType {
    #[must_use]
    pub fn from_u8(code: u8) -> Self {
        CODES
            .iter()
            .find(|(c, _)| *c == code)
            .map_or(FieldType::Other(code), |(_, ty)| *ty)
    }

    /// The byte this type is sent as.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            FieldType::Other(code) => code,
            ty => CODES
                .iter()
                .find(|(_, t)| *t == ty)
                .map_or(0xFE, |(code, _)| *code),
        }
    }
}

/// One column definition packet, decoded.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub catalog: String,
    pub schema: String,
    /// Table alias as written in the query.
    pub table: String,
    pub org_table: String,
    /// Column alias; rows are addressed by this name.
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}
