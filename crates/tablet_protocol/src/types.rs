//! Query-service wire types and fixed numeric contracts.

use std::collections::BTreeMap;

use tablet_common::types::{SessionId, TransactionId};

use crate::error::ProtocolError;

// ── Bind variable type tags ──────────────────────────────────────────────

pub const TAG_NULL: u8 = 0;
pub const TAG_BYTES: u8 = 1;
pub const TAG_INT: u8 = 2;
pub const TAG_UINT: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_BYTES_LIST: u8 = 5;
pub const TAG_INT_LIST: u8 = 6;
pub const TAG_UINT_LIST: u8 = 7;
pub const TAG_FLOAT_LIST: u8 = 8;

// ── Column flags ─────────────────────────────────────────────────────────

pub const FLAG_NOT_NULL: u32 = 1;
pub const FLAG_PRI_KEY: u32 = 1 << 1;
pub const FLAG_UNIQUE_KEY: u32 = 1 << 2;
pub const FLAG_MULTIPLE_KEY: u32 = 1 << 3;
pub const FLAG_BLOB: u32 = 1 << 4;
pub const FLAG_UNSIGNED: u32 = 1 << 5;
pub const FLAG_ZEROFILL: u32 = 1 << 6;
pub const FLAG_BINARY: u32 = 1 << 7;
pub const FLAG_ENUM: u32 = 1 << 8;
pub const FLAG_AUTO_INCREMENT: u32 = 1 << 9;
pub const FLAG_TIMESTAMP: u32 = 1 << 10;
pub const FLAG_SET: u32 = 1 << 11;
pub const FLAG_NO_DEFAULT_VALUE: u32 = 1 << 12;
pub const FLAG_ON_UPDATE_NOW: u32 = 1 << 13;
pub const FLAG_NUM: u32 = 1 << 15;

/// SQL column type codes. The discriminants are a compatibility contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    VarChar = 15,
    Bit = 16,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl FieldType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Int24
                | FieldType::Year
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }
}

impl TryFrom<u8> for FieldType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        let t = match code {
            0 => FieldType::Decimal,
            1 => FieldType::Tiny,
            2 => FieldType::Short,
            3 => FieldType::Long,
            4 => FieldType::Float,
            5 => FieldType::Double,
            6 => FieldType::Null,
            7 => FieldType::Timestamp,
            8 => FieldType::LongLong,
            9 => FieldType::Int24,
            10 => FieldType::Date,
            11 => FieldType::Time,
            12 => FieldType::DateTime,
            13 => FieldType::Year,
            14 => FieldType::NewDate,
            15 => FieldType::VarChar,
            16 => FieldType::Bit,
            246 => FieldType::NewDecimal,
            247 => FieldType::Enum,
            248 => FieldType::Set,
            249 => FieldType::TinyBlob,
            250 => FieldType::MediumBlob,
            251 => FieldType::LongBlob,
            252 => FieldType::Blob,
            253 => FieldType::VarString,
            254 => FieldType::String,
            255 => FieldType::Geometry,
            other => return Err(ProtocolError::UnknownFieldType(other)),
        };
        Ok(t)
    }
}

// ── Values ───────────────────────────────────────────────────────────────

/// A native SQL value as handed to (and returned by) the storage engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bytes(Vec<u8>),
    Int(i64),
    Uint(u64),
    Float(f64),
    BytesList(Vec<Vec<u8>>),
    IntList(Vec<i64>),
    UintList(Vec<u64>),
    FloatList(Vec<f64>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bytes(_) => "BYTES",
            Value::Int(_) => "INT",
            Value::Uint(_) => "UINT",
            Value::Float(_) => "FLOAT",
            Value::BytesList(_) => "BYTES_LIST",
            Value::IntList(_) => "INT_LIST",
            Value::UintList(_) => "UINT_LIST",
            Value::FloatList(_) => "FLOAT_LIST",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Value::BytesList(_) | Value::IntList(_) | Value::UintList(_) | Value::FloatList(_)
        )
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntList(v)
    }
}

/// A bind variable as it travels on the wire: one variant per type tag,
/// so a payload that contradicts its tag cannot be constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum BindVariable {
    Null,
    Bytes(Vec<u8>),
    Int(i64),
    Uint(u64),
    Float(f64),
    BytesList(Vec<Vec<u8>>),
    IntList(Vec<i64>),
    UintList(Vec<u64>),
    FloatList(Vec<f64>),
}

impl BindVariable {
    /// Wire type tag.
    pub fn tag(&self) -> u8 {
        match self {
            BindVariable::Null => TAG_NULL,
            BindVariable::Bytes(_) => TAG_BYTES,
            BindVariable::Int(_) => TAG_INT,
            BindVariable::Uint(_) => TAG_UINT,
            BindVariable::Float(_) => TAG_FLOAT,
            BindVariable::BytesList(_) => TAG_BYTES_LIST,
            BindVariable::IntList(_) => TAG_INT_LIST,
            BindVariable::UintList(_) => TAG_UINT_LIST,
            BindVariable::FloatList(_) => TAG_FLOAT_LIST,
        }
    }
}

// ── Queries ──────────────────────────────────────────────────────────────

/// Named bind variables, ordered by name for a deterministic wire form.
pub type BindVariables = BTreeMap<String, BindVariable>;

/// A SQL statement plus its bind variables. Built by the client.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundQuery {
    pub sql: Vec<u8>,
    pub bind_variables: BindVariables,
}

impl BoundQuery {
    pub fn new(sql: impl Into<Vec<u8>>) -> Self {
        Self {
            sql: sql.into(),
            bind_variables: BindVariables::new(),
        }
    }

    pub fn with_bind(mut self, name: impl Into<String>, value: BindVariable) -> Self {
        self.bind_variables.insert(name.into(), value);
        self
    }

    /// SQL text for logging; invalid UTF-8 is replaced, never rejected here.
    pub fn sql_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.sql)
    }
}

/// Session (and optional transaction) presented with every execution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRef {
    pub session_id: SessionId,
    pub transaction_id: Option<TransactionId>,
}

impl SessionRef {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            transaction_id: None,
        }
    }

    pub fn in_transaction(session_id: SessionId, transaction_id: TransactionId) -> Self {
        Self {
            session_id,
            transaction_id: Some(transaction_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionInfo {
    pub transaction_id: TransactionId,
}

// ── Results ──────────────────────────────────────────────────────────────

/// Column metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub flags: u32,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            flags: 0,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// One result cell. `None` is SQL NULL, distinct from an empty value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cell(pub Option<Vec<u8>>);

impl Cell {
    pub fn null() -> Self {
        Cell(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell(Some(s.as_bytes().to_vec()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    pub cells: Vec<Cell>,
}

/// Result of one statement, or one message of a streamed result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    pub fields: Vec<Field>,
    pub rows_affected: u64,
    pub insert_id: u64,
    pub rows: Vec<Row>,
}

// ── Split query ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SplitQueryRequest {
    pub query: BoundQuery,
    pub split_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySplit {
    pub query: BoundQuery,
    pub row_count: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SplitQueryResult {
    pub splits: Vec<QuerySplit>,
}
