use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{Error, NamedCursor};

#[cfg(feature = "odbc")]
mod odbc;

#[cfg(feature = "odbc")]
pub use self::odbc::OdbcConnection;

/// A single value within a row, or a parameter bound to a statement. Decoding values into richer
/// types is left to the backend adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Text(value) => write!(f, "{value}"),
            Value::Bytes(value) => {
                write!(f, "\\x")?;
                for byte in value {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// One row of a result set, one value per column.
pub type Row = Vec<Value>;

/// Metadata of a single column in a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Backend specific type identifier. An OID for PostgreSQL, the SQL data type for ODBC.
    pub type_code: i64,
}

impl Column {
    pub fn new(name: impl Into<String>, type_code: i64) -> Self {
        Self {
            name: name.into(),
            type_code,
        }
    }
}

/// Everything the backend answered to a single statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Empty for statements which do not produce a result set, like `DECLARE` or `CLOSE`.
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    /// Number of rows affected or returned, if reported by the backend.
    pub row_count: Option<u64>,
}

/// Transaction state of a connection, as far as the backend adapter knows about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not within a transaction. Cursors not declared `WITH HOLD` are gone.
    Idle,
    /// A command is currently in progress.
    Active,
    /// Within a valid transaction block.
    InTransaction,
    /// Within a failed transaction block. Commands are refused until the transaction ends.
    InError,
    /// The adapter can not tell.
    Unknown,
}

/// The connection collaborator. Executes one statement at a time against the backend and maps
/// backend failures onto the variants of [`crate::Error`].
///
/// Implementations are expected to open transactions implicitly, as declaring cursors which are
/// not `WITH HOLD` requires one.
pub trait Connection {
    /// Executes `statement` with `params` bound to it and waits for the complete answer.
    fn execute(&mut self, statement: &str, params: &[Value]) -> Result<QueryResult, Error>;

    fn transaction_status(&self) -> TransactionStatus {
        TransactionStatus::Unknown
    }
}

/// A connection shared between all the cursors operating on it. Holding the lock is the token
/// which allows issuing commands, so at most one command is in flight at any time.
pub struct SharedConnection<C> {
    inner: Arc<Mutex<C>>,
}

impl<C> Clone for SharedConnection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> SharedConnection<C>
where
    C: Connection,
{
    pub fn new(connection: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(connection)),
        }
    }

    /// A new handle for the server-side cursor `name`, using default settings. The cursor is not
    /// declared until [`NamedCursor::execute`] is called, or adopted if another handle already
    /// declared it.
    pub fn cursor(&self, name: impl Into<String>) -> NamedCursor<C> {
        NamedCursor::new(self.clone(), name.into(), crate::cursor::DEFAULT_ITERSIZE, false)
    }

    /// Executes a statement which is not related to any cursor handle.
    pub fn execute(&self, statement: &str, params: &[Value]) -> Result<QueryResult, Error> {
        self.lock()?.execute(statement, params)
    }

    /// Acquire exclusive access to the connection. Blocks until any command in progress finished.
    pub fn lock(&self) -> Result<MutexGuard<'_, C>, Error> {
        self.inner.lock().map_err(|_| Error::ConnectionPoisoned)
    }
}
