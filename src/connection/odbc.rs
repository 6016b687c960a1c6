use log::debug;
use odbc_api::{
    ColumnDescription, Cursor, ResultSetMetadata, buffers::TextRowSet, parameter::VarCharBox,
};

use crate::{Column, Connection, Error, QueryResult, Row, TransactionStatus, Value};

/// Number of rows transferred from the driver in a single block, while reading a result set.
const ROWS_PER_BLOCK: usize = 256;

/// Upper bound for text values, in case the driver reports unbounded column sizes.
const DEFAULT_MAX_TEXT_SIZE: usize = 4096;

/// Connection collaborator talking to the database through ODBC.
///
/// Autocommit is switched off, so the driver opens transactions implicitly. This is required for
/// cursors not declared `WITH HOLD`, which only live as long as their transaction. Parameters are
/// bound as text and values are returned as [`Value::Text`], leaving conversions to the database
/// and to the caller respectively. Parameter placeholders are `?`.
pub struct OdbcConnection<'env> {
    connection: odbc_api::Connection<'env>,
    max_text_size: usize,
    transaction: TransactionTracker,
}

impl<'env> OdbcConnection<'env> {
    pub fn new(connection: odbc_api::Connection<'env>) -> Result<Self, Error> {
        connection.set_autocommit(false).map_err(classify)?;
        Ok(Self {
            connection,
            max_text_size: DEFAULT_MAX_TEXT_SIZE,
            transaction: TransactionTracker::new(),
        })
    }

    /// Texts longer than this are truncated by the driver.
    pub fn set_max_text_size(&mut self, max_text_size: usize) -> &mut Self {
        self.max_text_size = max_text_size;
        self
    }

    /// Ends the current transaction. Cursors not declared `WITH HOLD` are gone afterwards.
    pub fn commit(&mut self) -> Result<(), Error> {
        self.connection.commit().map_err(classify)?;
        self.transaction.ended();
        Ok(())
    }

    /// Ends the current transaction. All cursors declared within it are gone afterwards.
    pub fn rollback(&mut self) -> Result<(), Error> {
        self.connection.rollback().map_err(classify)?;
        self.transaction.ended();
        Ok(())
    }

    pub fn into_inner(self) -> odbc_api::Connection<'env> {
        self.connection
    }
}

impl Connection for OdbcConnection<'_> {
    fn execute(&mut self, statement: &str, params: &[Value]) -> Result<QueryResult, Error> {
        let result = execute_statement(&self.connection, statement, params, self.max_text_size);
        self.transaction.executed(result.is_ok());
        result
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction.status()
    }
}

fn execute_statement(
    connection: &odbc_api::Connection<'_>,
    statement: &str,
    params: &[Value],
    max_text_size: usize,
) -> Result<QueryResult, Error> {
    let params: Vec<VarCharBox> = params.iter().map(to_parameter).collect();
    match connection
        .execute(statement, &params[..], None)
        .map_err(classify)?
    {
        Some(cursor) => read_result_set(cursor, max_text_size),
        None => Ok(QueryResult::default()),
    }
}

/// Follows the transaction state of a connection with autocommit switched off. The driver opens a
/// transaction implicitly with the first statement, and only `commit` or `rollback` end it.
#[derive(Debug, Clone, Copy)]
struct TransactionTracker {
    status: TransactionStatus,
}

impl TransactionTracker {
    fn new() -> Self {
        Self {
            status: TransactionStatus::Idle,
        }
    }

    fn status(&self) -> TransactionStatus {
        self.status
    }

    fn executed(&mut self, succeeded: bool) {
        self.status = if succeeded {
            TransactionStatus::InTransaction
        } else {
            TransactionStatus::InError
        };
    }

    fn ended(&mut self) {
        self.status = TransactionStatus::Idle;
    }
}

fn to_parameter(value: &Value) -> VarCharBox {
    match value {
        Value::Null => VarCharBox::null(),
        other => VarCharBox::from_string(other.to_string()),
    }
}

fn read_result_set(mut cursor: impl Cursor, max_text_size: usize) -> Result<QueryResult, Error> {
    let columns = describe(&mut cursor)?;
    let mut rows = Vec::new();
    if !columns.is_empty() {
        let buffer = TextRowSet::for_cursor(ROWS_PER_BLOCK, &mut cursor, Some(max_text_size))
            .map_err(classify)?;
        let mut block_cursor = cursor.bind_buffer(buffer).map_err(classify)?;
        while let Some(batch) = block_cursor.fetch().map_err(classify)? {
            for row_index in 0..batch.num_rows() {
                let row = (0..batch.num_cols())
                    .map(|col_index| match batch.at_as_str(col_index, row_index) {
                        Ok(Some(text)) => Ok(Value::Text(text.to_owned())),
                        Ok(None) => Ok(Value::Null),
                        Err(utf8_error) => Err(Error::Operational {
                            message: format!("Driver returned invalid UTF-8: {utf8_error}"),
                        }),
                    })
                    .collect::<Result<Row, Error>>()?;
                rows.push(row);
            }
        }
    }
    let row_count = Some(rows.len() as u64);
    Ok(QueryResult {
        columns,
        rows,
        row_count,
    })
}

fn describe(metadata: &mut impl ResultSetMetadata) -> Result<Vec<Column>, Error> {
    let num_cols = metadata.num_result_cols().map_err(classify)?;
    let num_cols = column_count(num_cols)?;
    let mut columns = Vec::with_capacity(num_cols.into());
    for index in 1..=num_cols {
        let mut column_description = ColumnDescription::default();
        metadata
            .describe_col(index, &mut column_description)
            .map_err(classify)?;
        let name = column_description
            .name_to_string()
            .map_err(|source| Error::Operational {
                message: format!("Column name is not valid text: {source}"),
            })?;
        debug!(
            "ODBC driver reported for column {index}. Relational type: {:?}; Name: '{name}';",
            column_description.data_type
        );
        let type_code = i64::from(column_description.data_type.data_type().0);
        columns.push(Column { name, type_code });
    }
    Ok(columns)
}

fn column_count(num_cols: i16) -> Result<u16, Error> {
    u16::try_from(num_cols).map_err(|_| Error::Operational {
        message: format!("Driver reported an invalid number of result columns: {num_cols}"),
    })
}

/// Maps driver errors onto the failure classes of this crate, using the SQLSTATE reported in the
/// diagnostics.
fn classify(error: odbc_api::Error) -> Error {
    let state = match &error {
        odbc_api::Error::Diagnostics { record, .. } => Some(record.state.0),
        _ => None,
    };
    classify_sqlstate(state.as_ref().map(|state| &state[..]), error.to_string())
}

fn classify_sqlstate(state: Option<&[u8]>, message: String) -> Error {
    match state {
        Some(b"34000") => Error::CursorNotFound { message },
        Some(b"57014" | b"HYT00" | b"HYT01" | b"HY008") => Error::Interrupted { message },
        Some([b'4', b'2', ..] | [b'2', b'6', ..] | [b'3', b'4', ..] | [b'3', b'F', ..]) => {
            Error::Programming { message }
        }
        _ => Error::Operational { message },
    }
}
