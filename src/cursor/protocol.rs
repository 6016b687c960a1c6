//! Translates cursor operations into backend commands and interprets their results. Owns no cursor
//! state. Every function expects exclusive access to the connection for its whole duration.

use log::debug;

use crate::{Column, Connection, Error, QueryResult, Row, Value};

use super::{ScrollMode, Scrollability};

/// Rows returned by a single `FETCH`, together with the descriptor of the result set.
#[derive(Debug, Default)]
pub struct Batch {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

/// Declares the cursor `name` and returns the description of its result set. No row is consumed.
pub fn declare(
    connection: &mut impl Connection,
    name: &str,
    query: &str,
    params: &[Value],
    scrollable: Scrollability,
    withhold: bool,
) -> Result<Vec<Column>, Error> {
    check_name(name)?;
    let statement = declare_statement(name, query, scrollable, withhold);
    run(connection, name, &statement, params)?;
    // Positioned before the first row, a forward fetch of zero rows yields an empty result set
    // which still carries the full row descriptor.
    let described = run(connection, name, &fetch_statement(name, 0), &[])?;
    Ok(described.columns)
}

/// Fetches up to `num_rows` rows from the current server-side position onwards.
pub fn fetch_forward(
    connection: &mut impl Connection,
    name: &str,
    num_rows: usize,
) -> Result<Batch, Error> {
    check_name(name)?;
    let result = run(connection, name, &fetch_statement(name, num_rows), &[])?;
    Ok(Batch {
        columns: result.columns,
        rows: result.rows,
    })
}

/// Repositions the server-side cursor without fetching.
pub fn move_cursor(
    connection: &mut impl Connection,
    name: &str,
    value: i64,
    mode: ScrollMode,
) -> Result<(), Error> {
    check_name(name)?;
    run(connection, name, &move_statement(name, value, mode), &[])?;
    Ok(())
}

/// Removes the server-side cursor. A cursor which is already gone is not considered an error.
pub fn close(connection: &mut impl Connection, name: &str) -> Result<(), Error> {
    check_name(name)?;
    match run(connection, name, &close_statement(name), &[]) {
        Ok(_) => Ok(()),
        Err(Error::CursorNotFound { message }) => {
            debug!("Cursor '{name}' has already been gone before closing it: {message}");
            Ok(())
        }
        Err(other) => Err(other),
    }
}

/// `true` if a cursor with this name is currently declared on the connection.
pub fn exists(connection: &mut impl Connection, name: &str) -> Result<bool, Error> {
    check_name(name)?;
    let result = run(connection, name, &exists_statement(name), &[])?;
    Ok(!result.rows.is_empty())
}

fn run(
    connection: &mut impl Connection,
    name: &str,
    statement: &str,
    params: &[Value],
) -> Result<QueryResult, Error> {
    debug!("Cursor '{name}' issues: {statement}");
    connection.execute(statement, params)
}

fn check_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        Err(Error::EmptyCursorName)
    } else {
        Ok(())
    }
}

pub fn declare_statement(
    name: &str,
    query: &str,
    scrollable: Scrollability,
    withhold: bool,
) -> String {
    let scroll = match scrollable {
        Scrollability::Scrollable => " SCROLL",
        Scrollability::NonScrollable => " NO SCROLL",
        Scrollability::Unknown => "",
    };
    let hold = if withhold { " WITH HOLD" } else { "" };
    format!("DECLARE {}{scroll} CURSOR{hold} FOR {query}", quote_ident(name))
}

pub fn fetch_statement(name: &str, num_rows: usize) -> String {
    format!("FETCH FORWARD {num_rows} FROM {}", quote_ident(name))
}

pub fn move_statement(name: &str, value: i64, mode: ScrollMode) -> String {
    let mode = match mode {
        ScrollMode::Relative => "RELATIVE",
        ScrollMode::Absolute => "ABSOLUTE",
    };
    format!("MOVE {mode} {value} FROM {}", quote_ident(name))
}

pub fn close_statement(name: &str) -> String {
    format!("CLOSE {}", quote_ident(name))
}

pub fn exists_statement(name: &str) -> String {
    format!(
        "SELECT 1 FROM pg_catalog.pg_cursors WHERE name = {}",
        quote_literal(name)
    )
}

/// Cursor names are case sensitive and may contain any character, so they are always quoted.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
