//! Client side handles for named, server-side database cursors.
//!
//! A [`NamedCursor`] declares a cursor on the server, fetches its rows lazily in batches, keeps
//! track of how many rows have been handed to the caller, can reposition the cursor and removes it
//! from the server again. The database itself is reached through an implementation of
//! [`Connection`], shared between all cursors on the same connection using a
//! [`SharedConnection`]. Enable the `odbc` feature for an implementation based on `odbc-api`.
//!
//! The commands issued are:
//!
//! ```text
//! DECLARE "<name>" [NO SCROLL | SCROLL] CURSOR [WITH HOLD] FOR <query>
//! FETCH FORWARD <n> FROM "<name>"
//! MOVE RELATIVE <n> FROM "<name>"
//! MOVE ABSOLUTE <n> FROM "<name>"
//! CLOSE "<name>"
//! ```
mod connection;
mod cursor;
mod error;

pub use self::{
    connection::{Column, Connection, QueryResult, Row, SharedConnection, TransactionStatus, Value},
    cursor::{
        CursorState, DEFAULT_ITERSIZE, NamedCursor, NamedCursorBuilder, Rows, ScrollMode,
        Scrollability,
    },
    error::{Error, ErrorClass},
};

#[cfg(feature = "odbc")]
pub use self::connection::OdbcConnection;

// Rexport odbc_api to make it easier for downstream crates to depend on it without version
// mismatches.
#[cfg(feature = "odbc")]
pub use odbc_api;
