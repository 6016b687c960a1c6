use thiserror::Error;

/// The three kinds of failure a caller has to tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The operation has been attempted in a state which does not allow it. E.g. scrolling a cursor
    /// which has never been declared, or declaring a malformed query.
    Programming,
    /// A legally issued command has been refused by the backend, for reasons the client could not
    /// know about. E.g. a backward move on a cursor declared `NO SCROLL`.
    Operational,
    /// An argument supplied by the caller is outside its domain. These errors are raised before any
    /// command is sent to the backend.
    Value,
}

/// A variation of things which can go wrong operating a named cursor.
#[derive(Error, Debug)]
pub enum Error {
    /// Named cursors require a name. Raised before sending anything to the backend.
    #[error("The name of a server-side cursor must not be empty.")]
    EmptyCursorName,
    /// The cursor has not been declared by this handle, and it has not yet adopted a cursor
    /// declared elsewhere through a successful fetch.
    #[error("The cursor '{name}' has not been declared yet. Call `execute` first.")]
    NotDeclared { name: String },
    /// Any operation other than `close` on a closed cursor.
    #[error("The cursor '{name}' is closed.")]
    CursorClosed { name: String },
    /// The backend refused a statement as malformed or as conflicting with a cursor which already
    /// exists.
    #[error("The backend rejected the statement:\n{message}")]
    Programming { message: String },
    /// The backend refused a well formed command due to state the client can not know about.
    #[error("The backend refused to execute the command:\n{message}")]
    Operational { message: String },
    /// The server-side cursor does not exist (anymore). Most likely the transaction it has been
    /// declared in ended.
    #[error("The server-side cursor does not exist:\n{message}")]
    CursorNotFound { message: String },
    /// A command has been aborted due to a timeout or a cancellation request. The position of the
    /// server-side cursor is unknown afterwards.
    #[error("The command has been interrupted:\n{message}")]
    Interrupted { message: String },
    /// Another thread panicked while holding the connection.
    #[error("The connection is unusable, since a thread panicked while holding it.")]
    ConnectionPoisoned,
    #[error("Unrecognized scroll mode '{mode}'. Expected either 'relative' or 'absolute'.")]
    InvalidScrollMode { mode: String },
    #[error("Scrolling by {value} rows moves the cursor out of range.")]
    ScrollOutOfRange { value: i64 },
    #[error("The number of rows fetched per roundtrip must be at least one.")]
    InvalidItersize,
}

impl Error {
    /// The class of this failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::EmptyCursorName
            | Error::NotDeclared { .. }
            | Error::CursorClosed { .. }
            | Error::Programming { .. } => ErrorClass::Programming,
            Error::Operational { .. }
            | Error::CursorNotFound { .. }
            | Error::Interrupted { .. }
            | Error::ConnectionPoisoned => ErrorClass::Operational,
            Error::InvalidScrollMode { .. }
            | Error::ScrollOutOfRange { .. }
            | Error::InvalidItersize => ErrorClass::Value,
        }
    }
}
