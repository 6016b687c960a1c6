use std::str::FromStr;

use log::{debug, warn};

use crate::{Column, Connection, Error, Row, SharedConnection, TransactionStatus, Value};

use self::{
    fetch_buffer::{FetchBuffer, Step},
    position::Position,
};

pub use self::position::CursorState;

mod fetch_buffer;
mod lifecycle;
mod position;
mod protocol;

/// Number of rows fetched per roundtrip, unless specified otherwise.
pub const DEFAULT_ITERSIZE: usize = 100;

/// Whether a cursor has been declared to support backward movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scrollability {
    /// Declared with `SCROLL`.
    Scrollable,
    /// Declared with `NO SCROLL`.
    NonScrollable,
    /// Left to the backend default. Also the case for cursors adopted from other handles, since we
    /// can not know how they have been declared. The backend decides whether a backward move is
    /// legal.
    #[default]
    Unknown,
}

/// How the value passed to [`NamedCursor::scroll`] is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollMode {
    /// Move by this many rows from the current position.
    #[default]
    Relative,
    /// Move to this row of the result set.
    Absolute,
}

impl FromStr for ScrollMode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "relative" => Ok(ScrollMode::Relative),
            "absolute" => Ok(ScrollMode::Absolute),
            other => Err(Error::InvalidScrollMode {
                mode: other.to_owned(),
            }),
        }
    }
}

/// Client side handle of a cursor declared on the server. Rows are fetched lazily in batches of
/// [`Self::itersize`] rows and handed to the caller one by one or in bulk.
///
/// The handle starts out undeclared. [`Self::execute`] declares the cursor on the server. A handle
/// may also adopt a cursor which already has been declared under its name, e.g. by a plain `DECLARE`
/// statement, simply by fetching from it.
///
/// Cursors should be closed explicitly, or used within [`Self::scoped`]. Dropping an open cursor
/// only logs a warning. It does not release the server-side resource.
///
/// # Example
///
/// ```no_run
/// use named_cursor::{Connection, Error, Scrollability, SharedConnection};
///
/// fn print_large_table(connection: &SharedConnection<impl Connection>) -> Result<(), Error> {
///     let mut cursor = connection.cursor("large_table");
///     cursor.set_itersize(1000)?;
///     cursor.scoped(|cursor| {
///         cursor.execute("SELECT * FROM large_table", &[], Scrollability::Unknown)?;
///         for row in cursor {
///             println!("{:?}", row?);
///         }
///         Ok(())
///     })
/// }
/// ```
pub struct NamedCursor<C: Connection> {
    connection: SharedConnection<C>,
    name: String,
    itersize: usize,
    withhold: bool,
    /// `None` until the query of the cursor is known.
    description: Option<Vec<Column>>,
    position: Position,
    buffer: FetchBuffer,
}

impl<C> NamedCursor<C>
where
    C: Connection,
{
    pub(crate) fn new(
        connection: SharedConnection<C>,
        name: String,
        itersize: usize,
        withhold: bool,
    ) -> Self {
        Self {
            connection,
            name,
            itersize,
            withhold,
            description: None,
            position: Position::new(),
            buffer: FetchBuffer::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of rows requested from the backend in a single roundtrip.
    pub fn itersize(&self) -> usize {
        self.itersize
    }

    /// Takes effect with the next roundtrip. Rows already buffered are not affected.
    pub fn set_itersize(&mut self, itersize: usize) -> Result<(), Error> {
        if itersize == 0 {
            return Err(Error::InvalidItersize);
        }
        self.itersize = itersize;
        Ok(())
    }

    /// `true` if the cursor is declared `WITH HOLD` and survives the end of its transaction.
    pub fn withhold(&self) -> bool {
        self.withhold
    }

    /// Columns of the result set. Available right after [`Self::execute`], before any row has been
    /// fetched. For adopted cursors only after the first fetch.
    pub fn description(&self) -> Option<&[Column]> {
        self.description.as_deref()
    }

    /// Number of rows handed to the caller since the cursor has been declared or adopted. `None`
    /// before that.
    pub fn rownumber(&self) -> Option<usize> {
        self.position.row_number()
    }

    pub fn state(&self) -> CursorState {
        self.position.state()
    }

    pub fn closed(&self) -> bool {
        self.position.state() == CursorState::Closed
    }

    pub fn scrollable(&self) -> Scrollability {
        self.position.scrollable()
    }

    pub fn connection(&self) -> &SharedConnection<C> {
        &self.connection
    }

    /// Declares the cursor on the server for `query`. An open cursor of this handle is closed first
    /// and its unconsumed rows are dropped. May be called again after the cursor has been closed.
    ///
    /// `scrollable` adds a `SCROLL` or `NO SCROLL` modifier to the declaration. With
    /// [`Scrollability::Unknown`] the backend default applies.
    pub fn execute(
        &mut self,
        query: &str,
        params: &[Value],
        scrollable: Scrollability,
    ) -> Result<(), Error> {
        if self.position.state() == CursorState::Open {
            self.close_declared()?;
        }
        self.buffer.discard();
        self.description = None;
        let withhold = self.withhold;
        let result = self.with_connection(|connection, name| {
            protocol::declare(connection, name, query, params, scrollable, withhold)
        });
        let columns = self.track_failure(result)?;
        self.description = Some(columns);
        self.position.declared(scrollable);
        Ok(())
    }

    /// Next row of the result set, or `None` if all rows have been consumed.
    pub fn fetch_one(&mut self) -> Result<Option<Row>, Error> {
        self.ensure_not_closed()?;
        loop {
            match self.buffer.step(self.itersize) {
                Step::Row(row) => {
                    self.position.advance(1);
                    return Ok(Some(row));
                }
                Step::NeedsBatch(batch_size) => self.fetch_batch(batch_size)?,
                Step::Exhausted => return Ok(None),
            }
        }
    }

    /// Up to `size` rows. Fewer if the result set runs out. Rows are requested from the backend in
    /// batches of [`Self::itersize`], independent of `size`. Pass [`Self::itersize`] to fetch a
    /// batch worth of rows.
    pub fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>, Error> {
        self.ensure_not_closed()?;
        let mut rows = self.buffer.take(size);
        while rows.len() < size && !self.buffer.is_exhausted() {
            if let Err(error) = self.fetch_batch(self.itersize) {
                self.restore(rows);
                return Err(error);
            }
            rows.extend(self.buffer.take(size - rows.len()));
        }
        self.position.advance(rows.len());
        Ok(rows)
    }

    /// All remaining rows. Empty if the result set has already been consumed.
    pub fn fetch_all(&mut self) -> Result<Vec<Row>, Error> {
        self.ensure_not_closed()?;
        let mut rows = self.buffer.take_all();
        while !self.buffer.is_exhausted() {
            if let Err(error) = self.fetch_batch(self.itersize) {
                self.restore(rows);
                return Err(error);
            }
            rows.extend(self.buffer.take_all());
        }
        self.position.advance(rows.len());
        Ok(rows)
    }

    /// Iterates over the remaining rows. [`Rows::rownumber`] stays accurate during iteration.
    pub fn rows(&mut self) -> Rows<'_, C> {
        Rows {
            cursor: self,
            finished: false,
        }
    }

    /// Repositions the cursor. The next fetch starts from the new position.
    ///
    /// A relative forward scroll which does not reach past the buffered rows only skips them,
    /// without issuing a command. In all other cases the buffered rows are discarded and the
    /// server-side cursor is moved.
    ///
    /// Whether moving backwards is legal is decided by the backend. Cursors declared with
    /// [`Scrollability::NonScrollable`] fail with an operational error in this case.
    pub fn scroll(&mut self, value: i64, mode: ScrollMode) -> Result<(), Error> {
        self.ensure_open()?;
        let value = match mode {
            ScrollMode::Relative => {
                if let Ok(forward) = usize::try_from(value) {
                    if self.buffer.skip(forward) {
                        debug!("Cursor '{}' skipped {forward} buffered rows.", self.name);
                        return Ok(());
                    }
                }
                // The server already moved past the rows we buffered, but the caller expects to
                // move relative to the last row handed out.
                i64::try_from(self.buffer.server_lead())
                    .ok()
                    .and_then(|lead| value.checked_sub(lead))
                    .ok_or(Error::ScrollOutOfRange { value })?
            }
            ScrollMode::Absolute => value,
        };
        self.buffer.discard();
        let result =
            self.with_connection(|connection, name| protocol::move_cursor(connection, name, value, mode));
        self.track_failure(result)
    }

    /// Same as [`Self::scroll`], with the mode given as either `"relative"` or `"absolute"`.
    pub fn scroll_with_mode(&mut self, value: i64, mode: &str) -> Result<(), Error> {
        self.ensure_open()?;
        let mode = mode.parse()?;
        self.scroll(value, mode)
    }

    /// Removes the cursor from the server. Closing a closed cursor does nothing.
    ///
    /// Closing a handle which neither declared nor adopted a cursor still removes a server-side
    /// cursor of the same name, if there is one.
    pub fn close(&mut self) -> Result<(), Error> {
        match self.position.state() {
            CursorState::Closed => Ok(()),
            CursorState::Open => self.close_declared(),
            CursorState::Undeclared => self.close_undeclared(),
        }
    }

    /// Runs `f` with this cursor and closes it afterwards, no matter whether `f` succeeded.
    pub fn scoped<T, E>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<Error>,
    {
        let result = f(self);
        let closed = self.close();
        match result {
            Ok(value) => {
                closed?;
                Ok(value)
            }
            Err(error) => {
                if let Err(close_error) = closed {
                    debug!("Closing cursor '{}' failed after error: {close_error}", self.name);
                }
                Err(error)
            }
        }
    }

    fn fetch_batch(&mut self, batch_size: usize) -> Result<(), Error> {
        let result = self.with_connection(|connection, name| {
            protocol::fetch_forward(connection, name, batch_size)
        });
        let batch = self.track_failure(result)?;
        if self.position.state() == CursorState::Undeclared {
            debug!("Adopting server-side cursor '{}'", self.name);
            self.position.adopted();
        }
        if !batch.columns.is_empty() {
            self.description = Some(batch.columns);
        }
        self.buffer.refill(batch.rows, batch_size);
        Ok(())
    }

    fn close_declared(&mut self) -> Result<(), Error> {
        self.buffer.discard();
        self.position.closed();
        let withhold = self.withhold;
        let result = self.with_connection(|connection, name| {
            if !may_hold_cursor(connection.transaction_status(), withhold) {
                debug!("Not closing cursor '{name}', since it is gone with its transaction.");
                return Ok(());
            }
            protocol::close(connection, name)
        });
        self.track_failure(result)
    }

    fn close_undeclared(&mut self) -> Result<(), Error> {
        self.position.closed();
        if self.name.is_empty() {
            return Ok(());
        }
        let withhold = self.withhold;
        let result = self.with_connection(|connection, name| {
            if !may_hold_cursor(connection.transaction_status(), withhold) {
                return Ok(());
            }
            if protocol::exists(connection, name)? {
                protocol::close(connection, name)?;
            }
            Ok(())
        });
        self.track_failure(result)
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut C, &str) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut connection = self.connection.lock()?;
        f(&mut *connection, &self.name)
    }

    /// After an interruption the server-side position is unknown and the connection may still
    /// carry an unread answer. After the cursor vanished there is nothing left to operate on. In
    /// both cases only `close` remains meaningful.
    fn track_failure<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        match &result {
            Err(Error::Interrupted { .. }) => {
                warn!(
                    "Command on cursor '{}' has been interrupted. Closing the handle, since the \
                    server-side position is unknown.",
                    self.name
                );
                self.buffer.discard();
                self.position.closed();
            }
            Err(Error::CursorNotFound { .. }) if self.position.state() == CursorState::Open => {
                debug!("Server-side cursor '{}' is gone. Closing the handle.", self.name);
                self.buffer.discard();
                self.position.closed();
            }
            _ => (),
        }
        result
    }

    /// Rows collected for the caller, but not handed out due to an error.
    fn restore(&mut self, rows: Vec<Row>) {
        if self.position.state() != CursorState::Closed {
            self.buffer.put_back(rows);
        }
    }

    fn ensure_not_closed(&self) -> Result<(), Error> {
        if self.closed() {
            Err(Error::CursorClosed {
                name: self.name.clone(),
            })
        } else {
            Ok(())
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.position.state() {
            CursorState::Open => Ok(()),
            CursorState::Undeclared => Err(Error::NotDeclared {
                name: self.name.clone(),
            }),
            CursorState::Closed => Err(Error::CursorClosed {
                name: self.name.clone(),
            }),
        }
    }
}

/// `false` if the server-side cursor can not exist anymore, or the connection would refuse a
/// `CLOSE` anyway.
fn may_hold_cursor(status: TransactionStatus, withhold: bool) -> bool {
    match status {
        TransactionStatus::InTransaction | TransactionStatus::Unknown => true,
        TransactionStatus::Idle => withhold,
        TransactionStatus::Active | TransactionStatus::InError => false,
    }
}

/// Lazy, finite sequence over the remaining rows of a [`NamedCursor`]. Each step takes the next
/// buffered row, fetching another batch of [`NamedCursor::itersize`] rows first if the buffer ran
/// empty. Ends after the first error.
pub struct Rows<'c, C: Connection> {
    cursor: &'c mut NamedCursor<C>,
    finished: bool,
}

impl<C> Rows<'_, C>
where
    C: Connection,
{
    /// Number of rows yielded by the cursor so far.
    pub fn rownumber(&self) -> Option<usize> {
        self.cursor.rownumber()
    }

    pub fn cursor(&self) -> &NamedCursor<C> {
        self.cursor
    }
}

impl<C> Iterator for Rows<'_, C>
where
    C: Connection,
{
    type Item = Result<Row, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.cursor.fetch_one() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(error) => {
                self.finished = true;
                Some(Err(error))
            }
        }
    }
}

impl<'c, C> IntoIterator for &'c mut NamedCursor<C>
where
    C: Connection,
{
    type Item = Result<Row, Error>;
    type IntoIter = Rows<'c, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows()
    }
}

/// Creates instances of [`NamedCursor`] with settings other than the defaults.
#[derive(Default, Clone)]
pub struct NamedCursorBuilder {
    /// `None` implies [`DEFAULT_ITERSIZE`].
    itersize: Option<usize>,
    withhold: bool,
}

impl NamedCursorBuilder {
    pub fn new() -> Self {
        NamedCursorBuilder {
            itersize: None,
            withhold: false,
        }
    }

    /// Number of rows fetched in a single roundtrip. Higher numbers save roundtrips, but keep more
    /// rows in memory.
    pub fn set_itersize(&mut self, itersize: usize) -> &mut Self {
        self.itersize = Some(itersize);
        self
    }

    /// Declare cursors `WITH HOLD`, so they outlive the transaction they are declared in.
    pub fn set_withhold(&mut self, withhold: bool) -> &mut Self {
        self.withhold = withhold;
        self
    }

    pub fn build<C>(
        &self,
        connection: &SharedConnection<C>,
        name: impl Into<String>,
    ) -> Result<NamedCursor<C>, Error>
    where
        C: Connection,
    {
        let itersize = self.itersize.unwrap_or(DEFAULT_ITERSIZE);
        if itersize == 0 {
            return Err(Error::InvalidItersize);
        }
        Ok(NamedCursor::new(
            connection.clone(),
            name.into(),
            itersize,
            self.withhold,
        ))
    }
}
