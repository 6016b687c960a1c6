use super::Scrollability;

/// Lifecycle state of a cursor handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Neither declared by this handle, nor adopted through a successful fetch.
    Undeclared,
    Open,
    Closed,
}

/// Tracks how far the caller got into the result set. Pure bookkeeping, no I/O.
#[derive(Debug, Clone)]
pub struct Position {
    state: CursorState,
    /// `None` until the cursor is declared or adopted. Afterwards the number of rows handed to the
    /// caller since.
    row_number: Option<usize>,
    scrollable: Scrollability,
}

impl Position {
    pub fn new() -> Self {
        Self {
            state: CursorState::Undeclared,
            row_number: None,
            scrollable: Scrollability::Unknown,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn row_number(&self) -> Option<usize> {
        self.row_number
    }

    pub fn scrollable(&self) -> Scrollability {
        self.scrollable
    }

    /// This handle declared the cursor. Starts counting from zero again.
    pub fn declared(&mut self, scrollable: Scrollability) {
        self.state = CursorState::Open;
        self.row_number = Some(0);
        self.scrollable = scrollable;
    }

    /// A fetch against a cursor declared elsewhere succeeded. We do not know how it has been
    /// declared, so its scrollability is unknown.
    pub fn adopted(&mut self) {
        self.state = CursorState::Open;
        self.row_number = Some(0);
        self.scrollable = Scrollability::Unknown;
    }

    /// `num_rows` have been handed to the caller.
    pub fn advance(&mut self, num_rows: usize) {
        if let Some(row_number) = self.row_number.as_mut() {
            *row_number += num_rows;
        }
    }

    /// The row number survives closing, so callers can still inspect how far they got.
    pub fn closed(&mut self) {
        self.state = CursorState::Closed;
    }
}
