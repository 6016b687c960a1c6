use std::collections::VecDeque;

use crate::Row;

/// Outcome of pulling the next row out of the buffer.
#[derive(Debug, PartialEq)]
pub enum Step {
    /// The next row in server order.
    Row(Row),
    /// The buffer is empty, yet the server may hold more rows. Fetch a batch of this many rows,
    /// pass it to [`FetchBuffer::refill`] and pull again.
    NeedsBatch(usize),
    /// The result set has been consumed completely.
    Exhausted,
}

/// Rows already fetched from the server, but not yet handed to the caller.
#[derive(Debug, Default)]
pub struct FetchBuffer {
    rows: VecDeque<Row>,
    /// The last batch returned fewer rows than requested. Only meaningful together with an empty
    /// buffer.
    exhausted: bool,
}

impl FetchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Pull a single row. Never performs I/O, but tells the caller if it needs to.
    pub fn step(&mut self, batch_size: usize) -> Step {
        if let Some(row) = self.rows.pop_front() {
            Step::Row(row)
        } else if self.exhausted {
            Step::Exhausted
        } else {
            Step::NeedsBatch(batch_size)
        }
    }

    /// Removes up to `n` rows from the front.
    pub fn take(&mut self, n: usize) -> Vec<Row> {
        let n = n.min(self.rows.len());
        self.rows.drain(..n).collect()
    }

    /// Removes all buffered rows.
    pub fn take_all(&mut self) -> Vec<Row> {
        self.rows.drain(..).collect()
    }

    /// Puts rows which could not be handed to the caller back in front of the buffer.
    pub fn put_back(&mut self, rows: Vec<Row>) {
        for row in rows.into_iter().rev() {
            self.rows.push_front(row);
        }
    }

    /// Appends a freshly fetched batch. `requested` is the number of rows asked for; getting fewer
    /// marks the end of the result set.
    pub fn refill(&mut self, rows: Vec<Row>, requested: usize) {
        if rows.len() < requested {
            self.exhausted = true;
        }
        self.rows.extend(rows);
    }

    /// Skips `n` rows without talking to the server. Possible if they are buffered, or if skipping
    /// all buffered rows of an exhausted result set. Returns `false` if the server-side cursor has
    /// to move instead, in which case the buffer is left untouched.
    pub fn skip(&mut self, n: usize) -> bool {
        if n >= self.server_lead() {
            return false;
        }
        let n = n.min(self.rows.len());
        self.rows.drain(..n);
        true
    }

    /// Forget all buffered rows. The server-side position is the only source of truth afterwards.
    pub fn discard(&mut self) {
        self.rows.clear();
        self.exhausted = false;
    }

    /// By how many rows the server-side cursor is ahead of the last row handed to the caller.
    ///
    /// A short batch leaves the server cursor positioned after the last row, which is one more
    /// step than the rows it returned.
    pub fn server_lead(&self) -> usize {
        self.rows.len() + usize::from(self.exhausted)
    }
}
