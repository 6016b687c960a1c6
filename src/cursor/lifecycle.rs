//! Best effort detection of cursors which are dropped while still open.
//!
//! Nothing here is required for correctness. Dropping happens at a point in time the connection may
//! not be able to accept a command (e.g. while unwinding, or while another handle holds it), so no
//! command is ever issued from `drop`. Use [`NamedCursor::close`] or [`NamedCursor::scoped`] to
//! release the server-side cursor.

use log::warn;

use crate::{Connection, CursorState, NamedCursor};

impl<C> Drop for NamedCursor<C>
where
    C: Connection,
{
    fn drop(&mut self) {
        if self.state() == CursorState::Open {
            warn!("{}", leak_message(self.name()));
        }
    }
}

fn leak_message(name: &str) -> String {
    format!(
        "Server-side cursor '{name}' has been dropped while still open. Call `.close()` on the \
        cursor, or use it within `NamedCursor::scoped`, in order to release it on the server."
    )
}
