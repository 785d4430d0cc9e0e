//! Database error types.

use thiserror::Error;

use crate::table::{RowId, Table};

/// Database operation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DbError {
    /// A transaction touched a table it did not declare.
    #[error("table {table} is not part of this transaction")]
    TableNotLocked { table: Table },

    /// No minion row is marked as this machine.
    #[error("no minion is marked as self")]
    NoSelf,

    /// A row expected to exist was not found.
    #[error("{table} row {id} not found")]
    RowNotFound { table: Table, id: RowId },
}

impl DbError {
    /// Returns true if this error only means the local machine has not
    /// registered itself yet.
    pub fn is_no_self(&self) -> bool {
        matches!(self, DbError::NoSelf)
    }
}
