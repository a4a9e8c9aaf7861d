//! Pocket Ledger keeps a personal income and expense ledger in step with a record
//! store.
//!
//! The library is the engine behind a ledger screen:
//! - [SyncEngine] subscribes to the store and republishes the whole collection as an
//!   ordered list of [Entry] after every change,
//! - [aggregate] derives the income and expense totals of that list,
//! - [MutationController] validates and saves creates, updates and deletes through
//!   an explicit save-state machine, with a confirmation step before deleting.
//!
//! The store is injected as an `Arc<dyn RecordStore>`, see [SqliteStore] and
//! [MemoryStore].

#![warn(missing_docs)]

mod aggregation;
mod entry;
mod mutation;
mod store;
mod sync;

#[cfg(test)]
mod test_utils;

pub use aggregation::{AggregateTotals, aggregate};
pub use entry::{
    Category, Entry, EntryCandidate, EntryFields, EntryId, EntryKind, ValidationError, validate,
};
pub use mutation::{MutationController, SaveState};
pub use store::{
    CREATED_AT_FIELD, Document, EXPENSES_COLLECTION, Fields, MemoryStore, RecordStore, Snapshot,
    SnapshotStream, SqliteStore, create_document_table,
};
pub use sync::{SyncEngine, Subscription, normalize_document, normalize_snapshot};

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The candidate entry failed validation and was not sent to the store.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A mutation was submitted while another one was still being validated or saved.
    #[error("another change is already being saved")]
    SaveInProgress,

    /// A create or update was submitted while a delete was waiting for confirmation.
    ///
    /// The caller should confirm or cancel the delete first.
    #[error("a delete is waiting for confirmation")]
    AwaitingDeleteConfirmation,

    /// A delete was confirmed without being requested first.
    #[error("there is no delete waiting for confirmation")]
    NoPendingDelete,

    /// The caller stopped waiting for a save before the store answered.
    ///
    /// The change may or may not have reached the store.
    #[error("the save was cancelled before the store answered")]
    SaveCancelled,

    /// Tried to update an entry that is not in the store, e.g. because it was
    /// deleted elsewhere.
    #[error("tried to update an entry that is not in the store")]
    UpdateMissingEntry,

    /// Tried to delete an entry that is not in the store.
    #[error("tried to delete an entry that is not in the store")]
    DeleteMissingEntry,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// An error occurred while serializing a document as JSON
    #[error("could not serialize as JSON: {0}")]
    JSONSerializationError(String),

    /// The server timestamp could not be formatted.
    #[error("could not format timestamp: {0}")]
    TimestampFormatError(String),
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        tracing::error!("an unhandled SQL error occurred: {}", error);
        Error::SqlError(error)
    }
}

impl Error {
    /// Whether the error came from the store rather than from checking the input
    /// or the state of a [MutationController].
    pub fn is_persistence_error(&self) -> bool {
        !matches!(
            self,
            Error::Validation(_)
                | Error::SaveInProgress
                | Error::AwaitingDeleteConfirmation
                | Error::NoPendingDelete
        )
    }
}

#[cfg(test)]
mod error_tests {
    use crate::{Error, ValidationError};

    #[test]
    fn sql_errors_are_wrapped() {
        assert_eq!(
            Error::from(rusqlite::Error::QueryReturnedNoRows),
            Error::SqlError(rusqlite::Error::QueryReturnedNoRows)
        );
    }

    #[test]
    fn classifies_persistence_errors() {
        assert!(Error::DatabaseLockError.is_persistence_error());
        assert!(Error::DeleteMissingEntry.is_persistence_error());
        assert!(!Error::SaveInProgress.is_persistence_error());
        assert!(!Error::from(ValidationError::EmptyTitle).is_persistence_error());
    }
}
