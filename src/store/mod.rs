//! The record store that holds the canonical collection of ledger entries.
//!
//! The rest of the crate only talks to a store through the [RecordStore] trait,
//! which is injected as an `Arc<dyn RecordStore>` so that the in-memory store
//! can stand in for the SQLite store in tests.

mod clock;
mod listeners;
mod memory;
mod sqlite;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{Error, entry::EntryId};

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, create_document_table};

pub(crate) use clock::ServerClock;
pub(crate) use listeners::Listeners;

/// The name of the collection that holds ledger entries.
pub const EXPENSES_COLLECTION: &str = "expenses";

/// The document field the store fills with the creation time.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// The untyped fields of a stored document.
pub type Fields = Map<String, Value>;

/// A stored record exactly as the store holds it.
///
/// The fields are not validated, any of them may be missing or hold a value of the
/// wrong type.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// The ID the store assigned to the document.
    pub id: EntryId,
    /// The document's fields, as stored.
    pub fields: Fields,
}

/// A complete, point-in-time copy of a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Every document in the collection, in the order the store keeps them.
    pub documents: Vec<Document>,
}

/// A live feed of snapshots for one collection.
///
/// The first snapshot describes the collection at the time of subscribing, after that
/// one snapshot arrives for every change, in the order the changes were made.
/// Dropping the stream detaches it from the store.
#[derive(Debug)]
pub struct SnapshotStream {
    receiver: UnboundedReceiver<Snapshot>,
}

impl SnapshotStream {
    pub(crate) fn new(receiver: UnboundedReceiver<Snapshot>) -> Self {
        Self { receiver }
    }

    /// Wait for the next snapshot.
    ///
    /// Returns `None` once the store has shut down.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.receiver.recv().await
    }
}

/// Remote persistence for documents grouped into named collections.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Open a live subscription to every document in `collection`.
    ///
    /// # Errors
    /// Returns an error if the current contents of the collection cannot be read.
    fn subscribe_collection(&self, collection: &str) -> Result<SnapshotStream, Error>;

    /// Add a document to `collection` and return its new ID.
    ///
    /// The store assigns the ID and writes the [CREATED_AT_FIELD], any value the
    /// caller gives for that field is replaced.
    async fn create_document(&self, collection: &str, fields: Fields) -> Result<EntryId, Error>;

    /// Overwrite the given fields of an existing document, leaving the others alone.
    ///
    /// The [CREATED_AT_FIELD] is never changed.
    ///
    /// # Errors
    /// Returns [Error::UpdateMissingEntry] if the document does not exist.
    async fn update_document(
        &self,
        collection: &str,
        id: &EntryId,
        fields: Fields,
    ) -> Result<(), Error>;

    /// Remove a document.
    ///
    /// # Errors
    /// Returns [Error::DeleteMissingEntry] if the document does not exist.
    async fn delete_document(&self, collection: &str, id: &EntryId) -> Result<(), Error>;

    /// Read a single document, if it exists.
    async fn get_document(&self, collection: &str, id: &EntryId)
    -> Result<Option<Document>, Error>;
}

/// Copy `fields` over `target`, skipping the store-owned creation time.
pub(crate) fn merge_fields(target: &mut Fields, fields: Fields) {
    for (key, value) in fields {
        if key != CREATED_AT_FIELD {
            target.insert(key, value);
        }
    }
}
