//! A record store that keeps every collection in memory.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::{
    Error,
    entry::EntryId,
    store::{
        CREATED_AT_FIELD, Document, Fields, Listeners, RecordStore, ServerClock, Snapshot,
        SnapshotStream, merge_fields,
    },
};

#[derive(Debug, Default)]
struct MemoryState {
    last_id: u64,
    collections: HashMap<String, Vec<Document>>,
}

impl MemoryState {
    fn snapshot(&self, collection: &str) -> Snapshot {
        Snapshot {
            documents: self.collections.get(collection).cloned().unwrap_or_default(),
        }
    }

    fn find_mut(&mut self, collection: &str, id: &EntryId) -> Option<&mut Document> {
        self.collections
            .get_mut(collection)?
            .iter_mut()
            .find(|document| &document.id == id)
    }

    fn next_id(&mut self) -> EntryId {
        self.last_id += 1;
        EntryId::new(self.last_id.to_string())
    }
}

/// A [RecordStore] that lives only as long as the process.
///
/// Documents are kept in insertion order and IDs count up from 1 without reuse.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    clock: ServerClock,
    listeners: Listeners,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a document exactly as given, without a server timestamp.
    ///
    /// This stands in for another client writing arbitrary data to the collection,
    /// which is how malformed records end up in a snapshot.
    ///
    /// # Errors
    /// Returns [Error::DatabaseLockError] if the store's lock is poisoned.
    pub fn insert_raw(&self, collection: &str, fields: Fields) -> Result<EntryId, Error> {
        let mut state = self.lock()?;
        let id = state.next_id();

        state
            .collections
            .entry(collection.to_owned())
            .or_default()
            .push(Document {
                id: id.clone(),
                fields,
            });
        self.publish(&state, collection);

        Ok(id)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, Error> {
        self.state.lock().map_err(|error| {
            tracing::error!("could not acquire memory store lock: {error}");
            Error::DatabaseLockError
        })
    }

    fn publish(&self, state: &MemoryState, collection: &str) {
        if self.listeners.is_watched(collection) {
            self.listeners.notify(collection, &state.snapshot(collection));
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn subscribe_collection(&self, collection: &str) -> Result<SnapshotStream, Error> {
        let state = self.lock()?;

        self.listeners.register(collection, state.snapshot(collection))
    }

    async fn create_document(
        &self,
        collection: &str,
        mut fields: Fields,
    ) -> Result<EntryId, Error> {
        let mut state = self.lock()?;

        fields.insert(CREATED_AT_FIELD.to_owned(), self.clock.next_timestamp()?);
        let id = state.next_id();

        state
            .collections
            .entry(collection.to_owned())
            .or_default()
            .push(Document {
                id: id.clone(),
                fields,
            });
        self.publish(&state, collection);

        Ok(id)
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &EntryId,
        fields: Fields,
    ) -> Result<(), Error> {
        let mut state = self.lock()?;

        let document = state
            .find_mut(collection, id)
            .ok_or(Error::UpdateMissingEntry)?;
        merge_fields(&mut document.fields, fields);
        self.publish(&state, collection);

        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &EntryId) -> Result<(), Error> {
        let mut state = self.lock()?;

        let documents = state
            .collections
            .get_mut(collection)
            .ok_or(Error::DeleteMissingEntry)?;
        let position = documents
            .iter()
            .position(|document| &document.id == id)
            .ok_or(Error::DeleteMissingEntry)?;
        documents.remove(position);
        self.publish(&state, collection);

        Ok(())
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &EntryId,
    ) -> Result<Option<Document>, Error> {
        let state = self.lock()?;

        Ok(state
            .collections
            .get(collection)
            .and_then(|documents| documents.iter().find(|document| &document.id == id))
            .cloned())
    }
}
