use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    Error,
    entry::EntryId,
    store::{Document, Fields, MemoryStore, RecordStore, SnapshotStream},
};

/// A store whose mutations wait for [GatedStore::release] before reaching the
/// wrapped [MemoryStore], so a test can act while a save is in flight.
#[derive(Debug, Default)]
pub(crate) struct GatedStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    entered: Notify,
    gate: Notify,
}

impl GatedStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The number of create, update and delete calls made so far.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait until a mutation has reached the store.
    pub(crate) async fn wait_until_called(&self) {
        self.entered.notified().await;
    }

    /// Let one waiting (or the next) mutation through.
    pub(crate) fn release(&self) {
        self.gate.notify_one();
    }

    /// Add an empty document without going through the gate.
    pub(crate) async fn seed(&self) -> EntryId {
        self.inner
            .create_document("expenses", Fields::new())
            .await
            .expect("Could not seed document")
    }

    async fn pass_gate(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.gate.notified().await;
    }
}

#[async_trait]
impl RecordStore for GatedStore {
    fn subscribe_collection(&self, collection: &str) -> Result<SnapshotStream, Error> {
        self.inner.subscribe_collection(collection)
    }

    async fn create_document(&self, collection: &str, fields: Fields) -> Result<EntryId, Error> {
        self.pass_gate().await;
        self.inner.create_document(collection, fields).await
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &EntryId,
        fields: Fields,
    ) -> Result<(), Error> {
        self.pass_gate().await;
        self.inner.update_document(collection, id, fields).await
    }

    async fn delete_document(&self, collection: &str, id: &EntryId) -> Result<(), Error> {
        self.pass_gate().await;
        self.inner.delete_document(collection, id).await
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &EntryId,
    ) -> Result<Option<Document>, Error> {
        self.inner.get_document(collection, id).await
    }
}

/// A store that can be read but fails every mutation.
#[derive(Debug, Default)]
pub(crate) struct FailingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

impl FailingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The number of create, update and delete calls made so far.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> Error {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Error::DatabaseLockError
    }
}

#[async_trait]
impl RecordStore for FailingStore {
    fn subscribe_collection(&self, collection: &str) -> Result<SnapshotStream, Error> {
        self.inner.subscribe_collection(collection)
    }

    async fn create_document(&self, _collection: &str, _fields: Fields) -> Result<EntryId, Error> {
        Err(self.fail())
    }

    async fn update_document(
        &self,
        _collection: &str,
        _id: &EntryId,
        _fields: Fields,
    ) -> Result<(), Error> {
        Err(self.fail())
    }

    async fn delete_document(&self, _collection: &str, _id: &EntryId) -> Result<(), Error> {
        Err(self.fail())
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &EntryId,
    ) -> Result<Option<Document>, Error> {
        self.inner.get_document(collection, id).await
    }
}
