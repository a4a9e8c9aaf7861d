//! Keeps a local, ordered list of entries in step with the record store.
//!
//! Every snapshot from the store replaces the published list wholesale. The list is a
//! disposable cache: it is never patched, and never written back to the store.

use std::{
    cmp::Ordering,
    sync::{Arc, Mutex},
};

use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    Error,
    aggregation::{AggregateTotals, aggregate},
    entry::{Category, Entry, EntryId, EntryKind},
    store::{CREATED_AT_FIELD, Document, RecordStore, Snapshot},
};

type OnChange = Box<dyn FnMut(Vec<Entry>) + Send + 'static>;

/// Subscribes to a collection in the record store and republishes it as an ordered
/// list of [Entry].
pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    collection: String,
    published: Arc<watch::Sender<Option<Vec<Entry>>>>,
}

impl SyncEngine {
    /// Create an engine for `collection`. Nothing is read until [SyncEngine::subscribe]
    /// is called.
    pub fn new(store: Arc<dyn RecordStore>, collection: &str) -> Self {
        let (published, _) = watch::channel(None);

        Self {
            store,
            collection: collection.to_owned(),
            published: Arc::new(published),
        }
    }

    /// Open a live subscription to the store and call `on_change` with the full,
    /// ordered entry list after every snapshot, in delivery order.
    ///
    /// Must be called from within a Tokio runtime. `on_change` must not call
    /// [Subscription::unsubscribe] on its own subscription.
    ///
    /// # Errors
    /// Returns an error if the store cannot open the subscription.
    pub fn subscribe<F>(&self, on_change: F) -> Result<Subscription, Error>
    where
        F: FnMut(Vec<Entry>) + Send + 'static,
    {
        let mut stream = self.store.subscribe_collection(&self.collection)?;
        let listener: Arc<Mutex<Option<OnChange>>> = Arc::new(Mutex::new(Some(Box::new(on_change))));

        let task = tokio::spawn({
            let listener = listener.clone();
            let published = self.published.clone();
            let collection = self.collection.clone();

            async move {
                while let Some(snapshot) = stream.next().await {
                    let entries = normalize_snapshot(snapshot);
                    tracing::debug!(
                        "Received snapshot of \"{collection}\" with {} entries",
                        entries.len()
                    );

                    if !deliver(&listener, &published, entries) {
                        break;
                    }
                }

                tracing::debug!("Subscription to \"{collection}\" ended");
            }
        });

        Ok(Subscription {
            listener,
            task: Some(task),
        })
    }

    /// A copy of the most recently published entry list.
    ///
    /// Empty until the first snapshot arrives, see [SyncEngine::is_loaded].
    pub fn entries(&self) -> Vec<Entry> {
        self.published.borrow().clone().unwrap_or_default()
    }

    /// Whether at least one snapshot has been published.
    pub fn is_loaded(&self) -> bool {
        self.published.borrow().is_some()
    }

    /// The totals of the most recently published entry list.
    pub fn totals(&self) -> AggregateTotals {
        self.published
            .borrow()
            .as_deref()
            .map(aggregate)
            .unwrap_or_default()
    }

    /// Watch the published list. The value is `None` until the first snapshot arrives.
    pub fn watch(&self) -> watch::Receiver<Option<Vec<Entry>>> {
        self.published.subscribe()
    }

    /// Read a single entry straight from the store, normalized the same way as
    /// entries in a snapshot.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn fetch(&self, id: &EntryId) -> Result<Option<Entry>, Error> {
        let document = self.store.get_document(&self.collection, id).await?;

        Ok(document.map(normalize_document))
    }
}

/// Publish `entries` and pass them to the listener.
///
/// Returns false once the listener has been removed.
fn deliver(
    listener: &Mutex<Option<OnChange>>,
    published: &watch::Sender<Option<Vec<Entry>>>,
    entries: Vec<Entry>,
) -> bool {
    let Ok(mut listener) = listener.lock() else {
        tracing::error!("Subscription listener lock poisoned, stopping subscription");
        return false;
    };

    let Some(on_change) = listener.as_mut() else {
        return false;
    };

    published.send_replace(Some(entries.clone()));
    on_change(entries);

    true
}

/// A live subscription opened by [SyncEngine::subscribe].
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    listener: Arc<Mutex<Option<OnChange>>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Detach from the store and stop calling the listener.
    ///
    /// Once this returns the listener will not be called again. Calling this more
    /// than once has no further effect.
    pub fn unsubscribe(&mut self) {
        // Taking the lock waits for a listener call that is already running.
        match self.listener.lock() {
            Ok(mut listener) => {
                listener.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }

        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Unsubscribed from record store");
        }
    }

    /// Whether the listener is still attached.
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Convert a snapshot into entries ordered newest first.
///
/// Entries without a creation time go last. Ties are broken by ID so the same
/// snapshot always produces the same order.
pub fn normalize_snapshot(snapshot: Snapshot) -> Vec<Entry> {
    let mut entries: Vec<Entry> = snapshot
        .documents
        .into_iter()
        .map(normalize_document)
        .collect();

    entries.sort_by(newest_first);
    entries
}

fn newest_first(a: &Entry, b: &Entry) -> Ordering {
    // `None` orders before `Some`, so comparing in reverse puts missing times last.
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Convert a raw document into an entry, replacing malformed fields with defaults.
///
/// A malformed document is never dropped:
/// - a missing or non-numeric `amount` becomes `0`,
/// - an unrecognised `type` becomes [EntryKind::Expense],
/// - a missing or unknown `category`, or a missing `note`, becomes absent,
/// - a missing or unreadable `createdAt` becomes `None`, the earliest possible time.
pub fn normalize_document(document: Document) -> Entry {
    let Document { id, fields } = document;

    let title = match fields.get("title") {
        Some(Value::String(title)) => title.clone(),
        _ => {
            tracing::warn!("Entry {id} has no title, using an empty title");
            String::new()
        }
    };

    let amount = match fields.get("amount").and_then(read_amount) {
        Some(amount) => amount,
        None => {
            tracing::warn!("Entry {id} has no readable amount, using 0");
            0.0
        }
    };

    let kind = match fields.get("type").and_then(Value::as_str) {
        Some("income") => EntryKind::Income,
        Some("expense") => EntryKind::Expense,
        other => {
            tracing::warn!("Entry {id} has unrecognised type {other:?}, using expense");
            EntryKind::Expense
        }
    };

    let category = match fields.get("category") {
        Some(Value::String(name)) => match name.parse::<Category>() {
            Ok(category) => Some(category),
            Err(error) => {
                tracing::warn!("Entry {id}: {error}, leaving it uncategorised");
                None
            }
        },
        _ => None,
    };

    let note = match fields.get("note") {
        Some(Value::String(note)) => Some(note.clone()),
        _ => None,
    };

    let created_at = fields.get(CREATED_AT_FIELD).and_then(read_timestamp);
    if created_at.is_none() {
        tracing::warn!("Entry {id} has no readable creation time, ordering it last");
    }

    Entry {
        id,
        title,
        amount,
        kind,
        category,
        note,
        created_at,
    }
}

/// Read an amount stored as a number or as numeric text.
fn read_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    amount.is_finite().then_some(amount)
}

fn read_timestamp(value: &Value) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value.as_str()?, &Rfc3339).ok()
}


#[cfg(test)]
mod sync_engine_tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use crate::{
        entry::{Entry, EntryId, EntryKind},
        store::{Fields, MemoryStore, RecordStore},
        sync::SyncEngine,
    };

    const COLLECTION: &str = "expenses";

    fn fields(title: &str, amount: f64, kind: EntryKind) -> Fields {
        let serde_json::Value::Object(fields) =
            json!({"title": title, "amount": amount, "type": kind.as_str()})
        else {
            unreachable!()
        };
        fields
    }

    fn subscribe(engine: &SyncEngine) -> (crate::Subscription, UnboundedReceiver<Vec<Entry>>) {
        let (sender, receiver) = unbounded_channel();
        let subscription = engine
            .subscribe(move |entries| {
                let _ = sender.send(entries);
            })
            .expect("Could not subscribe");

        (subscription, receiver)
    }

    async fn next(receiver: &mut UnboundedReceiver<Vec<Entry>>) -> Vec<Entry> {
        tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("Timed out waiting for a snapshot")
            .expect("Subscription closed")
    }

    #[tokio::test]
    async fn publishes_initial_snapshot() {
        let store = Arc::new(MemoryStore::new());
        store
            .create_document(COLLECTION, fields("Lunch", 120.0, EntryKind::Expense))
            .await
            .unwrap();
        let engine = SyncEngine::new(store.clone(), COLLECTION);
        assert!(!engine.is_loaded());

        let (_subscription, mut receiver) = subscribe(&engine);

        let entries = next(&mut receiver).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Lunch");
        assert!(engine.is_loaded());
        assert_eq!(engine.entries(), entries);
    }

    #[tokio::test]
    async fn empty_collection_is_loaded_and_empty() {
        let engine = SyncEngine::new(Arc::new(MemoryStore::new()), COLLECTION);

        let (_subscription, mut receiver) = subscribe(&engine);

        assert!(next(&mut receiver).await.is_empty());
        assert!(engine.is_loaded());
        assert_eq!(engine.totals().income_sum, 0.0);
    }

    #[tokio::test]
    async fn back_to_back_snapshots_are_each_delivered_in_full() {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(store.clone(), COLLECTION);
        let (_subscription, mut receiver) = subscribe(&engine);
        assert!(next(&mut receiver).await.is_empty());

        // Seed three entries, then delete one straight after.
        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            ids.push(
                store
                    .create_document(COLLECTION, fields(title, 1.0, EntryKind::Expense))
                    .await
                    .unwrap(),
            );
        }
        for _ in 0..3 {
            next(&mut receiver).await;
        }

        store
            .update_document(COLLECTION, &ids[0], fields("a", 2.0, EntryKind::Expense))
            .await
            .unwrap();
        store.delete_document(COLLECTION, &ids[1]).await.unwrap();

        let first = next(&mut receiver).await;
        let second = next(&mut receiver).await;
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|entry| entry.id != ids[1]));
        assert_eq!(engine.entries(), second);
    }

    #[tokio::test]
    async fn published_list_is_ordered_newest_first() {
        let store = Arc::new(MemoryStore::new());
        for title in ["first", "second", "third"] {
            store
                .create_document(COLLECTION, fields(title, 1.0, EntryKind::Income))
                .await
                .unwrap();
        }
        store.insert_raw(COLLECTION, Fields::new()).unwrap();
        let engine = SyncEngine::new(store, COLLECTION);

        let (_subscription, mut receiver) = subscribe(&engine);

        let entries = next(&mut receiver).await;
        let created: Vec<_> = entries.iter().map(|entry| entry.created_at).collect();
        assert!(created.windows(2).all(|pair| pair[0] >= pair[1]));
        assert_eq!(entries.last().unwrap().created_at, None);
    }

    #[tokio::test]
    async fn unsubscribe_stops_callbacks_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(store.clone(), COLLECTION);
        let (mut subscription, mut receiver) = subscribe(&engine);
        next(&mut receiver).await;

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());

        store
            .create_document(COLLECTION, fields("late", 1.0, EntryKind::Expense))
            .await
            .unwrap();

        // The listener, and with it the sender, was dropped on unsubscribe.
        assert_eq!(receiver.recv().await, None);
        assert!(engine.entries().is_empty());
    }

    #[tokio::test]
    async fn every_subscription_receives_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(store.clone(), COLLECTION);
        let (_first, mut first_receiver) = subscribe(&engine);
        let (_second, mut second_receiver) = subscribe(&engine);

        store
            .create_document(COLLECTION, fields("Salary", 1000.0, EntryKind::Income))
            .await
            .unwrap();

        for receiver in [&mut first_receiver, &mut second_receiver] {
            assert!(next(receiver).await.is_empty());
            assert_eq!(next(receiver).await.len(), 1);
        }
        assert_eq!(engine.totals().income_sum, 1000.0);
    }

    #[tokio::test]
    async fn fetch_normalizes_single_entry() {
        let store = Arc::new(MemoryStore::new());
        let id = store
            .insert_raw(COLLECTION, fields("Gift", 50.0, EntryKind::Income))
            .unwrap();
        let engine = SyncEngine::new(store, COLLECTION);

        let entry = engine.fetch(&id).await.unwrap().expect("Entry should exist");

        assert_eq!(entry.title, "Gift");
        assert_eq!(entry.kind, EntryKind::Income);
        assert_eq!(engine.fetch(&EntryId::new("missing")).await, Ok(None));
    }
}
