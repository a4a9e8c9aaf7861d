//! Registry of live collection subscriptions.

use std::sync::Mutex;

use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::{
    Error,
    store::{Snapshot, SnapshotStream},
};

#[derive(Debug)]
struct Listener {
    collection: String,
    sender: UnboundedSender<Snapshot>,
}

/// Pushes snapshots to every open [SnapshotStream] of a collection.
///
/// Callers must hold their own store lock while calling [Listeners::register] and
/// [Listeners::notify] so that snapshots are delivered in the order the changes
/// were made.
#[derive(Debug, Default)]
pub(crate) struct Listeners {
    listeners: Mutex<Vec<Listener>>,
}

impl Listeners {
    /// Open a new stream for `collection` that starts with `initial`.
    pub(crate) fn register(
        &self,
        collection: &str,
        initial: Snapshot,
    ) -> Result<SnapshotStream, Error> {
        let (sender, receiver) = unbounded_channel();
        // The receiver is still in scope, so this send cannot fail.
        let _ = sender.send(initial);

        self.listeners
            .lock()
            .map_err(|_| Error::DatabaseLockError)?
            .push(Listener {
                collection: collection.to_owned(),
                sender,
            });

        tracing::debug!("Opened subscription to collection \"{collection}\"");

        Ok(SnapshotStream::new(receiver))
    }

    /// Whether any open stream is watching `collection`.
    ///
    /// A poisoned registry is logged and reported as unwatched.
    pub(crate) fn is_watched(&self, collection: &str) -> bool {
        match self.listeners.lock() {
            Ok(listeners) => listeners
                .iter()
                .any(|listener| listener.collection == collection && !listener.sender.is_closed()),
            Err(_) => {
                tracing::error!("Could not check subscribers of \"{collection}\": lock poisoned");
                false
            }
        }
    }

    /// Send `snapshot` to every open stream of `collection` and forget closed streams.
    pub(crate) fn notify(&self, collection: &str, snapshot: &Snapshot) {
        let Ok(mut listeners) = self.listeners.lock() else {
            tracing::error!("Could not notify subscribers of \"{collection}\": lock poisoned");
            return;
        };

        listeners.retain(|listener| {
            if listener.collection != collection {
                return !listener.sender.is_closed();
            }

            listener.sender.send(snapshot.clone()).is_ok()
        });

        tracing::debug!(
            "Sent snapshot of \"{collection}\" with {} documents",
            snapshot.documents.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;

    use crate::{
        Error,
        entry::EntryId,
        store::{Document, Fields, Snapshot},
    };

    use super::Listeners;

    fn snapshot_of(ids: &[&str]) -> Snapshot {
        Snapshot {
            documents: ids
                .iter()
                .map(|id| Document {
                    id: EntryId::new(*id),
                    fields: Fields::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn stream_starts_with_initial_snapshot() {
        let listeners = Listeners::default();

        let mut stream = listeners.register("expenses", snapshot_of(&["1"])).unwrap();

        assert_eq!(stream.next().await, Some(snapshot_of(&["1"])));
    }

    #[tokio::test]
    async fn snapshots_arrive_in_order() {
        let listeners = Listeners::default();
        let mut stream = listeners.register("expenses", Snapshot::default()).unwrap();

        listeners.notify("expenses", &snapshot_of(&["1"]));
        listeners.notify("expenses", &snapshot_of(&["1", "2"]));

        assert_eq!(stream.next().await, Some(Snapshot::default()));
        assert_eq!(stream.next().await, Some(snapshot_of(&["1"])));
        assert_eq!(stream.next().await, Some(snapshot_of(&["1", "2"])));
    }

    #[tokio::test]
    async fn other_collections_are_not_notified() {
        let listeners = Listeners::default();
        let mut stream = listeners.register("budgets", Snapshot::default()).unwrap();

        listeners.notify("expenses", &snapshot_of(&["1"]));
        listeners.notify("budgets", &snapshot_of(&["9"]));

        assert_eq!(stream.next().await, Some(Snapshot::default()));
        assert_eq!(stream.next().await, Some(snapshot_of(&["9"])));
    }

    #[test]
    fn poisoned_registry_is_unwatched_and_rejects_streams() {
        let listeners = Listeners::default();
        let _ = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = listeners.listeners.lock().unwrap();
            panic!("poison the registry");
        }));

        assert!(!listeners.is_watched("expenses"));
        assert_eq!(
            listeners
                .register("expenses", Snapshot::default())
                .map(|_| ()),
            Err(Error::DatabaseLockError)
        );
        listeners.notify("expenses", &Snapshot::default());
    }

    #[test]
    fn dropped_streams_are_forgotten() {
        let listeners = Listeners::default();
        let stream = listeners.register("expenses", Snapshot::default()).unwrap();
        assert!(listeners.is_watched("expenses"));

        drop(stream);
        listeners.notify("expenses", &Snapshot::default());

        assert!(!listeners.is_watched("expenses"));
        assert!(listeners.listeners.lock().unwrap().is_empty());
    }
}
