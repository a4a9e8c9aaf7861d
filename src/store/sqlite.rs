//! A record store backed by a SQLite database.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{
    Error,
    entry::EntryId,
    store::{
        CREATED_AT_FIELD, Document, Fields, Listeners, RecordStore, ServerClock, Snapshot,
        SnapshotStream, merge_fields,
    },
};

/// A [RecordStore] that persists documents to SQLite.
///
/// Subscribers are notified of changes made through this store. Changes written to
/// the database file by other processes show up in the next snapshot sent after a
/// change made here.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
    clock: Arc<ServerClock>,
    listeners: Arc<Listeners>,
}

impl SqliteStore {
    /// Create a store from an open connection, creating the document table if needed.
    ///
    /// # Errors
    /// Returns an error if the table cannot be created.
    pub fn new(connection: Connection) -> Result<Self, Error> {
        create_document_table(&connection)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            clock: Arc::default(),
            listeners: Arc::default(),
        })
    }

    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or the table cannot be created.
    pub fn open(path: &Path) -> Result<Self, Error> {
        tracing::info!("Opening ledger database at {}", path.display());
        Self::new(Connection::open(path)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.connection.lock().map_err(|error| {
            tracing::error!("could not acquire database lock: {error}");
            Error::DatabaseLockError
        })
    }

    /// Send the collection to its subscribers after a committed write.
    ///
    /// A snapshot that cannot be read is logged, never returned to the writer.
    fn publish(&self, connection: &Connection, collection: &str) {
        if !self.listeners.is_watched(collection) {
            return;
        }

        match select_snapshot(collection, connection) {
            Ok(snapshot) => self.listeners.notify(collection, &snapshot),
            Err(error) => {
                tracing::error!("Could not read \"{collection}\" to notify subscribers: {error}")
            }
        }
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn subscribe_collection(&self, collection: &str) -> Result<SnapshotStream, Error> {
        let connection = self.lock()?;
        let snapshot = select_snapshot(collection, &connection)?;

        self.listeners.register(collection, snapshot)
    }

    async fn create_document(
        &self,
        collection: &str,
        mut fields: Fields,
    ) -> Result<EntryId, Error> {
        let connection = self.lock()?;

        fields.insert(CREATED_AT_FIELD.to_owned(), self.clock.next_timestamp()?);
        connection.execute(
            "INSERT INTO document (collection, fields) VALUES (?1, ?2)",
            (collection, serialize_fields(&fields)?),
        )?;
        let id = EntryId::from(connection.last_insert_rowid());

        self.publish(&connection, collection);

        Ok(id)
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &EntryId,
        fields: Fields,
    ) -> Result<(), Error> {
        let connection = self.lock()?;

        let row_id = parse_row_id(id).ok_or(Error::UpdateMissingEntry)?;
        let mut document = select_document(collection, row_id, &connection)?
            .ok_or(Error::UpdateMissingEntry)?;
        merge_fields(&mut document.fields, fields);

        let rows_affected = connection.execute(
            "UPDATE document SET fields = ?1 WHERE id = ?2 AND collection = ?3",
            (serialize_fields(&document.fields)?, row_id, collection),
        )?;

        if rows_affected == 0 {
            return Err(Error::UpdateMissingEntry);
        }

        self.publish(&connection, collection);

        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &EntryId) -> Result<(), Error> {
        let connection = self.lock()?;

        let row_id = parse_row_id(id).ok_or(Error::DeleteMissingEntry)?;
        let rows_affected = connection.execute(
            "DELETE FROM document WHERE id = ?1 AND collection = ?2",
            (row_id, collection),
        )?;

        if rows_affected == 0 {
            return Err(Error::DeleteMissingEntry);
        }

        self.publish(&connection, collection);

        Ok(())
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &EntryId,
    ) -> Result<Option<Document>, Error> {
        let connection = self.lock()?;

        match parse_row_id(id) {
            Some(row_id) => select_document(collection, row_id, &connection),
            None => Ok(None),
        }
    }
}

/// Create the document table in the database.
///
/// `AUTOINCREMENT` keeps SQLite from handing out the ID of a deleted document again.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_document_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS document (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            fields TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_document_collection ON document(collection);",
    )
}

fn parse_row_id(id: &EntryId) -> Option<i64> {
    id.as_ref().parse().ok()
}

fn serialize_fields(fields: &Fields) -> Result<String, Error> {
    serde_json::to_string(fields).map_err(|error| Error::JSONSerializationError(error.to_string()))
}

fn select_document(
    collection: &str,
    row_id: i64,
    connection: &Connection,
) -> Result<Option<Document>, Error> {
    connection
        .prepare("SELECT id, fields FROM document WHERE id = ?1 AND collection = ?2")?
        .query_row((row_id, collection), map_row)
        .optional()
        .map_err(Error::from)
}

fn select_snapshot(collection: &str, connection: &Connection) -> Result<Snapshot, Error> {
    let documents = connection
        .prepare("SELECT id, fields FROM document WHERE collection = ?1 ORDER BY id ASC")?
        .query_map((collection,), map_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Snapshot { documents })
}

/// Map a database row to a document.
///
/// Fields that are not a JSON object are logged and replaced with an empty
/// document rather than failing the whole snapshot.
fn map_row(row: &Row) -> Result<Document, rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let raw_fields: String = row.get(1)?;

    let fields = serde_json::from_str::<Fields>(&raw_fields).unwrap_or_else(|error| {
        tracing::warn!("Document {id} has unreadable fields, treating it as empty: {error}");
        Fields::new()
    });

    Ok(Document {
        id: EntryId::from(id),
        fields,
    })
}
