//! Document store adapter over `SQLite` with change notification.
//!
//! Writes are keyed by record id. Each committed write publishes a
//! [`ChangeEvent`] on a broadcast channel; subscribers re-read the whole
//! collection rather than applying deltas. Writes made through another
//! handle or process only show up in [`RecordStore::versions`].

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use sqlx::{Sqlite, SqliteConnection, Transaction};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{AppError, Result};

use super::db::Database;
use super::record::{Collection, Record};

/// Notification that a collection changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Collection that changed.
    pub collection: Collection,
    /// Identifier of the written record.
    pub id: String,
}

/// Per-collection change counters, bumped by every committed write.
pub type Versions = HashMap<Collection, i64>;

/// Outcome of an insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted<R> {
    /// A new record was written.
    New,
    /// An identical record with the same id already existed (retry).
    Retried,
    /// A different record already holds this id.
    IdTaken(R),
    /// A unique key column collides with another record.
    KeyTaken,
}

/// Outcome of a guarded replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replaced {
    /// The record was overwritten.
    Updated,
    /// No record matched the id and guard.
    Missed,
    /// A unique key column collides with another record.
    KeyTaken,
}

/// Compare-and-set condition on a key column.
#[derive(Debug, Clone, Copy)]
pub struct Guard<'a> {
    /// Key column to compare.
    pub column: &'static str,
    /// Expected current value; `None` matches `NULL`.
    pub expected: Option<&'a str>,
}

impl<'a> Guard<'a> {
    /// Require `column` to currently equal `expected`.
    #[must_use]
    pub fn new(column: &'static str, expected: Option<&'a str>) -> Self {
        Self { column, expected }
    }
}

/// Shared handle to the record store.
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<Database>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl RecordStore {
    /// Wrap a connected database; `change_buffer` bounds undelivered events.
    #[must_use]
    pub fn new(db: Arc<Database>, change_buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(change_buffer.max(1));
        Self { db, changes }
    }

    /// Subscribe to change events committed after this call.
    #[must_use]
    pub fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Insert `record` unless its id already exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport or schema failure.
    pub async fn insert<R: Record>(&self, record: &R) -> Result<Inserted<R>> {
        let mut conn = self.db.acquire().await?;
        let outcome = insert_in(&mut conn, record).await?;
        if outcome == Inserted::New {
            self.publish(R::COLLECTION, record.id());
        }
        Ok(outcome)
    }

    /// Overwrite `record`, optionally only when `guard` holds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport or schema failure.
    pub async fn replace<R: Record>(&self, record: &R, guard: Option<Guard<'_>>) -> Result<Replaced> {
        let mut conn = self.db.acquire().await?;
        let outcome = replace_in(&mut conn, record, guard).await?;
        if outcome == Replaced::Updated {
            self.publish(R::COLLECTION, record.id());
        }
        Ok(outcome)
    }

    /// Hard-delete a record; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport or schema failure.
    pub async fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let mut conn = self.db.acquire().await?;
        let removed = delete_in(&mut conn, collection, id).await?;
        if removed {
            self.publish(collection, id);
        }
        Ok(removed)
    }

    /// Fetch one record by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport, schema, or decode failure.
    pub async fn get<R: Record>(&self, id: &str) -> Result<Option<R>> {
        let mut conn = self.db.acquire().await?;
        get_in(&mut conn, id).await
    }

    /// Fetch the full collection in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport, schema, or decode failure.
    pub async fn list<R: Record>(&self) -> Result<Vec<R>> {
        let mut conn = self.db.acquire().await?;
        let sql = format!("SELECT doc FROM {} ORDER BY rowid ASC", R::COLLECTION.table());
        let docs: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&mut *conn).await?;
        decode_all(docs)
    }

    /// Fetch records whose key `column` equals `value`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport, schema, or decode failure.
    pub async fn find_by<R: Record>(&self, column: &'static str, value: &str) -> Result<Vec<R>> {
        let mut conn = self.db.acquire().await?;
        find_by_in(&mut conn, column, value).await
    }

    /// Read the change counter of every collection.
    ///
    /// Counters move on any committed write to the file, whichever
    /// connection or process made it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport or schema failure.
    pub async fn versions(&self) -> Result<Versions> {
        let mut conn = self.db.acquire().await?;
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT collection, version FROM collection_versions")
                .fetch_all(&mut *conn)
                .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(table, version)| Collection::from_table(&table).map(|c| (c, version)))
            .collect())
    }

    /// Start a transaction; events are published when it commits.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the transaction cannot be opened.
    pub async fn begin(&self) -> Result<StoreTx<'_>> {
        let tx = self.db.begin().await?;
        Ok(StoreTx {
            tx,
            store: self,
            touched: Vec::new(),
        })
    }

    fn publish(&self, collection: Collection, id: &str) {
        debug!(%collection, id, "store change committed");
        // No receivers simply means nobody is mirroring yet.
        let _ = self.changes.send(ChangeEvent {
            collection,
            id: id.to_owned(),
        });
    }
}

/// A unit of work spanning several writes.
///
/// Dropping without [`commit`](Self::commit) rolls back.
pub struct StoreTx<'a> {
    tx: Transaction<'static, Sqlite>,
    store: &'a RecordStore,
    touched: Vec<ChangeEvent>,
}

impl StoreTx<'_> {
    /// Transactional [`RecordStore::replace`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport or schema failure.
    pub async fn replace<R: Record>(&mut self, record: &R, guard: Option<Guard<'_>>) -> Result<Replaced> {
        let outcome = replace_in(&mut self.tx, record, guard).await?;
        if outcome == Replaced::Updated {
            self.touch(R::COLLECTION, record.id());
        }
        Ok(outcome)
    }

    /// Transactional [`RecordStore::delete`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport or schema failure.
    pub async fn delete(&mut self, collection: Collection, id: &str) -> Result<bool> {
        let removed = delete_in(&mut self.tx, collection, id).await?;
        if removed {
            self.touch(collection, id);
        }
        Ok(removed)
    }

    /// Transactional [`RecordStore::get`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport, schema, or decode failure.
    pub async fn get<R: Record>(&mut self, id: &str) -> Result<Option<R>> {
        get_in(&mut self.tx, id).await
    }

    /// Transactional [`RecordStore::find_by`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on transport, schema, or decode failure.
    pub async fn find_by<R: Record>(&mut self, column: &'static str, value: &str) -> Result<Vec<R>> {
        find_by_in(&mut self.tx, column, value).await
    }

    /// Commit and publish change events for every write made.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the commit fails; nothing is published.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        for event in self.touched {
            self.store.publish(event.collection, &event.id);
        }
        Ok(())
    }

    fn touch(&mut self, collection: Collection, id: &str) {
        self.touched.push(ChangeEvent {
            collection,
            id: id.to_owned(),
        });
    }
}

fn decode_all<R: Record>(docs: Vec<String>) -> Result<Vec<R>> {
    docs.iter()
        .map(|doc| serde_json::from_str(doc).map_err(AppError::from))
        .collect()
}

async fn insert_in<R: Record>(conn: &mut SqliteConnection, record: &R) -> Result<Inserted<R>> {
    let doc = serde_json::to_string(record)?;
    let keys = record.key_columns();

    let mut columns = String::from("id, doc");
    let mut params = String::from("?1, ?2");
    for (idx, (column, _)) in keys.iter().enumerate() {
        let _ = write!(columns, ", {column}");
        let _ = write!(params, ", ?{}", idx + 3);
    }
    // Table and column names come from `Record` impls, never from input.
    let sql = format!(
        "INSERT INTO {} ({columns}) VALUES ({params}) ON CONFLICT(id) DO NOTHING",
        R::COLLECTION.table()
    );

    let mut query = sqlx::query(&sql).bind(record.id()).bind(&doc);
    for (_, value) in keys {
        query = query.bind(value);
    }

    match query.execute(&mut *conn).await {
        Ok(done) if done.rows_affected() == 1 => Ok(Inserted::New),
        Ok(_) => match get_in::<R>(conn, record.id()).await? {
            Some(existing) if existing == *record => Ok(Inserted::Retried),
            Some(existing) => Ok(Inserted::IdTaken(existing)),
            None => Err(AppError::NotFound(format!(
                "{} {} vanished during insert",
                R::COLLECTION,
                record.id()
            ))),
        },
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(Inserted::KeyTaken),
        Err(err) => Err(err.into()),
    }
}

async fn replace_in<R: Record>(
    conn: &mut SqliteConnection,
    record: &R,
    guard: Option<Guard<'_>>,
) -> Result<Replaced> {
    let doc = serde_json::to_string(record)?;
    let keys = record.key_columns();

    let mut assignments = String::from("doc = ?1");
    for (idx, (column, _)) in keys.iter().enumerate() {
        let _ = write!(assignments, ", {column} = ?{}", idx + 2);
    }
    let id_param = keys.len() + 2;
    let mut sql = format!(
        "UPDATE {} SET {assignments} WHERE id = ?{id_param}",
        R::COLLECTION.table()
    );
    if let Some(guard) = guard {
        let _ = write!(sql, " AND {} IS ?{}", guard.column, id_param + 1);
    }

    let mut query = sqlx::query(&sql).bind(&doc);
    for (_, value) in keys {
        query = query.bind(value);
    }
    query = query.bind(record.id());
    if let Some(guard) = guard {
        query = query.bind(guard.expected);
    }

    match query.execute(&mut *conn).await {
        Ok(done) if done.rows_affected() == 0 => Ok(Replaced::Missed),
        Ok(_) => Ok(Replaced::Updated),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(Replaced::KeyTaken),
        Err(err) => Err(err.into()),
    }
}

async fn delete_in(conn: &mut SqliteConnection, collection: Collection, id: &str) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", collection.table());
    let done = sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(done.rows_affected() > 0)
}

async fn get_in<R: Record>(conn: &mut SqliteConnection, id: &str) -> Result<Option<R>> {
    let sql = format!("SELECT doc FROM {} WHERE id = ?1", R::COLLECTION.table());
    let doc: Option<String> = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    doc.map(|d| serde_json::from_str(&d).map_err(AppError::from))
        .transpose()
}

async fn find_by_in<R: Record>(
    conn: &mut SqliteConnection,
    column: &'static str,
    value: &str,
) -> Result<Vec<R>> {
    let sql = format!(
        "SELECT doc FROM {} WHERE {column} = ?1 ORDER BY rowid ASC",
        R::COLLECTION.table()
    );
    let docs: Vec<String> = sqlx::query_scalar(&sql)
        .bind(value)
        .fetch_all(&mut *conn)
        .await?;
    decode_all(docs)
}
