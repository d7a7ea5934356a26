//! `SQLite` schema bootstrap logic.
//!
//! Every collection is a table of JSON documents keyed by record id, plus the
//! handful of key columns the store needs for constraints and filters. All
//! statements use `IF NOT EXISTS` and are safe to re-run on every startup.
//!
//! `collection_versions` holds one counter per collection. Triggers bump it
//! on every insert, update and delete, so any connection to the same file
//! (including other processes) can tell that a collection changed.

use std::fmt::Write as _;

use sqlx::SqlitePool;

use crate::config::NameMatch;
use crate::Result;

use super::record::Collection;

/// Apply all table definitions to the connected `SQLite` database.
///
/// `name_match` picks the collation of the lead name key. It only takes
/// effect when the `leads` table is first created.
///
/// # Errors
///
/// Returns `AppError::Store` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool, name_match: NameMatch) -> Result<()> {
    let collation = match name_match {
        NameMatch::Exact => "BINARY",
        NameMatch::CaseInsensitive => "NOCASE",
    };

    let mut ddl = format!(
        r"
CREATE TABLE IF NOT EXISTS leads (
    id          TEXT PRIMARY KEY NOT NULL,
    doc         TEXT NOT NULL,
    name_key    TEXT NOT NULL COLLATE {collation},
    owner       TEXT
);

CREATE TABLE IF NOT EXISTS logs (
    id          TEXT PRIMARY KEY NOT NULL,
    doc         TEXT NOT NULL,
    actor       TEXT
);

CREATE TABLE IF NOT EXISTS transfer_requests (
    id          TEXT PRIMARY KEY NOT NULL,
    doc         TEXT NOT NULL,
    lead_id     TEXT NOT NULL,
    from_user   TEXT NOT NULL,
    to_user     TEXT NOT NULL,
    status      TEXT NOT NULL CHECK(status IN ('pending','accepted','rejected'))
);

CREATE TABLE IF NOT EXISTS direct_tasks (
    id          TEXT PRIMARY KEY NOT NULL,
    doc         TEXT NOT NULL,
    to_user     TEXT NOT NULL,
    status      TEXT NOT NULL CHECK(status IN ('pending','completed'))
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id          TEXT PRIMARY KEY NOT NULL,
    doc         TEXT NOT NULL,
    channel_id  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_channels (
    id          TEXT PRIMARY KEY NOT NULL,
    doc         TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_leads_name ON leads(name_key);
CREATE INDEX IF NOT EXISTS idx_leads_owner ON leads(owner);
CREATE UNIQUE INDEX IF NOT EXISTS idx_transfer_pending
    ON transfer_requests(lead_id, from_user) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_transfer_lead ON transfer_requests(lead_id);
CREATE INDEX IF NOT EXISTS idx_task_recipient ON direct_tasks(to_user);
CREATE INDEX IF NOT EXISTS idx_message_channel ON chat_messages(channel_id);

CREATE TABLE IF NOT EXISTS collection_versions (
    collection  TEXT PRIMARY KEY NOT NULL,
    version     INTEGER NOT NULL DEFAULT 0
);
"
    );

    for collection in Collection::ALL {
        let table = collection.table();
        let _ = writeln!(
            ddl,
            "INSERT OR IGNORE INTO collection_versions (collection, version) VALUES ('{table}', 0);"
        );
        for event in ["INSERT", "UPDATE", "DELETE"] {
            let _ = writeln!(
                ddl,
                "CREATE TRIGGER IF NOT EXISTS {table}_{suffix}_version AFTER {event} ON {table} \
                 BEGIN UPDATE collection_versions SET version = version + 1 \
                 WHERE collection = '{table}'; END;",
                suffix = event.to_ascii_lowercase(),
            );
        }
    }

    sqlx::raw_sql(&ddl).execute(pool).await?;
    Ok(())
}
