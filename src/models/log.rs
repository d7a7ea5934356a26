//! Append-only operation log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of mutation recorded in the operation log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogAction {
    /// Lead claimed by its first owner.
    Create,
    /// Lead fields edited without a status change.
    Update,
    /// Lead pipeline status changed.
    StatusChange,
    /// Lead hard-deleted.
    Delete,
    /// Bulk import finished.
    Import,
    /// Ownership transfer requested.
    TransferRequest,
    /// Ownership transfer accepted.
    TransferAccept,
    /// Ownership transfer rejected.
    TransferReject,
    /// Administrator reassigned ownership.
    Reassign,
    /// Direct task sent.
    TaskCreate,
    /// Direct task completed.
    TaskComplete,
    /// Chat channel created.
    ChannelCreate,
    /// Chat message posted.
    MessagePost,
}

/// A write-once audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationLog {
    /// Unique record identifier.
    pub id: String,
    /// Acting identity.
    pub actor: String,
    /// Kind of mutation.
    pub action: LogAction,
    /// Human-readable detail.
    pub detail: String,
    /// Time of the mutation.
    pub timestamp: DateTime<Utc>,
}

impl OperationLog {
    /// Construct a log entry stamped now.
    #[must_use]
    pub fn new(actor: &str, action: LogAction, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            actor: actor.to_owned(),
            action,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}
