//! Point-to-point direct task model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for a direct task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Awaiting the recipient.
    Pending,
    /// Recipient marked it done; terminal.
    Completed,
}

impl TaskStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

/// An actionable message sent from one actor to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectTask {
    /// Unique record identifier.
    pub id: String,
    /// Sender.
    pub from_user: String,
    /// Recipient; the only actor allowed to complete the task.
    pub to_user: String,
    /// Task text.
    pub message: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Completion timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DirectTask {
    /// Construct a pending task with a generated identifier.
    #[must_use]
    pub fn new(from_user: String, to_user: String, message: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_user,
            to_user,
            message,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
