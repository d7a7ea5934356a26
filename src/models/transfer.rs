//! Ownership transfer request model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lead::Lead;

/// Lifecycle status for a transfer request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Awaiting the owner's decision.
    Pending,
    /// Owner handed the lead over.
    Accepted,
    /// Owner declined, or the request was superseded.
    Rejected,
}

impl TransferStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// A proposal to move a lead from its owner to the requester.
///
/// Requests are never deleted; resolution only changes `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Unique record identifier.
    pub id: String,
    /// Target lead.
    pub lead_id: String,
    /// Lead display name at request time, kept for the audit trail.
    pub lead_name: String,
    /// Actor asking for the lead.
    pub from_user: String,
    /// Owner of the lead at request time.
    pub to_user: String,
    /// Current lifecycle status.
    pub status: TransferStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Resolution timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TransferRequest {
    /// Construct a pending request from `from_user` for `lead`.
    #[must_use]
    pub fn new(lead: &Lead, from_user: String, to_user: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            lead_id: lead.id.clone(),
            lead_name: lead.name.clone(),
            from_user,
            to_user,
            status: TransferStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Whether the request still awaits a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == TransferStatus::Pending
    }
}
