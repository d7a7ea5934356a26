//! Mapping between domain models and store collections.

use std::fmt::{Display, Formatter};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::chat::{ChatChannel, ChatMessage};
use crate::models::lead::Lead;
use crate::models::log::OperationLog;
use crate::models::task::DirectTask;
use crate::models::transfer::TransferRequest;

/// Logical collections held by the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Lead records.
    Leads,
    /// Operation log entries.
    Logs,
    /// Ownership transfer requests.
    TransferRequests,
    /// Direct tasks between actors.
    DirectTasks,
    /// Chat messages.
    ChatMessages,
    /// Chat channels.
    ChatChannels,
}

impl Collection {
    /// Every collection, in bootstrap order.
    pub const ALL: [Self; 6] = [
        Self::Leads,
        Self::Logs,
        Self::TransferRequests,
        Self::DirectTasks,
        Self::ChatMessages,
        Self::ChatChannels,
    ];

    /// Backing table name.
    #[must_use]
    pub fn table(self) -> &'static str {
        match self {
            Self::Leads => "leads",
            Self::Logs => "logs",
            Self::TransferRequests => "transfer_requests",
            Self::DirectTasks => "direct_tasks",
            Self::ChatMessages => "chat_messages",
            Self::ChatChannels => "chat_channels",
        }
    }

    /// Collection backed by `table`, if any.
    #[must_use]
    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.table() == table)
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// A document that lives in exactly one collection.
pub trait Record:
    Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + Unpin + 'static
{
    /// Collection holding records of this type.
    const COLLECTION: Collection;

    /// Stable record identifier.
    fn id(&self) -> &str;

    /// Key columns mirrored out of the document, as `(column, value)`.
    ///
    /// Column names must match the table definition in the schema.
    fn key_columns(&self) -> Vec<(&'static str, Option<String>)> {
        Vec::new()
    }
}

impl Record for Lead {
    const COLLECTION: Collection = Collection::Leads;

    fn id(&self) -> &str {
        &self.id
    }

    fn key_columns(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("name_key", Some(self.name.trim().to_owned())),
            ("owner", self.owner.clone()),
        ]
    }
}

impl Record for OperationLog {
    const COLLECTION: Collection = Collection::Logs;

    fn id(&self) -> &str {
        &self.id
    }

    fn key_columns(&self) -> Vec<(&'static str, Option<String>)> {
        vec![("actor", Some(self.actor.clone()))]
    }
}

impl Record for TransferRequest {
    const COLLECTION: Collection = Collection::TransferRequests;

    fn id(&self) -> &str {
        &self.id
    }

    fn key_columns(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("lead_id", Some(self.lead_id.clone())),
            ("from_user", Some(self.from_user.clone())),
            ("to_user", Some(self.to_user.clone())),
            ("status", Some(self.status.as_str().to_owned())),
        ]
    }
}

impl Record for DirectTask {
    const COLLECTION: Collection = Collection::DirectTasks;

    fn id(&self) -> &str {
        &self.id
    }

    fn key_columns(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("to_user", Some(self.to_user.clone())),
            ("status", Some(self.status.as_str().to_owned())),
        ]
    }
}

impl Record for ChatMessage {
    const COLLECTION: Collection = Collection::ChatMessages;

    fn id(&self) -> &str {
        &self.id
    }

    fn key_columns(&self) -> Vec<(&'static str, Option<String>)> {
        vec![("channel_id", Some(self.channel_id.clone()))]
    }
}

impl Record for ChatChannel {
    const COLLECTION: Collection = Collection::ChatChannels;

    fn id(&self) -> &str {
        &self.id
    }
}
