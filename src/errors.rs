//! Error types shared across the application.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Cause classification for record store failures.
///
/// Callers use this to choose between a blocking recovery screen and a
/// non-blocking "working with stale data" notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// The backing collection (table) was never provisioned.
    BackingCollectionMissing,
    /// The store rejected the query for lack of permission.
    PermissionDenied,
    /// Network, locking, or otherwise unclassified failure.
    Transient,
}

impl StoreErrorKind {
    /// Whether this failure must block the UI until a manual retry.
    #[must_use]
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::BackingCollectionMissing | Self::PermissionDenied)
    }

    fn label(self) -> &'static str {
        match self {
            Self::BackingCollectionMissing => "missing collection",
            Self::PermissionDenied => "permission denied",
            Self::Transient => "transient",
        }
    }
}

/// Why a lead write collided with existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Another lead already carries this name.
    DuplicateName,
    /// Another lead already carries this identifier.
    DuplicateId,
    /// The lead already has an owner and cannot be claimed.
    AlreadyOwned,
    /// Ownership moved while the write was in flight.
    OwnerChanged,
}

/// Details of a lead conflict, surfaced so the actor can resolve it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Conflict classification.
    pub kind: ConflictKind,
    /// Identifier of the existing lead that won.
    pub lead_id: String,
    /// Owner of the existing lead, if it has one.
    pub owner: Option<String>,
}

impl Display for Conflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let what = match self.kind {
            ConflictKind::DuplicateName => "lead name already registered",
            ConflictKind::DuplicateId => "lead id already registered",
            ConflictKind::AlreadyOwned => "lead already owned",
            ConflictKind::OwnerChanged => "lead owner changed",
        };
        match &self.owner {
            Some(owner) => write!(f, "{what} ({}, owner {owner})", self.lead_id),
            None => write!(f, "{what} ({})", self.lead_id),
        }
    }
}

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Record store failure, classified by cause.
    Store(StoreErrorKind, String),
    /// Uniqueness or ownership collision.
    Conflict(Conflict),
    /// Actor is not allowed to perform the requested action.
    Unauthorized(String),
    /// A pending transfer request already exists for this lead and requester.
    DuplicatePendingRequest(String),
    /// Transfer request or task was already resolved.
    AlreadyResolved(String),
    /// Record is absent from the last-seen snapshot or the store.
    NotFound(String),
    /// Caller supplied an argument that violates a precondition.
    Invalid(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Classification of a store failure, if this is one.
    #[must_use]
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            Self::Store(kind, _) => Some(*kind),
            _ => None,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Store(kind, msg) => write!(f, "store ({}): {msg}", kind.label()),
            Self::Conflict(conflict) => write!(f, "conflict: {conflict}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::DuplicatePendingRequest(msg) => write!(f, "duplicate pending request: {msg}"),
            Self::AlreadyResolved(msg) => write!(f, "already resolved: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(StoreErrorKind::Transient, format!("malformed document: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(classify(&err), err.to_string())
    }
}

/// Map a `sqlx` failure onto the store error taxonomy.
fn classify(err: &sqlx::Error) -> StoreErrorKind {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            // SQLITE_AUTH = 23, SQLITE_READONLY = 8, SQLITE_PERM = 3
            let code = db_err.code();
            if message.contains("no such table") {
                StoreErrorKind::BackingCollectionMissing
            } else if matches!(code.as_deref(), Some("23" | "8" | "3"))
                || message.contains("not authorized")
                || message.contains("readonly")
            {
                StoreErrorKind::PermissionDenied
            } else {
                StoreErrorKind::Transient
            }
        }
        _ => StoreErrorKind::Transient,
    }
}
