//! Acting identity supplied by the session layer.
//!
//! The core performs no authentication; it trusts the actor name and the
//! administrator flag it is handed.

/// Identity of the actor driving a repository handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor: String,
    is_administrator: bool,
}

impl ActorContext {
    /// Construct a context for `actor`.
    #[must_use]
    pub fn new(actor: impl Into<String>, is_administrator: bool) -> Self {
        Self {
            actor: actor.into(),
            is_administrator,
        }
    }

    /// The acting identity.
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Whether the actor may use administrative bypasses.
    #[must_use]
    pub fn is_administrator(&self) -> bool {
        self.is_administrator
    }

    /// Whether the actor may edit a record owned by `owner`.
    #[must_use]
    pub fn may_manage(&self, owner: Option<&str>) -> bool {
        self.is_administrator || owner == Some(self.actor.as_str())
    }
}
