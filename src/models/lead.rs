//! Lead model, pipeline status, and the discovery candidate shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Pipeline stage of a lead.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// Not yet contacted; initial stage.
    #[default]
    Cold,
    /// First contact made.
    Contacted,
    /// Commercial terms under discussion.
    Negotiating,
    /// Converted into a paying client.
    Client,
}

impl LeadStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Contacted => "contacted",
            Self::Negotiating => "negotiating",
            Self::Client => "client",
        }
    }
}

/// Extension key that counts as a contact event when edited.
pub const PRICE_LIST_KEY: &str = "priceList";

/// Document keys owned by the typed [`Lead`] fields.
const KNOWN_FIELDS: [&str; 16] = [
    "id",
    "name",
    "category",
    "location",
    "phone",
    "email",
    "contactPerson",
    "notes",
    "status",
    "owner",
    "nextAction",
    "nextActionDate",
    "lastContactDate",
    "savedAt",
    "isClient",
    "saleValue",
];

/// A prospect/account record tracked through the sales pipeline.
///
/// Fields not modelled here are kept verbatim in [`Lead::extra`] so a
/// read-modify-write never drops legacy attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    /// Stable unique identifier.
    pub id: String,
    /// Display name; unique across leads.
    pub name: String,
    /// Business category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// City or address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Contact phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Contact email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Named contact at the prospect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_person: Option<String>,
    /// Free-text notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Pipeline stage.
    #[serde(default)]
    pub status: LeadStatus,
    /// Exclusive managing actor; unset only before the first save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Scheduled follow-up description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
    /// Scheduled follow-up date (`YYYY-MM-DD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action_date: Option<String>,
    /// Date of the last recorded contact (`YYYY-MM-DD`), auto-stamped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contact_date: Option<String>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    /// Whether the lead converted into a client.
    #[serde(default)]
    pub is_client: bool,
    /// Sale value recorded at conversion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_value: Option<f64>,
    /// Unrecognized fields, preserved round-trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Lead {
    /// Construct an unowned lead with a generated identifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Follow-up date, treating an empty string as unset.
    #[must_use]
    pub fn follow_up_date(&self) -> Option<&str> {
        self.next_action_date
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    /// Whether `actor` is the current owner.
    #[must_use]
    pub fn is_owned_by(&self, actor: &str) -> bool {
        self.owner.as_deref() == Some(actor)
    }
}

/// Partial update applied to a lead by its owner.
///
/// Ownership is deliberately absent; it only moves through the ownership
/// protocol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadPatch {
    /// Display name.
    pub name: Option<String>,
    /// Business category.
    pub category: Option<String>,
    /// City or address.
    pub location: Option<String>,
    /// Contact phone number.
    pub phone: Option<String>,
    /// Contact email address.
    pub email: Option<String>,
    /// Named contact at the prospect.
    pub contact_person: Option<String>,
    /// Free-text notes.
    pub notes: Option<String>,
    /// New pipeline stage.
    pub status: Option<LeadStatus>,
    /// New follow-up description.
    pub next_action: Option<String>,
    /// New follow-up date.
    pub next_action_date: Option<String>,
    /// Client conversion flag.
    pub is_client: Option<bool>,
    /// Sale value at conversion.
    pub sale_value: Option<f64>,
    /// Extension keys to set; `Value::Null` removes the key.
    pub extra: Map<String, Value>,
}

/// What an applied patch changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchEffect {
    /// Any field differs from the previous value.
    pub changed: bool,
    /// A contact-relevant field changed.
    pub contact: bool,
    /// Previous status, when the status changed.
    pub previous_status: Option<LeadStatus>,
}

fn assign<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(v) if *slot != v => {
            *slot = v;
            true
        }
        _ => false,
    }
}

fn assign_opt<T: PartialEq>(slot: &mut Option<T>, value: Option<T>) -> bool {
    assign(slot, value.map(Some))
}

impl LeadPatch {
    /// Reject extension keys that shadow a typed field.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Invalid` naming the first offending key.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(crate::AppError::Invalid("lead name must not be blank".into()));
            }
        }
        match self.extra.keys().find(|k| KNOWN_FIELDS.contains(&k.as_str())) {
            Some(key) => Err(crate::AppError::Invalid(format!(
                "extension key {key} shadows a lead field"
            ))),
            None => Ok(()),
        }
    }

    /// Apply this patch to `lead`, reporting what changed.
    pub fn apply(self, lead: &mut Lead) -> PatchEffect {
        let previous = lead.status;
        let mut changed = false;
        changed |= assign(&mut lead.name, self.name);
        changed |= assign_opt(&mut lead.category, self.category);
        changed |= assign_opt(&mut lead.location, self.location);
        changed |= assign_opt(&mut lead.phone, self.phone);
        changed |= assign_opt(&mut lead.email, self.email);
        changed |= assign_opt(&mut lead.contact_person, self.contact_person);
        changed |= assign_opt(&mut lead.next_action_date, self.next_action_date);
        changed |= assign(&mut lead.is_client, self.is_client);
        changed |= assign_opt(&mut lead.sale_value, self.sale_value);

        let status_changed = assign(&mut lead.status, self.status);
        let mut contact = status_changed;
        contact |= assign_opt(&mut lead.notes, self.notes);
        contact |= assign_opt(&mut lead.next_action, self.next_action);

        for (key, value) in self.extra {
            let touched = if value.is_null() {
                lead.extra.remove(&key).is_some()
            } else if lead.extra.get(&key) == Some(&value) {
                false
            } else {
                lead.extra.insert(key.clone(), value);
                true
            };
            if touched && key == PRICE_LIST_KEY {
                contact = true;
            }
            changed |= touched;
        }

        PatchEffect {
            changed: changed || contact,
            contact,
            previous_status: status_changed.then_some(previous),
        }
    }
}

/// A not-yet-owned prospect produced by the discovery boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Source-assigned identifier, if the discovery source provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Business category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// City or address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Contact phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Contact email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Named contact at the prospect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_person: Option<String>,
    /// Free-text notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Source attributes carried onto the lead.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Candidate> for Lead {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: candidate.name,
            category: candidate.category,
            location: candidate.location,
            phone: candidate.phone,
            email: candidate.email,
            contact_person: candidate.contact_person,
            notes: candidate.notes,
            extra: candidate.extra,
            ..Self::default()
        }
    }
}
