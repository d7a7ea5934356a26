use serde_json::{json, Map, Value};

use lead_sync::models::chat::ChatChannel;
use lead_sync::models::lead::{Candidate, Lead, LeadPatch, LeadStatus, PRICE_LIST_KEY};
use lead_sync::models::log::{LogAction, OperationLog};
use lead_sync::models::transfer::{TransferRequest, TransferStatus};
use lead_sync::AppError;

fn owned_lead() -> Lead {
    Lead {
        id: "L1".into(),
        name: "Acme Bar".into(),
        owner: Some("diego".into()),
        ..Lead::default()
    }
}

// ─── Lead documents ─────────────────────────────────────────

#[test]
fn lead_document_uses_camel_case_keys() {
    let mut lead = owned_lead();
    lead.next_action_date = Some("2024-05-02".into());
    lead.status = LeadStatus::Negotiating;

    let doc = serde_json::to_value(&lead).expect("serialize");
    assert_eq!(doc["nextActionDate"], "2024-05-02");
    assert_eq!(doc["status"], "negotiating");
    assert_eq!(doc["isClient"], false);
    assert!(doc.get("category").is_none());
}

#[test]
fn unknown_fields_survive_a_round_trip() {
    let raw = json!({
        "id": "L9",
        "name": "Old Shop",
        "status": "contacted",
        "owner": "gaston",
        "legacyScore": 42,
        "tags": ["vip"]
    });

    let lead: Lead = serde_json::from_value(raw.clone()).expect("deserialize");
    assert_eq!(lead.status, LeadStatus::Contacted);
    assert_eq!(lead.extra.get("legacyScore"), Some(&json!(42)));

    let back = serde_json::to_value(&lead).expect("serialize");
    assert_eq!(back["legacyScore"], 42);
    assert_eq!(back["tags"], json!(["vip"]));
}

#[test]
fn missing_status_defaults_to_cold() {
    let lead: Lead = serde_json::from_value(json!({"id": "L2", "name": "Bare"})).expect("lead");
    assert_eq!(lead.status, LeadStatus::Cold);
    assert!(lead.owner.is_none());
}

#[test]
fn blank_follow_up_date_counts_as_unset() {
    let mut lead = owned_lead();
    lead.next_action_date = Some("   ".into());
    assert_eq!(lead.follow_up_date(), None);

    lead.next_action_date = Some("2024-05-02".into());
    assert_eq!(lead.follow_up_date(), Some("2024-05-02"));
}

// ─── Patches ────────────────────────────────────────────────

#[test]
fn status_change_is_a_contact_and_reports_previous() {
    let mut lead = owned_lead();
    let effect = LeadPatch {
        status: Some(LeadStatus::Contacted),
        ..LeadPatch::default()
    }
    .apply(&mut lead);

    assert!(effect.changed);
    assert!(effect.contact);
    assert_eq!(effect.previous_status, Some(LeadStatus::Cold));
    assert_eq!(lead.status, LeadStatus::Contacted);
}

#[test]
fn phone_edit_is_not_a_contact() {
    let mut lead = owned_lead();
    let effect = LeadPatch {
        phone: Some("555-0100".into()),
        ..LeadPatch::default()
    }
    .apply(&mut lead);

    assert!(effect.changed);
    assert!(!effect.contact);
    assert_eq!(effect.previous_status, None);
}

#[test]
fn unchanged_values_report_nothing() {
    let mut lead = owned_lead();
    lead.notes = Some("called".into());
    let effect = LeadPatch {
        notes: Some("called".into()),
        status: Some(LeadStatus::Cold),
        ..LeadPatch::default()
    }
    .apply(&mut lead);

    assert!(!effect.changed);
    assert!(!effect.contact);
}

#[test]
fn price_list_extension_counts_as_contact() {
    let mut lead = owned_lead();
    let mut extra = Map::new();
    extra.insert(PRICE_LIST_KEY.into(), json!({"beer": 3.5}));
    let effect = LeadPatch {
        extra,
        ..LeadPatch::default()
    }
    .apply(&mut lead);

    assert!(effect.contact);
    assert_eq!(lead.extra[PRICE_LIST_KEY]["beer"], 3.5);
}

#[test]
fn null_extension_value_removes_the_key() {
    let mut lead = owned_lead();
    lead.extra.insert("legacyScore".into(), json!(7));
    let mut extra = Map::new();
    extra.insert("legacyScore".into(), Value::Null);

    let effect = LeadPatch {
        extra,
        ..LeadPatch::default()
    }
    .apply(&mut lead);

    assert!(effect.changed);
    assert!(!lead.extra.contains_key("legacyScore"));
}

#[test]
fn extension_keys_may_not_shadow_fields() {
    let mut extra = Map::new();
    extra.insert("owner".into(), json!("gaston"));
    let err = LeadPatch {
        extra,
        ..LeadPatch::default()
    }
    .validate()
    .expect_err("owner is reserved");
    assert!(matches!(err, AppError::Invalid(msg) if msg.contains("owner")));
}

#[test]
fn blank_rename_is_invalid() {
    let err = LeadPatch {
        name: Some("  ".into()),
        ..LeadPatch::default()
    }
    .validate()
    .expect_err("blank name");
    assert!(matches!(err, AppError::Invalid(_)));
}

// ─── Candidates and satellites ──────────────────────────────

#[test]
fn candidate_becomes_unowned_lead() {
    let candidate: Candidate = serde_json::from_value(json!({
        "name": "Nuevo Bar",
        "category": "bar",
        "rating": 4.5
    }))
    .expect("candidate");

    let lead = Lead::from(candidate);
    assert!(!lead.id.is_empty());
    assert!(lead.owner.is_none());
    assert_eq!(lead.category.as_deref(), Some("bar"));
    assert_eq!(lead.extra["rating"], 4.5);
}

#[test]
fn candidate_keeps_source_id() {
    let candidate = Candidate {
        id: Some("place-7".into()),
        name: "Cafe".into(),
        ..Candidate::default()
    };
    assert_eq!(Lead::from(candidate).id, "place-7");
}

#[test]
fn transfer_request_starts_pending() {
    let request = TransferRequest::new(&owned_lead(), "gaston".into(), "diego".into());
    assert_eq!(request.status, TransferStatus::Pending);
    assert_eq!(request.lead_name, "Acme Bar");
    assert!(request.is_pending());

    let doc = serde_json::to_value(&request).expect("serialize");
    assert_eq!(doc["fromUser"], "gaston");
    assert_eq!(doc["status"], "pending");
}

#[test]
fn log_actions_serialize_screaming_snake() {
    let entry = OperationLog::new("diego", LogAction::TransferAccept, "Acme Bar");
    let doc = serde_json::to_value(&entry).expect("serialize");
    assert_eq!(doc["action"], "TRANSFER_ACCEPT");
    assert_eq!(doc["actor"], "diego");
}

#[test]
fn channel_membership() {
    let open = ChatChannel::new("general".into(), Vec::new(), "diego".into());
    assert!(open.admits("anyone"));

    let closed = ChatChannel::new("deals".into(), vec!["diego".into()], "diego".into());
    assert!(closed.admits("diego"));
    assert!(!closed.admits("gaston"));
}
