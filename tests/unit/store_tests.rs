use std::sync::Arc;

use lead_sync::config::NameMatch;
use lead_sync::models::lead::Lead;
use lead_sync::models::transfer::{TransferRequest, TransferStatus};
use lead_sync::persistence::store::{Guard, Inserted, Replaced};
use lead_sync::persistence::{db, Collection, RecordStore};

async fn memory_store(name_match: NameMatch) -> RecordStore {
    let pool = db::connect_memory(name_match).await.expect("db connect");
    RecordStore::new(Arc::new(pool), 16)
}

fn lead(id: &str, name: &str, owner: &str) -> Lead {
    Lead {
        id: id.into(),
        name: name.into(),
        owner: Some(owner.into()),
        ..Lead::default()
    }
}

#[tokio::test]
async fn in_memory_connect_creates_all_collections() {
    let pool = db::connect_memory(NameMatch::Exact)
        .await
        .expect("in-memory connect should succeed");

    for collection in Collection::ALL {
        let query = format!("SELECT COUNT(*) FROM {}", collection.table());
        let count: i64 = sqlx::query_scalar(&query)
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("table '{collection}' should be queryable: {e}"));
        assert_eq!(count, 0, "table '{collection}' should start empty");
    }
}

#[tokio::test]
async fn file_connect_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("leads.db");

    let first = db::connect(&path, NameMatch::Exact).await.expect("first open");
    first.close().await;
    let second = db::connect(&path, NameMatch::Exact).await.expect("second open");
    let store = RecordStore::new(Arc::new(second), 4);

    store.insert(&lead("L1", "Acme Bar", "diego")).await.expect("insert");
    assert_eq!(store.list::<Lead>().await.expect("list").len(), 1);
}

// ─── Insert outcomes ────────────────────────────────────────

#[tokio::test]
async fn insert_then_identical_retry() {
    let store = memory_store(NameMatch::Exact).await;
    let record = lead("L1", "Acme Bar", "diego");

    assert_eq!(store.insert(&record).await.expect("insert"), Inserted::New);
    assert_eq!(store.insert(&record).await.expect("retry"), Inserted::Retried);
    assert_eq!(store.list::<Lead>().await.expect("list").len(), 1);
}

#[tokio::test]
async fn different_record_with_same_id_is_reported() {
    let store = memory_store(NameMatch::Exact).await;
    store
        .insert(&lead("L1", "Acme Bar", "diego"))
        .await
        .expect("insert");

    let outcome = store
        .insert(&lead("L1", "Other Name", "gaston"))
        .await
        .expect("insert");
    match outcome {
        Inserted::IdTaken(existing) => assert_eq!(existing.owner.as_deref(), Some("diego")),
        other => panic!("expected IdTaken, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_name_is_a_key_collision() {
    let store = memory_store(NameMatch::Exact).await;
    store
        .insert(&lead("L1", "Acme Bar", "diego"))
        .await
        .expect("insert");

    let outcome = store
        .insert(&lead("L2", " Acme Bar ", "gaston"))
        .await
        .expect("insert");
    assert_eq!(outcome, Inserted::KeyTaken);

    // Exact matching keeps differently cased names apart.
    let outcome = store
        .insert(&lead("L3", "ACME BAR", "gaston"))
        .await
        .expect("insert");
    assert_eq!(outcome, Inserted::New);
}

#[tokio::test]
async fn case_insensitive_names_collide() {
    let store = memory_store(NameMatch::CaseInsensitive).await;
    store
        .insert(&lead("L1", "Acme Bar", "diego"))
        .await
        .expect("insert");

    let outcome = store
        .insert(&lead("L2", "acme bar", "gaston"))
        .await
        .expect("insert");
    assert_eq!(outcome, Inserted::KeyTaken);
}

#[tokio::test]
async fn only_one_pending_request_per_lead_and_requester() {
    let store = memory_store(NameMatch::Exact).await;
    let target = lead("L1", "Acme Bar", "diego");

    let first = TransferRequest::new(&target, "gaston".into(), "diego".into());
    assert_eq!(store.insert(&first).await.expect("insert"), Inserted::New);

    let second = TransferRequest::new(&target, "gaston".into(), "diego".into());
    assert_eq!(store.insert(&second).await.expect("insert"), Inserted::KeyTaken);

    // Once resolved, a fresh request is allowed.
    let mut resolved = first.clone();
    resolved.status = TransferStatus::Rejected;
    assert_eq!(
        store.replace(&resolved, None).await.expect("replace"),
        Replaced::Updated
    );
    assert_eq!(store.insert(&second).await.expect("insert"), Inserted::New);
}

// ─── Guarded replace, delete, lookups ───────────────────────

#[tokio::test]
async fn guarded_replace_is_compare_and_set() {
    let store = memory_store(NameMatch::Exact).await;
    let mut record = lead("L1", "Acme Bar", "diego");
    store.insert(&record).await.expect("insert");

    record.notes = Some("called".into());
    let stale = Guard::new("owner", Some("gaston"));
    assert_eq!(
        store.replace(&record, Some(stale)).await.expect("replace"),
        Replaced::Missed
    );

    let current = Guard::new("owner", Some("diego"));
    assert_eq!(
        store.replace(&record, Some(current)).await.expect("replace"),
        Replaced::Updated
    );
    let stored: Lead = store.get("L1").await.expect("get").expect("present");
    assert_eq!(stored.notes.as_deref(), Some("called"));
}

#[tokio::test]
async fn rename_onto_taken_name_is_reported() {
    let store = memory_store(NameMatch::Exact).await;
    store.insert(&lead("L1", "Acme Bar", "diego")).await.expect("insert");
    let mut other = lead("L2", "Beta Cafe", "diego");
    store.insert(&other).await.expect("insert");

    other.name = "Acme Bar".into();
    assert_eq!(
        store.replace(&other, None).await.expect("replace"),
        Replaced::KeyTaken
    );
}

#[tokio::test]
async fn delete_reports_existence() {
    let store = memory_store(NameMatch::Exact).await;
    store.insert(&lead("L1", "Acme Bar", "diego")).await.expect("insert");

    assert!(store.delete(Collection::Leads, "L1").await.expect("delete"));
    assert!(!store.delete(Collection::Leads, "L1").await.expect("delete"));
    assert!(store.get::<Lead>("L1").await.expect("get").is_none());
}

#[tokio::test]
async fn list_and_find_keep_insertion_order() {
    let store = memory_store(NameMatch::Exact).await;
    for (id, name, owner) in [("c", "C", "diego"), ("a", "A", "gaston"), ("b", "B", "diego")] {
        store.insert(&lead(id, name, owner)).await.expect("insert");
    }

    let ids: Vec<String> = store
        .list::<Lead>()
        .await
        .expect("list")
        .into_iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(ids, ["c", "a", "b"]);

    let owned: Vec<String> = store
        .find_by::<Lead>("owner", "diego")
        .await
        .expect("find")
        .into_iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(owned, ["c", "b"]);
}

// ─── Change events ──────────────────────────────────────────

#[tokio::test]
async fn committed_writes_publish_events() {
    let store = memory_store(NameMatch::Exact).await;
    let mut changes = store.changes();

    let record = lead("L1", "Acme Bar", "diego");
    store.insert(&record).await.expect("insert");
    store.insert(&record).await.expect("retry");
    store.delete(Collection::Leads, "L1").await.expect("delete");

    let first = changes.recv().await.expect("insert event");
    assert_eq!(first.collection, Collection::Leads);
    assert_eq!(first.id, "L1");
    // The retry published nothing; the next event is the delete.
    let second = changes.recv().await.expect("delete event");
    assert_eq!(second.id, "L1");
    assert!(changes.try_recv().is_err());
}

#[tokio::test]
async fn transaction_publishes_only_on_commit() {
    let store = memory_store(NameMatch::Exact).await;
    let mut record = lead("L1", "Acme Bar", "diego");
    store.insert(&record).await.expect("insert");
    let mut changes = store.changes();

    record.notes = Some("rolled back".into());
    {
        let mut tx = store.begin().await.expect("begin");
        tx.replace(&record, None).await.expect("replace");
        // Dropped without commit.
    }
    assert!(changes.try_recv().is_err());
    let stored: Lead = store.get("L1").await.expect("get").expect("present");
    assert!(stored.notes.is_none());

    record.notes = Some("kept".into());
    let mut tx = store.begin().await.expect("begin");
    tx.replace(&record, None).await.expect("replace");
    tx.commit().await.expect("commit");

    assert_eq!(changes.recv().await.expect("event").id, "L1");
    let stored: Lead = store.get("L1").await.expect("get").expect("present");
    assert_eq!(stored.notes.as_deref(), Some("kept"));
}

#[tokio::test]
async fn versions_count_writes_from_any_handle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("leads.db");
    let ours = RecordStore::new(Arc::new(db::connect(&path, NameMatch::Exact).await.expect("db")), 4);
    let theirs = RecordStore::new(Arc::new(db::connect(&path, NameMatch::Exact).await.expect("db")), 4);

    let before = ours.versions().await.expect("versions");
    assert_eq!(before.len(), Collection::ALL.len());

    theirs
        .insert(&lead("L1", "Acme Bar", "diego"))
        .await
        .expect("insert");
    let after = ours.versions().await.expect("versions");
    assert!(after[&Collection::Leads] > before[&Collection::Leads]);
    assert_eq!(after[&Collection::Logs], before[&Collection::Logs]);

    // A retry writes nothing and leaves the counter alone.
    theirs
        .insert(&lead("L1", "Acme Bar", "diego"))
        .await
        .expect("retry");
    assert_eq!(ours.versions().await.expect("versions"), after);
}

#[tokio::test]
async fn transactional_delete_rolls_back_with_the_transaction() {
    let store = memory_store(NameMatch::Exact).await;
    store.insert(&lead("L1", "Acme Bar", "diego")).await.expect("insert");
    let mut changes = store.changes();

    {
        let mut tx = store.begin().await.expect("begin");
        assert!(tx.delete(Collection::Leads, "L1").await.expect("delete"));
    }
    assert!(store.get::<Lead>("L1").await.expect("get").is_some());
    assert!(changes.try_recv().is_err());

    let mut tx = store.begin().await.expect("begin");
    assert!(tx.delete(Collection::Leads, "L1").await.expect("delete"));
    assert!(!tx.delete(Collection::Leads, "L1").await.expect("second delete"));
    tx.commit().await.expect("commit");

    assert!(store.get::<Lead>("L1").await.expect("get").is_none());
    assert_eq!(changes.recv().await.expect("event").collection, Collection::Leads);
}
