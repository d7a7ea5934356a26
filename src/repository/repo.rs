//! Live-updating, per-actor mirror of the record store.
//!
//! A [`Repository`] is opened for one actor. It loads every collection,
//! then follows the store's change feed in a background task, re-reading
//! whole collections and fanning the snapshots out to subscribers. The
//! same task polls the store's change counters so writes from other
//! processes sharing the file are picked up too. All typed mutations go
//! through the store and append an operation log entry.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SyncConfig;
use crate::errors::{Conflict, ConflictKind, StoreErrorKind};
use crate::identity::ActorContext;
use crate::models::chat::{ChatChannel, ChatMessage};
use crate::models::lead::{Lead, LeadPatch};
use crate::models::log::{LogAction, OperationLog};
use crate::models::task::{DirectTask, TaskStatus};
use crate::models::transfer::{TransferRequest, TransferStatus};
use crate::persistence::record::Collection;
use crate::persistence::store::{
    ChangeEvent, Guard, Inserted, RecordStore, Replaced, StoreTx, Versions,
};
use crate::{AppError, Result};

use super::live::{Mirror, Mirrored, Predicate, Snapshot};
use super::subscription::Subscription;

/// Health of the change feed as seen by this repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Connectivity {
    /// Mirror is in sync with the store.
    Connected,
    /// Last re-sync failed; the mirror serves stale data until it recovers.
    Degraded {
        /// Failure classification.
        kind: StoreErrorKind,
        /// Error text of the last failure.
        message: String,
    },
}

impl Connectivity {
    /// Whether the UI should block on a manual retry.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        match self {
            Self::Connected => false,
            Self::Degraded { kind, .. } => kind.is_blocking(),
        }
    }
}

/// Explicit caller confirmation required for a hard delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    lead_id: String,
}

impl Confirmation {
    /// Confirm deletion of the lead with `lead_id`.
    #[must_use]
    pub fn for_lead(lead_id: impl Into<String>) -> Self {
        Self {
            lead_id: lead_id.into(),
        }
    }
}

/// Cloneable handle to one actor's live mirror.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<Inner>,
}

struct Inner {
    store: RecordStore,
    identity: ActorContext,
    mirror: Arc<Mirror>,
    connectivity: Arc<watch::Sender<Connectivity>>,
    cancel: CancellationToken,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.mirror.release_all();
    }
}

impl Repository {
    /// Load every collection for `identity` and start following changes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the initial load fails; the caller
    /// decides whether to present a blocking recovery state.
    pub async fn open(store: RecordStore, identity: ActorContext, sync: &SyncConfig) -> Result<Self> {
        // Subscribe before loading so no change between the two is missed.
        let changes = store.changes();
        let seen = store.versions().await?;
        let mirror = Arc::new(Mirror::default());
        for collection in Collection::ALL {
            refresh(&store, &mirror, collection).await?;
        }

        let (connectivity, _) = watch::channel(Connectivity::Connected);
        let connectivity = Arc::new(connectivity);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            sync_loop(
                store.clone(),
                Arc::clone(&mirror),
                Arc::clone(&connectivity),
                changes,
                seen,
                cancel.clone(),
                sync.clone(),
            )
            .instrument(info_span!("repository_sync", actor = %identity.actor())),
        );
        info!(actor = %identity.actor(), "repository opened");

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                identity,
                mirror,
                connectivity,
                cancel,
                sync_task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Stop following changes and wait for the sync task to exit.
    ///
    /// Outstanding subscriptions are released and yield `None`.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.mirror.release_all();
        let handle = self
            .inner
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(%err, "repository sync task ended abnormally");
            }
        }
        info!(actor = %self.actor(), "repository closed");
    }

    /// The acting identity.
    #[must_use]
    pub fn identity(&self) -> &ActorContext {
        &self.inner.identity
    }

    /// Shorthand for the acting identity's name.
    #[must_use]
    pub fn actor(&self) -> &str {
        self.inner.identity.actor()
    }

    pub(crate) fn store(&self) -> &RecordStore {
        &self.inner.store
    }

    /// Last-seen snapshot of a collection.
    #[must_use]
    pub fn snapshot<R: Mirrored>(&self) -> Snapshot<R> {
        self.inner.mirror.live::<R>().snapshot()
    }

    /// Subscribe to full snapshots of a collection.
    #[must_use]
    pub fn subscribe<R: Mirrored>(&self) -> Subscription<R> {
        self.register(None)
    }

    /// Subscribe to snapshots restricted to records matching `predicate`.
    #[must_use]
    pub fn subscribe_where<R, F>(&self, predicate: F) -> Subscription<R>
    where
        R: Mirrored,
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate<R> = Arc::new(predicate);
        self.register(Some(predicate))
    }

    fn register<R: Mirrored>(&self, filter: Option<Predicate<R>>) -> Subscription<R> {
        let mirror = &self.inner.mirror;
        let id = mirror.next_subscriber_id();
        let rx = mirror.live::<R>().register(id, filter);
        Subscription::new(id, rx, Arc::downgrade(mirror))
    }

    /// Number of active subscriptions on a collection.
    #[must_use]
    pub fn subscriber_count<R: Mirrored>(&self) -> usize {
        self.inner.mirror.live::<R>().subscriber_count()
    }

    /// Watch the change-feed health signal.
    #[must_use]
    pub fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.inner.connectivity.subscribe()
    }

    /// Manually re-read every collection (the "retry" action).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if any collection cannot be read; the
    /// connectivity signal is updated either way.
    pub async fn resync(&self) -> Result<()> {
        for collection in Collection::ALL {
            if let Err(err) = refresh(&self.inner.store, &self.inner.mirror, collection).await {
                mark_degraded(&self.inner.connectivity, &err);
                return Err(err);
            }
        }
        mark_connected(&self.inner.connectivity);
        Ok(())
    }

    /// Apply `patch` to a lead the actor manages.
    ///
    /// Stamps `lastContactDate` when a contact field changes and logs one
    /// `STATUS_CHANGE` or `UPDATE` entry. Ownership is never touched.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the lead is absent from the last snapshot or the store.
    /// - `AppError::Unauthorized` if the actor neither owns it nor is an administrator.
    /// - `AppError::Conflict` if the rename collides or ownership moved meanwhile.
    /// - `AppError::Store` on transport failure.
    pub async fn update_lead(&self, id: &str, patch: LeadPatch) -> Result<Lead> {
        patch.validate()?;
        self.ensure_seen::<Lead>(id)?;

        let mut lead = self.fetch_lead(id).await?;
        self.ensure_manages(&lead)?;
        let owner = lead.owner.clone();

        let effect = patch.apply(&mut lead);
        if !effect.changed {
            return Ok(lead);
        }
        if effect.contact {
            lead.last_contact_date = Some(Utc::now().date_naive().to_string());
        }

        let guard = Guard::new("owner", owner.as_deref());
        match self.inner.store.replace(&lead, Some(guard)).await? {
            Replaced::Updated => {}
            Replaced::Missed => return Err(self.lost_lead(id).await),
            Replaced::KeyTaken => return Err(self.name_conflict(&lead.name).await),
        }

        match effect.previous_status {
            Some(previous) => {
                let detail = format!(
                    "{}: {} -> {}",
                    lead.name,
                    previous.as_str(),
                    lead.status.as_str()
                );
                self.append_log(LogAction::StatusChange, detail).await;
            }
            None => self.append_log(LogAction::Update, lead.name.clone()).await,
        }
        self.observe(Collection::Leads).await;
        info!(lead_id = %lead.id, actor = %self.actor(), "lead updated");
        Ok(lead)
    }

    /// Hard-delete a lead the actor manages.
    ///
    /// Pending transfer requests for the lead are rejected in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// - `AppError::Invalid` if `confirmation` names a different lead.
    /// - `AppError::NotFound` if the lead is absent from the last snapshot or the store.
    /// - `AppError::Unauthorized` if the actor neither owns it nor is an administrator.
    /// - `AppError::Store` on transport failure.
    pub async fn remove_lead(&self, id: &str, confirmation: Confirmation) -> Result<()> {
        if confirmation.lead_id != id {
            return Err(AppError::Invalid(format!(
                "confirmation does not match lead {id}"
            )));
        }
        self.ensure_seen::<Lead>(id)?;

        let lead = self.fetch_lead(id).await?;
        self.ensure_manages(&lead)?;

        let mut tx = self.inner.store.begin().await?;
        if !tx.delete(Collection::Leads, id).await? {
            return Err(AppError::NotFound(format!("lead {id}")));
        }
        let withdrawn = reject_pending_transfers(&mut tx, id, Utc::now()).await?;
        tx.commit().await?;

        self.append_log(LogAction::Delete, lead.name.clone()).await;
        self.observe(Collection::Leads).await;
        if withdrawn > 0 {
            self.observe(Collection::TransferRequests).await;
        }
        info!(lead_id = %id, actor = %self.actor(), withdrawn, "lead removed");
        Ok(())
    }

    /// Send a direct task to `to_user`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Invalid` for a blank recipient or message and
    /// `AppError::Store` on transport failure.
    pub async fn send_task(&self, to_user: &str, message: &str) -> Result<DirectTask> {
        if to_user.trim().is_empty() || message.trim().is_empty() {
            return Err(AppError::Invalid(
                "task recipient and message must not be blank".into(),
            ));
        }
        let task = DirectTask::new(
            self.actor().to_owned(),
            to_user.to_owned(),
            message.to_owned(),
        );
        self.insert_new(&task).await?;
        self.append_log(LogAction::TaskCreate, format!("task for {to_user}"))
            .await;
        self.observe(Collection::DirectTasks).await;
        Ok(task)
    }

    /// Mark a direct task addressed to the actor as completed.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the task does not exist.
    /// - `AppError::Unauthorized` if the actor is not the recipient.
    /// - `AppError::AlreadyResolved` if it was already completed.
    /// - `AppError::Store` on transport failure.
    pub async fn complete_task(&self, id: &str) -> Result<DirectTask> {
        let mut task: DirectTask = self
            .inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {id}")))?;

        if task.to_user != self.actor() {
            return Err(AppError::Unauthorized(format!(
                "only {} may complete task {id}",
                task.to_user
            )));
        }
        if task.status == TaskStatus::Completed {
            return Err(AppError::AlreadyResolved(format!("task {id}")));
        }

        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        let guard = Guard::new("status", Some(TaskStatus::Pending.as_str()));
        if self.inner.store.replace(&task, Some(guard)).await? != Replaced::Updated {
            return Err(AppError::AlreadyResolved(format!("task {id}")));
        }

        self.append_log(LogAction::TaskComplete, format!("task from {}", task.from_user))
            .await;
        self.observe(Collection::DirectTasks).await;
        Ok(task)
    }

    /// Create a chat channel; empty `members` admits everyone.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Invalid` for a blank name and `AppError::Store` on
    /// transport failure.
    pub async fn create_channel(&self, name: &str, members: Vec<String>) -> Result<ChatChannel> {
        if name.trim().is_empty() {
            return Err(AppError::Invalid("channel name must not be blank".into()));
        }
        let channel = ChatChannel::new(name.to_owned(), members, self.actor().to_owned());
        self.insert_new(&channel).await?;
        self.append_log(LogAction::ChannelCreate, name.to_owned()).await;
        self.observe(Collection::ChatChannels).await;
        Ok(channel)
    }

    /// Post a message to a channel the actor belongs to.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the channel does not exist.
    /// - `AppError::Unauthorized` if the actor is not a member.
    /// - `AppError::Store` on transport failure.
    pub async fn post_message(&self, channel_id: &str, text: &str) -> Result<ChatMessage> {
        let channel: ChatChannel = self
            .inner
            .store
            .get(channel_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("channel {channel_id}")))?;
        if !channel.admits(self.actor()) {
            return Err(AppError::Unauthorized(format!(
                "{} is not a member of {}",
                self.actor(),
                channel.name
            )));
        }

        let message = ChatMessage::new(
            channel_id.to_owned(),
            self.actor().to_owned(),
            text.to_owned(),
        );
        self.insert_new(&message).await?;
        self.append_log(LogAction::MessagePost, channel.name).await;
        self.observe(Collection::ChatMessages).await;
        Ok(message)
    }

    /// Pending transfer requests addressed to the actor, from the mirror.
    #[must_use]
    pub fn incoming_transfers(&self) -> Vec<TransferRequest> {
        self.snapshot::<TransferRequest>()
            .iter()
            .filter(|r| r.is_pending() && r.to_user == self.actor())
            .cloned()
            .collect()
    }

    /// Append an operation log entry; failures are reported, never raised.
    pub(crate) async fn append_log(&self, action: LogAction, detail: String) {
        let entry = OperationLog::new(self.actor(), action, detail);
        match self.inner.store.insert(&entry).await {
            Ok(_) => self.observe(Collection::Logs).await,
            Err(err) => warn!(%err, ?action, actor = %self.actor(), "operation log append failed"),
        }
    }

    /// Bring one collection of the local mirror up to date after an own write.
    pub(crate) async fn observe(&self, collection: Collection) {
        if let Err(err) = refresh(&self.inner.store, &self.inner.mirror, collection).await {
            mark_degraded(&self.inner.connectivity, &err);
            warn!(%err, %collection, "local mirror refresh failed");
        }
    }

    pub(crate) fn ensure_seen<R: Mirrored>(&self, id: &str) -> Result<()> {
        if self.snapshot::<R>().iter().any(|r| r.id() == id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("{} {id}", R::COLLECTION)))
        }
    }

    fn ensure_manages(&self, lead: &Lead) -> Result<()> {
        if self.inner.identity.may_manage(lead.owner.as_deref()) {
            Ok(())
        } else {
            Err(AppError::Unauthorized(format!(
                "{} does not manage lead {}",
                self.actor(),
                lead.id
            )))
        }
    }

    pub(crate) async fn fetch_lead(&self, id: &str) -> Result<Lead> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("lead {id}")))
    }

    /// Build the conflict for a lead name that is already taken.
    pub(crate) async fn name_conflict(&self, name: &str) -> AppError {
        match self
            .inner
            .store
            .find_by::<Lead>("name_key", name.trim())
            .await
        {
            Ok(found) => match found.into_iter().next() {
                Some(existing) => AppError::Conflict(Conflict {
                    kind: ConflictKind::DuplicateName,
                    lead_id: existing.id,
                    owner: existing.owner,
                }),
                None => AppError::Conflict(Conflict {
                    kind: ConflictKind::DuplicateName,
                    lead_id: String::new(),
                    owner: None,
                }),
            },
            Err(err) => err,
        }
    }

    /// Explain why a guarded lead write matched nothing.
    async fn lost_lead(&self, id: &str) -> AppError {
        match self.inner.store.get::<Lead>(id).await {
            Ok(Some(current)) => AppError::Conflict(Conflict {
                kind: ConflictKind::OwnerChanged,
                lead_id: current.id,
                owner: current.owner,
            }),
            Ok(None) => AppError::NotFound(format!("lead {id}")),
            Err(err) => err,
        }
    }

    async fn insert_new<R: Mirrored>(&self, record: &R) -> Result<()> {
        match self.inner.store.insert(record).await? {
            Inserted::New | Inserted::Retried => Ok(()),
            Inserted::IdTaken(_) | Inserted::KeyTaken => Err(AppError::Invalid(format!(
                "{} {} collides with an existing record",
                R::COLLECTION,
                record.id()
            ))),
        }
    }
}

/// Reject every pending transfer request for `lead_id` inside `tx`.
///
/// Returns how many requests were closed.
pub(crate) async fn reject_pending_transfers(
    tx: &mut StoreTx<'_>,
    lead_id: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    let pending = Guard::new("status", Some(TransferStatus::Pending.as_str()));
    let requests: Vec<TransferRequest> = tx.find_by("lead_id", lead_id).await?;
    let mut rejected = 0;
    for mut request in requests.into_iter().filter(TransferRequest::is_pending) {
        request.status = TransferStatus::Rejected;
        request.resolved_at = Some(now);
        if tx.replace(&request, Some(pending)).await? == Replaced::Updated {
            rejected += 1;
        }
    }
    Ok(rejected)
}

async fn refresh(store: &RecordStore, mirror: &Mirror, collection: Collection) -> Result<()> {
    match collection {
        Collection::Leads => refresh_typed::<Lead>(store, mirror).await,
        Collection::Logs => refresh_typed::<OperationLog>(store, mirror).await,
        Collection::TransferRequests => refresh_typed::<TransferRequest>(store, mirror).await,
        Collection::DirectTasks => refresh_typed::<DirectTask>(store, mirror).await,
        Collection::ChatMessages => refresh_typed::<ChatMessage>(store, mirror).await,
        Collection::ChatChannels => refresh_typed::<ChatChannel>(store, mirror).await,
    }
}

async fn refresh_typed<R: Mirrored>(store: &RecordStore, mirror: &Mirror) -> Result<()> {
    let _ordered = mirror.refresh_lock.lock().await;
    let records = store.list::<R>().await?;
    if mirror.live::<R>().replace(records) {
        debug!(collection = %R::COLLECTION, "snapshot published");
    }
    Ok(())
}

fn mark_connected(connectivity: &watch::Sender<Connectivity>) {
    connectivity.send_if_modified(|state| {
        if *state == Connectivity::Connected {
            false
        } else {
            *state = Connectivity::Connected;
            true
        }
    });
}

fn mark_degraded(connectivity: &watch::Sender<Connectivity>, err: &AppError) {
    let kind = err.store_kind().unwrap_or(StoreErrorKind::Transient);
    connectivity.send_replace(Connectivity::Degraded {
        kind,
        message: err.to_string(),
    });
}

async fn sync_loop(
    store: RecordStore,
    mirror: Arc<Mirror>,
    connectivity: Arc<watch::Sender<Connectivity>>,
    mut changes: broadcast::Receiver<ChangeEvent>,
    mut seen: Versions,
    cancel: CancellationToken,
    sync: SyncConfig,
) {
    let reconnect_delay = sync.reconnect_delay();
    let period = sync.poll_interval();
    let mut poll = tokio::time::interval_at(Instant::now() + period, period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut poll_failed = false;

    loop {
        let pending: Vec<Collection> = tokio::select! {
            () = cancel.cancelled() => break,
            event = changes.recv() => match event {
                Ok(event) => vec![event.collection],
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change feed lagged, resynchronizing all collections");
                    Collection::ALL.to_vec()
                }
                Err(RecvError::Closed) => break,
            },
            _ = poll.tick() => match store.versions().await {
                Ok(current) => {
                    let moved = if std::mem::take(&mut poll_failed) {
                        Collection::ALL.to_vec()
                    } else {
                        moved_collections(&seen, &current)
                    };
                    seen = current;
                    moved
                }
                Err(err) => {
                    warn!(%err, "change poll failed");
                    mark_degraded(&connectivity, &err);
                    poll_failed = true;
                    Vec::new()
                }
            },
        };

        for collection in pending {
            if !resync_until_ok(&store, &mirror, &connectivity, &cancel, collection, reconnect_delay).await {
                debug!("repository sync loop cancelled");
                return;
            }
        }
    }
    debug!("repository sync loop stopped");
}

/// Collections whose change counter differs between two readings.
fn moved_collections(before: &Versions, after: &Versions) -> Vec<Collection> {
    Collection::ALL
        .into_iter()
        .filter(|c| before.get(c) != after.get(c))
        .collect()
}

/// Retry one collection until it reads cleanly; `false` if cancelled first.
async fn resync_until_ok(
    store: &RecordStore,
    mirror: &Mirror,
    connectivity: &watch::Sender<Connectivity>,
    cancel: &CancellationToken,
    collection: Collection,
    reconnect_delay: Duration,
) -> bool {
    loop {
        match refresh(store, mirror, collection).await {
            Ok(()) => {
                mark_connected(connectivity);
                return true;
            }
            Err(err) => {
                warn!(%err, %collection, "re-sync failed, retrying");
                mark_degraded(connectivity, &err);
                tokio::select! {
                    () = cancel.cancelled() => return false,
                    () = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }
}
