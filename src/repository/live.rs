//! In-memory materialized collections and their subscriber registries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::models::chat::{ChatChannel, ChatMessage};
use crate::models::lead::Lead;
use crate::models::log::OperationLog;
use crate::models::task::DirectTask;
use crate::models::transfer::TransferRequest;
use crate::persistence::record::Record;

/// Immutable, ordered view of a collection at one point in time.
pub type Snapshot<R> = Arc<Vec<R>>;

/// Filter applied to a subscriber's snapshots.
pub type Predicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

struct Subscriber<R> {
    tx: mpsc::UnboundedSender<Snapshot<R>>,
    filter: Option<Predicate<R>>,
    last: Option<Snapshot<R>>,
}

impl<R: Record> Subscriber<R> {
    /// Send the filtered view of `all`; returns `false` once the receiver is gone.
    fn deliver(&mut self, all: &Snapshot<R>) -> bool {
        let view = match &self.filter {
            Some(filter) => Arc::new(all.iter().filter(|r| filter(r)).cloned().collect()),
            None => Arc::clone(all),
        };
        if self.last.as_ref().is_some_and(|last| **last == *view) {
            return !self.tx.is_closed();
        }
        self.last = Some(Arc::clone(&view));
        self.tx.send(view).is_ok()
    }
}

/// One mirrored collection.
pub struct Live<R> {
    snapshot: Snapshot<R>,
    subscribers: HashMap<u64, Subscriber<R>>,
}

impl<R> Default for Live<R> {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(Vec::new()),
            subscribers: HashMap::new(),
        }
    }
}

impl<R: Record> Live<R> {
    /// Last-seen snapshot.
    pub fn snapshot(&self) -> Snapshot<R> {
        Arc::clone(&self.snapshot)
    }

    /// Install a freshly read collection and fan it out.
    ///
    /// Returns `false` when the content is unchanged and nothing was sent.
    pub fn replace(&mut self, records: Vec<R>) -> bool {
        if *self.snapshot == records {
            return false;
        }
        self.snapshot = Arc::new(records);
        let all = Arc::clone(&self.snapshot);
        self.subscribers.retain(|_, sub| sub.deliver(&all));
        true
    }

    /// Register a subscriber and hand it the current snapshot.
    pub fn register(
        &mut self,
        id: u64,
        filter: Option<Predicate<R>>,
    ) -> mpsc::UnboundedReceiver<Snapshot<R>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscriber = Subscriber {
            tx,
            filter,
            last: None,
        };
        let all = Arc::clone(&self.snapshot);
        if subscriber.deliver(&all) {
            self.subscribers.insert(id, subscriber);
        }
        rx
    }

    /// Drop a subscriber's registration.
    pub fn unregister(&mut self, id: u64) {
        self.subscribers.remove(&id);
    }

    /// Number of live registrations.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// All mirrored collections of one repository.
#[derive(Default)]
pub struct Mirror {
    leads: Mutex<Live<Lead>>,
    logs: Mutex<Live<OperationLog>>,
    transfers: Mutex<Live<TransferRequest>>,
    tasks: Mutex<Live<DirectTask>>,
    messages: Mutex<Live<ChatMessage>>,
    channels: Mutex<Live<ChatChannel>>,
    /// Serializes read-then-install so snapshots follow store order.
    pub(crate) refresh_lock: tokio::sync::Mutex<()>,
    next_subscriber: AtomicU64,
}

impl Mirror {
    /// Lock the collection for `R`.
    pub fn live<R: Mirrored>(&self) -> MutexGuard<'_, Live<R>> {
        // A panic mid-replace leaves a complete previous snapshot in place.
        R::slot(self).lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every registration so pending `recv` calls end with `None`.
    pub(crate) fn release_all(&self) {
        self.live::<Lead>().subscribers.clear();
        self.live::<OperationLog>().subscribers.clear();
        self.live::<TransferRequest>().subscribers.clear();
        self.live::<DirectTask>().subscribers.clear();
        self.live::<ChatMessage>().subscribers.clear();
        self.live::<ChatChannel>().subscribers.clear();
    }

    pub(crate) fn next_subscriber_id(&self) -> u64 {
        self.next_subscriber.fetch_add(1, Ordering::Relaxed)
    }
}

/// A record type with a slot in the [`Mirror`].
pub trait Mirrored: Record {
    /// The mirror slot holding this collection.
    fn slot(mirror: &Mirror) -> &Mutex<Live<Self>>;
}

impl Mirrored for Lead {
    fn slot(mirror: &Mirror) -> &Mutex<Live<Self>> {
        &mirror.leads
    }
}

impl Mirrored for OperationLog {
    fn slot(mirror: &Mirror) -> &Mutex<Live<Self>> {
        &mirror.logs
    }
}

impl Mirrored for TransferRequest {
    fn slot(mirror: &Mirror) -> &Mutex<Live<Self>> {
        &mirror.transfers
    }
}

impl Mirrored for DirectTask {
    fn slot(mirror: &Mirror) -> &Mutex<Live<Self>> {
        &mirror.tasks
    }
}

impl Mirrored for ChatMessage {
    fn slot(mirror: &Mirror) -> &Mutex<Live<Self>> {
        &mirror.messages
    }
}

impl Mirrored for ChatChannel {
    fn slot(mirror: &Mirror) -> &Mutex<Live<Self>> {
        &mirror.channels
    }
}
