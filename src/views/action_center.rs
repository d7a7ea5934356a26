//! Live agenda recomputed on every relevant snapshot and at each date
//! rollover.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::models::lead::Lead;
use crate::models::task::DirectTask;
use crate::models::transfer::TransferRequest;
use crate::repository::{Repository, Snapshot, Subscription};

use super::agenda::{compute, Agenda, AgendaInput};

const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Source of "today" for agenda classification.
pub trait Clock: Send + Sync {
    /// Current calendar date.
    fn today(&self) -> NaiveDate;

    /// Time left until [`today`](Self::today) moves to the next date.
    fn until_rollover(&self) -> Duration;
}

/// Wall-clock date in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }

    fn until_rollover(&self) -> Duration {
        let now = Utc::now();
        now.date_naive()
            .succ_opt()
            .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
            .and_then(|midnight| (midnight.and_utc() - now).to_std().ok())
            .unwrap_or(ONE_DAY)
    }
}

/// A clock pinned to one date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }

    fn until_rollover(&self) -> Duration {
        ONE_DAY
    }
}

/// Background projection of one actor's agenda.
///
/// Holds three subscriptions for its lifetime; [`close`](Self::close) or
/// drop releases them.
pub struct ActionCenter {
    agenda: watch::Receiver<Agenda>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct Inputs {
    leads: Snapshot<Lead>,
    tasks: Snapshot<DirectTask>,
    transfers: Snapshot<TransferRequest>,
}

impl Inputs {
    fn agenda(&self, actor: &str, clock: &dyn Clock) -> Agenda {
        let input = AgendaInput {
            leads: &self.leads,
            tasks: &self.tasks,
            transfers: &self.transfers,
        };
        compute(&input, actor, clock.today())
    }
}

impl ActionCenter {
    /// Start recomputing the agenda for the repository's actor.
    #[must_use]
    pub fn spawn(repo: &Repository, clock: Arc<dyn Clock>) -> Self {
        let actor = repo.actor().to_owned();
        let leads = repo.subscribe::<Lead>();
        let tasks = repo.subscribe::<DirectTask>();
        let transfers = repo.subscribe::<TransferRequest>();

        let inputs = Inputs {
            leads: repo.snapshot(),
            tasks: repo.snapshot(),
            transfers: repo.snapshot(),
        };
        let (tx, agenda) = watch::channel(inputs.agenda(&actor, clock.as_ref()));
        let cancel = CancellationToken::new();

        let span = info_span!("action_center", actor = %actor);
        let task = tokio::spawn(
            run(actor, clock, inputs, leads, tasks, transfers, tx, cancel.clone()).instrument(span),
        );

        Self {
            agenda,
            cancel,
            task: Some(task),
        }
    }

    /// Current agenda.
    #[must_use]
    pub fn current(&self) -> Agenda {
        self.agenda.borrow().clone()
    }

    /// Receiver notified on every recomputation that changes the agenda.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Agenda> {
        self.agenda.clone()
    }

    /// Stop recomputing and release the subscriptions.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(%err, "action center task ended abnormally");
            }
        }
    }
}

impl Drop for ActionCenter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    actor: String,
    clock: Arc<dyn Clock>,
    mut inputs: Inputs,
    mut leads: Subscription<Lead>,
    mut tasks: Subscription<DirectTask>,
    mut transfers: Subscription<TransferRequest>,
    tx: watch::Sender<Agenda>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = leads.recv() => match next {
                Some(snapshot) => inputs.leads = snapshot,
                None => break,
            },
            next = tasks.recv() => match next {
                Some(snapshot) => inputs.tasks = snapshot,
                None => break,
            },
            next = transfers.recv() => match next {
                Some(snapshot) => inputs.transfers = snapshot,
                None => break,
            },
            () = tokio::time::sleep(clock.until_rollover()) => {
                debug!(today = %clock.today(), "date rolled over");
            }
        }

        let agenda = inputs.agenda(&actor, clock.as_ref());
        tx.send_if_modified(|current| {
            if *current == agenda {
                false
            } else {
                *current = agenda;
                true
            }
        });
    }
    debug!("action center stopped");
}
