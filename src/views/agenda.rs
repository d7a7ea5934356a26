//! Per-actor agenda projection.
//!
//! A pure function of the lead, task and transfer snapshots, the actor and
//! today's date. Nothing here is stored; it is recomputed on every tick.

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::lead::Lead;
use crate::models::task::{DirectTask, TaskStatus};
use crate::models::transfer::TransferRequest;

/// Snapshot inputs for [`compute`].
#[derive(Debug, Clone, Copy)]
pub struct AgendaInput<'a> {
    /// All leads.
    pub leads: &'a [Lead],
    /// All direct tasks.
    pub tasks: &'a [DirectTask],
    /// All transfer requests.
    pub transfers: &'a [TransferRequest],
}

/// A lead follow-up projected onto the agenda.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaItem {
    /// Lead identifier.
    pub lead_id: String,
    /// Lead display name.
    pub name: String,
    /// Scheduled follow-up description.
    pub next_action: Option<String>,
    /// Scheduled follow-up date (`YYYY-MM-DD`).
    pub next_action_date: String,
    /// Follow-up date is strictly before today.
    pub overdue: bool,
}

/// Everything requiring the actor's attention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Agenda {
    /// Follow-ups on or before today, earliest first.
    pub due: Vec<AgendaItem>,
    /// Follow-ups after today, earliest first.
    pub future: Vec<AgendaItem>,
    /// Pending direct tasks addressed to the actor.
    pub tasks: Vec<DirectTask>,
    /// Pending transfer requests awaiting the actor's decision.
    pub transfers: Vec<TransferRequest>,
}

impl Agenda {
    /// Number of overdue follow-ups.
    #[must_use]
    pub fn overdue_count(&self) -> usize {
        self.due.iter().filter(|item| item.overdue).count()
    }

    /// Total number of alerts (due follow-ups, tasks and transfers).
    #[must_use]
    pub fn alert_count(&self) -> usize {
        self.due.len() + self.tasks.len() + self.transfers.len()
    }
}

/// Compute the agenda for `actor` on `today`.
///
/// Leads without a follow-up date appear in neither list.
#[must_use]
pub fn compute(input: &AgendaInput<'_>, actor: &str, today: NaiveDate) -> Agenda {
    // ISO dates compare correctly as strings.
    let today = today.format("%Y-%m-%d").to_string();

    let mut due = Vec::new();
    let mut future = Vec::new();
    for lead in input.leads.iter().filter(|l| l.is_owned_by(actor)) {
        let Some(date) = lead.follow_up_date() else {
            continue;
        };
        let item = AgendaItem {
            lead_id: lead.id.clone(),
            name: lead.name.clone(),
            next_action: lead.next_action.clone(),
            next_action_date: date.to_owned(),
            overdue: date < today.as_str(),
        };
        if date <= today.as_str() {
            due.push(item);
        } else {
            future.push(item);
        }
    }
    // `sort_by` is stable: equal dates keep snapshot order.
    due.sort_by(|a, b| a.next_action_date.cmp(&b.next_action_date));
    future.sort_by(|a, b| a.next_action_date.cmp(&b.next_action_date));

    let tasks = input
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && t.to_user == actor)
        .cloned()
        .collect();
    let transfers = input
        .transfers
        .iter()
        .filter(|r| r.is_pending() && r.to_user == actor)
        .cloned()
        .collect();

    Agenda {
        due,
        future,
        tasks,
        transfers,
    }
}
