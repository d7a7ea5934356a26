//! Ownership and transfer protocol for leads.
//!
//! Every change to `Lead::owner` goes through [`OwnershipProtocol`]:
//! first-owner claims, the request/accept/reject transfer handshake, and
//! the administrator-only reassignment. The two load-bearing guards are the
//! store's unique name index (claim races) and the owner identity check on
//! resolution.

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::errors::{Conflict, ConflictKind};
use crate::models::lead::{Candidate, Lead, LeadStatus};
use crate::models::log::LogAction;
use crate::models::transfer::{TransferRequest, TransferStatus};
use crate::persistence::record::Collection;
use crate::persistence::store::{Guard, Inserted, Replaced};
use crate::repository::repo::reject_pending_transfers;
use crate::repository::Repository;
use crate::{AppError, Result};

/// Result of a bulk import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    /// Leads now owned by the importing actor.
    pub claimed: Vec<Lead>,
    /// Candidates rejected because an existing lead won.
    pub conflicts: Vec<Conflict>,
}

/// Gatekeeper for every lead ownership change.
#[derive(Clone)]
pub struct OwnershipProtocol {
    repo: Repository,
}

impl OwnershipProtocol {
    /// Wrap the acting repository.
    #[must_use]
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// The repository this protocol writes through.
    #[must_use]
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Take first ownership of an unowned lead.
    ///
    /// Sets the owner to the acting identity, resets the pipeline to `cold`
    /// with no follow-up, stamps `savedAt`, and logs `CREATE`. Retrying the
    /// same id and name as the same actor returns the stored lead without
    /// logging again.
    ///
    /// # Errors
    ///
    /// - `AppError::Invalid` if the name is blank.
    /// - `AppError::Conflict` (`AlreadyOwned`) if `lead.owner` is already set.
    /// - `AppError::Conflict` (`DuplicateName` / `DuplicateId`) naming the
    ///   current owner if another lead holds the name or id.
    /// - `AppError::Store` on transport failure.
    pub async fn claim(&self, mut lead: Lead) -> Result<Lead> {
        if let Some(owner) = lead.owner.clone() {
            return Err(AppError::Conflict(Conflict {
                kind: ConflictKind::AlreadyOwned,
                lead_id: lead.id,
                owner: Some(owner),
            }));
        }
        if lead.name.trim().is_empty() {
            return Err(AppError::Invalid("lead name must not be blank".into()));
        }

        let actor = self.repo.actor().to_owned();
        lead.name = lead.name.trim().to_owned();
        lead.owner = Some(actor.clone());
        lead.status = LeadStatus::Cold;
        lead.next_action = None;
        lead.next_action_date = None;
        lead.saved_at = Some(Utc::now());

        let span = info_span!("claim", lead_id = %lead.id, actor = %actor);
        self.insert_claimed(lead).instrument(span).await
    }

    async fn insert_claimed(&self, lead: Lead) -> Result<Lead> {
        match self.repo.store().insert(&lead).await? {
            Inserted::New => {
                self.repo
                    .append_log(LogAction::Create, lead.name.clone())
                    .await;
                self.repo.observe(Collection::Leads).await;
                info!("lead claimed");
                Ok(lead)
            }
            Inserted::Retried => Ok(lead),
            Inserted::IdTaken(existing)
                if existing.owner == lead.owner && existing.name.trim() == lead.name =>
            {
                debug!("claim retried, returning stored lead");
                self.repo.observe(Collection::Leads).await;
                Ok(existing)
            }
            Inserted::IdTaken(existing) => Err(AppError::Conflict(Conflict {
                kind: ConflictKind::DuplicateId,
                lead_id: existing.id,
                owner: existing.owner,
            })),
            Inserted::KeyTaken => Err(self.repo.name_conflict(&lead.name).await),
        }
    }

    /// Promote a discovery candidate into an owned lead.
    ///
    /// # Errors
    ///
    /// Same as [`claim`](Self::claim).
    pub async fn promote(&self, candidate: Candidate) -> Result<Lead> {
        self.claim(Lead::from(candidate)).await
    }

    /// Claim a batch of candidates, collecting conflicts instead of failing.
    ///
    /// Appends one `IMPORT` log entry summarising the batch.
    ///
    /// # Errors
    ///
    /// Returns the first error other than a conflict; leads claimed before
    /// it remain claimed.
    pub async fn import(&self, candidates: Vec<Candidate>) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        for candidate in candidates {
            match self.promote(candidate).await {
                Ok(lead) => report.claimed.push(lead),
                Err(AppError::Conflict(conflict)) => report.conflicts.push(conflict),
                Err(err) => return Err(err),
            }
        }
        self.repo
            .append_log(
                LogAction::Import,
                format!(
                    "{} claimed, {} skipped",
                    report.claimed.len(),
                    report.conflicts.len()
                ),
            )
            .await;
        Ok(report)
    }

    /// Ask the owner of `lead_id` to hand it to the acting identity.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the lead does not exist.
    /// - `AppError::Invalid` if the lead is unowned or already the actor's.
    /// - `AppError::DuplicatePendingRequest` if the actor already has a
    ///   pending request for this lead.
    /// - `AppError::Store` on transport failure.
    pub async fn request_transfer(&self, lead_id: &str) -> Result<TransferRequest> {
        let requester = self.repo.actor().to_owned();
        let lead = self.repo.fetch_lead(lead_id).await?;
        let owner = match lead.owner.clone() {
            None => {
                return Err(AppError::Invalid(format!(
                    "lead {lead_id} is unowned; claim it instead"
                )))
            }
            Some(owner) if owner == requester => {
                return Err(AppError::Invalid(format!(
                    "{requester} already owns lead {lead_id}"
                )))
            }
            Some(owner) => owner,
        };

        let request = TransferRequest::new(&lead, requester.clone(), owner);
        match self.repo.store().insert(&request).await? {
            Inserted::New | Inserted::Retried => {}
            Inserted::KeyTaken | Inserted::IdTaken(_) => {
                return Err(AppError::DuplicatePendingRequest(format!(
                    "{requester} already asked for {}",
                    lead.name
                )))
            }
        }

        self.repo
            .append_log(
                LogAction::TransferRequest,
                format!("{} requested from {}", lead.name, request.to_user),
            )
            .await;
        self.repo.observe(Collection::TransferRequests).await;
        info!(lead_id, request_id = %request.id, %requester, "transfer requested");
        Ok(request)
    }

    /// Accept or reject a pending transfer addressed to the acting identity.
    ///
    /// On accept the lead moves to `from_user` with status reset to `cold`,
    /// and any other pending requests for the lead are rejected.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the request or its lead does not exist.
    /// - `AppError::Unauthorized` if the actor is not `to_user`, or no longer owns the lead.
    /// - `AppError::AlreadyResolved` if the request was resolved before.
    /// - `AppError::Store` on transport failure; nothing is applied.
    pub async fn resolve_transfer(&self, request_id: &str, accept: bool) -> Result<TransferRequest> {
        let actor = self.repo.actor().to_owned();
        let span = info_span!("resolve_transfer", request_id, %actor, accept);
        self.resolve_inner(request_id, &actor, accept)
            .instrument(span)
            .await
    }

    async fn resolve_inner(&self, request_id: &str, actor: &str, accept: bool) -> Result<TransferRequest> {
        let mut request: TransferRequest = self
            .repo
            .store()
            .get(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transfer request {request_id}")))?;

        if request.to_user != actor {
            return Err(AppError::Unauthorized(format!(
                "only {} may resolve transfer request {request_id}",
                request.to_user
            )));
        }
        if !request.is_pending() {
            return Err(AppError::AlreadyResolved(format!(
                "transfer request {request_id} is {}",
                request.status.as_str()
            )));
        }

        let now = Utc::now();
        request.status = if accept {
            TransferStatus::Accepted
        } else {
            TransferStatus::Rejected
        };
        request.resolved_at = Some(now);

        let pending = Guard::new("status", Some(TransferStatus::Pending.as_str()));
        let mut tx = self.repo.store().begin().await?;

        // Claim the resolution first so a concurrent resolver loses cleanly.
        if tx.replace(&request, Some(pending)).await? != Replaced::Updated {
            return Err(AppError::AlreadyResolved(format!(
                "transfer request {request_id}"
            )));
        }

        let mut lead = tx
            .get::<Lead>(&request.lead_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("lead {}", request.lead_id)))?;
        if !lead.is_owned_by(actor) {
            return Err(AppError::Unauthorized(format!(
                "{actor} no longer owns lead {}",
                request.lead_id
            )));
        }

        if accept {
            lead.owner = Some(request.from_user.clone());
            lead.status = LeadStatus::Cold;
            let owned = Guard::new("owner", Some(actor));
            if tx.replace(&lead, Some(owned)).await? != Replaced::Updated {
                return Err(AppError::Conflict(Conflict {
                    kind: ConflictKind::OwnerChanged,
                    lead_id: lead.id,
                    owner: None,
                }));
            }

            reject_pending_transfers(&mut tx, &request.lead_id, now).await?;
        }
        tx.commit().await?;

        let (action, verb) = if accept {
            (LogAction::TransferAccept, "accepted")
        } else {
            (LogAction::TransferReject, "rejected")
        };
        self.repo
            .append_log(
                action,
                format!("{} {verb} for {}", request.lead_name, request.from_user),
            )
            .await;
        self.repo.observe(Collection::TransferRequests).await;
        if accept {
            self.repo.observe(Collection::Leads).await;
        }
        info!(lead_id = %request.lead_id, "transfer {verb}");
        Ok(request)
    }

    /// Administrator escape hatch: set the owner without a handshake.
    ///
    /// When the owner actually changes, pending transfer requests for the
    /// lead are rejected in the same transaction.
    ///
    /// # Errors
    ///
    /// - `AppError::Unauthorized` if the actor lacks administrative capability.
    /// - `AppError::Invalid` if `new_owner` is blank.
    /// - `AppError::NotFound` if the lead does not exist.
    /// - `AppError::Store` on transport failure.
    pub async fn reassign(&self, lead_id: &str, new_owner: &str) -> Result<Lead> {
        let identity = self.repo.identity();
        if !identity.is_administrator() {
            warn!(actor = %identity.actor(), lead_id, "non-administrator attempted reassign");
            return Err(AppError::Unauthorized(format!(
                "{} may not reassign leads",
                identity.actor()
            )));
        }
        if new_owner.trim().is_empty() {
            return Err(AppError::Invalid("new owner must not be blank".into()));
        }

        let mut tx = self.repo.store().begin().await?;
        let mut lead = tx
            .get::<Lead>(lead_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("lead {lead_id}")))?;
        let previous = lead.owner.replace(new_owner.to_owned());
        if tx.replace(&lead, None).await? != Replaced::Updated {
            return Err(AppError::NotFound(format!("lead {lead_id}")));
        }
        let withdrawn = if previous.as_deref() == Some(new_owner) {
            0
        } else {
            reject_pending_transfers(&mut tx, lead_id, Utc::now()).await?
        };
        tx.commit().await?;

        self.repo
            .append_log(
                LogAction::Reassign,
                format!(
                    "{}: {} -> {new_owner}",
                    lead.name,
                    previous.as_deref().unwrap_or("unowned")
                ),
            )
            .await;
        self.repo.observe(Collection::Leads).await;
        if withdrawn > 0 {
            self.repo.observe(Collection::TransferRequests).await;
        }
        info!(lead_id, new_owner, withdrawn, "lead reassigned");
        Ok(lead)
    }
}
