#![forbid(unsafe_code)]

//! `lead-sync`: operator CLI over the lead record store.
//!
//! Opens a repository for `--actor`, runs one command through the
//! repository or the ownership protocol, and prints the result as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use lead_sync::config::GlobalConfig;
use lead_sync::models::lead::{Candidate, Lead, LeadPatch, LeadStatus};
use lead_sync::models::log::OperationLog;
use lead_sync::ownership::OwnershipProtocol;
use lead_sync::persistence::{db, RecordStore};
use lead_sync::repository::{Confirmation, Repository};
use lead_sync::views::{ActionCenter, FixedClock, SystemClock};
use lead_sync::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum StatusArg {
    Cold,
    Contacted,
    Negotiating,
    Client,
}

impl From<StatusArg> for LeadStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Cold => Self::Cold,
            StatusArg::Contacted => Self::Contacted,
            StatusArg::Negotiating => Self::Negotiating,
            StatusArg::Client => Self::Client,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "lead-sync", about = "Lead ownership and sync CLI", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Identity to act as.
    #[arg(long)]
    actor: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List all leads.
    Leads,

    /// Create and claim a new lead.
    Claim {
        #[arg(long)]
        name: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        contact_person: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Claim every candidate in a JSON array file.
    Import {
        /// File holding discovery candidates.
        file: PathBuf,
    },

    /// Edit a lead you manage.
    Update {
        id: String,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        next_action: Option<String>,
        /// Follow-up date (YYYY-MM-DD).
        #[arg(long)]
        next_action_date: Option<NaiveDate>,
    },

    /// Ask the owner of a lead to hand it over.
    RequestTransfer { lead_id: String },

    /// Accept or reject a transfer request addressed to you.
    #[command(group(ArgGroup::new("decision").required(true).args(["accept", "reject"])))]
    Resolve {
        request_id: String,
        #[arg(long)]
        accept: bool,
        #[arg(long)]
        reject: bool,
    },

    /// Reassign a lead (administrators only).
    Reassign { lead_id: String, new_owner: String },

    /// Hard-delete a lead.
    Remove {
        lead_id: String,
        /// Required acknowledgement that the delete is permanent.
        #[arg(long)]
        confirm: bool,
    },

    /// Send a direct task.
    Task { to_user: String, message: String },

    /// Complete a direct task addressed to you.
    Complete { task_id: String },

    /// Print the agenda.
    Agenda {
        /// Evaluate as of this date instead of today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Print the operation log.
    Log,

    /// Follow the agenda live until interrupted.
    Watch,

    /// Re-read every collection and report store connectivity.
    Resync,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    let pool = db::connect(&config.db_path, config.name_match).await?;
    let store = RecordStore::new(Arc::new(pool), config.sync.change_buffer);

    let identity = config.actor_context(&args.actor);
    let repo = Repository::open(store, identity, &config.sync).await?;
    info!(actor = %args.actor, "session opened");

    let outcome = dispatch(&repo, args.command).await;
    repo.close().await;
    outcome
}

async fn dispatch(repo: &Repository, command: Command) -> Result<()> {
    let protocol = OwnershipProtocol::new(repo.clone());
    match command {
        Command::Leads => emit(&*repo.snapshot::<Lead>()),
        Command::Claim {
            name,
            category,
            location,
            phone,
            email,
            contact_person,
            notes,
        } => {
            let candidate = Candidate {
                name,
                category,
                location,
                phone,
                email,
                contact_person,
                notes,
                ..Candidate::default()
            };
            emit(&protocol.promote(candidate).await?)
        }
        Command::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .map_err(|err| AppError::Io(format!("cannot read {}: {err}", file.display())))?;
            let candidates: Vec<Candidate> = serde_json::from_str(&raw)
                .map_err(|err| AppError::Invalid(format!("bad candidate file: {err}")))?;
            let report = protocol.import(candidates).await?;
            for conflict in &report.conflicts {
                warn!(%conflict, "candidate skipped");
            }
            emit(&report.claimed)
        }
        Command::Update {
            id,
            status,
            notes,
            next_action,
            next_action_date,
        } => {
            let patch = LeadPatch {
                status: status.map(LeadStatus::from),
                notes,
                next_action,
                next_action_date: next_action_date.map(|d| d.to_string()),
                ..LeadPatch::default()
            };
            emit(&repo.update_lead(&id, patch).await?)
        }
        Command::RequestTransfer { lead_id } => emit(&protocol.request_transfer(&lead_id).await?),
        Command::Resolve {
            request_id, accept, ..
        } => emit(&protocol.resolve_transfer(&request_id, accept).await?),
        Command::Reassign { lead_id, new_owner } => {
            emit(&protocol.reassign(&lead_id, &new_owner).await?)
        }
        Command::Remove { lead_id, confirm } => {
            if !confirm {
                return Err(AppError::Invalid(
                    "refusing to delete without --confirm".into(),
                ));
            }
            repo.remove_lead(&lead_id, Confirmation::for_lead(&lead_id))
                .await
        }
        Command::Task { to_user, message } => emit(&repo.send_task(&to_user, &message).await?),
        Command::Complete { task_id } => emit(&repo.complete_task(&task_id).await?),
        Command::Agenda { date } => {
            let center = match date {
                Some(date) => ActionCenter::spawn(repo, Arc::new(FixedClock(date))),
                None => ActionCenter::spawn(repo, Arc::new(SystemClock)),
            };
            let agenda = center.current();
            center.close().await;
            emit(&agenda)
        }
        Command::Log => emit(&*repo.snapshot::<OperationLog>()),
        Command::Watch => watch_agenda(repo).await,
        Command::Resync => {
            let outcome = repo.resync().await;
            emit(&*repo.connectivity().borrow())?;
            outcome
        }
    }
}

async fn watch_agenda(repo: &Repository) -> Result<()> {
    let center = ActionCenter::spawn(repo, Arc::new(SystemClock));
    let mut agenda = center.watch();
    let mut connectivity = repo.connectivity();
    emit(&*agenda.borrow_and_update())?;

    loop {
        tokio::select! {
            () = shutdown_signal() => break,
            changed = agenda.changed() => {
                if changed.is_err() {
                    break;
                }
                emit(&*agenda.borrow_and_update())?;
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = connectivity.borrow_and_update().clone();
                if state.is_blocking() {
                    warn!(?state, "store unavailable, retrying in the background");
                } else {
                    info!(?state, "connectivity changed");
                }
            }
        }
    }

    center.close().await;
    Ok(())
}

fn emit<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value)
        .map_err(|err| AppError::Io(format!("failed to encode output: {err}")))?;
    println!("{line}");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "ctrl-c signal handler failed");
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
