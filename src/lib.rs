#![forbid(unsafe_code)]

//! Ownership-aware, live-synchronized lead records.
//!
//! The [`persistence`] layer stores collections as JSON documents and
//! publishes change events; a [`repository::Repository`] mirrors them per
//! actor; [`ownership::OwnershipProtocol`] is the only path that moves lead
//! ownership; [`views`] derives agendas from the mirrored snapshots.

pub mod config;
pub mod errors;
pub mod identity;
pub mod models;
pub mod ownership;
pub mod persistence;
pub mod repository;
pub mod views;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
