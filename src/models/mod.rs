//! Domain model module declarations.

pub mod chat;
pub mod lead;
pub mod log;
pub mod task;
pub mod transfer;
