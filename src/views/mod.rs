//! Derived per-actor views over the live repository state.

pub mod action_center;
pub mod agenda;

pub use action_center::{ActionCenter, Clock, FixedClock, SystemClock};
pub use agenda::{compute, Agenda, AgendaInput, AgendaItem};
