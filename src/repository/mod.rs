//! Entity repository: typed live mirrors of the record store.

pub mod live;
pub mod repo;
pub mod subscription;

pub use live::{Mirrored, Snapshot};
pub use repo::{Confirmation, Connectivity, Repository};
pub use subscription::Subscription;
