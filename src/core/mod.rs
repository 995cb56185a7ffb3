pub mod autosave;
pub mod filter;
pub mod group;
pub mod manager;

pub use crate::domain::model::{OutboundMessage, RelayOutcome};
pub use crate::domain::ports::{ConfigProvider, Notifier, SnapshotStore};
pub use crate::utils::error::Result;
pub use group::RelayGroup;
pub use manager::RelayManager;
