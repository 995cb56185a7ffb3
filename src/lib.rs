pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;
pub mod utils;

pub use adapters::HttpNotifier;
pub use config::{store::JsonFileStore, CliConfig};
pub use core::{RelayGroup, RelayManager};
pub use server::{router, serve, AppState};
pub use utils::error::{RelayError, Result};
