pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod filter;
pub mod query;
pub mod store;
pub mod watcher;

pub use crate::core::*;
pub use config::MonitorConfig;
pub use error::{IndexError, Result};
pub use filter::ExtensionFilter;
pub use query::{SortKey, SortOptions, SortOrder};
pub use store::IndexStore;
pub use watcher::{EngineState, FileWatcher, Reaction, WatchTarget};
