//! Core data model
//!
//! Contains file records, metadata extraction and filesystem events

pub mod events;
pub mod metadata;
pub mod record;

// Re-export main types
pub use events::{FileEvent, FileEventKind};
pub use metadata::{extension_of, normalize_path};
pub use record::{BatchReport, FileRecord, IndexMeta, IndexSnapshot, IndexStats};
