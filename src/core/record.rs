use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const INDEX_FORMAT_VERSION: &str = "1.0";

/// Metadata for one indexed file.
///
/// The path is the key of the `files` map in the durable index, so it is not
/// serialized as a field and gets filled in when a snapshot is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub extension: String,
    pub size: u64,
    #[serde(rename = "modified")]
    pub modified_at: NaiveDateTime,
    pub checksum: String,
    #[serde(rename = "filename")]
    pub display_name: String,
}

impl FileRecord {
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub last_updated: NaiveDateTime,
    pub version: String,
    pub total_files: usize,
}

/// Full index state, in the shape written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub files: BTreeMap<String, FileRecord>,
    pub index_meta: IndexMeta,
}

impl Default for IndexSnapshot {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            index_meta: IndexMeta {
                last_updated: now(),
                version: INDEX_FORMAT_VERSION.to_string(),
                total_files: 0,
            },
        }
    }
}

impl IndexSnapshot {
    /// Parse a durable index, restoring record paths from their keys.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let mut snapshot: IndexSnapshot = serde_json::from_str(text)?;
        for (key, record) in snapshot.files.iter_mut() {
            record.path = PathBuf::from(key);
        }
        snapshot.index_meta.total_files = snapshot.files.len();
        Ok(snapshot)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Insert or wholesale-replace a record. Returns the previous record.
    pub fn insert(&mut self, record: FileRecord) -> Option<FileRecord> {
        let previous = self.files.insert(record.key(), record);
        self.touch();
        previous
    }

    pub fn remove(&mut self, key: &str) -> Option<FileRecord> {
        let removed = self.files.remove(key);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn records(&self) -> Vec<FileRecord> {
        self.files.values().cloned().collect()
    }

    pub fn stats(&self) -> IndexStats {
        let total_size: u64 = self.files.values().map(|r| r.size).sum();
        let mut type_distribution = BTreeMap::new();
        for record in self.files.values() {
            *type_distribution.entry(record.extension.clone()).or_insert(0) += 1;
        }
        let total_files = self.files.len();

        IndexStats {
            total_files,
            total_size,
            average_size: if total_files == 0 {
                0
            } else {
                total_size / total_files as u64
            },
            type_distribution,
            last_updated: self.index_meta.last_updated,
        }
    }

    fn touch(&mut self) {
        self.index_meta.total_files = self.files.len();
        self.index_meta.last_updated = now();
    }
}

/// Summary counters over the whole index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_size: u64,
    pub average_size: u64,
    /// Count per extension, ordered by extension
    pub type_distribution: BTreeMap<String, usize>,
    pub last_updated: NaiveDateTime,
}

/// Outcome of a bulk add
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub added: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

pub(crate) fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
