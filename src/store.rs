//! Durable path → metadata index.
//!
//! The store owns the only copy of the snapshot. Every mutation runs under a
//! single mutex and is persisted before the call returns, using a
//! temp-file/backup/rename sequence so the durable file is always either the
//! previous or the new snapshot.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::core::metadata::{self, normalize_path};
use crate::core::{BatchReport, FileRecord, IndexSnapshot, IndexStats};
use crate::error::{IndexError, Result};

pub const DEFAULT_INDEX_PATH: &str = "data/main_index.json";

pub struct IndexStore {
    index_path: PathBuf,
    snapshot: Mutex<IndexSnapshot>,
}

impl IndexStore {
    /// Open the index at `index_path`, creating its directory if needed.
    ///
    /// A missing file yields an empty index. A corrupt one is logged and
    /// replaced by an empty index on the next successful mutation.
    pub fn open<P: AsRef<Path>>(index_path: P) -> Result<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        if let Some(parent) = index_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
                info!("Created directory: {}", parent.display());
            }
        }

        let snapshot = match load_snapshot(&index_path) {
            Ok(Some(snapshot)) => {
                debug!(
                    "Loaded {} records from {}",
                    snapshot.len(),
                    index_path.display()
                );
                snapshot
            }
            Ok(None) => IndexSnapshot::default(),
            Err(err) => {
                warn!("{}; starting with an empty index", err);
                IndexSnapshot::default()
            }
        };

        Ok(Self {
            index_path,
            snapshot: Mutex::new(snapshot),
        })
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Index `path`, replacing any existing record for it.
    ///
    /// The file is read under the store lock, so a concurrent `remove` of
    /// the same path is ordered strictly before or after this call.
    pub fn add<P: AsRef<Path>>(&self, path: P) -> Result<FileRecord> {
        let path = path.as_ref();
        let mut snapshot = self.lock();
        if !path.exists() {
            return Err(IndexError::NotFound(path.to_path_buf()));
        }
        let record = metadata::extract(path)?;

        snapshot.insert(record.clone());
        self.persist(&snapshot)?;
        debug!("Indexed {}", record.path.display());
        Ok(record)
    }

    /// Drop the record for `path`. Fails with `NotFound` if it is not indexed.
    pub fn remove<P: AsRef<Path>>(&self, path: P) -> Result<FileRecord> {
        let path = path.as_ref();
        let mut snapshot = self.lock();
        let key = resolve_key(&snapshot, path)
            .ok_or_else(|| IndexError::NotFound(path.to_path_buf()))?;
        let removed = snapshot
            .remove(&key)
            .ok_or_else(|| IndexError::NotFound(path.to_path_buf()))?;
        self.persist(&snapshot)?;
        debug!("Removed {}", removed.path.display());
        Ok(removed)
    }

    /// Drop every record strictly below directory `dir`. Returns how many.
    pub fn remove_prefix<P: AsRef<Path>>(&self, dir: P) -> Result<usize> {
        let dir = normalize_path(dir.as_ref());
        let mut snapshot = self.lock();
        let doomed: Vec<String> = snapshot
            .files
            .values()
            .filter(|r| r.path != dir && r.path.starts_with(&dir))
            .map(FileRecord::key)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        for key in &doomed {
            snapshot.remove(key);
        }
        self.persist(&snapshot)?;
        debug!("Removed {} records under {}", doomed.len(), dir.display());
        Ok(doomed.len())
    }

    /// Re-read `path` and swap its record in one critical section.
    ///
    /// If the file can no longer be read the stale record is dropped, so the
    /// index never keeps metadata for a path it failed to observe.
    pub fn refresh<P: AsRef<Path>>(&self, path: P) -> Result<FileRecord> {
        let path = path.as_ref();
        let mut snapshot = self.lock();
        match metadata::extract(path) {
            Ok(record) => {
                snapshot.insert(record.clone());
                self.persist(&snapshot)?;
                debug!("Refreshed {}", record.path.display());
                Ok(record)
            }
            Err(err) => {
                if let Some(key) = resolve_key(&snapshot, path) {
                    snapshot.remove(&key);
                    self.persist(&snapshot)?;
                    debug!("Dropped unreadable {}", key);
                }
                Err(err)
            }
        }
    }

    /// Index every path, persisting once at the end.
    ///
    /// Each file is read and inserted under the lock on its own, so queries
    /// interleave with a long scan.
    pub fn add_many<I, P>(&self, paths: I) -> Result<BatchReport>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut report = BatchReport::default();
        for path in paths {
            let path = path.as_ref();
            let mut snapshot = self.lock();
            match metadata::extract(path) {
                Ok(record) => {
                    report.added.push(record.path.clone());
                    snapshot.insert(record);
                }
                Err(err) => report.failed.push((path.to_path_buf(), err.to_string())),
            }
        }

        if report.added.is_empty() {
            return Ok(report);
        }

        let snapshot = self.lock();
        self.persist(&snapshot)?;
        info!("Indexed {} files ({} failed)", report.added.len(), report.failed.len());
        Ok(report)
    }

    pub fn stats(&self) -> IndexStats {
        self.lock().stats()
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        self.lock().clone()
    }

    /// Point-in-time copy of every record, in path order
    pub fn records(&self) -> Vec<FileRecord> {
        self.lock().records()
    }

    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<FileRecord> {
        let snapshot = self.lock();
        resolve_key(&snapshot, path.as_ref()).and_then(|key| snapshot.files.get(&key).cloned())
    }

    pub fn contains<P: AsRef<Path>>(&self, path: P) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `path` is the durable index or one of its scratch files.
    pub fn is_store_file(&self, path: &Path) -> bool {
        let target = normalize_path(&self.index_path);
        let path = normalize_path(path);
        path == target || path == sibling(&target, "tmp") || path == sibling(&target, "bak")
    }

    /// Write a timestamped copy of the index into `dir`.
    pub fn export_to<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| IndexError::io(dir, e))?;
        let name = format!(
            "main_index_{}.json",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        let target = dir.join(name);
        let json = self
            .lock()
            .to_json()
            .map_err(|e| IndexError::io(&target, e.into()))?;
        fs::write(&target, json).map_err(|e| IndexError::io(&target, e))?;
        info!("Exported index to {}", target.display());
        Ok(target)
    }

    fn lock(&self) -> MutexGuard<'_, IndexSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `snapshot` to the durable file.
    ///
    /// Called with the lock held. On failure the in-memory snapshot keeps
    /// the mutation so the next successful persist picks it up.
    fn persist(&self, snapshot: &IndexSnapshot) -> Result<()> {
        self.persist_with(snapshot, |from, to| fs::rename(from, to))
    }

    fn persist_with<R>(&self, snapshot: &IndexSnapshot, rename: R) -> Result<()>
    where
        R: Fn(&Path, &Path) -> io::Result<()>,
    {
        let temp_path = sibling(&self.index_path, "tmp");
        let backup_path = sibling(&self.index_path, "bak");

        let result = self.replace_durable_file(snapshot, &temp_path, &backup_path, rename);

        if temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }

        result
    }

    fn replace_durable_file<R>(
        &self,
        snapshot: &IndexSnapshot,
        temp_path: &Path,
        backup_path: &Path,
        rename: R,
    ) -> Result<()>
    where
        R: Fn(&Path, &Path) -> io::Result<()>,
    {
        write_synced(temp_path, snapshot)?;

        let had_original = self.index_path.exists();
        if had_original {
            rename(&self.index_path, backup_path)
                .map_err(|e| IndexError::io(&self.index_path, e))?;
        }

        match rename(temp_path, &self.index_path) {
            Ok(()) => {
                if had_original {
                    let _ = fs::remove_file(backup_path);
                }
                Ok(())
            }
            Err(rename_error) => {
                if had_original {
                    match rename(backup_path, &self.index_path) {
                        Ok(()) => warn!("Restored index from backup after failed save"),
                        Err(restore_error) => warn!(
                            "Could not restore index from backup {}: {}",
                            backup_path.display(),
                            restore_error
                        ),
                    }
                }
                Err(IndexError::io(&self.index_path, rename_error))
            }
        }
    }
}

fn load_snapshot(path: &Path) -> Result<Option<IndexSnapshot>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(IndexError::CorruptIndex {
                path: path.to_path_buf(),
                detail: err.to_string(),
            })
        }
    };
    IndexSnapshot::from_json(&text)
        .map(Some)
        .map_err(|e| IndexError::CorruptIndex {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

fn write_synced(path: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    let json = snapshot
        .to_json()
        .map_err(|e| IndexError::io(path, e.into()))?;
    let mut file = File::create(path).map_err(|e| IndexError::io(path, e))?;
    file.write_all(json.as_bytes())
        .map_err(|e| IndexError::io(path, e))?;
    file.sync_all().map_err(|e| IndexError::io(path, e))
}

/// Look `path` up as given, then in normalized form.
fn resolve_key(snapshot: &IndexSnapshot, path: &Path) -> Option<String> {
    let raw = path.to_string_lossy();
    if snapshot.files.contains_key(raw.as_ref()) {
        return Some(raw.into_owned());
    }
    let normalized = normalize_path(path).to_string_lossy().into_owned();
    snapshot
        .files
        .contains_key(&normalized)
        .then_some(normalized)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, IndexStore) {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(dir.path().join("data/main_index.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_creates_directory() {
        let (dir, store) = setup();
        assert!(dir.path().join("data").is_dir());
        assert!(store.is_empty());
        assert!(!store.index_path().exists());
    }

    #[test]
    fn test_add_and_remove_restore_count() {
        let (dir, store) = setup();
        let file = dir.path().join("a.txt");
        fs::write(&file, "alpha").unwrap();

        let before = store.stats().total_files;
        let record = store.add(&file).unwrap();
        assert_eq!(store.stats().total_files, before + 1);
        assert!(store.contains(&file));
        assert!(store.index_path().exists());

        let removed = store.remove(&file).unwrap();
        assert_eq!(removed, record);
        assert_eq!(store.stats().total_files, before);
        assert!(!store.contains(&file));
    }

    #[test]
    fn test_add_missing_is_not_found() {
        let (dir, store) = setup();
        let err = store.add(dir.path().join("missing.txt")).unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.index_path().exists());
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let (dir, store) = setup();
        let err = store.remove(dir.path().join("never.txt")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_re_add_is_idempotent() {
        let (dir, store) = setup();
        let file = dir.path().join("same.txt");
        fs::write(&file, "unchanged").unwrap();

        let first = store.add(&file).unwrap();
        let second = store.add(&file).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reload_round_trip() {
        let (dir, store) = setup();
        for (name, body) in [("a.txt", "1"), ("b.pdf", "22"), ("c", "333")] {
            let file = dir.path().join(name);
            fs::write(&file, body).unwrap();
            store.add(&file).unwrap();
        }
        let saved = store.snapshot();

        let reopened = IndexStore::open(store.index_path()).unwrap();
        assert_eq!(reopened.snapshot(), saved);
        assert_eq!(reopened.stats().total_files, 3);
    }

    #[test]
    fn test_corrupt_index_starts_empty() {
        let (dir, store) = setup();
        fs::write(store.index_path(), "{ not json").unwrap();

        let reopened = IndexStore::open(store.index_path()).unwrap();
        assert!(reopened.is_empty());

        // The next mutation overwrites the corrupt file with a valid one
        let file = dir.path().join("fresh.txt");
        fs::write(&file, "x").unwrap();
        reopened.add(&file).unwrap();
        let text = fs::read_to_string(reopened.index_path()).unwrap();
        assert_eq!(IndexSnapshot::from_json(&text).unwrap().len(), 1);
    }

    #[test]
    fn test_persist_leaves_no_scratch_files() {
        let (dir, store) = setup();
        let file = dir.path().join("a.txt");
        fs::write(&file, "alpha").unwrap();
        store.add(&file).unwrap();
        store.add(&file).unwrap();

        assert!(!sibling(store.index_path(), "tmp").exists());
        assert!(!sibling(store.index_path(), "bak").exists());
    }

    #[test]
    fn test_failed_persist_keeps_durable_file() {
        let (dir, store) = setup();
        let file = dir.path().join("a.txt");
        fs::write(&file, "alpha").unwrap();
        store.add(&file).unwrap();
        let durable = fs::read_to_string(store.index_path()).unwrap();

        // A directory squatting on the temp path makes the write fail
        fs::create_dir_all(sibling(store.index_path(), "tmp")).unwrap();
        let other = dir.path().join("b.txt");
        fs::write(&other, "beta").unwrap();
        assert!(matches!(store.add(&other), Err(IndexError::Io { .. })));

        assert_eq!(fs::read_to_string(store.index_path()).unwrap(), durable);
        // The mutation is kept in memory for the next save
        assert!(store.contains(&other));
    }

    #[test]
    fn test_failed_swap_restores_backup() {
        let (dir, store) = setup();
        let file = dir.path().join("a.txt");
        fs::write(&file, "alpha").unwrap();
        store.add(&file).unwrap();
        let durable = fs::read_to_string(store.index_path()).unwrap();

        let temp_path = sibling(store.index_path(), "tmp");
        let backup_path = sibling(store.index_path(), "bak");
        let mut changed = store.snapshot();
        changed.remove(&fs::canonicalize(&file).unwrap().to_string_lossy());

        // Moving the durable file aside works, swapping the new one in does not
        let result = store.persist_with(&changed, |from, to| {
            if from == temp_path.as_path() {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "swap refused"))
            } else {
                fs::rename(from, to)
            }
        });

        assert!(matches!(result, Err(IndexError::Io { .. })));
        assert_eq!(fs::read_to_string(store.index_path()).unwrap(), durable);
        assert!(!temp_path.exists());
        assert!(!backup_path.exists());
    }

    #[test]
    fn test_remove_prefix_drops_whole_tree() {
        let (dir, store) = setup();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("nested")).unwrap();
        fs::create_dir_all(dir.path().join("tree2")).unwrap();
        for path in ["tree/a.txt", "tree/nested/b.txt", "tree2/c.txt"] {
            let file = dir.path().join(path);
            fs::write(&file, path).unwrap();
            store.add(&file).unwrap();
        }

        fs::remove_dir_all(&tree).unwrap();
        assert_eq!(store.remove_prefix(&tree).unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.contains(dir.path().join("tree2/c.txt")));
        assert_eq!(store.remove_prefix(&tree).unwrap(), 0);
    }

    #[test]
    fn test_refresh_drops_unreadable_record() {
        let (dir, store) = setup();
        let file = dir.path().join("a.txt");
        fs::write(&file, "alpha").unwrap();
        store.add(&file).unwrap();

        fs::write(&file, "alpha and more").unwrap();
        let refreshed = store.refresh(&file).unwrap();
        assert_eq!(refreshed.size, 14);
        assert_eq!(store.len(), 1);

        fs::remove_file(&file).unwrap();
        assert!(store.refresh(&file).unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_many_reports_failures() {
        let (dir, store) = setup();
        let good = dir.path().join("good.txt");
        fs::write(&good, "ok").unwrap();
        let bad = dir.path().join("bad.txt");

        let report = store.add_many([&good, &bad]).unwrap();
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, bad);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_is_store_file() {
        let (dir, store) = setup();
        assert!(store.is_store_file(&dir.path().join("data/main_index.json")));
        assert!(store.is_store_file(&dir.path().join("data/main_index.json.tmp")));
        assert!(store.is_store_file(&dir.path().join("data/main_index.json.bak")));
        assert!(!store.is_store_file(&dir.path().join("data/other.json")));
    }

    #[test]
    fn test_export_to() {
        let (dir, store) = setup();
        let file = dir.path().join("a.txt");
        fs::write(&file, "alpha").unwrap();
        store.add(&file).unwrap();

        let exported = store.export_to(dir.path().join("reports")).unwrap();
        let text = fs::read_to_string(&exported).unwrap();
        assert_eq!(IndexSnapshot::from_json(&text).unwrap(), store.snapshot());
    }
}
