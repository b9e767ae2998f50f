use std::path::{Path, PathBuf};
use std::time::SystemTime;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};
use serde::{Deserialize, Serialize};

use super::metadata::normalize_path;
use crate::filter::ExtensionFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    Moved { from: PathBuf, to: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    /// Subject of the event; the destination for moves
    pub path: PathBuf,
    pub kind: FileEventKind,
    pub timestamp: SystemTime,
}

impl FileEvent {
    pub fn new(path: PathBuf, kind: FileEventKind) -> Self {
        Self {
            path,
            kind,
            timestamp: SystemTime::now(),
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), FileEventKind::Created)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), FileEventKind::Modified)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), FileEventKind::Deleted)
    }

    pub fn moved(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        let to = to.into();
        Self::new(
            to.clone(),
            FileEventKind::Moved {
                from: from.into(),
                to,
            },
        )
    }

    pub fn label(&self) -> &'static str {
        match self.kind {
            FileEventKind::Created => "created",
            FileEventKind::Modified => "modified",
            FileEventKind::Deleted => "deleted",
            FileEventKind::Moved { .. } => "moved",
        }
    }

    /// Translate a raw notify event into zero or more file events.
    ///
    /// Paths are normalized to absolute form. Events naming a directory are
    /// expanded to the files below it: a directory moved in yields Created
    /// per file, a directory renamed in place yields Moved per file plus a
    /// Deleted for the old directory so leftovers under it are dropped.
    pub fn from_notify(event: &Event) -> Vec<FileEvent> {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                created_below(&event.paths)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
                let (from, to) = (&event.paths[0], &event.paths[1]);
                if to.is_dir() {
                    moved_tree(from, to)
                } else {
                    vec![FileEvent::moved(normalize_path(from), normalize_path(to))]
                }
            }
            // Rename sources and removals may name a directory; the store
            // drops everything under a vanished path
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => event
                .paths
                .iter()
                .map(|p| FileEvent::deleted(normalize_path(p)))
                .collect(),
            // Platforms that cannot pair rename halves report each side alone
            EventKind::Modify(ModifyKind::Name(_)) => event
                .paths
                .iter()
                .flat_map(|p| {
                    if p.exists() {
                        created_below(std::slice::from_ref(p))
                    } else {
                        vec![FileEvent::deleted(normalize_path(p))]
                    }
                })
                .collect(),
            EventKind::Modify(_) => event
                .paths
                .iter()
                .filter(|p| !p.is_dir())
                .map(|p| FileEvent::modified(normalize_path(p)))
                .collect(),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
        }
    }
}

/// Created events for each file path, and for every file under each directory.
fn created_below(paths: &[PathBuf]) -> Vec<FileEvent> {
    let mut events = Vec::new();
    for path in paths {
        if path.is_dir() {
            events.extend(
                ExtensionFilter::all()
                    .walk_tree(path)
                    .iter()
                    .map(|file| FileEvent::created(normalize_path(file))),
            );
        } else {
            events.push(FileEvent::created(normalize_path(path)));
        }
    }
    events
}

fn moved_tree(from: &Path, to: &Path) -> Vec<FileEvent> {
    let from = normalize_path(from);
    let to = normalize_path(to);

    let mut events: Vec<FileEvent> = ExtensionFilter::all()
        .walk_tree(&to)
        .into_iter()
        .filter_map(|file| {
            let relative = file.strip_prefix(&to).ok()?.to_path_buf();
            Some(FileEvent::moved(from.join(relative), file))
        })
        .collect();
    events.push(FileEvent::deleted(from));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs;
    use tempfile::TempDir;

    fn canonical_dir() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_create_file_and_empty_folder() {
        let (_dir, root) = canonical_dir();
        let file = root.join("a.txt");
        fs::write(&file, "x").unwrap();

        let events = FileEvent::from_notify(
            &Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone()),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FileEventKind::Created);
        assert_eq!(events[0].path, file);

        fs::create_dir(root.join("empty")).unwrap();
        let events = FileEvent::from_notify(
            &Event::new(EventKind::Create(CreateKind::Folder)).add_path(root.join("empty")),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_modify_data_on_directory_is_ignored() {
        let (_dir, root) = canonical_dir();
        let events = FileEvent::from_notify(
            &Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(root.clone()),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_rename_both_becomes_move() {
        let (_dir, root) = canonical_dir();
        let to = root.join("b.txt");
        fs::write(&to, "x").unwrap();

        let events = FileEvent::from_notify(
            &Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(root.join("a.txt"))
                .add_path(to.clone()),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].kind,
            FileEventKind::Moved {
                from: root.join("a.txt"),
                to: to.clone()
            }
        );
        assert_eq!(events[0].path, to);
    }

    #[test]
    fn test_rename_halves() {
        let (_dir, root) = canonical_dir();
        let to = root.join("new.txt");
        fs::write(&to, "x").unwrap();

        let from_events = FileEvent::from_notify(
            &Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
                .add_path(root.join("old.txt")),
        );
        assert_eq!(from_events[0].kind, FileEventKind::Deleted);

        let to_events = FileEvent::from_notify(
            &Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To))).add_path(to),
        );
        assert_eq!(to_events[0].kind, FileEventKind::Created);

        let any_events = FileEvent::from_notify(
            &Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
                .add_path(root.join("vanished.txt")),
        );
        assert_eq!(any_events[0].kind, FileEventKind::Deleted);
    }

    #[test]
    fn test_remove_and_access() {
        let (_dir, root) = canonical_dir();
        let events = FileEvent::from_notify(
            &Event::new(EventKind::Remove(RemoveKind::File)).add_path(root.join("gone.txt")),
        );
        assert_eq!(events[0].kind, FileEventKind::Deleted);
        assert_eq!(events[0].path, root.join("gone.txt"));

        let events = FileEvent::from_notify(
            &Event::new(EventKind::Access(notify::event::AccessKind::Any))
                .add_path(root.join("gone.txt")),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_directory_moved_in_expands_to_files() {
        let (_dir, root) = canonical_dir();
        fs::create_dir_all(root.join("incoming/nested")).unwrap();
        fs::write(root.join("incoming/a.txt"), "a").unwrap();
        fs::write(root.join("incoming/nested/b.txt"), "b").unwrap();

        let mut events = FileEvent::from_notify(
            &Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
                .add_path(root.join("incoming")),
        );
        events.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == FileEventKind::Created));
        assert_eq!(events[0].path, root.join("incoming/a.txt"));
        assert_eq!(events[1].path, root.join("incoming/nested/b.txt"));
    }

    #[test]
    fn test_directory_rename_rekeys_every_file() {
        let (_dir, root) = canonical_dir();
        fs::create_dir_all(root.join("after/nested")).unwrap();
        fs::write(root.join("after/a.txt"), "a").unwrap();
        fs::write(root.join("after/nested/b.txt"), "b").unwrap();

        let events = FileEvent::from_notify(
            &Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(root.join("before"))
                .add_path(root.join("after")),
        );

        assert_eq!(events.len(), 3);
        let moves: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.kind {
                FileEventKind::Moved { from, to } => Some((from.clone(), to.clone())),
                _ => None,
            })
            .collect();
        assert!(moves.contains(&(root.join("before/a.txt"), root.join("after/a.txt"))));
        assert!(moves.contains(&(
            root.join("before/nested/b.txt"),
            root.join("after/nested/b.txt")
        )));

        // The old directory itself closes the batch
        let last = events.last().unwrap();
        assert_eq!(last.kind, FileEventKind::Deleted);
        assert_eq!(last.path, root.join("before"));
    }
}
