use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::core::extension_of;

/// Set of extensions a watch reacts to. Empty means every extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionFilter {
    extensions: BTreeSet<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| e.len() > 1)
                .collect(),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    pub fn should_watch<P: AsRef<Path>>(&self, path: P) -> bool {
        self.is_empty() || self.extensions.contains(&extension_of(path.as_ref()))
    }

    /// Walk `root` and return every regular file passing the filter.
    ///
    /// Honours `.gitignore`/`.ignore` files and never descends into `.git`.
    /// Used for bulk scans; the watcher itself never consults ignore files.
    pub fn walk<P: AsRef<Path>>(&self, root: P) -> Vec<PathBuf> {
        let mut builder = WalkBuilder::new(root.as_ref());
        builder
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .ignore(true)
            .parents(true)
            .filter_entry(|entry| entry.file_name() != ".git");
        self.collect_files(&builder)
    }

    /// Every file under `root` passing the filter, with no ignore rules.
    ///
    /// This is the watcher's view of a tree, used to expand events that
    /// name a whole directory.
    pub fn walk_tree<P: AsRef<Path>>(&self, root: P) -> Vec<PathBuf> {
        let mut builder = WalkBuilder::new(root.as_ref());
        builder.standard_filters(false);
        self.collect_files(&builder)
    }

    fn collect_files(&self, builder: &WalkBuilder) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let path = entry.path();
                    if path.is_file() && self.should_watch(path) {
                        files.push(path.to_path_buf());
                    }
                }
                Err(err) => {
                    tracing::warn!("Error walking directory: {}", err);
                }
            }
        }

        files
    }
}

/// `"TXT"`, `".txt"` and `" .Txt "` all become `".txt"`.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
