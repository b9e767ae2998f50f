//! Configuration management for the file monitor
//!
//! The configuration is an explicit value loaded once (from a TOML file plus
//! environment overrides) and handed to the watcher as [`WatchTarget`]s.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::filter::{normalize_extension, ExtensionFilter};
use crate::store::DEFAULT_INDEX_PATH;
use crate::watcher::{clamp_interval, WatchTarget};

pub const DEFAULT_CONFIG_PATH: &str = "monitor.toml";

/// Persistent settings for the monitor and the index location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Root directories to watch
    pub paths: Vec<PathBuf>,
    /// Extensions to react to; empty means all
    pub extensions: Vec<String>,
    /// Debounce and check interval in seconds
    pub interval: f64,
    /// Watch subdirectories too
    pub recursive: bool,
    /// Location of the durable index
    pub index_path: PathBuf,
    /// When the monitor was last started
    pub last_run: Option<NaiveDateTime>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            extensions: [".txt", ".pdf", ".doc", ".docx"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            interval: 1.0,
            recursive: true,
            index_path: PathBuf::from(DEFAULT_INDEX_PATH),
            last_run: None,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `path`, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Ignoring configuration file: {:#}", err);
                Self::default()
            }
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let text = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Override values from environment variables if present
    pub fn apply_env(mut self) -> Self {
        if let Ok(val) = std::env::var("FILEINDEX_INDEX_PATH") {
            if !val.is_empty() {
                self.index_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("FILEINDEX_INTERVAL") {
            if let Ok(secs) = val.parse::<f64>() {
                self.interval = secs;
            }
        }

        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if !self.interval.is_finite() || self.interval < 0.1 {
            return Err("interval must be at least 0.1 seconds".to_string());
        }

        if self.index_path.as_os_str().is_empty() {
            return Err("index_path must not be empty".to_string());
        }

        Ok(())
    }

    pub fn interval_duration(&self) -> Duration {
        clamp_interval(self.interval)
    }

    pub fn filter(&self) -> ExtensionFilter {
        ExtensionFilter::new(&self.extensions)
    }

    /// One watch target per configured root
    pub fn watch_targets(&self) -> Vec<WatchTarget> {
        self.paths
            .iter()
            .map(|root| {
                WatchTarget::new(root.clone(), self.filter(), self.interval)
                    .recursive(self.recursive)
            })
            .collect()
    }

    pub fn add_paths<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) {
        for path in paths {
            if !self.paths.contains(&path) {
                self.paths.push(path);
            }
        }
    }

    pub fn remove_paths(&mut self, paths: &[PathBuf]) {
        self.paths.retain(|p| !paths.contains(p));
    }

    pub fn add_extensions<I: IntoIterator<Item = String>>(&mut self, extensions: I) {
        for ext in extensions.into_iter().map(|e| normalize_extension(&e)) {
            if !self.extensions.contains(&ext) {
                self.extensions.push(ext);
            }
        }
        self.extensions.sort();
    }

    pub fn remove_extensions(&mut self, extensions: &[String]) {
        let doomed: Vec<String> = extensions.iter().map(|e| normalize_extension(e)).collect();
        self.extensions.retain(|e| !doomed.contains(&normalize_extension(e)));
    }

    /// Remember what a successful start used
    pub fn record_start(&mut self, targets: &[WatchTarget]) {
        self.paths = targets.iter().map(|t| t.root.clone()).collect();
        if let Some(first) = targets.first() {
            self.extensions = first.filter.extensions().map(str::to_string).collect();
            self.interval = first.interval.as_secs_f64();
            self.recursive = first.recursive;
        }
        self.last_run = Some(chrono::Local::now().naive_local());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();

        assert_eq!(config.interval, 1.0);
        assert!(config.recursive);
        assert_eq!(config.extensions, vec![".txt", ".pdf", ".doc", ".docx"]);
        assert_eq!(config.index_path, PathBuf::from("data/main_index.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = MonitorConfig::default();
        config.interval = 0.05;
        assert!(config.validate().is_err());

        config.interval = 0.1;
        assert!(config.validate().is_ok());

        config.index_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_floor() {
        let mut config = MonitorConfig::default();
        config.interval = 0.01;
        assert_eq!(config.interval_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf/monitor.toml");

        let mut config = MonitorConfig::default();
        config.paths = vec![PathBuf::from("/srv/docs")];
        config.interval = 0.5;
        config.last_run = Some(
            NaiveDateTime::parse_from_str("2024-01-01 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
        );
        config.save(&path).unwrap();

        assert_eq!(MonitorConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_and_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.toml");

        fs::write(&path, "interval = 2.5\n").unwrap();
        let config = MonitorConfig::load_or_default(&path);
        assert_eq!(config.interval, 2.5);
        assert_eq!(config.extensions.len(), 4);

        fs::write(&path, "interval = [").unwrap();
        assert_eq!(MonitorConfig::load_or_default(&path), MonitorConfig::default());

        assert_eq!(
            MonitorConfig::load_or_default(dir.path().join("missing.toml")),
            MonitorConfig::default()
        );
    }

    #[test]
    fn test_path_and_extension_edits() {
        let mut config = MonitorConfig::default();
        config.add_paths(vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/a")]);
        assert_eq!(config.paths.len(), 2);
        config.remove_paths(&[PathBuf::from("/a")]);
        assert_eq!(config.paths, vec![PathBuf::from("/b")]);

        config.add_extensions(vec!["MD".to_string(), ".txt".to_string()]);
        assert!(config.extensions.contains(&".md".to_string()));
        assert_eq!(config.extensions.iter().filter(|e| *e == ".txt").count(), 1);

        config.remove_extensions(&["pdf".to_string()]);
        assert!(!config.extensions.contains(&".pdf".to_string()));
    }

    #[test]
    fn test_watch_targets() {
        let mut config = MonitorConfig::default();
        config.paths = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        config.interval = 0.2;
        config.recursive = false;

        let targets = config.watch_targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].root, PathBuf::from("/b"));
        assert_eq!(targets[0].interval, Duration::from_millis(200));
        assert!(!targets[0].recursive);
        assert!(targets[0].filter.should_watch("/a/x.docx"));
    }

    #[test]
    fn test_env_config_loading() {
        std::env::set_var("FILEINDEX_INTERVAL", "3.5");
        std::env::set_var("FILEINDEX_INDEX_PATH", "/tmp/custom_index.json");

        let config = MonitorConfig::default().apply_env();

        assert_eq!(config.interval, 3.5);
        assert_eq!(config.index_path, PathBuf::from("/tmp/custom_index.json"));

        // Cleanup
        std::env::remove_var("FILEINDEX_INTERVAL");
        std::env::remove_var("FILEINDEX_INDEX_PATH");
    }
}
