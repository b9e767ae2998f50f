use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{MonitorConfig, DEFAULT_CONFIG_PATH};
use crate::query::{SortKey, SortOptions, SortOrder};

#[derive(Parser)]
#[command(name = "fileindex")]
#[command(version)]
#[command(about = "Keeps a durable metadata index of watched directories and answers queries over it")]
#[command(long_about = "fileindex records size, modification time and a content checksum for every file under the watched roots, keeps the index in step with the filesystem while `watch` runs, and answers type, size and date queries against it.")]
pub struct Cli {
    /// Index file to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    pub index: Option<PathBuf>,

    /// Configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable text
    Text,
    /// JSON for scripting
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index files
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Drop files from the index
    Remove {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Find files by extension
    SearchType {
        /// Extension, with or without the leading dot
        extension: String,
        #[command(flatten)]
        sort: SortArgs,
    },
    /// Find files within a size range (bytes, inclusive)
    SearchSize {
        #[arg(long, default_value_t = 0)]
        min: u64,
        #[arg(long)]
        max: Option<u64>,
        #[command(flatten)]
        sort: SortArgs,
    },
    /// Find files modified within a date range (inclusive)
    SearchDate {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[command(flatten)]
        sort: SortArgs,
    },
    /// Show index statistics
    Stats,
    /// Walk a directory and index every matching file
    Scan {
        dir: PathBuf,
        /// Extensions to index (e.g. txt,pdf); defaults to the configured set
        #[arg(long, value_delimiter = ',')]
        extensions: Option<Vec<String>>,
    },
    /// Write a timestamped copy of the index into a directory
    Export { dir: PathBuf },
    /// Watch directories and keep the index current until Ctrl+C
    Watch {
        /// Roots to watch; defaults to the configured paths
        paths: Vec<PathBuf>,
        #[arg(long, value_delimiter = ',')]
        extensions: Option<Vec<String>>,
        /// Debounce interval in seconds (minimum 0.1)
        #[arg(long)]
        interval: Option<f64>,
    },
    /// Show configuration and index summary
    Status,
    /// Edit the configuration file
    Config {
        #[arg(long)]
        interval: Option<f64>,
        #[arg(long, value_name = "PATH")]
        add_path: Vec<PathBuf>,
        #[arg(long, value_name = "PATH")]
        remove_path: Vec<PathBuf>,
        #[arg(long, value_name = "EXT", value_delimiter = ',')]
        add_extension: Vec<String>,
        #[arg(long, value_name = "EXT", value_delimiter = ',')]
        remove_extension: Vec<String>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct SortArgs {
    /// Sort key; results keep index order when omitted
    #[arg(long, value_enum)]
    pub sort_by: Option<SortKey>,

    #[arg(long, value_enum, default_value_t = SortOrder::Desc)]
    pub order: SortOrder,
}

impl SortArgs {
    pub fn options(&self) -> SortOptions {
        SortOptions::new(self.sort_by, self.order)
    }
}

impl Cli {
    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    /// Configuration file plus environment, with `--index` on top.
    pub fn load_config(&self) -> Result<MonitorConfig> {
        let mut config = MonitorConfig::load_or_default(&self.config).apply_env();
        if let Some(index) = &self.index {
            config.index_path = index.clone();
        }
        if let Err(err) = config.validate() {
            bail!("Invalid configuration: {}", err);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::SearchDate {
                start: None,
                end: None,
                ..
            } => Err("search-date needs --start, --end or both".to_string()),
            Command::Watch {
                interval: Some(secs),
                ..
            }
            | Command::Config {
                interval: Some(secs),
                ..
            } if !secs.is_finite() || *secs < 0.1 => {
                Err("Interval must be at least 0.1 seconds".to_string())
            }
            Command::Scan { dir, .. } if !dir.is_dir() => {
                Err(format!("Path is not a directory: {}", dir.display()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("fileindex").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["stats", "--output", "json", "--index", "/tmp/x.json", "-v"]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.index, Some(PathBuf::from("/tmp/x.json")));
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_sort_defaults_to_desc() {
        let cli = parse(&["search-size", "--min", "10", "--sort-by", "name"]);
        match cli.command {
            Command::SearchSize { min, max, sort } => {
                assert_eq!(min, 10);
                assert_eq!(max, None);
                assert_eq!(sort.options(), SortOptions::by(SortKey::Name, SortOrder::Desc));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_watch_extensions_split_on_commas() {
        let cli = parse(&["watch", "/a", "/b", "--extensions", "txt,md", "--interval", "0.5"]);
        match cli.command {
            Command::Watch {
                paths,
                extensions,
                interval,
            } => {
                assert_eq!(paths.len(), 2);
                assert_eq!(extensions, Some(vec!["txt".to_string(), "md".to_string()]));
                assert_eq!(interval, Some(0.5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_validate() {
        assert!(parse(&["search-date"]).validate().is_err());
        assert!(parse(&["search-date", "--start", "2024-01-01"]).validate().is_ok());
        assert!(parse(&["watch", "--interval", "0.01"]).validate().is_err());
        assert!(parse(&["config", "--interval", "2"]).validate().is_ok());
        assert!(parse(&["scan", "/definitely/not/here"]).validate().is_err());
    }

    #[test]
    fn test_add_requires_paths() {
        assert!(Cli::try_parse_from(["fileindex", "add"]).is_err());
    }
}
