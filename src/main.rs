use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;

use fileindex::{
    cli::{Cli, Command, OutputFormat},
    config::MonitorConfig,
    ExtensionFilter, FileRecord, FileWatcher, IndexStats, IndexStore,
};

fn main() {
    let cli = Cli::parse();

    if let Err(err) = cli.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    cli.setup_logging();

    if let Err(err) = run(&cli) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = cli.load_config()?;

    match &cli.command {
        Command::Add { paths } => {
            let store = open_store(&config)?;
            let mut added = Vec::new();
            let mut failures = 0;
            for path in paths {
                match store.add(path) {
                    Ok(record) => added.push(record),
                    Err(err) => {
                        tracing::error!("Failed to add {}: {}", path.display(), err);
                        failures += 1;
                    }
                }
            }
            print_records(cli.output, &added, "Added")?;
            if failures > 0 {
                bail!("{} of {} files could not be added", failures, paths.len());
            }
        }
        Command::Remove { paths } => {
            let store = open_store(&config)?;
            let mut removed = Vec::new();
            let mut failures = 0;
            for path in paths {
                match store.remove(path) {
                    Ok(record) => removed.push(record),
                    Err(err) => {
                        tracing::error!("Failed to remove {}: {}", path.display(), err);
                        failures += 1;
                    }
                }
            }
            print_records(cli.output, &removed, "Removed")?;
            if failures > 0 {
                bail!("{} of {} files could not be removed", failures, paths.len());
            }
        }
        Command::SearchType { extension, sort } => {
            let store = open_store(&config)?;
            let hits = store.search_by_type(extension, sort.options());
            print_records(cli.output, &hits, "Found")?;
        }
        Command::SearchSize { min, max, sort } => {
            let store = open_store(&config)?;
            let hits = store.search_by_size(*min, *max, sort.options());
            print_records(cli.output, &hits, "Found")?;
        }
        Command::SearchDate { start, end, sort } => {
            let store = open_store(&config)?;
            let hits = store.search_by_date(start.as_deref(), end.as_deref(), sort.options())?;
            print_records(cli.output, &hits, "Found")?;
        }
        Command::Stats => {
            let store = open_store(&config)?;
            print_stats(cli.output, &store.stats())?;
        }
        Command::Scan { dir, extensions } => {
            let store = open_store(&config)?;
            let filter = match extensions {
                Some(exts) => ExtensionFilter::new(exts),
                None => config.filter(),
            };
            let files = filter.walk(dir);
            tracing::info!("Found {} files under {}", files.len(), dir.display());
            let report = store.add_many(&files)?;
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => {
                    println!("Indexed {} files", report.added.len());
                    for (path, reason) in &report.failed {
                        println!("  failed: {} ({})", path.display(), reason);
                    }
                }
            }
        }
        Command::Export { dir } => {
            let store = open_store(&config)?;
            let target = store.export_to(dir)?;
            match cli.output {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "exported": target }))
                }
                OutputFormat::Text => println!("Exported index to {}", target.display()),
            }
        }
        Command::Watch {
            paths,
            extensions,
            interval,
        } => {
            if !paths.is_empty() {
                config.paths = paths.iter().map(|p| absolute(p)).collect();
            }
            if let Some(exts) = extensions {
                config.extensions = exts.clone();
            }
            if let Some(secs) = interval {
                config.interval = *secs;
            }
            if config.paths.is_empty() {
                bail!("No paths configured for monitoring; pass PATHS or use `config --add-path`");
            }
            run_watch(cli, config)?;
        }
        Command::Status => {
            let store = open_store(&config)?;
            print_status(cli.output, &config, &store.stats())?;
        }
        Command::Config {
            interval,
            add_path,
            remove_path,
            add_extension,
            remove_extension,
        } => {
            if let Some(secs) = interval {
                config.interval = *secs;
            }
            config.add_paths(add_path.iter().map(|p| absolute(p)));
            let remove_path: Vec<PathBuf> = remove_path.iter().map(|p| absolute(p)).collect();
            config.remove_paths(&remove_path);
            config.add_extensions(add_extension.iter().cloned());
            config.remove_extensions(remove_extension);
            config.save(&cli.config)?;
            tracing::info!("Saved configuration to {}", cli.config.display());
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Text => print_config(&config),
            }
        }
    }

    Ok(())
}

fn run_watch(cli: &Cli, mut config: MonitorConfig) -> Result<()> {
    let store = Arc::new(open_store(&config)?);
    let mut watcher = FileWatcher::new(store.clone(), config.watch_targets());
    watcher.start()?;

    config.record_start(watcher.targets());
    if let Err(err) = config.save(&cli.config) {
        tracing::warn!("Could not save configuration: {:#}", err);
    }

    println!("Watching:");
    for target in watcher.targets() {
        println!("  {}", target.root.display());
    }
    println!("Press Ctrl+C to quit");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    watcher.stop()?;
    println!("Stopped; {} files indexed", store.len());
    Ok(())
}

fn open_store(config: &MonitorConfig) -> Result<IndexStore> {
    IndexStore::open(&config.index_path)
        .with_context(|| format!("Failed to open index {}", config.index_path.display()))
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Serialize)]
struct RecordOutput<'a> {
    path: &'a Path,
    #[serde(flatten)]
    record: &'a FileRecord,
}

fn print_records(format: OutputFormat, records: &[FileRecord], verb: &str) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let rows: Vec<RecordOutput> = records
                .iter()
                .map(|record| RecordOutput {
                    path: &record.path,
                    record,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            println!("{} {} files", verb, records.len());
            for record in records {
                println!(
                    "  {}  {:>10}  {}",
                    record.modified_at.format("%Y-%m-%d %H:%M:%S"),
                    format_size(record.size),
                    record.path.display()
                );
            }
        }
    }
    Ok(())
}

fn print_stats(format: OutputFormat, stats: &IndexStats) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(stats)?),
        OutputFormat::Text => {
            println!("Total files:   {}", stats.total_files);
            println!("Total size:    {}", format_size(stats.total_size));
            println!("Average size:  {}", format_size(stats.average_size));
            println!(
                "Last updated:  {}",
                stats.last_updated.format("%Y-%m-%d %H:%M:%S")
            );
            if !stats.type_distribution.is_empty() {
                println!("By type:");
                for (ext, count) in &stats.type_distribution {
                    let label = if ext.is_empty() { "(none)" } else { ext.as_str() };
                    println!("  {:<10} {}", label, count);
                }
            }
        }
    }
    Ok(())
}

fn print_status(format: OutputFormat, config: &MonitorConfig, stats: &IndexStats) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let status = serde_json::json!({ "config": config, "index": stats });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Text => {
            print_config(config);
            println!();
            print_stats(format, stats)?;
        }
    }
    Ok(())
}

fn print_config(config: &MonitorConfig) {
    println!("Index:       {}", config.index_path.display());
    println!("Interval:    {:.1}s", config.interval);
    println!("Recursive:   {}", config.recursive);
    println!("Extensions:  {}", config.extensions.join(", "));
    println!("Paths:");
    for path in &config.paths {
        let marker = if path.exists() { "" } else { " (missing)" };
        println!("  {}{}", path.display(), marker);
    }
    match config.last_run {
        Some(at) => println!("Last run:    {}", at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Last run:    never"),
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
