/*!
Keep CLI - Command-line interface for Keep storage and query diffs.

This CLI provides utilities for inspecting and editing the key/value state
held by a storage backend, health-checking a backend, and previewing the log
documents produced by diffing two query result sets.
*/

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use keep_core::observability::KeepMetrics;
use keep_core::{
    deserialize_query_data_json, diff, serialize_query_log_item_as_events_json,
    serialize_query_log_item_json, DatabaseRegistry, Dispatcher, LogPayload, LoggerConfig,
    QueryLogItem, StorageBackend, StorageConfig, DEFAULT_DATABASE_PATH,
};
use tabled::{Table, Tabled};
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "keep")]
#[command(about = "CLI for Keep storage and query result diffs")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Storage configuration file (JSON); overrides the storage flags
    #[arg(short, long, global = true, env = "KEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Storage backend to use
    #[arg(short, long, global = true, value_enum, default_value = "sqlite")]
    backend: BackendType,

    /// Location of the backing store
    #[arg(long, global = true, env = "KEEP_DATABASE_PATH", default_value = DEFAULT_DATABASE_PATH)]
    database_path: PathBuf,

    /// Keep the backing store in memory
    #[arg(long, global = true)]
    in_memory: bool,

    /// Disable persistent storage and use the ephemeral backend
    #[arg(long, global = true)]
    disable_database: bool,

    /// Treat a read-only backend as unhealthy
    #[arg(long, global = true)]
    require_write: bool,

    /// Print Prometheus metrics to stderr when the command finishes
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendType {
    Sqlite,
    Filesystem,
    Ephemeral,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every key of every known domain
    Dump,
    /// Print the value stored under a key
    Get {
        domain: String,
        key: String,
    },
    /// Store a value under a key
    Put {
        domain: String,
        key: String,
        value: String,
    },
    /// Delete a key
    Remove {
        domain: String,
        key: String,
    },
    /// List the keys of a domain
    Scan {
        domain: String,
        /// Only list keys starting with this prefix
        #[arg(short, long, default_value = "")]
        prefix: String,
        /// Maximum number of keys, 0 for all
        #[arg(short, long, default_value_t = 0)]
        max: usize,
    },
    /// Check that the configured backend can be opened
    Check,
    /// Diff two result sets and print the log documents
    Diff {
        /// Previous result set (JSON array of rows)
        old: PathBuf,
        /// Current result set (JSON array of rows)
        new: PathBuf,
        /// Query name
        #[arg(long)]
        name: String,
        /// Host identifier
        #[arg(long, default_value = "")]
        host: String,
        /// Print one event per changed row instead of the combined document
        #[arg(long)]
        events: bool,
        /// Merge decorations into the top level of each document
        #[arg(long)]
        decorations_top_level: bool,
        /// Decoration to attach, as name=value
        #[arg(long = "decoration", value_parser = parse_decoration)]
        decorations: Vec<(String, String)>,
    },
}

#[derive(Tabled)]
struct KeyEntry {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn main() -> Result<ExitCode, anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let status = run(&cli)?;

    if cli.print_metrics {
        if let Some(metrics) = KeepMetrics::global() {
            eprint!("{}", metrics.gather_metrics()?);
        }
    }

    Ok(status)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<ExitCode, anyhow::Error> {
    match &cli.command {
        Commands::Diff {
            old,
            new,
            name,
            host,
            events,
            decorations_top_level,
            decorations,
        } => {
            let config = LoggerConfig {
                decorations_top_level: *decorations_top_level,
            };
            print_diff(old, new, name, host, *events, &config, decorations)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Check => return check(&create_storage_config(cli)?),
        _ => {}
    }

    let storage_config = create_storage_config(cli)?;
    let registry = Arc::new(
        DatabaseRegistry::from_config(&storage_config)
            .context("Failed to open the storage backend")?,
    );
    let storage = Dispatcher::local(registry.clone());

    let result = match &cli.command {
        Commands::Dump => {
            let stdout = std::io::stdout();
            storage
                .dump_database(&mut stdout.lock())
                .map_err(anyhow::Error::from)
        }
        Commands::Get { domain, key } => storage
            .get(domain, key)
            .map(|value| println!("{value}"))
            .map_err(Into::into),
        Commands::Put { domain, key, value } => {
            storage.put(domain, key, value).map_err(Into::into)
        }
        Commands::Remove { domain, key } => storage.remove(domain, key).map_err(Into::into),
        Commands::Scan {
            domain,
            prefix,
            max,
        } => scan(&storage, domain, prefix, *max),
        Commands::Check | Commands::Diff { .. } => Ok(()),
    };

    registry.shutdown();
    result.map(|()| ExitCode::SUCCESS)
}

fn create_storage_config(cli: &Cli) -> Result<StorageConfig, anyhow::Error> {
    if let Some(path) = &cli.config {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = StorageConfig::from_json_str(&text)
            .with_context(|| format!("Invalid storage configuration in {}", path.display()))?;
        debug!("Loaded storage configuration from {}", path.display());
        return Ok(config);
    }

    let backend = match cli.backend {
        BackendType::Sqlite => StorageBackend::Sqlite,
        BackendType::Filesystem => StorageBackend::Filesystem,
        BackendType::Ephemeral => StorageBackend::Ephemeral,
    };

    let config = StorageConfig {
        backend,
        database_path: cli.database_path.clone(),
        in_memory: cli.in_memory,
        disable_database: cli.disable_database,
        require_write: cli.require_write,
    };
    config.validate()?;
    Ok(config)
}

fn scan(storage: &Dispatcher, domain: &str, prefix: &str, max: usize) -> Result<(), anyhow::Error> {
    let keys = storage.scan(domain, prefix, max)?;
    if keys.is_empty() {
        println!("No keys found in {domain}");
        return Ok(());
    }

    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        let value = storage.get(domain, &key)?;
        entries.push(KeyEntry { key, value });
    }
    println!("{}", Table::new(entries));
    Ok(())
}

fn check(storage_config: &StorageConfig) -> Result<ExitCode, anyhow::Error> {
    let plugin = storage_config.active_plugin_name();
    let registry = match DatabaseRegistry::from_config(storage_config) {
        Ok(registry) => registry,
        Err(e) => {
            error!("✗ Database plugin {} could not be opened: {}", plugin, e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let healthy = registry.check_db();
    registry.shutdown();

    if healthy {
        info!("Database plugin {} is healthy", plugin);
        println!("✓ {plugin} is healthy");
        Ok(ExitCode::SUCCESS)
    } else {
        error!("✗ Database plugin {} failed its health check", plugin);
        Ok(ExitCode::FAILURE)
    }
}

fn print_diff(
    old: &Path,
    new: &Path,
    name: &str,
    host: &str,
    events: bool,
    config: &LoggerConfig,
    decorations: &[(String, String)],
) -> Result<(), anyhow::Error> {
    let old_rows = read_query_data(old)?;
    let new_rows = read_query_data(new)?;

    let changes = diff(&old_rows, &new_rows);
    debug!(
        added = changes.added.len(),
        removed = changes.removed.len(),
        "Computed differential results"
    );

    let mut item = QueryLogItem::stamped(name, host, LogPayload::Diff(changes));
    for (decoration, value) in decorations {
        item = item.with_decoration(decoration.as_str(), value.as_str());
    }

    if events {
        for line in serialize_query_log_item_as_events_json(&item, config)? {
            println!("{line}");
        }
    } else {
        println!("{}", serialize_query_log_item_json(&item, config)?);
    }
    Ok(())
}

fn read_query_data(path: &Path) -> Result<keep_core::QueryData, anyhow::Error> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    deserialize_query_data_json(&text)
        .with_context(|| format!("{} is not a result set", path.display()))
}

fn parse_decoration(text: &str) -> Result<(String, String), String> {
    match text.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{text}'")),
    }
}
