mod config;
mod fragment;
mod indexer;
mod logging;
mod manager;
mod monitor;
mod preferences;
mod provider;
mod scheduler;
mod workspace;

#[cfg(test)]
mod test_utils;

use clap::{Parser, Subcommand};
use logging::{LogConfig, init_logging};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use config::ManagerConfig;
use fragment::SymbolLocation;
use manager::IndexManager;
use preferences::{
    JsonPreferenceStore, LayeredPreferenceStore, MemoryPreferenceStore, PreferenceScope,
    PreferenceStore, Preferences, keys,
};
use scheduler::{JobHandle, JobState};
use workspace::{Project, ProjectConfig};

/// Incremental C/C++ symbol indexer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Project root directory (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Project name (defaults to the root directory name)
    #[arg(long, value_name = "NAME")]
    name: Option<String>,

    /// Manager configuration file (JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Preference file (JSON); created on first write
    #[arg(long, value_name = "FILE")]
    preferences: Option<PathBuf>,

    /// Indexer id for projects without an `indexer.id` preference
    #[arg(long, value_name = "ID")]
    indexer: Option<String>,

    /// Path to the ctags executable (overrides CTAGS_PATH env var)
    #[arg(long, value_name = "PATH")]
    ctags_path: Option<String>,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides CINDEX_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index every source of the project and report totals
    Index,
    /// Index the project, then look up a symbol by name
    Search {
        name: String,
        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },
    /// Index the project and write its fragment snapshot
    Export { file: PathBuf },
    /// List the fragments visible to the project
    Fragments,
    /// Store a preference and apply it to the live index
    Set {
        key: String,
        value: String,
        /// Store the value for every project instead of this one
        #[arg(long)]
        workspace: bool,
    },
    /// Drop this project's override of a preference
    Unset { key: String },
}

/// Preference store from the CLI: a JSON file when given, otherwise in memory
fn open_preferences(
    path: Option<PathBuf>,
) -> Result<Arc<dyn PreferenceStore>, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let store = JsonPreferenceStore::open(path)?;
            info!("Using preferences from {}", store.path().display());
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryPreferenceStore::default())),
    }
}

fn load_config(path: Option<&Path>) -> Result<ManagerConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(ManagerConfig::load(path)?),
        None => Ok(ManagerConfig::default()),
    }
}

/// Index the whole project and wait for every job; returns the failed count
async fn index_all(manager: &IndexManager, project: &Project) -> usize {
    let handles = manager.index_project(project);
    info!(
        "Indexing {} ({} jobs)",
        project.name(),
        handles.len()
    );
    let failed = wait_for(handles).await;
    manager.wait_until_idle().await;
    failed
}

/// Wait for every job to finish; returns how many failed
async fn wait_for(handles: Vec<JobHandle>) -> usize {
    let mut failed = 0;
    for handle in handles {
        if let JobState::Failed(reason) = handle.wait().await {
            warn!("Job failed: {}", reason);
            failed += 1;
        }
    }
    failed
}

fn describe_location(location: SymbolLocation) -> String {
    match location {
        SymbolLocation::ByteOffset { offset, .. } => format!("@{}", offset),
        SymbolLocation::LineNumber(line) => format!(":{}", line),
    }
}

async fn run(
    manager: &IndexManager,
    project: &Project,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Index => {
            let failed = index_all(manager, project).await;
            let Some(fragment) = manager
                .existing_indexer(project)
                .and_then(|indexer| indexer.fragment())
            else {
                println!("No index kept for {}", project.name());
                return Ok(());
            };
            let content = fragment.acquire_read().await?;
            println!(
                "{}: {} files, {} symbols, {} failed jobs",
                project.name(),
                content.file_count(),
                content.symbol_count(),
                failed
            );
        }
        Command::Search { name, json } => {
            index_all(manager, project).await;
            let symbols = manager.find_symbols(project, &name).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&symbols)?);
            } else {
                for symbol in &symbols {
                    // Tag-derived names print without a binding
                    match symbol.binding() {
                        Some(binding) => println!(
                            "{}{}\t{}\t{}",
                            binding.file.display(),
                            describe_location(binding.location),
                            binding.kind.as_str(),
                            binding.qualified_name
                        ),
                        None => println!(
                            "{}{}\t{}\t{}\tunresolved",
                            symbol.file.display(),
                            describe_location(symbol.location),
                            symbol.kind.as_str(),
                            symbol.qualified_name()
                        ),
                    }
                }
            }
        }
        Command::Export { file } => {
            index_all(manager, project).await;
            let Some(fragment) = manager
                .existing_indexer(project)
                .and_then(|indexer| indexer.fragment())
            else {
                return Err(format!("indexer of {} keeps no fragment", project.name()).into());
            };
            let snapshot = fragment.snapshot().await?;
            snapshot.save(&file)?;
            println!(
                "Wrote {} symbols to {}",
                snapshot.symbol_count(),
                file.display()
            );
        }
        Command::Fragments => {
            index_all(manager, project).await;
            let config = ProjectConfig::default_for(project.clone());
            for fragment in manager.visible_fragments(&config).await {
                match fragment.properties().await {
                    Ok(properties) => println!(
                        "{}\t{}\t{}",
                        properties.fragment_id, properties.format_id, properties.format_version
                    ),
                    Err(e) => warn!("Skipping fragment: {}", e),
                }
            }
        }
        Command::Set {
            key,
            value,
            workspace,
        } => {
            manager.get_indexer_for_project(project);
            let handles = if workspace {
                manager.preferences().put_workspace(&key, &value)?;
                manager.workspace_preference_changed(&key).await
            } else {
                manager.preferences().put_project(project, &key, &value)?;
                manager.preference_changed(project, &key).await
            };
            println!("{} = {} ({} jobs scheduled)", key, value, handles.len());
            wait_for(handles).await;
        }
        Command::Unset { key } => {
            manager.get_indexer_for_project(project);
            manager.preferences().remove_project(project, &key)?;
            let handles = manager.preference_changed(project, &key).await;
            println!("{} unset ({} jobs scheduled)", key, handles.len());
            wait_for(handles).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level, args.log_file);
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let name = args.name.unwrap_or_else(|| {
        root.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string())
    });
    let project = Project::new(name, &root);

    let mut config = load_config(args.config.as_deref())?;
    if let Some(indexer) = args.indexer {
        config.default_indexer = indexer;
    }

    let store = LayeredPreferenceStore::new(open_preferences(args.preferences)?);
    // Priority: CLI arg > CTAGS_PATH env var > ctags on PATH; kept for this run only
    if let Some(ctags) = args.ctags_path.or_else(|| std::env::var("CTAGS_PATH").ok()) {
        store.set_session(&PreferenceScope::Workspace, keys::CTAGS_USE_PATH, "false");
        store.set_session(&PreferenceScope::Workspace, keys::CTAGS_COMMAND, &ctags);
    }
    let preferences = Preferences::new(Arc::new(store));

    let manager = IndexManager::from_config(&config, &root, preferences)?;
    manager.start();
    info!(
        "Index manager ready for {} at {} (default indexer: {})",
        project.name(),
        root.display(),
        manager.default_indexer()
    );

    let result = run(&manager, &project, args.command).await;
    manager.shutdown().await;
    result
}
