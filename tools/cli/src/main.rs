//! offsync CLI - Command line interface for the offline-first task store.
//!
//! Tasks are edited locally and queued; `sync` reconciles the queue with
//! the remote authority.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use offsync_common::{EntityId, Task};
use offsync_store::{RecordStore, SqliteStore, TaskPatch, TaskRepository};
use offsync_sync::{HttpRemote, SyncConfig, SyncEngine, SyncMode, SyncResult, SyncScheduler};

type Engine = SyncEngine<SqliteStore, HttpRemote>;

#[derive(Parser)]
#[command(name = "offsync")]
#[command(about = "offsync - Offline-first task list with background sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Local database file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Remote authority base URL (overrides config and environment).
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a task.
    Add {
        /// Task title.
        title: String,

        /// Optional description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Change a task's title or description.
    Edit {
        /// Task id.
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        /// New description; an empty string clears it.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Mark a task as completed.
    Done {
        /// Task id.
        id: String,
    },

    /// Delete a task.
    Delete {
        /// Task id.
        id: String,
    },

    /// List tasks.
    List {
        /// Include deleted tasks.
        #[arg(short, long)]
        all: bool,
    },

    /// Run one sync cycle.
    Sync,

    /// Show queue and connectivity status.
    Status,

    /// Keep syncing until interrupted.
    Watch {
        /// Sync every N seconds.
        #[arg(short, long, conflicts_with = "on_reconnect")]
        interval: Option<u64>,

        /// Poll connectivity every N seconds and sync when the remote comes back.
        #[arg(long, value_name = "POLL_SECS")]
        on_reconnect: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db_path = match cli.db {
        Some(path) => path,
        None => default_db_path()?,
    };
    let store = Arc::new(open_store(&db_path)?);
    let repo = TaskRepository::new(store.clone());

    match cli.command {
        Commands::Add { title, description } => cmd_add(&repo, title, description),

        Commands::Edit {
            id,
            title,
            description,
        } => cmd_edit(&repo, &id, title, description),

        Commands::Done { id } => cmd_done(&repo, &id),

        Commands::Delete { id } => cmd_delete(&repo, &id),

        Commands::List { all } => cmd_list(&store, all),

        Commands::Sync => {
            let engine = build_engine(store, cli.config.as_deref(), cli.endpoint)?;
            cmd_sync(&engine).await
        }

        Commands::Status => {
            let engine = build_engine(store, cli.config.as_deref(), cli.endpoint)?;
            cmd_status(&engine, &repo).await
        }

        Commands::Watch {
            interval,
            on_reconnect,
        } => {
            let engine = build_engine(store, cli.config.as_deref(), cli.endpoint)?;
            cmd_watch(Arc::new(engine), interval, on_reconnect).await
        }
    }
}

fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Could not determine data directory")?;
    Ok(data_dir.join("offsync").join("offsync.db"))
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    SqliteStore::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn build_engine(
    store: Arc<SqliteStore>,
    config_path: Option<&Path>,
    endpoint: Option<String>,
) -> Result<Engine> {
    let mut config = SyncConfig::load(config_path).context("Failed to load configuration")?;
    if let Some(endpoint) = endpoint {
        config = config.with_endpoint(endpoint);
    }

    let remote = Arc::new(HttpRemote::new(&config).context("Failed to create HTTP client")?);
    SyncEngine::new(store, remote, config).context("Invalid sync configuration")
}

fn parse_id(id: &str) -> Result<EntityId> {
    EntityId::new(id).context("Invalid task id")
}

fn print_task(task: &Task) {
    let mark = if task.completed { "x" } else { " " };
    let deleted = if task.is_deleted { " (deleted)" } else { "" };
    println!(
        "[{}] {}  {}{}  <{}>",
        mark, task.id, task.title, deleted, task.sync_status
    );
    if let Some(description) = &task.description {
        println!("      {}", description);
    }
}

/// Create a task.
fn cmd_add(
    repo: &TaskRepository<SqliteStore>,
    title: String,
    description: Option<String>,
) -> Result<()> {
    let task = repo
        .create(title, description)
        .context("Failed to create task")?;
    println!("Created task {}", task.id);
    Ok(())
}

/// Edit a task.
fn cmd_edit(
    repo: &TaskRepository<SqliteStore>,
    id: &str,
    title: Option<String>,
    description: Option<String>,
) -> Result<()> {
    let mut patch = TaskPatch::default();
    if let Some(title) = title {
        patch = patch.title(title);
    }
    if let Some(description) = description {
        patch = patch.description(Some(description).filter(|d| !d.is_empty()));
    }

    let task = repo
        .update(&parse_id(id)?, patch)
        .context("Failed to update task")?;
    print_task(&task);
    Ok(())
}

/// Complete a task.
fn cmd_done(repo: &TaskRepository<SqliteStore>, id: &str) -> Result<()> {
    let task = repo
        .complete(&parse_id(id)?)
        .context("Failed to complete task")?;
    print_task(&task);
    Ok(())
}

/// Delete a task.
fn cmd_delete(repo: &TaskRepository<SqliteStore>, id: &str) -> Result<()> {
    let task = repo
        .delete(&parse_id(id)?)
        .context("Failed to delete task")?;
    println!("Deleted task {}", task.id);
    Ok(())
}

/// List tasks.
fn cmd_list(store: &SqliteStore, all: bool) -> Result<()> {
    let tasks = store.list(all).context("Failed to list tasks")?;
    if tasks.is_empty() {
        println!("No tasks.");
    } else {
        for task in &tasks {
            print_task(task);
        }
    }
    Ok(())
}

fn print_result(result: &SyncResult) {
    if let Some(reason) = &result.aborted {
        println!("Sync aborted: {}", reason);
        return;
    }
    println!("Sync finished in {:?}", result.duration);
    println!("  Synced: {} ({} conflicts)", result.synced, result.conflicts);
    println!("  Failed: {} ({} gave up)", result.failed, result.exhausted);
    if result.unanswered > 0 {
        println!("  Unanswered: {}", result.unanswered);
    }
    for failure in &result.errors {
        println!(
            "  ! {} {} ({}): {}",
            failure.kind, failure.entity_id, failure.entry_id, failure.message
        );
    }
}

/// Run one sync cycle.
async fn cmd_sync(engine: &Engine) -> Result<()> {
    let result = engine.run_sync_cycle().await;
    print_result(&result);

    if !result.success {
        anyhow::bail!("Sync did not complete successfully");
    }
    Ok(())
}

/// Show sync status.
async fn cmd_status(engine: &Engine, repo: &TaskRepository<SqliteStore>) -> Result<()> {
    let status = engine.status().await.context("Failed to read status")?;
    let failed = repo.failed().context("Failed to list failed tasks")?;

    println!("Sync Status:");
    println!("  Endpoint: {}", engine.config().endpoint);
    println!(
        "  Remote: {}",
        if status.reachable { "reachable" } else { "unreachable" }
    );
    println!("  Pending: {}", status.pending);
    println!("  Queued: {}", status.outstanding);
    match status.last_sync_at {
        Some(at) => println!("  Last sync: {}", at),
        None => println!("  Last sync: never"),
    }
    if !failed.is_empty() {
        println!("  Failed tasks:");
        for task in &failed {
            println!("    {}  {}", task.id, task.title);
        }
    }
    Ok(())
}

/// Sync continuously until Ctrl-C.
async fn cmd_watch(
    engine: Arc<Engine>,
    interval: Option<u64>,
    on_reconnect: Option<u64>,
) -> Result<()> {
    let mode = match (interval, on_reconnect) {
        (Some(secs), _) => SyncMode::Periodic {
            interval: Duration::from_secs(secs.max(1)),
        },
        (None, Some(secs)) => SyncMode::OnReconnect {
            poll_interval: Duration::from_secs(secs.max(1)),
        },
        (None, None) => match &engine.config().sync_mode {
            SyncMode::Manual => SyncMode::Periodic {
                interval: Duration::from_secs(60),
            },
            configured => configured.clone(),
        },
    };

    let (scheduler, handle) = SyncScheduler::new(mode.clone());
    let worker = tokio::spawn(handle.run(engine.clone()));

    info!("Watching for changes ({:?}), press Ctrl-C to stop", mode);
    print_result(&scheduler.request_sync().await?);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping");
    scheduler.shutdown().await;
    worker.await.context("Sync worker panicked")?;
    Ok(())
}
