//! Plugdeck CLI - Main entry point

mod commands;
mod modules;

use clap::{Parser, Subcommand};
use plugdeck_core::{ModuleRegistry, PluginManager};
use plugdeck_foundation::{PlugdeckConfig, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Plugdeck - plugin lifecycle management for the monitoring host
#[derive(Parser, Debug)]
#[command(name = "plugdeck")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Plugin root directory (overrides config)
    #[arg(long)]
    plugins_dir: Option<PathBuf>,

    /// Registry data directory (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Operator user id recorded on archives
    #[arg(long, default_value = "0")]
    user: i64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List discovered and registered plugins
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Register newly discovered plugin directories
    Scan,
    /// Show descriptor, dependency and archive state of a plugin
    Check { plugin: String },
    /// Install a plugin (leaves it disabled)
    Install { plugin: String },
    /// Uninstall a plugin
    Uninstall {
        plugin: String,
        /// Keep tables and columns created by the plugin
        #[arg(long)]
        keep_tables: bool,
        /// Ignore installed dependents
        #[arg(long)]
        force: bool,
    },
    /// Enable an installed plugin
    Enable { plugin: String },
    /// Disable a plugin
    Disable {
        plugin: String,
        /// Ignore enabled dependents
        #[arg(long)]
        force: bool,
    },
    /// Re-register hooks after a plugin upgrade
    Upgrade { plugin: String },
    /// Snapshot a plugin directory into the registry
    Archive { plugin: String },
    /// List stored archives
    Archives {
        /// Only archives of this plugin
        plugin: Option<String>,
    },
    /// Delete all archives of a plugin
    ArchiveRemove { plugin: String },
    /// Restore a plugin directory from an archive or a fetched release
    Restore {
        plugin: String,
        /// Archive id (latest when omitted)
        #[arg(long, conflicts_with = "tag")]
        id: Option<i64>,
        /// Load a fetched release tag instead of an archive
        #[arg(long)]
        tag: Option<String>,
        /// Delete files that are not part of the archive
        #[arg(long)]
        prune: bool,
    },
    /// Reassign load order from a list of current ids
    Reorder {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Move a plugin one step earlier in load order
    MoveUp { plugin: String },
    /// Move a plugin one step later in load order
    MoveDown { plugin: String },
    /// Fetch release metadata from the plugin repository
    Fetch,
    /// List fetched releases
    Available {
        /// Only releases of this plugin
        plugin: Option<String>,
    },
    /// Run a hook with the linked modules
    Dispatch {
        hook: String,
        /// JSON value passed through value hooks
        #[arg(long)]
        value: Option<String>,
    },
    /// Call a value handler of a linked module directly, bypassing bindings
    Invoke {
        plugin: String,
        function: String,
        /// JSON value passed to the handler
        #[arg(long, default_value = "null")]
        value: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    // Load configuration
    let mut config = PlugdeckConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        PlugdeckConfig::default()
    });
    if let Some(dir) = args.plugins_dir {
        config = config.with_plugins_dir(dir);
    }
    if let Some(dir) = args.data_dir {
        config = config.with_data_dir(dir);
    }

    if let Command::Config = args.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let storage = Storage::new(&config.paths.resolved_data_dir())?;
    let modules: Arc<ModuleRegistry> = Arc::new(modules::linked_modules());
    let manager = PluginManager::new(config, storage, modules).with_operator(args.user);

    match commands::run(&manager, args.command).await {
        Err(e) => match e.downcast_ref::<plugdeck_foundation::Error>() {
            Some(err) if err.is_user_facing() => {
                eprintln!("Error: {}", err);
                std::process::exit(1);
            }
            _ => Err(e),
        },
        ok => ok,
    }
}
