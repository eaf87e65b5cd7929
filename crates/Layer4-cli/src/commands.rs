//! Operator commands

use crate::Command;
use plugdeck_core::plugin::{PluginDiscovery, ReleaseFetcher, RestoreSource};
use plugdeck_core::{ConfigCheck, HookDispatcher, PluginManager};
use serde_json::Value;
use std::sync::Arc;

pub async fn run(manager: &PluginManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List { json } => list(manager, json),
        Command::Scan => {
            let discovery = PluginDiscovery::new(manager.storage().clone(), manager.config());
            let summary = discovery.scan()?;
            println!(
                "Registered {} new plugin(s), refreshed {}.",
                summary.registered.len(),
                summary.refreshed.len()
            );
            Ok(())
        }
        Command::Check { plugin } => {
            let report = manager.check(&plugin)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Install { plugin } => {
            let outcome = manager.install(&plugin).await?;
            println!(
                "Plugin {} installed ({}), {} hook(s), {} realm(s).",
                plugin,
                outcome.status,
                outcome.hooks.len(),
                outcome.realms
            );
            print_config_check(&outcome.config);
            Ok(())
        }
        Command::Uninstall {
            plugin,
            keep_tables,
            force,
        } => {
            let outcome = manager.uninstall(&plugin, !keep_tables, force).await?;
            match outcome.rollback {
                Some(rollback) => println!(
                    "Plugin {} uninstalled, dropped {} table(s) and {} column(s).",
                    plugin,
                    rollback.dropped_tables.len(),
                    rollback.dropped_columns.len()
                ),
                None => println!(
                    "Plugin {} uninstalled, kept tables ({} change record(s) discarded).",
                    plugin, outcome.discarded_changes
                ),
            }
            Ok(())
        }
        Command::Enable { plugin } => {
            let check = manager.enable(&plugin).await?;
            if check.is_ready() {
                println!("Plugin {} enabled.", plugin);
            }
            print_config_check(&check);
            Ok(())
        }
        Command::Disable { plugin, force } => {
            if manager.disable(&plugin, force).await? {
                println!("Plugin {} disabled.", plugin);
            } else {
                println!("Plugin {} is already disabled.", plugin);
            }
            Ok(())
        }
        Command::Upgrade { plugin } => {
            if manager.upgrade_register(&plugin).await? {
                println!("Plugin {} registration updated.", plugin);
            } else {
                println!("Plugin {} has no upgrade routine.", plugin);
            }
            Ok(())
        }
        Command::Archive { plugin } => {
            let outcome = manager.archive(&plugin).await?;
            println!(
                "Archive {} stored ({} files, hash {}){}",
                outcome.id,
                outcome.files,
                short_hash(&outcome.dir_hash),
                if outcome.unchanged {
                    ", unchanged since the previous archive."
                } else {
                    "."
                }
            );
            Ok(())
        }
        Command::Archives { plugin } => list_archives(manager, plugin.as_deref()),
        Command::ArchiveRemove { plugin } => {
            let removed = manager.archive_remove(&plugin).await?;
            println!("Removed {} archive(s) of {}.", removed, plugin);
            Ok(())
        }
        Command::Restore {
            plugin,
            id,
            tag,
            prune,
        } => {
            let source = match tag {
                Some(tag) => RestoreSource::Available { tag },
                None => RestoreSource::Archive { id },
            };
            let outcome = manager.restore(&plugin, source, prune).await?;
            println!(
                "{} {} file(s) written.",
                outcome.message,
                outcome.report.written.len()
            );
            if !outcome.report.removal_candidates.is_empty() && !prune {
                println!("Files not present in the archive (use --prune to delete):");
                for path in &outcome.report.removal_candidates {
                    println!("  {}", path);
                }
            }
            for path in &outcome.report.removed {
                println!("  removed {}", path);
            }
            Ok(())
        }
        Command::Reorder { ids } => {
            let mapping = manager.reorder(&ids).await?;
            for (old, new) in mapping.iter().filter(|(old, new)| old != new) {
                println!("  {} -> {}", old, new);
            }
            Ok(())
        }
        Command::MoveUp { plugin } => {
            if !manager.move_up(&plugin).await? {
                println!("Plugin {} is already first.", plugin);
            }
            Ok(())
        }
        Command::MoveDown { plugin } => {
            if !manager.move_down(&plugin).await? {
                println!("Plugin {} is already last.", plugin);
            }
            Ok(())
        }
        Command::Fetch => {
            let fetcher =
                ReleaseFetcher::from_config(manager.storage().clone(), &manager.config().repository)?;
            let summary = fetcher.fetch_latest().await?;
            println!(
                "Fetched {} plugin repositories in {:.2}s: {} updated, {} unchanged.",
                summary.plugins.len(),
                summary.elapsed.as_secs_f64(),
                summary.updated,
                summary.skipped
            );
            Ok(())
        }
        Command::Available { plugin } => list_available(manager, plugin.as_deref()),
        Command::Dispatch { hook, value } => dispatch(manager, &hook, value.as_deref()),
        Command::Invoke {
            plugin,
            function,
            value,
        } => {
            let dispatcher = HookDispatcher::new(
                manager.storage().clone(),
                Arc::clone(manager.modules()),
                manager.config(),
            );
            let value: Value = serde_json::from_str(&value)?;
            let result = dispatcher.invoke_filter(&plugin, &function, value)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(manager.config())?);
            Ok(())
        }
    }
}

fn print_config_check(check: &ConfigCheck) {
    match check {
        ConfigCheck::Ready => {}
        ConfigCheck::NotReady(message) => println!("Configuration issues: {}", message),
        ConfigCheck::Invalid(message) => println!("Configuration check invalid: {}", message),
    }
}

fn short_hash(hash: &str) -> &str {
    &hash[..12.min(hash.len())]
}

fn list(manager: &PluginManager, json: bool) -> anyhow::Result<()> {
    let discovery = PluginDiscovery::new(manager.storage().clone(), manager.config());
    let listings = discovery.discover()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    if listings.is_empty() {
        println!("No plugins found in {}.", manager.config().paths.plugins_dir.display());
        return Ok(());
    }

    println!(
        "\n{:<6} {:<20} {:<28} {:<10} {:<26} {:<8}",
        "Order", "Directory", "Name", "Version", "Status", "Archived"
    );
    println!("{}", "-".repeat(100));

    for listing in listings {
        let order = listing
            .load_order
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = match listing.remote_status {
            Some(remote) if remote != listing.status => {
                format!("{} (remote: {})", listing.status, remote)
            }
            _ => listing.status.to_string(),
        };
        println!(
            "{:<6} {:<20} {:<28} {:<10} {:<26} {:<8}",
            order,
            listing.directory,
            listing.name,
            listing.version,
            status,
            if listing.archived { "yes" } else { "" }
        );
    }
    println!();
    Ok(())
}

fn list_archives(manager: &PluginManager, plugin: Option<&str>) -> anyhow::Result<()> {
    let archives: Vec<_> = manager
        .storage()
        .list_archives()?
        .into_iter()
        .filter(|a| plugin.map_or(true, |p| a.plugin == p))
        .collect();

    if archives.is_empty() {
        println!("No archives found.");
        return Ok(());
    }

    println!(
        "\n{:<6} {:<20} {:<10} {:<14} {:<10} {:<20}",
        "ID", "Plugin", "Version", "Hash", "Size", "Archived"
    );
    println!("{}", "-".repeat(84));
    for archive in archives {
        println!(
            "{:<6} {:<20} {:<10} {:<14} {:<10} {:<20}",
            archive.id,
            archive.plugin,
            archive.version,
            short_hash(&archive.dir_hash),
            archive.size,
            archive.last_updated
        );
    }
    println!();
    Ok(())
}

fn list_available(manager: &PluginManager, plugin: Option<&str>) -> anyhow::Result<()> {
    let releases: Vec<_> = manager
        .storage()
        .list_available()?
        .into_iter()
        .filter(|r| plugin.map_or(true, |p| r.plugin == p))
        .collect();

    if releases.is_empty() {
        println!("No releases fetched. Run 'plugdeck fetch' first.");
        return Ok(());
    }

    println!(
        "\n{:<20} {:<12} {:<20} {:<10} {:<20}",
        "Plugin", "Tag", "Published", "Compat", "Requires"
    );
    println!("{}", "-".repeat(86));
    for release in releases {
        println!(
            "{:<20} {:<12} {:<20} {:<10} {:<20}",
            release.plugin, release.tag_name, release.published_at, release.compat, release.requires
        );
    }
    println!();
    Ok(())
}

fn dispatch(manager: &PluginManager, hook: &str, value: Option<&str>) -> anyhow::Result<()> {
    let dispatcher = HookDispatcher::new(
        manager.storage().clone(),
        Arc::clone(manager.modules()),
        manager.config(),
    );
    let mut ctx = dispatcher.context();

    let report = match value {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw)?;
            let (value, report) = dispatcher.dispatch_function_with_report(&mut ctx, hook, value)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            report
        }
        None => dispatcher.dispatch_with_report(&mut ctx, hook, Vec::new())?.1,
    };

    for handler in &report.handlers {
        println!("  {:<20} {:<32} {:?}", handler.plugin, handler.function, handler.outcome);
    }
    for violation in &report.violations {
        println!(
            "  contract violation: {} in {}",
            violation.function, violation.plugin
        );
    }
    Ok(())
}
