//! Plugin lifecycle integration tests
//!
//! 디렉토리 → install → enable → dispatch → archive/restore → uninstall 흐름을
//! 실제 파일 시스템(TempDir)과 in-memory 레지스트리로 검증한다.

use async_trait::async_trait;
use parking_lot::Mutex;
use plugdeck_core::hook::HandlerOutcome;
use plugdeck_core::plugin::{can_install, load_descriptor, RestoreSource, UnmetDependency};
use plugdeck_core::{
    HookDispatcher, HookHandler, ModuleRegistry, ModuleVersion, PluginContext, PluginManager,
    PluginModule, PluginStatus,
};
use plugdeck_foundation::{Error, PlugdeckConfig, Result, Storage};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

// ============================================================================
// Warning capture
// ============================================================================

/// "does not exist" 경고 개수를 센다
struct MissingHandlerCounter(Arc<AtomicUsize>);

struct MessageField(String);

impl Visit for MessageField {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for MissingHandlerCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::WARN {
            return;
        }
        let mut message = MessageField(String::new());
        event.record(&mut message);
        if message.0.contains("does not exist") {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// Test modules
// ============================================================================

struct Sample {
    dir: String,
    breaks_shape: bool,
    with_table: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl Sample {
    fn new(dir: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            dir: dir.to_string(),
            breaks_shape: false,
            with_table: false,
            log: Arc::clone(log),
        }
    }
}

#[async_trait]
impl PluginModule for Sample {
    fn directory(&self) -> &str {
        &self.dir
    }

    fn version(&self) -> Option<ModuleVersion> {
        Some(ModuleVersion::new(&self.dir, "1.2").with_author("Test Author"))
    }

    async fn install(&self, ctx: &PluginContext) -> Option<Result<()>> {
        let result = (|| -> Result<()> {
            ctx.register_hook(
                "device_action_array",
                "setup.php",
                &format!("{}_actions", self.dir),
                true,
            )?;
            ctx.register_hook("page_head", "setup.php", &format!("{}_head", self.dir), true)?;
            if self.with_table {
                ctx.create_table(
                    &format!("{}_data", self.dir),
                    "id INTEGER PRIMARY KEY, value TEXT",
                )?;
            }
            Ok(())
        })();
        Some(result)
    }

    fn handler(&self, function: &str) -> Option<HookHandler> {
        let dir = self.dir.clone();
        if function == format!("{}_actions", dir) {
            let breaks_shape = self.breaks_shape;
            return Some(HookHandler::filter(move |value: Value| {
                if breaks_shape {
                    return Ok(json!("broken"));
                }
                let mut items = value.as_array().cloned().unwrap_or_default();
                items.push(json!(dir));
                Ok(Value::Array(items))
            }));
        }
        if function == format!("{}_head", dir) {
            let log = Arc::clone(&self.log);
            return Some(HookHandler::action(move |_args: &[Value]| {
                log.lock().push(dir.clone());
                Ok(())
            }));
        }
        None
    }
}

// ============================================================================
// Fixture
// ============================================================================

fn plugin_dir(root: &Path, dir: &str, info: &str, handler_file: bool) {
    let path = root.join(dir);
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("INFO"), info).unwrap();
    if handler_file {
        fs::write(path.join("setup.php"), format!("<?php // {}", dir)).unwrap();
    }
}

fn info(name: &str) -> String {
    format!("[info]\nname = {}\nversion = 1.2\ncompat = 1.0\n", name)
}

struct Fixture {
    temp: TempDir,
    config: PlugdeckConfig,
    storage: Storage,
    modules: Arc<ModuleRegistry>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        plugin_dir(temp.path(), "alpha", &info("alpha"), true);
        plugin_dir(temp.path(), "beta", &info("beta"), false);
        plugin_dir(temp.path(), "gamma", &info("gamma"), true);

        let mut alpha = Sample::new("alpha", &log);
        alpha.with_table = true;
        let mut gamma = Sample::new("gamma", &log);
        gamma.breaks_shape = true;

        let modules = Arc::new(
            ModuleRegistry::new()
                .with(Arc::new(alpha))
                .with(Arc::new(Sample::new("beta", &log)))
                .with(Arc::new(gamma)),
        );

        let config = PlugdeckConfig::new().with_plugins_dir(temp.path());
        Self {
            temp,
            config,
            storage: Storage::in_memory().unwrap(),
            modules,
            log,
        }
    }

    fn manager(&self) -> PluginManager {
        PluginManager::new(
            self.config.clone(),
            self.storage.clone(),
            Arc::clone(&self.modules),
        )
    }

    fn dispatcher(&self) -> HookDispatcher {
        HookDispatcher::new(self.storage.clone(), Arc::clone(&self.modules), &self.config)
    }

    async fn install_and_enable(&self, manager: &PluginManager, plugins: &[&str]) {
        for plugin in plugins {
            manager.install(plugin).await.unwrap();
            assert!(manager.enable(plugin).await.unwrap().is_ready());
        }
    }

    fn id_of(&self, plugin: &str) -> i64 {
        self.storage.get_plugin(plugin).unwrap().unwrap().id
    }
}

// ============================================================================
// Descriptor
// ============================================================================

#[test]
fn test_descriptor_statuses() {
    let fixture = Fixture::new();
    let root = fixture.temp.path();

    fs::create_dir_all(root.join("nodesc")).unwrap();
    plugin_dir(root, "bad name", &info("bad name"), false);
    plugin_dir(root, "future", "[info]\nname = future\ncompat = 9.0\n", false);

    assert_eq!(load_descriptor(root, "nodesc", "1.2.25").status.code(), -4);
    assert_eq!(load_descriptor(root, "bad name", "1.2.25").status.code(), -3);
    assert_eq!(load_descriptor(root, "future", "1.2.25").status.code(), -1);
    assert_eq!(
        load_descriptor(root, "alpha", "1.2.25").status,
        PluginStatus::NotInstalled
    );
}

#[tokio::test]
async fn test_unloadable_descriptor_refuses_install() {
    let fixture = Fixture::new();
    fs::create_dir_all(fixture.temp.path().join("nodesc")).unwrap();

    let result = fixture.manager().install("nodesc").await;
    assert!(matches!(result, Err(Error::Validation(_))));
    assert!(fixture.storage.get_plugin("nodesc").unwrap().is_none());
}

// ============================================================================
// Dependencies
// ============================================================================

#[tokio::test]
async fn test_requires_clause() {
    let fixture = Fixture::new();
    plugin_dir(
        fixture.temp.path(),
        "delta",
        "[info]\nname = delta\ncompat = 1.0\nrequires = alpha:>=1.0 beta\n",
        false,
    );
    let manager = fixture.manager();
    let delta = load_descriptor(fixture.temp.path(), "delta", "1.2.25");

    let check = can_install(&fixture.storage, &delta).unwrap();
    assert!(!check.ok);
    assert_eq!(check.unmet.len(), 2);

    manager.install("alpha").await.unwrap();
    let check = can_install(&fixture.storage, &delta).unwrap();
    assert!(!check.ok);
    assert_eq!(
        check.unmet,
        vec![UnmetDependency::NotInstalled {
            plugin: "beta".to_string()
        }]
    );
    assert!(check
        .message
        .contains("Beta is required for Delta, and it is not installed."));

    match manager.install("delta").await {
        Err(Error::Dependency(message)) => {
            assert!(message.ends_with("Plugin cannot be installed."))
        }
        other => panic!("unexpected: {:?}", other),
    }

    manager.install("beta").await.unwrap();
    assert!(can_install(&fixture.storage, &delta).unwrap().ok);
}

// ============================================================================
// Ordering + dispatch
// ============================================================================

#[tokio::test]
async fn test_reorder_changes_dispatch_order() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    fixture
        .install_and_enable(&manager, &["alpha", "beta", "gamma"])
        .await;

    let order = [fixture.id_of("gamma"), fixture.id_of("alpha"), fixture.id_of("beta")];
    manager.reorder(&order).await.unwrap();

    assert_eq!(fixture.id_of("gamma"), 1);
    assert_eq!(fixture.id_of("alpha"), 2);
    assert_eq!(fixture.id_of("beta"), 3);

    let dispatcher = fixture.dispatcher();
    let mut ctx = dispatcher.context();
    let (_, report) = dispatcher
        .dispatch_with_report(&mut ctx, "page_head", vec![])
        .unwrap();

    assert_eq!(report.ran(), vec!["gamma", "alpha"]);
    assert_eq!(*fixture.log.lock(), vec!["gamma".to_string(), "alpha".to_string()]);
}

#[tokio::test]
async fn test_missing_handler_file_is_skipped() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    fixture
        .install_and_enable(&manager, &["alpha", "beta", "gamma"])
        .await;

    let dispatcher = fixture.dispatcher();
    let missing = Arc::new(AtomicUsize::new(0));
    let subscriber =
        tracing_subscriber::registry().with(MissingHandlerCounter(Arc::clone(&missing)));

    tracing::subscriber::with_default(subscriber, || {
        for _ in 0..2 {
            let mut ctx = dispatcher.context();
            let (_, report) = dispatcher
                .dispatch_with_report(&mut ctx, "page_head", vec![json!("page")])
                .unwrap();

            assert_eq!(report.ran(), vec!["alpha", "gamma"]);
            assert_eq!(report.outcome_of("beta"), Some(&HandlerOutcome::FileMissing));
        }
    });

    // 같은 (plugin, hook) 경고는 TTL 안에서 한 번만
    assert_eq!(missing.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_filter_violation_reported_with_multiple_handlers() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    fixture
        .install_and_enable(&manager, &["alpha", "beta", "gamma"])
        .await;

    let dispatcher = fixture.dispatcher();
    let mut ctx = dispatcher.context();
    let (value, report) = dispatcher
        .dispatch_function_with_report(&mut ctx, "device_action_array", json!([]))
        .unwrap();

    assert_eq!(value, json!("broken"));
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].plugin, "gamma");
}

#[tokio::test]
async fn test_filter_violation_ignored_with_single_handler() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    fixture.install_and_enable(&manager, &["gamma"]).await;

    let dispatcher = fixture.dispatcher();
    let mut ctx = dispatcher.context();
    let (value, report) = dispatcher
        .dispatch_function_with_report(&mut ctx, "device_action_array", json!(["x"]))
        .unwrap();

    assert_eq!(value, json!("broken"));
    assert!(report.violations.is_empty());
}

#[tokio::test]
async fn test_disabled_plugin_handlers_do_not_run() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    fixture.install_and_enable(&manager, &["alpha", "gamma"]).await;
    manager.disable("gamma", false).await.unwrap();

    let dispatcher = fixture.dispatcher();
    let mut ctx = dispatcher.context();
    let value = dispatcher
        .dispatch_function(&mut ctx, "device_action_array", json!([]))
        .unwrap();

    assert_eq!(value, json!(["alpha"]));
}

// ============================================================================
// Archive / Restore
// ============================================================================

#[tokio::test]
async fn test_archive_tracks_directory_changes() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    manager.install("alpha").await.unwrap();

    assert_eq!(manager.is_archive_current("alpha").unwrap(), None);

    let first = manager.archive("alpha").await.unwrap();
    assert!(!first.unchanged);
    assert_eq!(manager.is_archive_current("alpha").unwrap(), Some(true));

    let setup = fixture.temp.path().join("alpha").join("setup.php");
    fs::write(&setup, "<?php // changed").unwrap();
    assert_eq!(manager.is_archive_current("alpha").unwrap(), Some(false));

    let second = manager.archive("alpha").await.unwrap();
    assert_ne!(first.dir_hash, second.dir_hash);

    let unchanged = manager.archive("alpha").await.unwrap();
    assert!(unchanged.unchanged);
}

#[tokio::test]
async fn test_restore_reports_removal_candidates() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    manager.install("alpha").await.unwrap();
    let archived = manager.archive("alpha").await.unwrap();

    let dir = fixture.temp.path().join("alpha");
    fs::write(dir.join("setup.php"), "<?php // edited").unwrap();
    fs::write(dir.join("extra.php"), "<?php // new").unwrap();

    let outcome = manager
        .restore(
            "alpha",
            RestoreSource::Archive {
                id: Some(archived.id),
            },
            false,
        )
        .await
        .unwrap();

    assert_eq!(outcome.message, "Restore succeeded!");
    assert_eq!(outcome.report.removal_candidates, vec!["extra.php".to_string()]);
    assert!(outcome.report.removed.is_empty());
    assert!(dir.join("extra.php").exists());
    assert_eq!(
        fs::read_to_string(dir.join("setup.php")).unwrap(),
        "<?php // alpha"
    );

    let pruned = manager
        .restore("alpha", RestoreSource::Archive { id: None }, true)
        .await
        .unwrap();
    assert_eq!(pruned.report.removed, vec!["extra.php".to_string()]);
    assert!(!dir.join("extra.php").exists());
}

// ============================================================================
// Uninstall
// ============================================================================

#[tokio::test]
async fn test_uninstall_keeps_tables_when_asked() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    manager.install("alpha").await.unwrap();
    assert!(fixture.storage.table_exists("alpha_data").unwrap());

    let outcome = manager.uninstall("alpha", false, false).await.unwrap();
    assert!(outcome.rollback.is_none());
    assert_eq!(outcome.discarded_changes, 1);
    assert!(fixture.storage.table_exists("alpha_data").unwrap());
    assert!(fixture.storage.get_plugin("alpha").unwrap().is_none());
    assert!(fixture.storage.hooks_of_plugin("alpha").unwrap().is_empty());
}

#[tokio::test]
async fn test_uninstall_drops_tables() {
    let fixture = Fixture::new();
    let manager = fixture.manager();
    manager.install("alpha").await.unwrap();

    let outcome = manager.uninstall("alpha", true, false).await.unwrap();
    let rollback = outcome.rollback.unwrap();
    assert_eq!(rollback.dropped_tables, vec!["alpha_data".to_string()]);
    assert!(!fixture.storage.table_exists("alpha_data").unwrap());
}

#[tokio::test]
async fn test_uninstall_refused_while_dependents_installed() {
    let fixture = Fixture::new();
    plugin_dir(
        fixture.temp.path(),
        "delta",
        "[info]\nname = delta\ncompat = 1.0\nrequires = alpha\n",
        false,
    );
    let log = Arc::clone(&fixture.log);
    fixture.modules.register(Arc::new(Sample::new("delta", &log)));

    let manager = fixture.manager();
    manager.install("alpha").await.unwrap();
    manager.install("delta").await.unwrap();

    assert!(manager.uninstall("alpha", false, false).await.is_err());
    assert!(fixture.storage.get_plugin("alpha").unwrap().is_some());

    manager.uninstall("alpha", false, true).await.unwrap();
    assert!(fixture.storage.get_plugin("alpha").unwrap().is_none());
}
