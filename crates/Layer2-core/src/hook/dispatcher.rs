//! Hook Dispatcher - 이름 있는 확장 지점에 바인딩된 핸들러 실행
//!
//! ## 두 가지 디스패치
//!
//! - `dispatch`: 인자 목록을 그대로 통과시키는 부수효과 Hook
//! - `dispatch_function`: 값을 핸들러 체인에 통과시키는 변환 Hook
//!
//! ## 핸들러 처리 순서
//!
//! 1. 핸들러 파일 경로에 `..`가 있으면 보안 이벤트로 거부
//! 2. 호스트 내장(integrated) 플러그인은 건너뜀
//! 3. 핸들러 파일 존재 확인 (처음 사용할 때, 컨텍스트 단위 캐시)
//! 4. 모듈에서 함수 이름으로 핸들러 조회
//! 5. 원격 노드면 capability 확인
//! 6. 실행 (에러/panic은 격리)
//!
//! 파일/함수 누락 경고는 (plugin, hook) 단위로 디바운스된다.
//! 한 핸들러의 실패가 디스패치를 중단시키지 않는다. 중단되는 경우는
//! 레지스트리 읽기 실패뿐이다.

use super::debounce::WarningLimiter;
use super::types::{ContractViolation, DispatchReport, HandlerOutcome, HookHandler};
use crate::plugin::{
    capabilities_of, required_capabilities, should_run, DescriptorCache, HookKind,
    ModuleRegistry,
};
use plugdeck_foundation::{
    log_target, Error, HookBindingRecord, NodeConfig, PlugdeckConfig, Result, Storage,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

// ============================================================================
// DispatchContext
// ============================================================================

/// 한 번의 논리적 작업 단위 동안 유지되는 캐시
///
/// Hook 이름별 바인딩 목록, 핸들러 파일 존재 여부, descriptor를 기억한다.
/// 작업이 끝나면 버린다. 다음 작업은 새 컨텍스트로 레지스트리를 다시 읽는다.
#[derive(Debug)]
pub struct DispatchContext {
    bindings: HashMap<String, Arc<Vec<HookBindingRecord>>>,
    files: HashMap<PathBuf, bool>,
    descriptors: DescriptorCache,
}

impl DispatchContext {
    fn new(plugins_dir: PathBuf, host_version: &str) -> Self {
        Self {
            bindings: HashMap::new(),
            files: HashMap::new(),
            descriptors: DescriptorCache::new(plugins_dir, host_version),
        }
    }

    /// 캐시된 Hook 수
    pub fn cached_hooks(&self) -> usize {
        self.bindings.len()
    }

    fn file_exists(&mut self, path: PathBuf) -> bool {
        *self.files.entry(path).or_insert_with_key(|p| p.is_file())
    }
}

// ============================================================================
// HookDispatcher
// ============================================================================

/// Hook 디스패처
pub struct HookDispatcher {
    storage: Storage,
    modules: Arc<ModuleRegistry>,
    plugins_dir: PathBuf,
    host_version: String,
    integrated: HashSet<String>,
    node: NodeConfig,
    warnings: WarningLimiter,
}

impl HookDispatcher {
    pub fn new(storage: Storage, modules: Arc<ModuleRegistry>, config: &PlugdeckConfig) -> Self {
        Self {
            storage,
            modules,
            plugins_dir: config.paths.plugins_dir.clone(),
            host_version: config.host.version.clone(),
            integrated: config.host.integrated_plugins.iter().cloned().collect(),
            node: config.node.clone(),
            warnings: WarningLimiter::new(Duration::from_secs(config.dispatch.warning_ttl_secs)),
        }
    }

    /// 새 작업 단위 컨텍스트
    pub fn context(&self) -> DispatchContext {
        DispatchContext::new(self.plugins_dir.clone(), &self.host_version)
    }

    // ========================================================================
    // Action hooks
    // ========================================================================

    /// 부수효과 Hook 실행. 인자 목록을 그대로 돌려준다
    pub fn dispatch(
        &self,
        ctx: &mut DispatchContext,
        hook: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.dispatch_with_report(ctx, hook, args).map(|(args, _)| args)
    }

    /// `dispatch` + 핸들러별 처리 결과
    pub fn dispatch_with_report(
        &self,
        ctx: &mut DispatchContext,
        hook: &str,
        args: Vec<Value>,
    ) -> Result<(Vec<Value>, DispatchReport)> {
        let bindings = self.bindings(ctx, hook)?;
        let mut report = DispatchReport::new(hook);

        for binding in bindings.iter() {
            let handler = match self.resolve(ctx, hook, binding, HookKind::Action) {
                Ok(handler) => handler,
                Err(outcome) => {
                    report.record(&binding.plugin, &binding.function, outcome);
                    continue;
                }
            };

            let HookHandler::Action(action) = handler else {
                continue;
            };

            let outcome = isolate(binding, hook, || action(&args));
            report.record(&binding.plugin, &binding.function, outcome);
        }

        Ok((args, report))
    }

    // ========================================================================
    // Filter hooks
    // ========================================================================

    /// 값 변환 Hook 실행
    pub fn dispatch_function(
        &self,
        ctx: &mut DispatchContext,
        hook: &str,
        value: Value,
    ) -> Result<Value> {
        self.dispatch_function_with_report(ctx, hook, value)
            .map(|(value, _)| value)
    }

    /// `dispatch_function` + 핸들러별 처리 결과
    ///
    /// 핸들러가 배열을 비배열로 바꾸거나, 비어 있지 않던 값을 null로 만들면
    /// 계약 위반이다. 바인딩이 둘 이상일 때만 경고한다. 바뀐 값은 그대로
    /// 다음 핸들러에 전달된다.
    pub fn dispatch_function_with_report(
        &self,
        ctx: &mut DispatchContext,
        hook: &str,
        value: Value,
    ) -> Result<(Value, DispatchReport)> {
        let bindings = self.bindings(ctx, hook)?;
        let mut report = DispatchReport::new(hook);
        let started_empty = is_empty_value(&value);
        let mut current = value;

        for binding in bindings.iter() {
            let handler = match self.resolve(ctx, hook, binding, HookKind::Filter) {
                Ok(handler) => handler,
                Err(outcome) => {
                    report.record(&binding.plugin, &binding.function, outcome);
                    continue;
                }
            };

            let HookHandler::Filter(filter) = handler else {
                continue;
            };

            let was_array = current.is_array();
            let mut produced = None;
            let input = current.clone();
            let outcome = isolate(binding, hook, || {
                produced = Some(filter(input)?);
                Ok(())
            });

            if let Some(next) = produced {
                let violated =
                    (was_array && !next.is_array()) || (is_null_like(&next) && !started_empty);
                if violated && bindings.len() > 1 {
                    warn!(
                        target: log_target::PLUGIN,
                        "Plugin hook '{}' from Plugin '{}' must return the calling array or variable, and it is not doing so. Please report this to the Plugin author.",
                        binding.function,
                        binding.plugin
                    );
                    report.violations.push(ContractViolation {
                        plugin: binding.plugin.clone(),
                        function: binding.function.clone(),
                    });
                }
                current = next;
            }

            report.record(&binding.plugin, &binding.function, outcome);
        }

        Ok((current, report))
    }

    // ========================================================================
    // Direct invocation
    // ========================================================================

    /// 플러그인 핸들러를 바인딩 없이 직접 호출
    ///
    /// integrated 건너뛰기와 capability 검사를 거치지 않는다. 호스트에 통합된
    /// 플러그인이 자기 핸들러를 부를 때 쓴다.
    pub fn invoke_filter(&self, plugin: &str, function: &str, value: Value) -> Result<Value> {
        match self.modules.handler(plugin, function) {
            Some(HookHandler::Filter(filter)) => filter(value),
            Some(HookHandler::Action(_)) => Err(Error::InvalidInput(format!(
                "Handler '{}' of plugin '{}' is not a value hook",
                function, plugin
            ))),
            None => Err(Error::NotFound(format!(
                "Handler '{}' of plugin '{}'",
                function, plugin
            ))),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn bindings(
        &self,
        ctx: &mut DispatchContext,
        hook: &str,
    ) -> Result<Arc<Vec<HookBindingRecord>>> {
        if let Some(cached) = ctx.bindings.get(hook) {
            return Ok(Arc::clone(cached));
        }

        let bindings = Arc::new(self.storage.hooks_for(hook)?);
        debug!(hook, count = bindings.len(), "Loaded hook bindings");
        ctx.bindings.insert(hook.to_string(), Arc::clone(&bindings));
        Ok(bindings)
    }

    /// 실행 가능한 핸들러를 찾는다. 실패하면 기록할 결과를 돌려준다
    fn resolve(
        &self,
        ctx: &mut DispatchContext,
        hook: &str,
        binding: &HookBindingRecord,
        kind: HookKind,
    ) -> std::result::Result<HookHandler, HandlerOutcome> {
        let plugin = binding.plugin.as_str();

        if binding.file.contains("..") {
            error!(
                target: log_target::SECURITY,
                plugin,
                hook,
                "Attempted inclusion of not plugin file {} from {} with the hook name {}",
                binding.file,
                plugin,
                hook
            );
            return Err(HandlerOutcome::SecurityRejected);
        }

        if self.integrated.contains(plugin) {
            return Err(HandlerOutcome::SkippedIntegrated);
        }

        let path = self.plugins_dir.join(plugin).join(&binding.file);
        if !ctx.file_exists(path) {
            self.warn_missing(plugin, hook, &binding.function, &binding.file);
            return Err(HandlerOutcome::FileMissing);
        }

        let Some(handler) = self.modules.handler(plugin, &binding.function) else {
            self.warn_missing(plugin, hook, &binding.function, &binding.file);
            return Err(HandlerOutcome::FunctionMissing);
        };

        if handler.kind() != kind {
            if self.warnings.should_warn(plugin, hook) {
                warn!(
                    target: log_target::PLUGIN,
                    plugin,
                    hook,
                    "Handler \"{}\" in {} is a {:?} handler, but hook \"{}\" expects {:?}",
                    binding.function,
                    plugin,
                    handler.kind(),
                    hook,
                    kind
                );
            }
            return Err(HandlerOutcome::WrongKind);
        }

        if !self.node.is_primary() {
            let caps = capabilities_of(plugin, &mut ctx.descriptors);
            let required = required_capabilities(kind, hook);
            if !should_run(&caps, required, self.node.connection_mode) {
                debug!(
                    target: log_target::PLUGIN,
                    plugin,
                    hook,
                    mode = %self.node.connection_mode,
                    "Skipping hook on remote node"
                );
                return Err(HandlerOutcome::SkippedCapability);
            }
        }

        Ok(handler)
    }

    fn warn_missing(&self, plugin: &str, hook: &str, function: &str, file: &str) {
        if self.warnings.should_warn(plugin, hook) {
            warn!(
                target: log_target::PLUGIN,
                plugin,
                hook,
                "Function \"{}\" does not exist in {}/{} for hook \"{}\"",
                function,
                plugin,
                file,
                hook
            );
        }
    }
}

/// 핸들러 실행 격리: 에러와 panic을 결과로 바꾼다
fn isolate(
    binding: &HookBindingRecord,
    hook: &str,
    f: impl FnOnce() -> Result<()>,
) -> HandlerOutcome {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => HandlerOutcome::Ran,
        Ok(Err(e)) => {
            warn!(
                target: log_target::PLUGIN,
                plugin = %binding.plugin,
                hook,
                "Hook handler {} failed: {}",
                binding.function,
                e
            );
            HandlerOutcome::Failed(e.to_string())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                target: log_target::PLUGIN,
                plugin = %binding.plugin,
                hook,
                "Hook handler {} panicked: {}",
                binding.function,
                message
            );
            HandlerOutcome::Panicked(message)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 느슨한 "비어 있음": null, false, 0, "", "0", 빈 배열/객체
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty() || s == "0",
        other => is_null_like(other),
    }
}

/// 느슨한 null 비교
fn is_null_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginModule;
    use async_trait::async_trait;
    use plugdeck_foundation::{ConnectionMode, PluginUpsert};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Counting {
        dir: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PluginModule for Counting {
        fn directory(&self) -> &str {
            self.dir
        }

        fn handler(&self, function: &str) -> Option<HookHandler> {
            let calls = Arc::clone(&self.calls);
            match function {
                "on_action" => Some(HookHandler::action(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
                "boom" => Some(HookHandler::action(|_| panic!("handler exploded"))),
                "append" => Some(HookHandler::filter(|mut v| {
                    if let Some(items) = v.as_array_mut() {
                        items.push(json!("x"));
                    }
                    Ok(v)
                })),
                _ => None,
            }
        }
    }

    struct Fixture {
        _temp: TempDir,
        storage: Storage,
        modules: Arc<ModuleRegistry>,
        config: PlugdeckConfig,
        calls: Arc<AtomicUsize>,
    }

    fn fixture(plugins: &[&'static str]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let storage = Storage::in_memory().unwrap();
        let modules = Arc::new(ModuleRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        for &dir in plugins {
            std::fs::create_dir_all(temp.path().join(dir)).unwrap();
            std::fs::write(temp.path().join(dir).join("setup.php"), "").unwrap();
            storage
                .upsert_plugin(&PluginUpsert {
                    directory: dir.to_string(),
                    name: dir.to_string(),
                    status: 1,
                    ..Default::default()
                })
                .unwrap();
            modules.register(Arc::new(Counting {
                dir,
                calls: Arc::clone(&calls),
            }));
        }

        let config = PlugdeckConfig::new()
            .with_plugins_dir(temp.path())
            .with_host_version("1.2.25");

        Fixture {
            _temp: temp,
            storage,
            modules,
            config,
            calls,
        }
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let fx = fixture(&["a", "b"]);
        fx.storage.register_hook("a", "page_head", "setup.php", "boom", true).unwrap();
        fx.storage.register_hook("b", "page_head", "setup.php", "on_action", true).unwrap();

        let dispatcher = HookDispatcher::new(fx.storage.clone(), fx.modules.clone(), &fx.config);
        let mut ctx = dispatcher.context();
        let (args, report) = dispatcher
            .dispatch_with_report(&mut ctx, "page_head", vec![json!(1)])
            .unwrap();

        assert_eq!(args, vec![json!(1)]);
        assert!(matches!(report.outcome_of("a"), Some(HandlerOutcome::Panicked(_))));
        assert_eq!(report.ran(), vec!["b"]);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_traversal_is_rejected() {
        let fx = fixture(&["a"]);
        fx.storage
            .register_hook("a", "page_head", "../../etc/passwd", "on_action", true)
            .unwrap();

        let dispatcher = HookDispatcher::new(fx.storage.clone(), fx.modules.clone(), &fx.config);
        let mut ctx = dispatcher.context();
        let (_, report) = dispatcher
            .dispatch_with_report(&mut ctx, "page_head", vec![])
            .unwrap();

        assert_eq!(report.outcome_of("a"), Some(&HandlerOutcome::SecurityRejected));
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_integrated_plugins_are_skipped() {
        let mut fx = fixture(&["a"]);
        fx.storage.register_hook("a", "page_head", "setup.php", "on_action", true).unwrap();
        fx.config = fx.config.clone().with_integrated("a");

        let dispatcher = HookDispatcher::new(fx.storage.clone(), fx.modules.clone(), &fx.config);
        let mut ctx = dispatcher.context();
        let (_, report) = dispatcher
            .dispatch_with_report(&mut ctx, "page_head", vec![])
            .unwrap();

        assert_eq!(report.outcome_of("a"), Some(&HandlerOutcome::SkippedIntegrated));

        // 직접 호출은 건너뛰기 대상이 아니다
        let value = dispatcher.invoke_filter("a", "append", json!([])).unwrap();
        assert_eq!(value, json!(["x"]));
        assert!(matches!(
            dispatcher.invoke_filter("a", "on_action", json!([])),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            dispatcher.invoke_filter("a", "missing", json!([])),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_bindings_cached_per_context() {
        let fx = fixture(&["a", "b"]);
        fx.storage.register_hook("a", "page_head", "setup.php", "on_action", true).unwrap();

        let dispatcher = HookDispatcher::new(fx.storage.clone(), fx.modules.clone(), &fx.config);
        let mut ctx = dispatcher.context();
        dispatcher.dispatch(&mut ctx, "page_head", vec![]).unwrap();

        fx.storage.register_hook("b", "page_head", "setup.php", "on_action", true).unwrap();
        dispatcher.dispatch(&mut ctx, "page_head", vec![]).unwrap();
        assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.cached_hooks(), 1);

        let mut fresh = dispatcher.context();
        dispatcher.dispatch(&mut fresh, "page_head", vec![]).unwrap();
        assert_eq!(fx.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_remote_node_gates_by_capability() {
        let fx = fixture(&["a"]);
        std::fs::write(
            fx.config.paths.plugins_dir.join("a").join("INFO"),
            "[info]\nname = a\ncompat = 1.0\ncapabilities = online_view:1\n",
        )
        .unwrap();
        fx.storage.register_hook("a", "page_head", "setup.php", "on_action", true).unwrap();

        let offline = fx.config.clone().with_node(2, ConnectionMode::Offline);
        let dispatcher = HookDispatcher::new(fx.storage.clone(), fx.modules.clone(), &offline);
        let mut ctx = dispatcher.context();
        let (_, report) = dispatcher
            .dispatch_with_report(&mut ctx, "page_head", vec![])
            .unwrap();
        assert_eq!(report.outcome_of("a"), Some(&HandlerOutcome::SkippedCapability));

        let online = fx.config.clone().with_node(2, ConnectionMode::Online);
        let dispatcher = HookDispatcher::new(fx.storage.clone(), fx.modules.clone(), &online);
        let mut ctx = dispatcher.context();
        let (_, report) = dispatcher
            .dispatch_with_report(&mut ctx, "page_head", vec![])
            .unwrap();
        assert_eq!(report.ran(), vec!["a"]);
    }

    #[test]
    fn test_filter_chain_and_wrong_kind() {
        let fx = fixture(&["a", "b"]);
        fx.storage.register_hook("a", "device_action_array", "setup.php", "append", true).unwrap();
        fx.storage.register_hook("b", "device_action_array", "setup.php", "on_action", true).unwrap();

        let dispatcher = HookDispatcher::new(fx.storage.clone(), fx.modules.clone(), &fx.config);
        let mut ctx = dispatcher.context();
        let (value, report) = dispatcher
            .dispatch_function_with_report(&mut ctx, "device_action_array", json!([]))
            .unwrap();

        assert_eq!(value, json!(["x"]));
        assert_eq!(report.outcome_of("b"), Some(&HandlerOutcome::WrongKind));
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_null_like_values() {
        assert!(is_null_like(&Value::Null));
        assert!(is_null_like(&json!([])));
        assert!(!is_null_like(&json!("0")));
        assert!(is_empty_value(&json!("0")));
        assert!(!is_empty_value(&json!([1])));
    }
}
