//! plugdeck-core: Plugin lifecycle and hook dispatch
//!
//! Layer2 - 플러그인 라이프사이클 / Hook 디스패치 레이어
//!
//! # 주요 모듈
//!
//! - `plugin`: 디렉토리 검증, 설치/제거, 활성화, 아카이브/복원, 릴리스 수집
//! - `hook`: 레지스트리 순서대로 plugin handler 실행 (action / filter)
//!
//! # 사용 예시
//!
//! ```ignore
//! use plugdeck_core::{HookDispatcher, ModuleRegistry, PluginManager};
//!
//! let modules = Arc::new(ModuleRegistry::new().with(Arc::new(Thold)));
//! let manager = PluginManager::new(config.clone(), storage.clone(), modules.clone());
//! manager.install("thold").await?;
//! manager.enable("thold").await?;
//!
//! let dispatcher = HookDispatcher::new(storage, modules, &config);
//! let mut ctx = dispatcher.context();
//! let row = dispatcher.dispatch_function(&mut ctx, "device_action_array", json!({}))?;
//! ```

pub mod hook;
pub mod plugin;

// Re-exports: Plugin
pub use plugin::{
    // Lifecycle
    ArchiveOutcome,
    // Module
    ConfigCheck,
    ContextPhase,
    Descriptor,
    DescriptorCache,
    InstallOutcome,
    ModuleRegistry,
    ModuleVersion,
    PluginCheckReport,
    PluginContext,
    // Discovery
    PluginDiscovery,
    PluginListing,
    PluginManager,
    PluginModule,
    // Status
    PluginStatus,
    // Releases
    ReleaseFetcher,
    Replicator,
    RestoreOutcome,
    RestoreSource,
    UninstallOutcome,
};

// Re-exports: Hook
pub use hook::{
    ActionFn, DispatchContext, DispatchReport, FilterFn, HookDispatcher, HookHandler,
    WarningLimiter,
};

// Layer1 re-exports
pub use plugdeck_foundation::{Error, Result};

/// Layer2 버전
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_status_exports() {
        assert_eq!(PluginStatus::ACTIVE.code(), 1);
        assert_eq!(PluginStatus::from_code(4), Some(PluginStatus::INACTIVE));
    }
}
