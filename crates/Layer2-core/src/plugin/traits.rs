//! Plugin traits - 플러그인 모듈 인터페이스
//!
//! 플러그인 디렉토리마다 하나의 `PluginModule`이 `ModuleRegistry`에 등록된다.
//! 모든 진입점은 선택 사항이다. 구현하지 않은 진입점은 `None`을 돌려주며,
//! 라이프사이클은 이를 "진입점 없음"으로 해석한다.

use crate::hook::HookHandler;
use async_trait::async_trait;
use parking_lot::Mutex;
use plugdeck_foundation::{log_target, Error, RealmRegistration, Result, Storage};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

// ============================================================================
// ModuleVersion / ConfigCheck
// ============================================================================

/// `version()` 진입점이 돌려주는 정보
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersion {
    /// 표시 이름 (longname)
    pub name: String,
    pub version: String,
    pub author: String,
    pub homepage: String,
}

impl ModuleVersion {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            author: "Unknown".to_string(),
            homepage: "Not Stated".to_string(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_homepage(mut self, homepage: impl Into<String>) -> Self {
        self.homepage = homepage.into();
        self
    }
}

/// 설정 검사 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigCheck {
    Ready,
    NotReady(String),
    /// 검사 함수가 의미 없는 값을 돌려줌 (실패와 구분되는 경고)
    Invalid(String),
}

impl ConfigCheck {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConfigCheck::Ready)
    }
}

// ============================================================================
// PluginContext
// ============================================================================

/// 컨텍스트가 열린 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPhase {
    Install,
    Upgrade,
    Uninstall,
    Maintenance,
}

impl ContextPhase {
    /// Hook/realm/스키마 등록이 허용되는 단계
    pub fn allows_registration(&self) -> bool {
        matches!(self, ContextPhase::Install | ContextPhase::Upgrade)
    }
}

impl fmt::Display for ContextPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContextPhase::Install => "install",
            ContextPhase::Upgrade => "upgrade",
            ContextPhase::Uninstall => "uninstall",
            ContextPhase::Maintenance => "maintenance",
        };
        write!(f, "{}", s)
    }
}

/// 플러그인 진입점에 전달되는 컨텍스트
///
/// 설치 루틴은 이를 통해 Hook/realm을 등록하고 스키마를 변경한다.
/// 스키마 변경은 `plugin_db_changes`에 기록되어 uninstall 시 되돌릴 수 있다.
pub struct PluginContext {
    plugin: String,
    phase: ContextPhase,
    storage: Storage,
    admin_user: Option<i64>,
    hooks: Mutex<Vec<String>>,
    realms: Mutex<Vec<RealmRegistration>>,
}

impl PluginContext {
    pub fn new(plugin: impl Into<String>, phase: ContextPhase, storage: Storage) -> Self {
        Self {
            plugin: plugin.into(),
            phase,
            storage,
            admin_user: None,
            hooks: Mutex::new(Vec::new()),
            realms: Mutex::new(Vec::new()),
        }
    }

    /// 새 realm을 받을 관리자
    pub fn with_admin_user(mut self, user_id: i64) -> Self {
        self.admin_user = Some(user_id);
        self
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn phase(&self) -> ContextPhase {
        self.phase
    }

    /// 플러그인 자체 데이터 접근용
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn ensure_registration(&self, what: &str) -> Result<()> {
        if self.phase.allows_registration() {
            return Ok(());
        }
        warn!(
            target: log_target::PLUGIN,
            plugin = %self.plugin,
            phase = %self.phase,
            "Refusing {} outside of install, upgrade or setup",
            what
        );
        Err(Error::InvalidInput(format!(
            "Plugin '{}' may only perform {} during install, upgrade or setup (current: {})",
            self.plugin, what, self.phase
        )))
    }

    // ========================================================================
    // Hook / Realm
    // ========================================================================

    /// Hook 바인딩 등록
    pub fn register_hook(&self, hook: &str, file: &str, function: &str, enable: bool) -> Result<()> {
        self.ensure_registration("hook registration")?;
        let binding = self
            .storage
            .register_hook(&self.plugin, hook, file, function, enable)?;
        debug!(
            target: log_target::PLUGIN,
            plugin = %self.plugin,
            hook,
            enabled = binding.enabled,
            "Registered hook"
        );
        self.hooks.lock().push(hook.to_string());
        Ok(())
    }

    /// realm 등록. 접근 제어 realm id를 돌려준다
    pub fn register_realm(&self, files: &str, display: &str) -> Result<i64> {
        self.ensure_registration("realm registration")?;
        let registration =
            self.storage
                .register_realm(&self.plugin, files, display, self.admin_user)?;
        let realm_id = registration.realm_id;
        self.realms.lock().push(registration);
        Ok(realm_id)
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// 플러그인 테이블 생성 (rollback 로그 기록)
    pub fn create_table(&self, table: &str, columns_sql: &str) -> Result<()> {
        self.ensure_registration("schema changes")?;
        self.storage
            .create_plugin_table(&self.plugin, table, columns_sql)
    }

    /// 기존 테이블에 컬럼 추가 (rollback 로그 기록)
    pub fn add_column(&self, table: &str, column: &str, definition: &str) -> Result<()> {
        self.ensure_registration("schema changes")?;
        self.storage
            .add_plugin_column(&self.plugin, table, column, definition)
    }

    // ========================================================================
    // Results
    // ========================================================================

    /// 이 컨텍스트에서 등록한 Hook 이름
    pub fn registered_hooks(&self) -> Vec<String> {
        self.hooks.lock().clone()
    }

    /// 이 컨텍스트에서 등록한 realm
    pub fn registered_realms(&self) -> Vec<RealmRegistration> {
        self.realms.lock().clone()
    }
}

// ============================================================================
// PluginModule Trait
// ============================================================================

/// 플러그인 모듈
///
/// 구현하지 않은 진입점은 `None`을 돌려준다.
#[async_trait]
pub trait PluginModule: Send + Sync {
    /// 플러그인 디렉토리 이름
    fn directory(&self) -> &str;

    /// 버전 선언 진입점 (install 필수)
    fn version(&self) -> Option<ModuleVersion> {
        None
    }

    /// 설치 진입점 (install 필수)
    async fn install(&self, _ctx: &PluginContext) -> Option<Result<()>> {
        None
    }

    /// 제거 진입점
    async fn uninstall(&self, _ctx: &PluginContext) -> Option<Result<()>> {
        None
    }

    /// 설정 검사 진입점
    fn check_config(&self) -> Option<ConfigCheck> {
        None
    }

    /// Hook 재등록 (upgrade/setup)
    async fn setup_hooks(&self, _ctx: &PluginContext) -> Option<Result<()>> {
        None
    }

    /// 플러그인 데이터 존재 여부
    fn has_data(&self) -> Option<bool> {
        None
    }

    /// 플러그인 데이터 삭제
    async fn remove_data(&self, _ctx: &PluginContext) -> Option<Result<()>> {
        None
    }

    /// 함수 이름 → 핸들러
    fn handler(&self, _function: &str) -> Option<HookHandler> {
        None
    }
}
