//! Plugin Manager - 플러그인 라이프사이클 관리
//!
//! install / uninstall / enable / disable / archive / restore / reorder를
//! 수행한다. descriptor와 의존성 검사 결과를 보고 레지스트리를 바꾸며,
//! 레지스트리를 바꾼 뒤에는 항상 복제 신호를 보낸다.
//!
//! 같은 플러그인에 대한 라이프사이클 작업은 동시에 하나만 실행된다
//! (프로세스 안에서는 busy 집합, 프로세스 사이에서는 IMMEDIATE 트랜잭션).

use super::archive::{self, ArchiveLayout, RestoreReport};
use super::dependency::{can_install, dependents_of, DependencyCheck};
use super::descriptor::{load_descriptor, ucfirst, Descriptor, DescriptorCache};
use super::registry::ModuleRegistry;
use super::releases::REPO_PREFIX;
use super::replication::{NoopTransport, ReplicationTransport, Replicator};
use super::status::{PluginStatus, INSTALLED_CODES};
use super::traits::{ConfigCheck, ContextPhase, PluginContext, PluginModule};
use parking_lot::Mutex;
use plugdeck_foundation::{
    log_target, Error, NewArchive, PlugdeckConfig, PluginRecord, PluginUpsert, Result,
    SchemaRollback, Storage,
};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// Outcomes
// ============================================================================

/// install 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub status: PluginStatus,
    pub config: ConfigCheck,
    /// 설치 중 등록된 Hook
    pub hooks: Vec<String>,
    /// 설치 중 등록된 realm 수
    pub realms: usize,
}

/// uninstall 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallOutcome {
    /// removeTables = true일 때 실행된 롤백
    pub rollback: Option<SchemaRollback>,
    /// removeTables = false일 때 버려진 로그 수
    pub discarded_changes: usize,
}

/// archive 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub id: i64,
    pub dir_hash: String,
    pub files: usize,
    /// 직전 아카이브와 내용이 같음
    pub unchanged: bool,
}

/// restore 원본
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSource {
    /// 저장된 아카이브. None이면 가장 최근 것
    Archive { id: Option<i64> },
    /// 원격에서 받아 둔 릴리스
    Available { tag: String },
}

impl RestoreSource {
    fn success_message(&self) -> &'static str {
        match self {
            RestoreSource::Archive { .. } => "Restore succeeded!",
            RestoreSource::Available { .. } => "Load succeeded!",
        }
    }

    fn failure_message(&self) -> &'static str {
        match self {
            RestoreSource::Archive { .. } => "Restore failed!",
            RestoreSource::Available { .. } => "Load failed!",
        }
    }
}

/// restore 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub message: &'static str,
    pub report: RestoreReport,
}

/// 단일 플러그인 점검 결과
#[derive(Debug, Clone, Serialize)]
pub struct PluginCheckReport {
    pub descriptor: Descriptor,
    pub record: Option<PluginRecord>,
    pub dependencies: DependencyCheck,
    pub dependents: Vec<String>,
    pub config: ConfigCheck,
    /// 최신 아카이브와 현재 디렉토리가 같은지 (아카이브 없으면 None)
    pub archive_current: Option<bool>,
}

// ============================================================================
// Busy guard
// ============================================================================

struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<String>>,
    plugin: String,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.plugin);
    }
}

fn already_installed(plugin: &str) -> Error {
    Error::InvalidInput(format!("Plugin '{}' is already installed", plugin))
}

fn not_installed(plugin: &str) -> Error {
    Error::InvalidInput(format!("Plugin '{}' is not installed", plugin))
}

fn plugin_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9 _]+$").expect("valid plugin id pattern"))
}

/// 라이프사이클 경계에서의 plugin id 검사
pub fn validate_plugin_id(plugin: &str) -> Result<()> {
    if plugin_id_pattern().is_match(plugin) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid plugin id '{}'", plugin)))
    }
}

// ============================================================================
// PluginManager
// ============================================================================

/// 플러그인 매니저
pub struct PluginManager {
    config: PlugdeckConfig,
    storage: Storage,
    modules: Arc<ModuleRegistry>,
    replicator: Replicator,
    /// archive 레코드에 남는 사용자
    operator: i64,
    busy: Mutex<HashSet<String>>,
}

impl PluginManager {
    pub fn new(config: PlugdeckConfig, storage: Storage, modules: Arc<ModuleRegistry>) -> Self {
        let replicator = Replicator::new(
            storage.clone(),
            Arc::new(NoopTransport),
            Duration::from_secs(config.node.poller_interval_secs),
        );
        let operator = config.host.admin_user_id;

        Self {
            config,
            storage,
            modules,
            replicator,
            operator,
            busy: Mutex::new(HashSet::new()),
        }
    }

    /// 원격 poller 전송 계층 지정
    pub fn with_transport(mut self, transport: Arc<dyn ReplicationTransport>) -> Self {
        self.replicator = Replicator::new(
            self.storage.clone(),
            transport,
            Duration::from_secs(self.config.node.poller_interval_secs),
        );
        self
    }

    /// 작업 사용자 지정
    pub fn with_operator(mut self, user_id: i64) -> Self {
        self.operator = user_id;
        self
    }

    pub fn config(&self) -> &PlugdeckConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    /// 플러그인 디렉토리 경로
    pub fn plugin_dir(&self, plugin: &str) -> PathBuf {
        self.config.paths.plugins_dir.join(plugin)
    }

    /// 작업 단위 descriptor 캐시
    pub fn descriptor_cache(&self) -> DescriptorCache {
        DescriptorCache::new(
            self.config.paths.plugins_dir.clone(),
            self.config.host.version.clone(),
        )
    }

    pub fn descriptor(&self, plugin: &str) -> Descriptor {
        load_descriptor(
            &self.config.paths.plugins_dir,
            plugin,
            &self.config.host.version,
        )
    }

    // ========================================================================
    // Guards
    // ========================================================================

    fn acquire(&self, plugin: &str) -> Result<BusyGuard<'_>> {
        let mut busy = self.busy.lock();
        if !busy.insert(plugin.to_string()) {
            warn!(target: log_target::PLUGIN, plugin, "Lifecycle operation already running");
            return Err(Error::Busy(plugin.to_string()));
        }
        Ok(BusyGuard {
            busy: &self.busy,
            plugin: plugin.to_string(),
        })
    }

    /// 작업 중인 플러그인인지
    pub fn is_busy(&self, plugin: &str) -> bool {
        self.busy.lock().contains(plugin)
    }

    fn refuse_integrated(&self, plugin: &str, action: &str) -> Result<()> {
        if self.config.is_integrated(plugin) {
            warn!(
                target: log_target::PLUGIN,
                plugin, action, "Refusing lifecycle action on integrated plugin"
            );
            return Err(Error::InvalidInput(format!(
                "Plugin '{}' is integrated into the host and cannot be {}",
                plugin, action
            )));
        }
        Ok(())
    }

    fn refuse_with_dependents(&self, plugin: &str, action: &str) -> Result<()> {
        let mut cache = self.descriptor_cache();
        let dependents = dependents_of(&self.storage, &mut cache, plugin)?;
        if dependents.is_empty() {
            return Ok(());
        }

        let names: Vec<String> = dependents.iter().map(|d| ucfirst(d)).collect();
        Err(Error::Dependency(format!(
            "{} is required by {} and cannot be {}.",
            ucfirst(plugin),
            names.join(", "),
            action
        )))
    }

    /// 설치된 플러그인 레코드
    fn installed_record(&self, plugin: &str) -> Result<PluginRecord> {
        let record = self
            .storage
            .get_plugin(plugin)?
            .ok_or_else(|| Error::NotFound(format!("Plugin '{}'", plugin)))?;

        match PluginStatus::from_code(record.status) {
            Some(status) if status.is_installed() => Ok(record),
            _ => Err(not_installed(plugin)),
        }
    }

    fn context(&self, plugin: &str, phase: ContextPhase) -> PluginContext {
        PluginContext::new(plugin, phase, self.storage.clone())
            .with_admin_user(self.config.host.admin_user_id)
    }

    // ========================================================================
    // Config check
    // ========================================================================

    fn run_check_config(&self, plugin: &str, module: Option<&dyn PluginModule>) -> ConfigCheck {
        match module.and_then(|m| m.check_config()) {
            None => ConfigCheck::Ready,
            Some(ConfigCheck::Invalid(reason)) => {
                warn!(
                    target: log_target::PLUGIN,
                    plugin,
                    "Plugin configuration check returned an invalid result: {}",
                    reason
                );
                ConfigCheck::Invalid(reason)
            }
            Some(check) => check,
        }
    }

    /// 설정 검사. 검사 진입점이 없으면 Ready
    pub fn check_config(&self, plugin: &str) -> ConfigCheck {
        let module = self.modules.get(plugin);
        self.run_check_config(plugin, module.as_deref())
    }

    // ========================================================================
    // Install / Uninstall
    // ========================================================================

    /// 플러그인 설치 (0 → 4, 설정 검사 실패 시 2)
    pub async fn install(&self, plugin: &str) -> Result<InstallOutcome> {
        validate_plugin_id(plugin)?;
        self.refuse_integrated(plugin, "installed")?;
        let _guard = self.acquire(plugin)?;

        if let Some(code) = self.storage.plugin_status(plugin)? {
            if INSTALLED_CODES.contains(&code) {
                return Err(already_installed(plugin));
            }
        }

        if plugin.starts_with(REPO_PREFIX) {
            return Err(Error::Validation(format!(
                "The Plugin directory '{}' needs to be renamed to remove '{}' from the name before it can be installed.",
                plugin, REPO_PREFIX
            )));
        }

        let descriptor = self.descriptor(plugin);
        if !descriptor.is_loadable() {
            return Err(Error::Validation(format!(
                "Plugin '{}' cannot be installed: {}",
                plugin, descriptor.status
            )));
        }

        let check = can_install(&self.storage, &descriptor)?;
        if !check.ok {
            warn!(target: log_target::PLUGIN, plugin, "{}", check.message);
            return Err(Error::Dependency(format!(
                "{} Plugin cannot be installed.",
                check.message
            )));
        }

        let module = self
            .modules
            .get(plugin)
            .ok_or_else(|| Error::entry_point_missing(plugin, "version"))?;
        let version = module
            .version()
            .ok_or_else(|| Error::entry_point_missing(plugin, "version"))?;

        let claim = PluginUpsert {
            directory: plugin.to_string(),
            name: version.name.clone(),
            author: version.author.clone(),
            webpage: version.homepage.clone(),
            version: version.version.clone(),
            status: PluginStatus::NotInstalled.code(),
        };
        if self.storage.claim_plugin(&claim, &INSTALLED_CODES)?.is_none() {
            return Err(already_installed(plugin));
        }

        let ctx = self.context(plugin, ContextPhase::Install);
        match module.install(&ctx).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!(target: log_target::PLUGIN, plugin, "Plugin install routine failed: {}", e);
                self.discard_failed_install(plugin);
                return Err(e);
            }
            None => {
                self.discard_failed_install(plugin);
                return Err(Error::entry_point_missing(plugin, "install"));
            }
        }

        let config = self.run_check_config(plugin, Some(module.as_ref()));
        let status = if config.is_ready() {
            PluginStatus::INACTIVE
        } else {
            PluginStatus::CONFIG_ISSUES
        };
        let pending = [PluginStatus::NotInstalled.code()];
        if !self
            .storage
            .deactivate_plugin(plugin, &pending, status.code(), true)?
        {
            // 다른 프로세스가 먼저 설치를 끝냈다. 그쪽 레코드는 건드리지 않는다.
            return Err(already_installed(plugin));
        }

        if config.is_ready() {
            info!(
                target: log_target::PLUGIN,
                plugin,
                version = %version.version,
                "NOTE: Plugin {} has been installed",
                plugin
            );
        } else {
            warn!(
                target: log_target::PLUGIN,
                plugin,
                check = ?config,
                "WARNING: Plugin {} was not installed due to Configuration Issues",
                plugin
            );
        }

        self.replicator.replicate().await;

        Ok(InstallOutcome {
            status,
            config,
            hooks: ctx.registered_hooks(),
            realms: ctx.registered_realms().len(),
        })
    }

    /// 설치 실패 후 남은 레지스트리 상태 정리
    fn discard_failed_install(&self, plugin: &str) {
        if let Err(e) = self.storage.rollback_schema_changes(plugin) {
            warn!(target: log_target::PLUGIN, plugin, "Schema rollback after failed install failed: {}", e);
        }
        if let Err(e) = self.storage.remove_plugin(plugin) {
            warn!(target: log_target::PLUGIN, plugin, "Registry cleanup after failed install failed: {}", e);
        }
    }

    /// 플러그인 제거 (→ 0, 레코드 삭제)
    ///
    /// `remove_tables`가 false면 스키마 변경 로그만 버리고 테이블/컬럼은 남긴다.
    pub async fn uninstall(
        &self,
        plugin: &str,
        remove_tables: bool,
        force: bool,
    ) -> Result<UninstallOutcome> {
        validate_plugin_id(plugin)?;
        self.refuse_integrated(plugin, "uninstalled")?;
        let _guard = self.acquire(plugin)?;

        if self.storage.get_plugin(plugin)?.is_none() {
            return Err(Error::NotFound(format!("Plugin '{}'", plugin)));
        }
        if !force {
            self.refuse_with_dependents(plugin, "uninstalled")?;
        }

        self.remove_registration(plugin, remove_tables).await
    }

    async fn remove_registration(
        &self,
        plugin: &str,
        remove_tables: bool,
    ) -> Result<UninstallOutcome> {
        if let Some(module) = self.modules.get(plugin) {
            let ctx = self.context(plugin, ContextPhase::Uninstall);
            match module.uninstall(&ctx).await {
                Some(Ok(())) | None => {}
                Some(Err(e)) => warn!(
                    target: log_target::PLUGIN,
                    plugin,
                    "Plugin uninstall routine failed, removing registration anyway: {}",
                    e
                ),
            }
        }

        self.storage.remove_plugin(plugin)?;

        let mut outcome = UninstallOutcome::default();
        if remove_tables {
            let rollback = self.storage.rollback_schema_changes(plugin)?;
            for table in &rollback.dropped_tables {
                self.replicator.drop_remote_table(table).await;
            }
            outcome.rollback = Some(rollback);
        } else {
            outcome.discarded_changes = self.storage.discard_schema_changes(plugin)?;
        }

        self.replicator.replicate().await;
        info!(
            target: log_target::PLUGIN,
            plugin, remove_tables, "NOTE: Plugin {} has been uninstalled", plugin
        );

        Ok(outcome)
    }

    /// 호스트에 통합된 플러그인의 레지스트리 흔적 제거 (테이블 유지)
    pub async fn uninstall_integrated(&self) -> Result<usize> {
        let mut removed = 0;
        for plugin in &self.config.host.integrated_plugins {
            if self.storage.get_plugin(plugin)?.is_none() {
                continue;
            }
            let _guard = self.acquire(plugin)?;
            self.remove_registration(plugin, false).await?;
            removed += 1;
        }
        Ok(removed)
    }

    // ========================================================================
    // Enable / Disable
    // ========================================================================

    /// 활성화 (설정 검사 통과 시 → 1)
    ///
    /// 검사 결과를 돌려준다. Ready가 아니면 상태는 바뀌지 않는다.
    pub async fn enable(&self, plugin: &str) -> Result<ConfigCheck> {
        validate_plugin_id(plugin)?;
        self.refuse_integrated(plugin, "enabled")?;
        let _guard = self.acquire(plugin)?;

        self.installed_record(plugin)?;

        let check = self.check_config(plugin);
        if !check.is_ready() {
            warn!(
                target: log_target::PLUGIN,
                plugin,
                check = ?check,
                "Plugin {} was not enabled due to Configuration Issues",
                plugin
            );
            return Ok(check);
        }

        if !self
            .storage
            .activate_plugin(plugin, &INSTALLED_CODES, PluginStatus::ACTIVE.code())?
        {
            return Err(not_installed(plugin));
        }
        self.replicator.replicate().await;
        info!(target: log_target::PLUGIN, plugin, "Plugin {} has been enabled", plugin);

        Ok(check)
    }

    /// 비활성화 (→ 4). 설정 Hook은 계속 활성. 이미 비활성이면 false
    pub async fn disable(&self, plugin: &str, force: bool) -> Result<bool> {
        validate_plugin_id(plugin)?;
        self.refuse_integrated(plugin, "disabled")?;
        let _guard = self.acquire(plugin)?;

        let record = self.installed_record(plugin)?;
        if record.status == PluginStatus::INACTIVE.code() {
            return Ok(false);
        }
        if !force {
            self.refuse_with_dependents(plugin, "disabled")?;
        }

        let inactive = PluginStatus::INACTIVE.code();
        let from: Vec<i32> = INSTALLED_CODES.into_iter().filter(|c| *c != inactive).collect();
        if !self.storage.deactivate_plugin(plugin, &from, inactive, true)? {
            return Ok(false);
        }
        self.replicator.replicate().await;
        info!(target: log_target::PLUGIN, plugin, "Plugin {} has been disabled", plugin);

        Ok(true)
    }

    /// 런타임 에러로 인한 비활성화 (→ 7). 설정 Hook까지 모두 끈다
    pub async fn disable_all(&self, plugin: &str) -> Result<()> {
        validate_plugin_id(plugin)?;

        if self.storage.get_plugin(plugin)?.is_none() {
            return Err(Error::NotFound(format!("Plugin '{}'", plugin)));
        }

        if !self.storage.deactivate_plugin(
            plugin,
            &INSTALLED_CODES,
            PluginStatus::DISABLED_BY_ERROR.code(),
            false,
        )? {
            return Err(not_installed(plugin));
        }
        self.replicator.replicate().await;
        warn!(
            target: log_target::PLUGIN,
            plugin, "Plugin {} has been disabled due to errors", plugin
        );

        Ok(())
    }

    // ========================================================================
    // Upgrade / Data
    // ========================================================================

    /// descriptor 버전이 레지스트리와 다르면 메타데이터 갱신 + Hook 재등록
    pub async fn upgrade_register(&self, plugin: &str) -> Result<bool> {
        validate_plugin_id(plugin)?;
        let _guard = self.acquire(plugin)?;

        let descriptor = self.descriptor(plugin);
        if descriptor.issue.is_some() {
            return Ok(false);
        }
        let Some(record) = self.storage.get_plugin(plugin)? else {
            return Ok(false);
        };
        if record.version == descriptor.version {
            return Ok(false);
        }

        self.storage.update_plugin_info(
            plugin,
            &descriptor.longname,
            &descriptor.author,
            &descriptor.homepage,
            &descriptor.version,
        )?;

        let installed = PluginStatus::from_code(record.status).is_some_and(|s| s.is_installed());
        if let (true, Some(module)) = (installed, self.modules.get(plugin)) {
            let ctx = self.context(plugin, ContextPhase::Upgrade);
            if let Some(Err(e)) = module.setup_hooks(&ctx).await {
                warn!(target: log_target::PLUGIN, plugin, "Hook re-registration failed: {}", e);
            }
        }

        info!(
            target: log_target::PLUGIN,
            plugin,
            from = %record.version,
            to = %descriptor.version,
            "Plugin registration upgraded"
        );
        self.replicator.replicate().await;

        Ok(true)
    }

    /// 플러그인 데이터 존재 여부 (진입점 없으면 None)
    pub fn has_data(&self, plugin: &str) -> Option<bool> {
        self.modules.get(plugin).and_then(|m| m.has_data())
    }

    /// 플러그인 데이터 삭제
    pub async fn remove_data(&self, plugin: &str) -> Result<()> {
        validate_plugin_id(plugin)?;
        let _guard = self.acquire(plugin)?;

        let outcome = match self.modules.get(plugin) {
            Some(module) => {
                let ctx = self.context(plugin, ContextPhase::Maintenance);
                module.remove_data(&ctx).await
            }
            None => None,
        };

        match outcome {
            Some(Ok(())) => {
                info!(
                    target: log_target::PLUGIN,
                    plugin,
                    "Data for Plugin {} including Tables and Settings has been removed.",
                    plugin
                );
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => {
                error!(
                    target: log_target::PLUGIN,
                    plugin,
                    "Data for Plugin {} including Tables and Settings has not been removed due to missing removal function.",
                    plugin
                );
                Err(Error::entry_point_missing(plugin, "remove_data"))
            }
        }
    }

    // ========================================================================
    // Archive / Restore
    // ========================================================================

    /// 플러그인 디렉토리 스냅샷 저장
    pub async fn archive(&self, plugin: &str) -> Result<ArchiveOutcome> {
        validate_plugin_id(plugin)?;
        let _guard = self.acquire(plugin)?;

        let record = self
            .storage
            .get_plugin(plugin)?
            .ok_or_else(|| Error::NotFound(format!("Plugin '{}'", plugin)))?;

        let dir = self.plugin_dir(plugin);
        let snapshot = archive::snapshot_directory(&dir).map_err(|e| {
            error!(
                target: log_target::PLUGIN,
                plugin,
                "The Plugin '{}' archiving process has failed due to the plugin directory being missing.",
                plugin
            );
            e
        })?;

        let unchanged = self
            .storage
            .latest_archive(plugin)?
            .is_some_and(|previous| previous.dir_hash == snapshot.hash);

        let descriptor = self.descriptor(plugin);
        let id = self.storage.insert_archive(&NewArchive {
            plugin: plugin.to_string(),
            description: record.name,
            author: record.author,
            webpage: record.webpage,
            version: record.version,
            requires: descriptor.requires,
            compat: descriptor.compat.unwrap_or_default(),
            user_id: self.operator,
            dir_hash: snapshot.hash.clone(),
            archive: snapshot.archive,
        })?;

        info!(
            target: log_target::PLUGIN,
            plugin,
            archive = id,
            unchanged,
            "The Plugin '{}' has been archived successfully.",
            plugin
        );

        Ok(ArchiveOutcome {
            id,
            dir_hash: snapshot.hash,
            files: snapshot.files,
            unchanged,
        })
    }

    /// 최신 아카이브 이후 변경이 없는지 (아카이브 없으면 None)
    pub fn is_archive_current(&self, plugin: &str) -> Result<Option<bool>> {
        let Some(latest) = self.storage.latest_archive(plugin)? else {
            return Ok(None);
        };
        let dir = self.plugin_dir(plugin);
        if !dir.is_dir() {
            return Ok(Some(false));
        }
        Ok(Some(archive::hash_directory(&dir)? == latest.dir_hash))
    }

    /// 플러그인의 아카이브 삭제
    pub async fn archive_remove(&self, plugin: &str) -> Result<usize> {
        validate_plugin_id(plugin)?;
        let _guard = self.acquire(plugin)?;

        let removed = self.storage.remove_archives(plugin)?;
        if removed == 0 {
            return Err(Error::NotFound(format!("Archive for plugin '{}'", plugin)));
        }
        info!(
            target: log_target::PLUGIN,
            plugin, removed, "The Archive for Plugin '{}' has been removed.", plugin
        );
        Ok(removed)
    }

    /// 아카이브 또는 받아 둔 릴리스로 디렉토리 복원
    ///
    /// 아카이브에 없는 파일은 삭제 후보로만 보고한다. `prune`이면 실제로 지운다.
    pub async fn restore(
        &self,
        plugin: &str,
        source: RestoreSource,
        prune: bool,
    ) -> Result<RestoreOutcome> {
        validate_plugin_id(plugin)?;
        self.refuse_integrated(plugin, "restored")?;
        let _guard = self.acquire(plugin)?;

        match self.restore_files(plugin, &source, prune) {
            Ok(report) => {
                info!(
                    target: log_target::PLUGIN,
                    plugin,
                    written = report.written.len(),
                    candidates = report.removal_candidates.len(),
                    "{}",
                    source.success_message()
                );
                Ok(RestoreOutcome {
                    message: source.success_message(),
                    report,
                })
            }
            Err(e) => {
                error!(
                    target: log_target::PLUGIN,
                    plugin,
                    "{} {}",
                    source.failure_message(),
                    e
                );
                Err(e)
            }
        }
    }

    fn restore_files(
        &self,
        plugin: &str,
        source: &RestoreSource,
        prune: bool,
    ) -> Result<RestoreReport> {
        let (bytes, layout) = match source {
            RestoreSource::Archive { id } => {
                let record = match id {
                    Some(id) => self.storage.get_archive(*id)?,
                    None => self.storage.latest_archive(plugin)?,
                };
                let record = record
                    .filter(|r| r.plugin == plugin)
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "Unable to locate the archive record for plugin '{}'",
                            plugin
                        ))
                    })?;
                (record.archive, ArchiveLayout::Snapshot)
            }
            RestoreSource::Available { tag } => {
                let release = self.storage.get_available(plugin, tag)?;
                let bytes = release.and_then(|r| r.archive).ok_or_else(|| {
                    Error::NotFound(format!(
                        "Unable to locate the release '{}' for plugin '{}'",
                        tag, plugin
                    ))
                })?;
                (bytes, ArchiveLayout::Release)
            }
        };

        let entries = archive::read_entries(&bytes, layout)?;
        debug!(
            target: log_target::PLUGIN,
            plugin,
            entries = entries.len(),
            "Read archive entries"
        );

        let target = self.plugin_dir(plugin);
        let noremove = if target.is_dir() {
            self.descriptor(plugin).noremove
        } else {
            Vec::new()
        };

        let plan = archive::plan_restore(
            &target,
            entries,
            &self.config.host.preserved_files,
            &noremove,
        )?;
        archive::apply_restore(&target, plan, prune)
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// 로드 순서 재배열 (id 목록 순서대로 1..N)
    pub async fn reorder(&self, order: &[i64]) -> Result<Vec<(i64, i64)>> {
        if order.is_empty() {
            return Err(Error::InvalidInput("Reorder list is empty".to_string()));
        }

        let mapping = self.storage.reorder_plugins(order)?;
        info!(
            target: log_target::PLUGIN,
            moved = mapping.iter().filter(|(old, new)| old != new).count(),
            "Plugin load order updated"
        );
        self.replicator.replicate().await;
        Ok(mapping)
    }

    /// 앞 플러그인과 순서 교환
    pub async fn move_up(&self, plugin: &str) -> Result<bool> {
        validate_plugin_id(plugin)?;
        let moved = self.storage.move_plugin_up(plugin)?;
        if moved {
            self.replicator.replicate().await;
        }
        Ok(moved)
    }

    /// 뒤 플러그인과 순서 교환
    pub async fn move_down(&self, plugin: &str) -> Result<bool> {
        validate_plugin_id(plugin)?;
        let moved = self.storage.move_plugin_down(plugin)?;
        if moved {
            self.replicator.replicate().await;
        }
        Ok(moved)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// 단일 플러그인 점검 (레지스트리 변경 없음)
    pub fn check(&self, plugin: &str) -> Result<PluginCheckReport> {
        validate_plugin_id(plugin)?;

        let descriptor = self.descriptor(plugin);
        let dependencies = can_install(&self.storage, &descriptor)?;
        let mut cache = self.descriptor_cache();
        let dependents = dependents_of(&self.storage, &mut cache, plugin)?;

        Ok(PluginCheckReport {
            record: self.storage.get_plugin(plugin)?,
            dependencies,
            dependents,
            config: self.check_config(plugin),
            archive_current: self.is_archive_current(plugin)?,
            descriptor,
        })
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins_dir", &self.config.paths.plugins_dir)
            .field("modules", &self.modules)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::traits::ModuleVersion;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    struct Widget;

    #[async_trait]
    impl PluginModule for Widget {
        fn directory(&self) -> &str {
            "widget"
        }

        fn version(&self) -> Option<ModuleVersion> {
            Some(ModuleVersion::new("Widget", "1.0"))
        }

        async fn install(&self, ctx: &PluginContext) -> Option<Result<()>> {
            Some(ctx.register_hook("page_head", "setup.php", "widget_page_head", true))
        }
    }

    fn setup() -> (TempDir, PluginManager) {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("widget");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("INFO"),
            "[info]\nname = widget\nversion = 1.0\ncompat = 1.0\n",
        )
        .unwrap();

        let config = PlugdeckConfig::new().with_plugins_dir(temp.path());
        let modules = Arc::new(ModuleRegistry::new().with(Arc::new(Widget)));
        let manager = PluginManager::new(config, Storage::in_memory().unwrap(), modules);
        (temp, manager)
    }

    #[test]
    fn test_validate_plugin_id() {
        assert!(validate_plugin_id("thold").is_ok());
        assert!(validate_plugin_id("my plugin_2").is_ok());
        assert!(validate_plugin_id("../etc").is_err());
        assert!(validate_plugin_id("").is_err());
    }

    #[test]
    fn test_busy_guard_released_on_drop() {
        let (_temp, manager) = setup();
        {
            let _guard = manager.acquire("widget").unwrap();
            assert!(manager.is_busy("widget"));
            assert!(matches!(manager.acquire("widget"), Err(Error::Busy(_))));
        }
        assert!(!manager.is_busy("widget"));
    }

    #[tokio::test]
    async fn test_install_leaves_plugin_inactive_with_disabled_hooks() {
        let (_temp, manager) = setup();

        let outcome = manager.install("widget").await.unwrap();
        assert_eq!(outcome.status, PluginStatus::INACTIVE);
        assert_eq!(outcome.hooks, vec!["page_head".to_string()]);

        let hooks = manager.storage().hooks_of_plugin("widget").unwrap();
        assert!(!hooks[0].enabled);

        assert!(matches!(
            manager.install("widget").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_enable_and_disable() {
        let (_temp, manager) = setup();
        manager.install("widget").await.unwrap();

        assert!(manager.enable("widget").await.unwrap().is_ready());
        assert_eq!(manager.storage().plugin_status("widget").unwrap(), Some(1));
        assert_eq!(manager.storage().hooks_for("page_head").unwrap().len(), 1);

        assert!(manager.disable("widget", false).await.unwrap());
        assert!(!manager.disable("widget", false).await.unwrap());
        assert_eq!(manager.storage().plugin_status("widget").unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_integrated_plugin_refused() {
        let (temp, _) = setup();
        let config = PlugdeckConfig::new()
            .with_plugins_dir(temp.path())
            .with_integrated("widget");
        let manager = PluginManager::new(
            config,
            Storage::in_memory().unwrap(),
            Arc::new(ModuleRegistry::new().with(Arc::new(Widget))),
        );

        assert!(matches!(
            manager.install("widget").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_module_is_named_entry_point_error() {
        let (temp, manager) = setup();
        let dir = temp.path().join("orphan");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("INFO"), "[info]\nname = orphan\ncompat = 1.0\n").unwrap();

        match manager.install("orphan").await {
            Err(Error::EntryPointMissing { entry_point, .. }) => assert_eq!(entry_point, "version"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(manager.storage().get_plugin("orphan").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upgrade_register_follows_descriptor_version() {
        let (temp, manager) = setup();
        manager.install("widget").await.unwrap();
        assert!(!manager.upgrade_register("widget").await.unwrap());

        fs::write(
            temp.path().join("widget").join("INFO"),
            "[info]\nname = widget\nversion = 1.1\ncompat = 1.0\n",
        )
        .unwrap();

        assert!(manager.upgrade_register("widget").await.unwrap());
        let record = manager.storage().get_plugin("widget").unwrap().unwrap();
        assert_eq!(record.version, "1.1");
        assert_eq!(record.status, 4);
    }

    #[tokio::test]
    async fn test_disable_all_turns_off_every_hook() {
        let (_temp, manager) = setup();
        manager.install("widget").await.unwrap();
        manager.enable("widget").await.unwrap();

        manager.disable_all("widget").await.unwrap();
        assert_eq!(manager.storage().plugin_status("widget").unwrap(), Some(7));
        assert!(manager.storage().hooks_for("page_head").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_data_without_entry_point() {
        let (_temp, manager) = setup();
        assert_eq!(manager.has_data("widget"), None);

        match manager.remove_data("widget").await {
            Err(Error::EntryPointMissing { entry_point, .. }) => {
                assert_eq!(entry_point, "remove_data")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    /// 설치 routine 도중 다른 프로세스가 설치를 끝낸 상황을 흉내낸다
    struct Racer;

    #[async_trait]
    impl PluginModule for Racer {
        fn directory(&self) -> &str {
            "racer"
        }

        fn version(&self) -> Option<ModuleVersion> {
            Some(ModuleVersion::new("Racer", "1.0"))
        }

        async fn install(&self, ctx: &PluginContext) -> Option<Result<()>> {
            Some(
                ctx.register_hook("page_head", "setup.php", "racer_page_head", true)
                    .and_then(|_| ctx.storage().set_plugin_status("racer", 4).map(|_| ())),
            )
        }
    }

    #[tokio::test]
    async fn test_install_loses_to_concurrent_install() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("racer");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("INFO"),
            "[info]\nname = racer\nversion = 1.0\ncompat = 1.0\n",
        )
        .unwrap();
        let config = PlugdeckConfig::new().with_plugins_dir(temp.path());
        let modules = Arc::new(ModuleRegistry::new().with(Arc::new(Racer)));
        let manager = PluginManager::new(config, Storage::in_memory().unwrap(), modules);

        assert!(matches!(
            manager.install("racer").await,
            Err(Error::InvalidInput(_))
        ));
        // 먼저 끝난 설치의 상태와 바인딩은 그대로 남는다
        assert_eq!(manager.storage().plugin_status("racer").unwrap(), Some(4));
        assert_eq!(manager.storage().hooks_of_plugin("racer").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enable_refuses_uninstalled_record() {
        let (_temp, manager) = setup();
        manager.install("widget").await.unwrap();
        manager.storage().set_plugin_status("widget", 0).unwrap();

        assert!(matches!(
            manager.enable("widget").await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(manager.storage().plugin_status("widget").unwrap(), Some(0));
        assert!(manager.storage().hooks_for("page_head").unwrap().is_empty());
    }
}
