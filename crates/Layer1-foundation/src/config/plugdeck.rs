//! Plugdeck Config - 통합 설정
//!
//! 글로벌(`~/.config/plugdeck/config.json`)과 프로젝트(`.plugdeck/config.json`)
//! 설정을 병합해서 사용한다. 프로젝트 설정이 우선한다.

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 설정 파일명
pub const PLUGDECK_CONFIG_FILE: &str = "config.json";

/// 기본 사용자 편집 설정 파일 (restore 시 삭제하지 않음)
pub const DEFAULT_PRESERVED_FILES: [&str; 2] = ["config.php", "config_local.php"];

// ============================================================================
// Plugdeck Config (통합)
// ============================================================================

/// Plugdeck 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlugdeckConfig {
    /// 호스트 정보
    #[serde(default)]
    pub host: HostConfig,

    /// 경로
    #[serde(default)]
    pub paths: PathsConfig,

    /// 분산 노드 설정
    #[serde(default)]
    pub node: NodeConfig,

    /// 원격 릴리스 저장소
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Hook 디스패치
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl PlugdeckConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) =
                global.load_optional::<PlugdeckConfig>(PLUGDECK_CONFIG_FILE)?
            {
                config.merge(global_config);
            }
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.load_optional::<PlugdeckConfig>(PLUGDECK_CONFIG_FILE)?
            {
                config.merge(project_config);
            }
        }

        Ok(config)
    }

    /// 특정 저장소에서만 로드
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        Ok(store
            .load_optional::<PlugdeckConfig>(PLUGDECK_CONFIG_FILE)?
            .unwrap_or_default())
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(PLUGDECK_CONFIG_FILE, self)
    }

    /// 프로젝트 설정 저장
    pub fn save_project(&self) -> Result<()> {
        let store = JsonStore::current_project()?;
        store.save(PLUGDECK_CONFIG_FILE, self)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: PlugdeckConfig) {
        self.host.merge(other.host);
        self.paths.merge(other.paths);
        self.node.merge(other.node);
        self.repository.merge(other.repository);
        self.dispatch.merge(other.dispatch);
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_host_version(mut self, version: impl Into<String>) -> Self {
        self.host.version = version.into();
        self
    }

    pub fn with_plugins_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.plugins_dir = dir.into();
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.data_dir = Some(dir.into());
        self
    }

    pub fn with_integrated(mut self, plugin: impl Into<String>) -> Self {
        self.host.integrated_plugins.push(plugin.into());
        self
    }

    pub fn with_node(mut self, poller_id: i64, mode: ConnectionMode) -> Self {
        self.node.poller_id = poller_id;
        self.node.connection_mode = mode;
        self
    }

    /// 통합(내장) 플러그인인지 확인
    pub fn is_integrated(&self, plugin: &str) -> bool {
        self.host.integrated_plugins.iter().any(|p| p == plugin)
    }
}

// ============================================================================
// Host Config
// ============================================================================

/// 호스트 애플리케이션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// 호스트 버전 (descriptor의 compat과 비교)
    #[serde(default = "default_host_version")]
    pub version: String,

    /// 호스트에 내장된 플러그인 디렉토리 이름
    #[serde(default)]
    pub integrated_plugins: Vec<String>,

    /// restore 시 보존하는 사용자 설정 파일
    #[serde(default = "default_preserved_files")]
    pub preserved_files: Vec<String>,

    /// 새 realm을 부여받는 관리자 사용자 ID
    #[serde(default = "default_admin_user")]
    pub admin_user_id: i64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: default_host_version(),
            integrated_plugins: Vec::new(),
            preserved_files: default_preserved_files(),
            admin_user_id: default_admin_user(),
        }
    }
}

impl HostConfig {
    fn merge(&mut self, other: HostConfig) {
        if other.version != default_host_version() {
            self.version = other.version;
        }
        for plugin in other.integrated_plugins {
            if !self.integrated_plugins.contains(&plugin) {
                self.integrated_plugins.push(plugin);
            }
        }
        if other.preserved_files != default_preserved_files() {
            self.preserved_files = other.preserved_files;
        }
        if other.admin_user_id != default_admin_user() {
            self.admin_user_id = other.admin_user_id;
        }
    }
}

// ============================================================================
// Paths Config
// ============================================================================

/// 경로 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    /// 플러그인 루트 디렉토리
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    /// 데이터 디렉토리 (SQLite). 없으면 플랫폼 기본값
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            plugins_dir: default_plugins_dir(),
            data_dir: None,
        }
    }
}

impl PathsConfig {
    fn merge(&mut self, other: PathsConfig) {
        if other.plugins_dir != default_plugins_dir() {
            self.plugins_dir = other.plugins_dir;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
    }

    /// 실제 데이터 디렉토리
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("plugdeck")
        })
    }
}

// ============================================================================
// Node Config
// ============================================================================

/// 분산 노드 연결 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// 메인 서버와 연결됨
    #[default]
    Online,
    /// 메인 서버와 끊김
    Offline,
    /// 재연결 후 복구 중
    Recovery,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionMode::Online => write!(f, "online"),
            ConnectionMode::Offline => write!(f, "offline"),
            ConnectionMode::Recovery => write!(f, "recovery"),
        }
    }
}

/// 노드 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// 현재 노드의 poller ID (1 = primary)
    #[serde(default = "default_poller_id")]
    pub poller_id: i64,

    /// 연결 모드
    #[serde(default)]
    pub connection_mode: ConnectionMode,

    /// 폴링 간격 (초)
    #[serde(default = "default_poller_interval")]
    pub poller_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            poller_id: default_poller_id(),
            connection_mode: ConnectionMode::default(),
            poller_interval_secs: default_poller_interval(),
        }
    }
}

impl NodeConfig {
    fn merge(&mut self, other: NodeConfig) {
        if other.poller_id != default_poller_id() {
            self.poller_id = other.poller_id;
        }
        if other.connection_mode != ConnectionMode::default() {
            self.connection_mode = other.connection_mode;
        }
        if other.poller_interval_secs != default_poller_interval() {
            self.poller_interval_secs = other.poller_interval_secs;
        }
    }

    /// primary 노드인지 확인
    pub fn is_primary(&self) -> bool {
        self.poller_id <= 1
    }
}

// ============================================================================
// Repository Config
// ============================================================================

/// 원격 릴리스 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    /// API base URL
    #[serde(default = "default_repo_url")]
    pub base_url: String,

    /// 계정 이름
    #[serde(default = "default_repo_user")]
    pub user: String,

    /// Bearer 토큰
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// 요청 타임아웃 (초)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_repo_url(),
            user: default_repo_user(),
            access_token: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl RepositoryConfig {
    fn merge(&mut self, other: RepositoryConfig) {
        if other.base_url != default_repo_url() {
            self.base_url = other.base_url;
        }
        if other.user != default_repo_user() {
            self.user = other.user;
        }
        if other.access_token.is_some() {
            self.access_token = other.access_token;
        }
        if other.timeout_secs != default_timeout() {
            self.timeout_secs = other.timeout_secs;
        }
    }
}

// ============================================================================
// Dispatch Config
// ============================================================================

/// Hook 디스패치 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// 누락 핸들러 경고 디바운스 TTL (초)
    #[serde(default = "default_warning_ttl")]
    pub warning_ttl_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            warning_ttl_secs: default_warning_ttl(),
        }
    }
}

impl DispatchConfig {
    fn merge(&mut self, other: DispatchConfig) {
        if other.warning_ttl_secs != default_warning_ttl() {
            self.warning_ttl_secs = other.warning_ttl_secs;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn default_host_version() -> String {
    "1.2.25".to_string()
}

fn default_preserved_files() -> Vec<String> {
    DEFAULT_PRESERVED_FILES.iter().map(|s| s.to_string()).collect()
}

fn default_admin_user() -> i64 {
    1
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_poller_id() -> i64 {
    1
}

fn default_poller_interval() -> u64 {
    300
}

fn default_repo_url() -> String {
    "https://api.github.com".to_string()
}

fn default_repo_user() -> String {
    "Cacti".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_warning_ttl() -> u64 {
    3600
}
