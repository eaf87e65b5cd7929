//! Registry records
//!
//! 상태 값은 정수 코드 그대로 저장한다. 의미 해석(태그드 유니온)은 core의
//! `PluginStatus`가 담당한다.

use serde::{Deserialize, Serialize};

/// Realm ID 오프셋 (호스트 내장 realm과 충돌 방지)
pub const REALM_OFFSET: i64 = 100;

/// 플러그인 비활성화 중에도 유지되는 설정 Hook
pub const CONFIG_HOOKS: [&str; 3] = ["config_settings", "config_arrays", "config_form"];

/// 설정 Hook 여부
pub fn is_config_hook(hook: &str) -> bool {
    CONFIG_HOOKS.contains(&hook)
}

// ============================================================================
// Plugin
// ============================================================================

/// plugin_config 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    /// 로드 순서
    pub id: i64,
    pub directory: String,
    pub name: String,
    pub author: String,
    pub webpage: String,
    pub version: String,
    pub status: i32,
    pub last_updated: String,
}

/// upsert 입력
#[derive(Debug, Clone, Default)]
pub struct PluginUpsert {
    pub directory: String,
    pub name: String,
    pub author: String,
    pub webpage: String,
    pub version: String,
    pub status: i32,
}

// ============================================================================
// Hook
// ============================================================================

/// plugin_hooks 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookBindingRecord {
    pub id: i64,
    /// 소유 플러그인 디렉토리
    pub plugin: String,
    pub hook: String,
    pub file: String,
    pub function: String,
    pub enabled: bool,
}

// ============================================================================
// Realm
// ============================================================================

/// plugin_realms 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmRecord {
    pub id: i64,
    pub plugin: String,
    /// 쉼표로 구분된 파일 목록
    pub file: String,
    pub display: String,
}

impl RealmRecord {
    /// 접근 제어에 노출되는 realm ID
    pub fn realm_id(&self) -> i64 {
        self.id + REALM_OFFSET
    }

    pub fn files(&self) -> Vec<String> {
        split_files(&self.file)
    }
}

/// realm 등록 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmRegistration {
    /// 접근 제어 realm ID (id + REALM_OFFSET)
    pub realm_id: i64,
    /// 새로 생성되었는지
    pub created: bool,
    /// 여러 realm이 매칭되어 첫 번째를 선택했는지
    pub ambiguous: bool,
    /// 병합되어 삭제된 plugin_realms.id
    pub merged: Vec<i64>,
}

pub(crate) fn split_files(file: &str) -> Vec<String> {
    file.split(',')
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(|f| f.to_string())
        .collect()
}

// ============================================================================
// Schema changes
// ============================================================================

/// 플러그인 스키마 변경 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaChangeMethod {
    Create,
    AddColumn,
}

impl SchemaChangeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaChangeMethod::Create => "create",
            SchemaChangeMethod::AddColumn => "addcolumn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(SchemaChangeMethod::Create),
            "addcolumn" => Some(SchemaChangeMethod::AddColumn),
            _ => None,
        }
    }
}

/// plugin_db_changes 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChangeRecord {
    pub id: i64,
    pub plugin: String,
    pub table_name: String,
    pub column_name: Option<String>,
    pub method: SchemaChangeMethod,
}

// ============================================================================
// Archive
// ============================================================================

/// 새 아카이브
#[derive(Debug, Clone, Default)]
pub struct NewArchive {
    pub plugin: String,
    pub description: String,
    pub author: String,
    pub webpage: String,
    pub version: String,
    pub requires: String,
    pub compat: String,
    pub user_id: i64,
    pub dir_hash: String,
    pub archive: Vec<u8>,
}

/// plugin_archive 레코드
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub id: i64,
    pub plugin: String,
    pub description: String,
    pub author: String,
    pub webpage: String,
    pub version: String,
    pub requires: String,
    pub compat: String,
    pub user_id: i64,
    pub dir_hash: String,
    pub archive: Vec<u8>,
    pub last_updated: String,
}

/// 아카이브 목록 항목 (blob 제외)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub id: i64,
    pub plugin: String,
    pub version: String,
    pub dir_hash: String,
    pub size: i64,
    pub last_updated: String,
}

// ============================================================================
// Available release
// ============================================================================

/// plugin_available 레코드
#[derive(Debug, Clone, Default)]
pub struct AvailableRelease {
    pub plugin: String,
    pub description: String,
    pub author: String,
    pub webpage: String,
    pub tag_name: String,
    pub published_at: String,
    pub compat: String,
    pub requires: String,
    pub body: String,
    pub info: Option<Vec<u8>>,
    pub readme: Option<Vec<u8>>,
    pub changelog: Option<Vec<u8>>,
    pub archive: Option<Vec<u8>>,
    pub last_updated: String,
}

// ============================================================================
// Poller
// ============================================================================

/// pollers 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerRecord {
    pub id: i64,
    pub hostname: String,
    pub disabled: bool,
    /// 마지막 heartbeat (unix seconds)
    pub last_seen: i64,
}
