//! # plugdeck-foundation
//!
//! Foundation layer for Plugdeck:
//! - Error: 중앙 에러 타입
//! - Config: 통합 설정 (PlugdeckConfig)
//! - Storage: SQLite (플러그인 레지스트리), JsonStore (설정)
//! - log_target: 구조화 로그 서브시스템 태그
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  plugdeck-core (Lifecycle / Hook Dispatcher)            │
//! │                     │                                   │
//! │                     ▼                                   │
//! │  Storage (SQLite, IMMEDIATE 트랜잭션)                    │
//! │  ├── plugin_config / plugin_hooks / plugin_realms       │
//! │  ├── plugin_db_changes / plugin_archive                 │
//! │  └── plugin_available / pollers                         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod log_target;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    ConnectionMode, DispatchConfig, HostConfig, NodeConfig, PathsConfig, PlugdeckConfig,
    RepositoryConfig, DEFAULT_PRESERVED_FILES, PLUGDECK_CONFIG_FILE,
};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{
    // JSON (설정)
    JsonStore,
    // SQLite (레지스트리)
    is_config_hook,
    ArchiveRecord,
    ArchiveSummary,
    AvailableRelease,
    HookBindingRecord,
    NewArchive,
    PluginRecord,
    PluginUpsert,
    PollerRecord,
    RealmRecord,
    RealmRegistration,
    SchemaChangeMethod,
    SchemaChangeRecord,
    SchemaRollback,
    Storage,
    CONFIG_HOOKS,
    REALM_OFFSET,
};
