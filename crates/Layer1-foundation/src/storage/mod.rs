//! Storage module for Plugdeck
//!
//! - `db`: SQLite - 플러그인 레지스트리 (권위 있는 상태)
//! - `json`: JSON - 설정 파일 저장/로드

mod archive;
mod db;
mod hooks;
mod json;
mod plugins;
mod pollers;
mod realms;
mod records;
mod schema_changes;

// SQLite Storage (레지스트리)
pub use db::{quote_ident, Storage, DB_FILE};
pub use records::{
    is_config_hook, ArchiveRecord, ArchiveSummary, AvailableRelease, HookBindingRecord,
    NewArchive, PluginRecord, PluginUpsert, PollerRecord, RealmRecord, RealmRegistration,
    SchemaChangeMethod, SchemaChangeRecord, CONFIG_HOOKS, REALM_OFFSET,
};
pub use schema_changes::SchemaRollback;

// JSON Storage (설정)
pub use json::JsonStore;
