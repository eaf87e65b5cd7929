//! SQLite Storage for the plugin registry
//!
//! 플러그인 레지스트리의 권위 있는 상태:
//! - plugin_config: 플러그인 레코드 (id = 로드 순서)
//! - plugin_hooks: Hook 바인딩
//! - plugin_realms / user_auth_*: Realm 및 권한 부여
//! - plugin_db_changes: 플러그인이 만든 테이블/컬럼 로그 (uninstall 롤백용)
//! - plugin_archive: 디렉토리 스냅샷
//! - plugin_available: 원격 릴리스
//! - pollers: 클러스터 멤버와 heartbeat
//!
//! 설정 데이터는 JSON (storage/json/)에서 관리
//!
//! ## Migration System
//!
//! Database schema is versioned. Migrations run automatically on startup.
//! - Version 1: Initial schema
//! - Version 2: Add last_updated to plugin_config and the hook lookup index

use crate::{Error, Result};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Database file name inside the data directory
pub const DB_FILE: &str = "plugdeck.db";

/// How long a writer waits for another host process to release the lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage service for the plugin registry
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (or create) the registry database in `data_dir`
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

        let db_path = data_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // WAL lets host worker processes read while one of them writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| Error::Storage(format!("Failed to set busy timeout: {}", e)))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        storage.run_migrations()?;

        debug!("Opened plugin registry at {}", db_path.display());
        Ok(storage)
    }

    /// Create an in-memory storage (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        storage.run_migrations()?;

        Ok(storage)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// Run `f` inside an IMMEDIATE transaction.
    ///
    /// IMMEDIATE takes the database write lock up front, so two host processes
    /// running the same transition serialize instead of interleaving.
    pub(crate) fn write_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(value)
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    /// Initialize database schema (base tables)
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Plugin records; id is the load order
            CREATE TABLE IF NOT EXISTS plugin_config (
                id INTEGER PRIMARY KEY,
                directory TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '',
                webpage TEXT NOT NULL DEFAULT '',
                version TEXT NOT NULL DEFAULT '',
                status INTEGER NOT NULL DEFAULT 0
            );

            -- Hook bindings
            CREATE TABLE IF NOT EXISTS plugin_hooks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                hook TEXT NOT NULL,
                file TEXT NOT NULL DEFAULT '',
                function TEXT NOT NULL DEFAULT '',
                status INTEGER NOT NULL DEFAULT 0,
                UNIQUE (name, hook)
            );

            -- Realms contributed by plugins
            CREATE TABLE IF NOT EXISTS plugin_realms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plugin TEXT NOT NULL,
                file TEXT NOT NULL,
                display TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_plugin_realms_plugin
                ON plugin_realms(plugin);

            -- Realm grants (realm_id = plugin_realms.id + REALM_OFFSET)
            CREATE TABLE IF NOT EXISTS user_auth_realm (
                realm_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                PRIMARY KEY (realm_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS user_auth_group_realm (
                group_id INTEGER NOT NULL,
                realm_id INTEGER NOT NULL,
                PRIMARY KEY (group_id, realm_id)
            );

            CREATE TABLE IF NOT EXISTS user_auth_group_members (
                group_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                PRIMARY KEY (group_id, user_id)
            );

            -- Tables/columns created by plugins (uninstall rollback log)
            CREATE TABLE IF NOT EXISTS plugin_db_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plugin TEXT NOT NULL,
                table_name TEXT NOT NULL,
                column_name TEXT,
                method TEXT NOT NULL CHECK(method IN ('create', 'addcolumn'))
            );

            -- Directory snapshots
            CREATE TABLE IF NOT EXISTS plugin_archive (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plugin TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '',
                webpage TEXT NOT NULL DEFAULT '',
                version TEXT NOT NULL DEFAULT '',
                requires TEXT NOT NULL DEFAULT '',
                compat TEXT NOT NULL DEFAULT '',
                user_id INTEGER NOT NULL DEFAULT 0,
                dir_hash TEXT NOT NULL,
                archive BLOB NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_plugin_archive_plugin
                ON plugin_archive(plugin, id DESC);

            -- Releases fetched from the remote repository
            CREATE TABLE IF NOT EXISTS plugin_available (
                plugin TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL DEFAULT '',
                webpage TEXT NOT NULL DEFAULT '',
                tag_name TEXT NOT NULL,
                published_at TEXT NOT NULL DEFAULT '',
                compat TEXT NOT NULL DEFAULT '',
                requires TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                info BLOB,
                readme BLOB,
                changelog BLOB,
                archive BLOB,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (plugin, tag_name)
            );

            -- Cluster members
            CREATE TABLE IF NOT EXISTS pollers (
                id INTEGER PRIMARY KEY,
                hostname TEXT NOT NULL DEFAULT '',
                disabled INTEGER NOT NULL DEFAULT 0,
                last_seen INTEGER NOT NULL DEFAULT 0
            );

            -- Insert initial schema version if not exists
            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run all pending migrations
    fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Database schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running database migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self.lock()?;

        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => {
                    warn!("Unknown migration version: {}", version);
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

            info!("Applied migration to version {}", version);
        }

        Ok(())
    }

    /// Migration to version 2: registry change tracking
    fn migrate_v2(conn: &Connection) -> Result<()> {
        // Column may already exist on databases created by newer builds
        let _ = conn.execute(
            "ALTER TABLE plugin_config ADD COLUMN last_updated TEXT NOT NULL DEFAULT ''",
            [],
        );

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_plugin_hooks_hook ON plugin_hooks(hook, status)",
            [],
        )
        .map_err(|e| Error::Storage(format!("Failed to create hook index: {}", e)))?;

        Ok(())
    }
}

/// SQL 식별자 검증 + 인용
///
/// 플러그인이 넘긴 테이블/컬럼 이름을 DDL에 넣기 전에 사용한다.
pub fn quote_ident(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);

    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidInput(format!(
            "Invalid SQL identifier: '{}'",
            name
        )));
    }

    Ok(format!("\"{}\"", name))
}

/// 현재 시각 (RFC 3339)
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
