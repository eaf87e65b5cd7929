//! plugin_config operations

use super::db::{now, Storage};
use super::records::{is_config_hook, PluginRecord, PluginUpsert, REALM_OFFSET};
use crate::{Error, Result};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use tracing::debug;

const PLUGIN_COLUMNS: &str =
    "id, directory, name, author, webpage, version, status, COALESCE(last_updated, '')";

fn map_plugin(row: &Row<'_>) -> rusqlite::Result<PluginRecord> {
    Ok(PluginRecord {
        id: row.get(0)?,
        directory: row.get(1)?,
        name: row.get(2)?,
        author: row.get(3)?,
        webpage: row.get(4)?,
        version: row.get(5)?,
        status: row.get(6)?,
        last_updated: row.get(7)?,
    })
}

impl Storage {
    // ========================================================================
    // Lookups
    // ========================================================================

    /// 디렉토리로 플러그인 조회
    pub fn get_plugin(&self, directory: &str) -> Result<Option<PluginRecord>> {
        let conn = self.lock()?;

        conn.query_row(
            &format!("SELECT {} FROM plugin_config WHERE directory = ?1", PLUGIN_COLUMNS),
            params![directory],
            map_plugin,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get plugin: {}", e)))
    }

    /// 로드 순서대로 전체 플러그인
    pub fn list_plugins(&self) -> Result<Vec<PluginRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM plugin_config ORDER BY id ASC",
                PLUGIN_COLUMNS
            ))
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let plugins = stmt
            .query_map([], map_plugin)
            .map_err(|e| Error::Storage(format!("Failed to query plugins: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(plugins)
    }

    /// 상태 코드 조회 (미등록이면 None)
    pub fn plugin_status(&self, directory: &str) -> Result<Option<i32>> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT status FROM plugin_config WHERE directory = ?1",
            params![directory],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get plugin status: {}", e)))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// 디렉토리 기준 upsert. 기존 레코드의 id(로드 순서)는 유지된다.
    pub fn upsert_plugin(&self, plugin: &PluginUpsert) -> Result<i64> {
        self.write_tx(|tx| upsert_tx(tx, plugin))
    }

    /// 설치 시작: 현재 상태가 `blocked` 중 하나가 아닐 때만 레코드를 기록한다.
    ///
    /// 검사와 기록이 한 트랜잭션이라 다른 프로세스가 이미 설치한 레코드를
    /// 덮어쓰지 않는다. 막혔으면 None.
    pub fn claim_plugin(&self, plugin: &PluginUpsert, blocked: &[i32]) -> Result<Option<i64>> {
        self.write_tx(|tx| {
            let current: Option<i32> = tx
                .query_row(
                    "SELECT status FROM plugin_config WHERE directory = ?1",
                    params![plugin.directory],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| Error::Storage(format!("Failed to get plugin status: {}", e)))?;

            if current.is_some_and(|code| blocked.contains(&code)) {
                return Ok(None);
            }
            upsert_tx(tx, plugin).map(Some)
        })
    }

    /// 메타데이터 갱신 (upgrade 등록)
    pub fn update_plugin_info(
        &self,
        directory: &str,
        name: &str,
        author: &str,
        webpage: &str,
        version: &str,
    ) -> Result<bool> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                r#"
                UPDATE plugin_config
                SET name = ?2, author = ?3, webpage = ?4, version = ?5, last_updated = ?6
                WHERE directory = ?1
                "#,
                params![directory, name, author, webpage, version, now()],
            )
            .map_err(|e| Error::Storage(format!("Failed to update plugin: {}", e)))?;

        Ok(changed > 0)
    }

    /// 상태 강제 설정
    pub fn set_plugin_status(&self, directory: &str, status: i32) -> Result<bool> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                "UPDATE plugin_config SET status = ?2, last_updated = ?3 WHERE directory = ?1",
                params![directory, status, now()],
            )
            .map_err(|e| Error::Storage(format!("Failed to set plugin status: {}", e)))?;

        Ok(changed > 0)
    }

    /// 활성화: 모든 Hook 활성화 + 상태 변경 (한 트랜잭션)
    ///
    /// 현재 상태가 `from` 중 하나일 때만 적용한다. 아니면 아무것도 바꾸지 않고 false.
    pub fn activate_plugin(&self, directory: &str, from: &[i32], status: i32) -> Result<bool> {
        self.write_tx(|tx| {
            if !transition_status_tx(tx, directory, from, status)? {
                return Ok(false);
            }
            tx.execute(
                "UPDATE plugin_hooks SET status = 1 WHERE name = ?1",
                params![directory],
            )
            .map_err(|e| Error::Storage(format!("Failed to enable hooks: {}", e)))?;
            Ok(true)
        })
    }

    /// 비활성화: 설정 Hook을 제외한 Hook 비활성화 + 상태 변경 (한 트랜잭션)
    ///
    /// `keep_config_hooks`가 false면 설정 Hook까지 모두 끈다. 상태 조건은
    /// `activate_plugin`과 같다.
    pub fn deactivate_plugin(
        &self,
        directory: &str,
        from: &[i32],
        status: i32,
        keep_config_hooks: bool,
    ) -> Result<bool> {
        self.write_tx(|tx| {
            if !transition_status_tx(tx, directory, from, status)? {
                return Ok(false);
            }

            let hooks: Vec<(i64, String)> = {
                let mut stmt = tx
                    .prepare("SELECT id, hook FROM plugin_hooks WHERE name = ?1")
                    .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;
                let rows = stmt
                    .query_map(params![directory], |row| Ok((row.get(0)?, row.get(1)?)))
                    .map_err(|e| Error::Storage(format!("Failed to query hooks: {}", e)))?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            };

            for (id, hook) in hooks {
                let enabled = keep_config_hooks && is_config_hook(&hook);
                tx.execute(
                    "UPDATE plugin_hooks SET status = ?2 WHERE id = ?1",
                    params![id, enabled as i32],
                )
                .map_err(|e| Error::Storage(format!("Failed to disable hook: {}", e)))?;
            }

            Ok(true)
        })
    }

    /// 플러그인 레코드 삭제 + Hook/Realm/권한 정리 (한 트랜잭션)
    pub fn remove_plugin(&self, directory: &str) -> Result<()> {
        self.write_tx(|tx| {
            tx.execute("DELETE FROM plugin_hooks WHERE name = ?1", params![directory])
                .map_err(|e| Error::Storage(format!("Failed to remove hooks: {}", e)))?;
            delete_realms_tx(tx, directory)?;
            tx.execute(
                "DELETE FROM plugin_config WHERE directory = ?1",
                params![directory],
            )
            .map_err(|e| Error::Storage(format!("Failed to delete plugin: {}", e)))?;
            Ok(())
        })?;

        debug!("Removed registry rows for plugin {}", directory);
        Ok(())
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// 외부에서 지정한 순서로 id를 1..N 재배열.
    ///
    /// 알 수 없는 id는 무시한다. 목록에 없던 레코드는 범위 밖으로 밀려난 뒤
    /// Hook 바인딩, Realm과 함께 삭제된다. 반환값은 (이전 id, 새 id) 목록.
    pub fn reorder_plugins(&self, order: &[i64]) -> Result<Vec<(i64, i64)>> {
        self.write_tx(|tx| {
            // 1. 모든 id를 음수로 이동 (충돌 없는 임시 영역)
            tx.execute("UPDATE plugin_config SET id = -id WHERE id > 0", [])
                .map_err(|e| Error::Storage(format!("Failed to stage reorder: {}", e)))?;

            // 2. 지정 순서대로 1..N 배정
            let mut mapping = Vec::new();
            let mut seq = 1i64;
            for &old in order {
                if old <= 0 || mapping.iter().any(|(o, _)| *o == old) {
                    continue;
                }
                let changed = tx
                    .execute(
                        "UPDATE plugin_config SET id = ?1 WHERE id = ?2",
                        params![seq, -old],
                    )
                    .map_err(|e| Error::Storage(format!("Failed to resequence plugin: {}", e)))?;
                if changed > 0 {
                    mapping.push((old, seq));
                    seq += 1;
                }
            }

            // 3. 범위 밖 레코드 정리 (Hook/Realm/권한 포함)
            let stale: Vec<String> = {
                let mut stmt = tx
                    .prepare("SELECT directory FROM plugin_config WHERE id < 1 OR id >= ?1")
                    .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;
                let rows = stmt
                    .query_map(params![seq], |row| row.get(0))
                    .map_err(|e| Error::Storage(format!("Failed to query stale plugins: {}", e)))?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            };
            for directory in &stale {
                tx.execute("DELETE FROM plugin_hooks WHERE name = ?1", params![directory])
                    .map_err(|e| Error::Storage(format!("Failed to remove hooks: {}", e)))?;
                delete_realms_tx(tx, directory)?;
            }
            tx.execute(
                "DELETE FROM plugin_config WHERE id < 1 OR id >= ?1",
                params![seq],
            )
            .map_err(|e| Error::Storage(format!("Failed to clean stale plugins: {}", e)))?;
            if !stale.is_empty() {
                debug!("Reorder removed stale plugins: {}", stale.join(", "));
            }

            Ok(mapping)
        })
    }

    /// 바로 앞 플러그인과 자리 바꾸기. 이미 처음이면 false
    pub fn move_plugin_up(&self, directory: &str) -> Result<bool> {
        self.swap_with_neighbor(directory, true)
    }

    /// 바로 뒤 플러그인과 자리 바꾸기. 이미 마지막이면 false
    pub fn move_plugin_down(&self, directory: &str) -> Result<bool> {
        self.swap_with_neighbor(directory, false)
    }

    fn swap_with_neighbor(&self, directory: &str, up: bool) -> Result<bool> {
        self.write_tx(|tx| {
            let id: i64 = tx
                .query_row(
                    "SELECT id FROM plugin_config WHERE directory = ?1",
                    params![directory],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| Error::Storage(format!("Failed to get plugin id: {}", e)))?
                .ok_or_else(|| Error::NotFound(format!("Plugin '{}'", directory)))?;

            let neighbor_sql = if up {
                "SELECT MAX(id) FROM plugin_config WHERE id < ?1"
            } else {
                "SELECT MIN(id) FROM plugin_config WHERE id > ?1"
            };
            let neighbor: Option<i64> = tx
                .query_row(neighbor_sql, params![id], |row| row.get(0))
                .map_err(|e| Error::Storage(format!("Failed to find neighbor: {}", e)))?;

            match neighbor {
                Some(other) => {
                    swap_ids_tx(tx, id, other)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }
}

// ============================================================================
// Transaction helpers
// ============================================================================

fn upsert_tx(tx: &Transaction<'_>, plugin: &PluginUpsert) -> Result<i64> {
    tx.execute(
        r#"
        INSERT INTO plugin_config (directory, name, author, webpage, version, status, last_updated)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(directory) DO UPDATE SET
            name = excluded.name,
            author = excluded.author,
            webpage = excluded.webpage,
            version = excluded.version,
            status = excluded.status,
            last_updated = excluded.last_updated
        "#,
        params![
            plugin.directory,
            plugin.name,
            plugin.author,
            plugin.webpage,
            plugin.version,
            plugin.status,
            now(),
        ],
    )
    .map_err(|e| Error::Storage(format!("Failed to upsert plugin: {}", e)))?;

    tx.query_row(
        "SELECT id FROM plugin_config WHERE directory = ?1",
        params![plugin.directory],
        |row| row.get(0),
    )
    .map_err(|e| Error::Storage(format!("Failed to read plugin id: {}", e)))
}

/// 조건부 상태 변경. 바뀐 행이 없으면 false
fn transition_status_tx(
    tx: &Transaction<'_>,
    directory: &str,
    from: &[i32],
    to: i32,
) -> Result<bool> {
    let sql = format!(
        "UPDATE plugin_config SET status = ?1, last_updated = ?2 WHERE directory = ?3 AND status IN ({})",
        numbered_placeholders(4, from.len())
    );

    let mut values: Vec<rusqlite::types::Value> =
        vec![to.into(), now().into(), directory.to_string().into()];
    values.extend(from.iter().map(|s| rusqlite::types::Value::from(*s)));

    let changed = tx
        .execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| Error::Storage(format!("Failed to transition plugin status: {}", e)))?;

    Ok(changed > 0)
}

/// 세 단계 id 교환: a → 임시(MAX+1), b → a, 임시 → b
fn swap_ids_tx(tx: &Transaction<'_>, a: i64, b: i64) -> Result<()> {
    let temp: i64 = tx
        .query_row("SELECT MAX(id) + 1 FROM plugin_config", [], |row| row.get(0))
        .map_err(|e| Error::Storage(format!("Failed to allocate temporary id: {}", e)))?;

    for (from, to) in [(a, temp), (b, a), (temp, b)] {
        tx.execute(
            "UPDATE plugin_config SET id = ?1 WHERE id = ?2",
            params![to, from],
        )
        .map_err(|e| Error::Storage(format!("Failed to swap plugin ids: {}", e)))?;
    }
    Ok(())
}

pub(crate) fn delete_realms_tx(tx: &Transaction<'_>, plugin: &str) -> Result<()> {
    let ids: Vec<i64> = {
        let mut stmt = tx
            .prepare("SELECT id FROM plugin_realms WHERE plugin = ?1")
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map(params![plugin], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("Failed to query realms: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();
        rows
    };

    for id in ids {
        let realm_id = id + REALM_OFFSET;
        tx.execute(
            "DELETE FROM user_auth_realm WHERE realm_id = ?1",
            params![realm_id],
        )
        .map_err(|e| Error::Storage(format!("Failed to remove realm grants: {}", e)))?;
        tx.execute(
            "DELETE FROM user_auth_group_realm WHERE realm_id = ?1",
            params![realm_id],
        )
        .map_err(|e| Error::Storage(format!("Failed to remove group realm grants: {}", e)))?;
    }

    tx.execute("DELETE FROM plugin_realms WHERE plugin = ?1", params![plugin])
        .map_err(|e| Error::Storage(format!("Failed to remove realms: {}", e)))?;
    Ok(())
}

fn numbered_placeholders(start: usize, n: usize) -> String {
    if n == 0 {
        return "NULL".to_string();
    }
    (start..start + n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
