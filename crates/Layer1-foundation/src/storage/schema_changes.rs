//! plugin_db_changes operations
//!
//! 플러그인이 설치 중에 만든 테이블/컬럼을 기록하고, uninstall 시 롤백한다.

use super::db::{quote_ident, Storage};
use super::records::{SchemaChangeMethod, SchemaChangeRecord};
use crate::{Error, Result};
use rusqlite::params;
use tracing::{debug, info};

/// 롤백 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRollback {
    /// 삭제된 테이블
    pub dropped_tables: Vec<String>,
    /// 삭제된 (테이블, 컬럼)
    pub dropped_columns: Vec<(String, String)>,
}

impl Storage {
    /// 플러그인 테이블 생성 + 로그
    ///
    /// `columns_sql`은 괄호 안의 컬럼 정의 부분이다.
    pub fn create_plugin_table(&self, plugin: &str, table: &str, columns_sql: &str) -> Result<()> {
        let quoted = quote_ident(table)?;

        self.write_tx(|tx| {
            tx.execute_batch(&format!("CREATE TABLE IF NOT EXISTS {} ({})", quoted, columns_sql))
                .map_err(|e| Error::Storage(format!("Failed to create table {}: {}", table, e)))?;
            tx.execute(
                "INSERT INTO plugin_db_changes (plugin, table_name, column_name, method) VALUES (?1, ?2, NULL, ?3)",
                params![plugin, table, SchemaChangeMethod::Create.as_str()],
            )
            .map_err(|e| Error::Storage(format!("Failed to log schema change: {}", e)))?;
            Ok(())
        })?;

        debug!("Plugin {} created table {}", plugin, table);
        Ok(())
    }

    /// 기존 테이블에 컬럼 추가 + 로그
    pub fn add_plugin_column(
        &self,
        plugin: &str,
        table: &str,
        column: &str,
        definition: &str,
    ) -> Result<()> {
        let quoted_table = quote_ident(table)?;
        let quoted_column = quote_ident(column)?;

        self.write_tx(|tx| {
            tx.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quoted_table, quoted_column, definition
            ))
            .map_err(|e| Error::Storage(format!("Failed to add column {}.{}: {}", table, column, e)))?;
            tx.execute(
                "INSERT INTO plugin_db_changes (plugin, table_name, column_name, method) VALUES (?1, ?2, ?3, ?4)",
                params![plugin, table, column, SchemaChangeMethod::AddColumn.as_str()],
            )
            .map_err(|e| Error::Storage(format!("Failed to log schema change: {}", e)))?;
            Ok(())
        })?;

        debug!("Plugin {} added column {}.{}", plugin, table, column);
        Ok(())
    }

    /// 플러그인의 스키마 변경 로그
    pub fn schema_changes_of(&self, plugin: &str) -> Result<Vec<SchemaChangeRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, plugin, table_name, column_name, method
                FROM plugin_db_changes WHERE plugin = ?1 ORDER BY id ASC
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let changes = stmt
            .query_map(params![plugin], |row| {
                let method: String = row.get(4)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    method,
                ))
            })
            .map_err(|e| Error::Storage(format!("Failed to query schema changes: {}", e)))?
            .filter_map(|r| r.ok())
            .filter_map(|(id, plugin, table_name, column_name, method)| {
                SchemaChangeMethod::parse(&method).map(|method| SchemaChangeRecord {
                    id,
                    plugin,
                    table_name,
                    column_name,
                    method,
                })
            })
            .collect();

        Ok(changes)
    }

    /// 로그를 실행하지 않고 버린다 (removeTables = false)
    pub fn discard_schema_changes(&self, plugin: &str) -> Result<usize> {
        let conn = self.lock()?;

        let removed = conn
            .execute("DELETE FROM plugin_db_changes WHERE plugin = ?1", params![plugin])
            .map_err(|e| Error::Storage(format!("Failed to discard schema changes: {}", e)))?;
        Ok(removed)
    }

    /// 로그된 변경을 롤백하고 로그 삭제 (removeTables = true)
    ///
    /// 추가된 컬럼을 먼저 제거한 뒤 생성된 테이블을 삭제한다.
    pub fn rollback_schema_changes(&self, plugin: &str) -> Result<SchemaRollback> {
        let changes = self.schema_changes_of(plugin)?;

        let rollback = self.write_tx(|tx| {
            let mut rollback = SchemaRollback::default();

            for change in changes.iter().rev() {
                if change.method != SchemaChangeMethod::AddColumn {
                    continue;
                }
                let Some(column) = change.column_name.as_deref() else {
                    continue;
                };
                let table_exists: i64 = tx
                    .query_row(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                        params![change.table_name],
                        |row| row.get(0),
                    )
                    .map_err(|e| Error::Storage(format!("Failed to check table: {}", e)))?;
                if table_exists == 0 {
                    continue;
                }
                tx.execute_batch(&format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    quote_ident(&change.table_name)?,
                    quote_ident(column)?
                ))
                .map_err(|e| {
                    Error::Storage(format!(
                        "Failed to drop column {}.{}: {}",
                        change.table_name, column, e
                    ))
                })?;
                rollback
                    .dropped_columns
                    .push((change.table_name.clone(), column.to_string()));
            }

            for change in changes.iter().rev() {
                if change.method != SchemaChangeMethod::Create {
                    continue;
                }
                tx.execute_batch(&format!(
                    "DROP TABLE IF EXISTS {}",
                    quote_ident(&change.table_name)?
                ))
                .map_err(|e| {
                    Error::Storage(format!("Failed to drop table {}: {}", change.table_name, e))
                })?;
                rollback.dropped_tables.push(change.table_name.clone());
            }

            tx.execute("DELETE FROM plugin_db_changes WHERE plugin = ?1", params![plugin])
                .map_err(|e| Error::Storage(format!("Failed to clear schema changes: {}", e)))?;

            Ok(rollback)
        })?;

        info!(
            "Rolled back schema for {}: {} tables, {} columns",
            plugin,
            rollback.dropped_tables.len(),
            rollback.dropped_columns.len()
        );
        Ok(rollback)
    }

    /// 테이블 존재 여부
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to check table: {}", e)))?;
        Ok(count > 0)
    }

    /// 컬럼 존재 여부
    pub fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
                params![table, column],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to check column: {}", e)))?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(storage: &Storage) {
        storage
            .create_plugin_table("thold", "thold_data", "id INTEGER PRIMARY KEY, name TEXT")
            .unwrap();
        storage
            .add_plugin_column("thold", "pollers", "thold_enabled", "INTEGER DEFAULT 0")
            .unwrap();
    }

    #[test]
    fn test_changes_are_logged() {
        let storage = Storage::in_memory().unwrap();
        seed(&storage);

        let changes = storage.schema_changes_of("thold").unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].method, SchemaChangeMethod::Create);
        assert_eq!(changes[1].column_name.as_deref(), Some("thold_enabled"));
        assert!(storage.table_exists("thold_data").unwrap());
        assert!(storage.column_exists("pollers", "thold_enabled").unwrap());
    }

    #[test]
    fn test_discard_keeps_schema() {
        let storage = Storage::in_memory().unwrap();
        seed(&storage);

        assert_eq!(storage.discard_schema_changes("thold").unwrap(), 2);
        assert!(storage.schema_changes_of("thold").unwrap().is_empty());
        assert!(storage.table_exists("thold_data").unwrap());
        assert!(storage.column_exists("pollers", "thold_enabled").unwrap());
    }

    #[test]
    fn test_rollback_drops_schema() {
        let storage = Storage::in_memory().unwrap();
        seed(&storage);

        let rollback = storage.rollback_schema_changes("thold").unwrap();
        assert_eq!(rollback.dropped_tables, vec!["thold_data"]);
        assert_eq!(
            rollback.dropped_columns,
            vec![("pollers".to_string(), "thold_enabled".to_string())]
        );
        assert!(!storage.table_exists("thold_data").unwrap());
        assert!(!storage.column_exists("pollers", "thold_enabled").unwrap());
        assert!(storage.schema_changes_of("thold").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_identifier() {
        let storage = Storage::in_memory().unwrap();
        let result = storage.create_plugin_table("thold", "x; DROP TABLE pollers", "id INTEGER");
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
