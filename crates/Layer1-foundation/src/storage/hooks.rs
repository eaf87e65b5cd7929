//! plugin_hooks operations

use super::db::Storage;
use super::records::{is_config_hook, HookBindingRecord};
use crate::{Error, Result};
use rusqlite::{params, OptionalExtension, Row};

fn map_hook(row: &Row<'_>) -> rusqlite::Result<HookBindingRecord> {
    Ok(HookBindingRecord {
        id: row.get(0)?,
        plugin: row.get(1)?,
        hook: row.get(2)?,
        file: row.get(3)?,
        function: row.get(4)?,
        enabled: row.get::<_, i32>(5)? == 1,
    })
}

impl Storage {
    /// Hook 바인딩 등록
    ///
    /// - 새 바인딩: 설정 Hook이거나 `enable`이면 활성
    /// - 기존 바인딩: `enable`이거나 플러그인에 활성 바인딩이 하나라도 있으면 활성 (자기 자신 포함)
    pub fn register_hook(
        &self,
        plugin: &str,
        hook: &str,
        file: &str,
        function: &str,
        enable: bool,
    ) -> Result<HookBindingRecord> {
        self.write_tx(|tx| {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM plugin_hooks WHERE name = ?1 AND hook = ?2",
                    params![plugin, hook],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| Error::Storage(format!("Failed to look up hook: {}", e)))?;

            let id = match existing {
                None => {
                    let status = (is_config_hook(hook) || enable) as i32;
                    tx.execute(
                        r#"
                        INSERT INTO plugin_hooks (name, hook, file, function, status)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        "#,
                        params![plugin, hook, file, function, status],
                    )
                    .map_err(|e| Error::Storage(format!("Failed to register hook: {}", e)))?;
                    tx.last_insert_rowid()
                }
                Some(id) => {
                    let enabled_count: i64 = tx
                        .query_row(
                            "SELECT COUNT(*) FROM plugin_hooks WHERE name = ?1 AND status = 1",
                            params![plugin],
                            |row| row.get(0),
                        )
                        .map_err(|e| Error::Storage(format!("Failed to count hooks: {}", e)))?;
                    let status = (enable || enabled_count > 0) as i32;
                    tx.execute(
                        "UPDATE plugin_hooks SET file = ?2, function = ?3, status = ?4 WHERE id = ?1",
                        params![id, file, function, status],
                    )
                    .map_err(|e| Error::Storage(format!("Failed to update hook: {}", e)))?;
                    id
                }
            };

            tx.query_row(
                "SELECT id, name, hook, file, function, status FROM plugin_hooks WHERE id = ?1",
                params![id],
                map_hook,
            )
            .map_err(|e| Error::Storage(format!("Failed to read hook: {}", e)))
        })
    }

    /// Hook 이름에 바인딩된 활성 핸들러 (소유 플러그인 로드 순서)
    pub fn hooks_for(&self, hook: &str) -> Result<Vec<HookBindingRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT ph.id, ph.name, ph.hook, ph.file, ph.function, ph.status
                FROM plugin_hooks AS ph
                LEFT JOIN plugin_config AS pc ON pc.directory = ph.name
                WHERE ph.status = 1 AND ph.hook = ?1
                ORDER BY pc.id ASC, ph.id ASC
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let hooks = stmt
            .query_map(params![hook], map_hook)
            .map_err(|e| Error::Storage(format!("Failed to query hooks: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(hooks)
    }

    /// 플러그인이 가진 모든 바인딩
    pub fn hooks_of_plugin(&self, plugin: &str) -> Result<Vec<HookBindingRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, name, hook, file, function, status
                FROM plugin_hooks WHERE name = ?1 ORDER BY id ASC
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let hooks = stmt
            .query_map(params![plugin], map_hook)
            .map_err(|e| Error::Storage(format!("Failed to query hooks: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(hooks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PluginUpsert;

    fn add_plugin(storage: &Storage, dir: &str) {
        storage
            .upsert_plugin(&PluginUpsert {
                directory: dir.to_string(),
                name: dir.to_string(),
                status: 1,
                ..Default::default()
            })
            .unwrap();
    }

    #[test]
    fn test_new_binding_status_rules() {
        let storage = Storage::in_memory().unwrap();

        let config = storage
            .register_hook("thold", "config_arrays", "setup.php", "thold_config_arrays", false)
            .unwrap();
        assert!(config.enabled);

        let page = storage
            .register_hook("thold", "page_head", "setup.php", "thold_page_head", false)
            .unwrap();
        assert!(!page.enabled);

        let forced = storage
            .register_hook("thold", "poller_bottom", "setup.php", "thold_poller_bottom", true)
            .unwrap();
        assert!(forced.enabled);
    }

    #[test]
    fn test_reregister_follows_other_bindings() {
        let storage = Storage::in_memory().unwrap();
        storage
            .register_hook("thold", "page_head", "setup.php", "thold_page_head", false)
            .unwrap();
        // config_arrays is enabled, so a re-registered binding follows it
        storage
            .register_hook("thold", "config_arrays", "setup.php", "thold_config_arrays", false)
            .unwrap();

        let again = storage
            .register_hook("thold", "page_head", "includes/hooks.php", "thold_page_head", false)
            .unwrap();
        assert!(again.enabled);
        assert_eq!(again.file, "includes/hooks.php");
        assert_eq!(storage.hooks_of_plugin("thold").unwrap().len(), 2);
    }

    #[test]
    fn test_reregister_keeps_sole_active_binding() {
        let storage = Storage::in_memory().unwrap();
        add_plugin(&storage, "thold");
        storage
            .register_hook("thold", "page_head", "setup.php", "thold_page_head", true)
            .unwrap();
        storage.activate_plugin("thold", &[1], 1).unwrap();

        let again = storage
            .register_hook("thold", "page_head", "setup.php", "thold_page_head", false)
            .unwrap();
        assert!(again.enabled);
        assert_eq!(storage.hooks_for("page_head").unwrap().len(), 1);
    }

    #[test]
    fn test_hooks_for_orders_by_load_order() {
        let storage = Storage::in_memory().unwrap();
        add_plugin(&storage, "monitor");
        add_plugin(&storage, "thold");

        storage
            .register_hook("thold", "page_head", "setup.php", "thold_page_head", true)
            .unwrap();
        storage
            .register_hook("monitor", "page_head", "setup.php", "monitor_page_head", true)
            .unwrap();
        storage
            .register_hook("syslog", "page_head", "setup.php", "syslog_page_head", false)
            .unwrap();

        let hooks = storage.hooks_for("page_head").unwrap();
        let owners: Vec<&str> = hooks.iter().map(|h| h.plugin.as_str()).collect();
        assert_eq!(owners, vec!["monitor", "thold"]);

        storage.reorder_plugins(&[2, 1]).unwrap();
        let hooks = storage.hooks_for("page_head").unwrap();
        assert_eq!(hooks[0].plugin, "thold");
    }

    #[test]
    fn test_deactivate_keeps_config_hooks() {
        let storage = Storage::in_memory().unwrap();
        add_plugin(&storage, "thold");
        storage
            .register_hook("thold", "config_settings", "setup.php", "thold_config_settings", true)
            .unwrap();
        storage
            .register_hook("thold", "page_head", "setup.php", "thold_page_head", true)
            .unwrap();

        storage.deactivate_plugin("thold", &[1], 4, true).unwrap();
        let hooks = storage.hooks_of_plugin("thold").unwrap();
        let enabled: Vec<&str> = hooks
            .iter()
            .filter(|h| h.enabled)
            .map(|h| h.hook.as_str())
            .collect();
        assert_eq!(enabled, vec!["config_settings"]);
        assert_eq!(storage.plugin_status("thold").unwrap(), Some(4));

        storage.deactivate_plugin("thold", &[4], 7, false).unwrap();
        assert!(storage.hooks_of_plugin("thold").unwrap().iter().all(|h| !h.enabled));

        storage.activate_plugin("thold", &[7], 1).unwrap();
        assert!(storage.hooks_of_plugin("thold").unwrap().iter().all(|h| h.enabled));
    }
}
