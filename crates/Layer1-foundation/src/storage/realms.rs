//! plugin_realms and realm grant operations

use super::db::Storage;
use super::plugins::delete_realms_tx;
use super::records::{split_files, RealmRecord, RealmRegistration, REALM_OFFSET};
use crate::{Error, Result};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

fn map_realm(row: &Row<'_>) -> rusqlite::Result<RealmRecord> {
    Ok(RealmRecord {
        id: row.get(0)?,
        plugin: row.get(1)?,
        file: row.get(2)?,
        display: row.get(3)?,
    })
}

fn file_set(file: &str) -> BTreeSet<String> {
    split_files(file).into_iter().collect()
}

impl Storage {
    /// Realm 등록
    ///
    /// 같은 플러그인의 realm 중 파일 목록이 겹치는 것을 찾는다.
    /// - 0개: 새로 생성하고 `admin_user`가 있으면 권한 부여
    /// - 1개: display/file 갱신
    /// - 여러 개: 첫 번째를 선택하고 경고. 파일 목록이 완전히 같은 나머지는
    ///   권한을 옮긴 뒤 삭제한다.
    pub fn register_realm(
        &self,
        plugin: &str,
        files: &str,
        display: &str,
        admin_user: Option<i64>,
    ) -> Result<RealmRegistration> {
        let wanted = file_set(files);
        if wanted.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Realm '{}' for plugin '{}' has no files",
                display, plugin
            )));
        }
        let normalized = wanted.iter().cloned().collect::<Vec<_>>().join(",");

        self.write_tx(|tx| {
            let candidates: Vec<RealmRecord> = {
                let mut stmt = tx
                    .prepare("SELECT id, plugin, file, display FROM plugin_realms WHERE plugin = ?1 ORDER BY id ASC")
                    .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;
                let rows = stmt
                    .query_map(params![plugin], map_realm)
                    .map_err(|e| Error::Storage(format!("Failed to query realms: {}", e)))?
                    .filter_map(|r| r.ok())
                    .filter(|realm| !file_set(&realm.file).is_disjoint(&wanted))
                    .collect();
                rows
            };

            match candidates.as_slice() {
                [] => {
                    tx.execute(
                        "INSERT INTO plugin_realms (plugin, file, display) VALUES (?1, ?2, ?3)",
                        params![plugin, normalized, display],
                    )
                    .map_err(|e| Error::Storage(format!("Failed to insert realm: {}", e)))?;
                    let realm_id = tx.last_insert_rowid() + REALM_OFFSET;

                    if let Some(user_id) = admin_user {
                        tx.execute(
                            "INSERT OR IGNORE INTO user_auth_realm (realm_id, user_id) VALUES (?1, ?2)",
                            params![realm_id, user_id],
                        )
                        .map_err(|e| Error::Storage(format!("Failed to grant realm: {}", e)))?;
                    }

                    Ok(RealmRegistration {
                        realm_id,
                        created: true,
                        ambiguous: false,
                        merged: Vec::new(),
                    })
                }
                [only] => {
                    tx.execute(
                        "UPDATE plugin_realms SET file = ?2, display = ?3 WHERE id = ?1",
                        params![only.id, normalized, display],
                    )
                    .map_err(|e| Error::Storage(format!("Failed to update realm: {}", e)))?;

                    Ok(RealmRegistration {
                        realm_id: only.realm_id(),
                        created: false,
                        ambiguous: false,
                        merged: Vec::new(),
                    })
                }
                [first, rest @ ..] => {
                    let realm_name = display;
                    warn!(
                        "Realm '{}' of plugin {} matches {} existing realms, using realm {}",
                        realm_name,
                        plugin,
                        candidates.len(),
                        first.id
                    );

                    let mut merged = Vec::new();
                    for dup in rest.iter().filter(|r| file_set(&r.file) == wanted) {
                        for table in ["user_auth_realm", "user_auth_group_realm"] {
                            let sql = format!(
                                "UPDATE OR IGNORE {} SET realm_id = ?1 WHERE realm_id = ?2",
                                table
                            );
                            tx.execute(&sql, params![first.realm_id(), dup.realm_id()])
                                .map_err(|e| Error::Storage(format!("Failed to move realm grants: {}", e)))?;
                            let sql = format!("DELETE FROM {} WHERE realm_id = ?1", table);
                            tx.execute(&sql, params![dup.realm_id()])
                                .map_err(|e| Error::Storage(format!("Failed to drop realm grants: {}", e)))?;
                        }
                        tx.execute("DELETE FROM plugin_realms WHERE id = ?1", params![dup.id])
                            .map_err(|e| Error::Storage(format!("Failed to merge realm: {}", e)))?;
                        merged.push(dup.id);
                    }

                    tx.execute(
                        "UPDATE plugin_realms SET file = ?2, display = ?3 WHERE id = ?1",
                        params![first.id, normalized, display],
                    )
                    .map_err(|e| Error::Storage(format!("Failed to update realm: {}", e)))?;

                    Ok(RealmRegistration {
                        realm_id: first.realm_id(),
                        created: false,
                        ambiguous: true,
                        merged,
                    })
                }
            }
        })
    }

    /// 플러그인의 realm과 권한 삭제
    pub fn remove_realms(&self, plugin: &str) -> Result<()> {
        self.write_tx(|tx| delete_realms_tx(tx, plugin))
    }

    /// 플러그인의 realm 목록
    pub fn realms_of_plugin(&self, plugin: &str) -> Result<Vec<RealmRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT id, plugin, file, display FROM plugin_realms WHERE plugin = ?1 ORDER BY id ASC")
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let realms = stmt
            .query_map(params![plugin], map_realm)
            .map_err(|e| Error::Storage(format!("Failed to query realms: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(realms)
    }

    /// 파일 이름 → realm ID 맵 (첫 realm 우선)
    pub fn realm_map(&self) -> Result<HashMap<String, i64>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT id, plugin, file, display FROM plugin_realms ORDER BY id ASC")
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let realms: Vec<RealmRecord> = stmt
            .query_map([], map_realm)
            .map_err(|e| Error::Storage(format!("Failed to query realms: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut map = HashMap::new();
        for realm in realms {
            for file in realm.files() {
                map.entry(file).or_insert(realm.realm_id());
            }
        }
        Ok(map)
    }

    /// 사용자에게 realm 권한 부여
    pub fn grant_realm(&self, user_id: i64, realm_id: i64) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR IGNORE INTO user_auth_realm (realm_id, user_id) VALUES (?1, ?2)",
            params![realm_id, user_id],
        )
        .map_err(|e| Error::Storage(format!("Failed to grant realm: {}", e)))?;
        Ok(())
    }

    /// 사용자가 파일(basename 기준)에 접근 가능한지 확인
    ///
    /// realm이 등록되지 않은 파일은 플러그인 realm 검사 대상이 아니므로 None.
    pub fn user_realm_auth(&self, user_id: i64, filename: &str) -> Result<Option<bool>> {
        let basename = filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(filename)
            .to_string();

        let realm_id = match self.realm_map()?.get(&basename) {
            Some(id) => *id,
            None => return Ok(None),
        };

        let conn = self.lock()?;
        let granted: Option<i64> = conn
            .query_row(
                r#"
                SELECT realm_id FROM user_auth_realm WHERE realm_id = ?1 AND user_id = ?2
                UNION
                SELECT gr.realm_id FROM user_auth_group_realm AS gr
                JOIN user_auth_group_members AS gm ON gm.group_id = gr.group_id
                WHERE gr.realm_id = ?1 AND gm.user_id = ?2
                LIMIT 1
                "#,
                params![realm_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to check realm grant: {}", e)))?;

        Ok(Some(granted.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_realm_grants_admin() {
        let storage = Storage::in_memory().unwrap();
        let reg = storage
            .register_realm("thold", "thold.php,thold_graph.php", "Configure Thresholds", Some(1))
            .unwrap();
        assert!(reg.created);
        assert_eq!(reg.realm_id, 1 + REALM_OFFSET);

        assert_eq!(storage.user_realm_auth(1, "plugins/thold/thold.php").unwrap(), Some(true));
        assert_eq!(storage.user_realm_auth(2, "thold.php").unwrap(), Some(false));
        assert_eq!(storage.user_realm_auth(1, "graph_view.php").unwrap(), None);
    }

    #[test]
    fn test_single_match_updates_in_place() {
        let storage = Storage::in_memory().unwrap();
        storage
            .register_realm("thold", "thold.php", "Thresholds", None)
            .unwrap();
        let reg = storage
            .register_realm("thold", "thold.php,thold_add.php", "Configure Thresholds", None)
            .unwrap();
        assert!(!reg.created);
        assert!(!reg.ambiguous);

        let realms = storage.realms_of_plugin("thold").unwrap();
        assert_eq!(realms.len(), 1);
        assert_eq!(realms[0].display, "Configure Thresholds");
        assert_eq!(realms[0].files(), vec!["thold.php", "thold_add.php"]);
    }

    #[test]
    fn test_ambiguous_match_picks_first_and_merges_identical() {
        let storage = Storage::in_memory().unwrap();
        // seed realms directly: two identical sets and one partial overlap
        {
            let conn = storage.lock().unwrap();
            conn.execute_batch(
                r#"
                INSERT INTO plugin_realms (id, plugin, file, display) VALUES (1, 'thold', 'thold.php', 'A');
                INSERT INTO plugin_realms (id, plugin, file, display) VALUES (2, 'thold', 'thold.php', 'B');
                INSERT INTO plugin_realms (id, plugin, file, display) VALUES (3, 'thold', 'thold.php,notify.php', 'C');
                INSERT INTO user_auth_realm (realm_id, user_id) VALUES (102, 7);
                "#,
            )
            .unwrap();
        }

        let reg = storage
            .register_realm("thold", "thold.php", "Thresholds", None)
            .unwrap();
        assert!(reg.ambiguous);
        assert_eq!(reg.realm_id, 101);
        assert_eq!(reg.merged, vec![2]);

        let ids: Vec<i64> = storage
            .realms_of_plugin("thold")
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(storage.user_realm_auth(7, "thold.php").unwrap(), Some(true));
    }

    #[test]
    fn test_remove_realms_drops_grants() {
        let storage = Storage::in_memory().unwrap();
        let reg = storage
            .register_realm("thold", "thold.php", "Thresholds", Some(1))
            .unwrap();
        storage.grant_realm(5, reg.realm_id).unwrap();

        storage.remove_realms("thold").unwrap();
        assert!(storage.realms_of_plugin("thold").unwrap().is_empty());
        assert!(storage.realm_map().unwrap().is_empty());

        let conn = storage.lock().unwrap();
        let grants: i64 = conn
            .query_row("SELECT COUNT(*) FROM user_auth_realm", [], |row| row.get(0))
            .unwrap();
        assert_eq!(grants, 0);
    }
}
