//! pollers operations (cluster membership)

use super::db::Storage;
use super::records::PollerRecord;
use crate::{Error, Result};
use rusqlite::params;

impl Storage {
    /// poller 등록/갱신
    pub fn upsert_poller(&self, poller: &PollerRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO pollers (id, hostname, disabled, last_seen) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                hostname = excluded.hostname,
                disabled = excluded.disabled,
                last_seen = excluded.last_seen
            "#,
            params![poller.id, poller.hostname, poller.disabled as i32, poller.last_seen],
        )
        .map_err(|e| Error::Storage(format!("Failed to upsert poller: {}", e)))?;

        Ok(())
    }

    /// heartbeat 기록
    pub fn touch_poller(&self, id: i64, at: i64) -> Result<bool> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                "UPDATE pollers SET last_seen = ?2 WHERE id = ?1",
                params![id, at],
            )
            .map_err(|e| Error::Storage(format!("Failed to touch poller: {}", e)))?;

        Ok(changed > 0)
    }

    /// 전체 poller
    pub fn list_pollers(&self) -> Result<Vec<PollerRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT id, hostname, disabled, last_seen FROM pollers ORDER BY id ASC")
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let pollers = stmt
            .query_map([], |row| {
                Ok(PollerRecord {
                    id: row.get(0)?,
                    hostname: row.get(1)?,
                    disabled: row.get::<_, i32>(2)? != 0,
                    last_seen: row.get(3)?,
                })
            })
            .map_err(|e| Error::Storage(format!("Failed to query pollers: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(pollers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_roundtrip_and_heartbeat() {
        let storage = Storage::in_memory().unwrap();
        storage
            .upsert_poller(&PollerRecord {
                id: 2,
                hostname: "remote-a".to_string(),
                disabled: false,
                last_seen: 100,
            })
            .unwrap();

        assert!(storage.touch_poller(2, 500).unwrap());
        assert!(!storage.touch_poller(9, 500).unwrap());

        let pollers = storage.list_pollers().unwrap();
        assert_eq!(pollers.len(), 1);
        assert_eq!(pollers[0].last_seen, 500);
    }
}
