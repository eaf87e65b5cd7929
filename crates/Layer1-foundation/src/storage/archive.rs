//! plugin_archive and plugin_available operations

use super::db::{now, Storage};
use super::records::{ArchiveRecord, ArchiveSummary, AvailableRelease, NewArchive};
use crate::{Error, Result};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;

const ARCHIVE_COLUMNS: &str = "id, plugin, description, author, webpage, version, requires, compat, user_id, dir_hash, archive, last_updated";

fn map_archive(row: &Row<'_>) -> rusqlite::Result<ArchiveRecord> {
    Ok(ArchiveRecord {
        id: row.get(0)?,
        plugin: row.get(1)?,
        description: row.get(2)?,
        author: row.get(3)?,
        webpage: row.get(4)?,
        version: row.get(5)?,
        requires: row.get(6)?,
        compat: row.get(7)?,
        user_id: row.get(8)?,
        dir_hash: row.get(9)?,
        archive: row.get(10)?,
        last_updated: row.get(11)?,
    })
}

const AVAILABLE_COLUMNS: &str = "plugin, description, author, webpage, tag_name, published_at, compat, requires, body, info, readme, changelog, archive, last_updated";

fn map_available(row: &Row<'_>) -> rusqlite::Result<AvailableRelease> {
    Ok(AvailableRelease {
        plugin: row.get(0)?,
        description: row.get(1)?,
        author: row.get(2)?,
        webpage: row.get(3)?,
        tag_name: row.get(4)?,
        published_at: row.get(5)?,
        compat: row.get(6)?,
        requires: row.get(7)?,
        body: row.get(8)?,
        info: row.get(9)?,
        readme: row.get(10)?,
        changelog: row.get(11)?,
        archive: row.get(12)?,
        last_updated: row.get(13)?,
    })
}

impl Storage {
    // ========================================================================
    // Archive
    // ========================================================================

    /// 아카이브 저장
    pub fn insert_archive(&self, archive: &NewArchive) -> Result<i64> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO plugin_archive
                (plugin, description, author, webpage, version, requires, compat,
                 user_id, dir_hash, archive, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                archive.plugin,
                archive.description,
                archive.author,
                archive.webpage,
                archive.version,
                archive.requires,
                archive.compat,
                archive.user_id,
                archive.dir_hash,
                archive.archive,
                now(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to insert archive: {}", e)))?;

        Ok(conn.last_insert_rowid())
    }

    /// 플러그인의 최신 아카이브
    pub fn latest_archive(&self, plugin: &str) -> Result<Option<ArchiveRecord>> {
        let conn = self.lock()?;

        conn.query_row(
            &format!(
                "SELECT {} FROM plugin_archive WHERE plugin = ?1 ORDER BY id DESC LIMIT 1",
                ARCHIVE_COLUMNS
            ),
            params![plugin],
            map_archive,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get archive: {}", e)))
    }

    /// ID로 아카이브 조회
    pub fn get_archive(&self, id: i64) -> Result<Option<ArchiveRecord>> {
        let conn = self.lock()?;

        conn.query_row(
            &format!("SELECT {} FROM plugin_archive WHERE id = ?1", ARCHIVE_COLUMNS),
            params![id],
            map_archive,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get archive: {}", e)))
    }

    /// 아카이브 목록 (blob 제외)
    pub fn list_archives(&self) -> Result<Vec<ArchiveSummary>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, plugin, version, dir_hash, LENGTH(archive), last_updated
                FROM plugin_archive ORDER BY plugin ASC, id DESC
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let archives = stmt
            .query_map([], |row| {
                Ok(ArchiveSummary {
                    id: row.get(0)?,
                    plugin: row.get(1)?,
                    version: row.get(2)?,
                    dir_hash: row.get(3)?,
                    size: row.get(4)?,
                    last_updated: row.get(5)?,
                })
            })
            .map_err(|e| Error::Storage(format!("Failed to query archives: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(archives)
    }

    /// 아카이브가 있는 플러그인 집합 (status 8 파생용)
    pub fn archived_plugins(&self) -> Result<HashSet<String>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare("SELECT DISTINCT plugin FROM plugin_archive")
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let plugins = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| Error::Storage(format!("Failed to query archives: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(plugins)
    }

    /// 플러그인의 아카이브 삭제
    pub fn remove_archives(&self, plugin: &str) -> Result<usize> {
        let conn = self.lock()?;

        conn.execute("DELETE FROM plugin_archive WHERE plugin = ?1", params![plugin])
            .map_err(|e| Error::Storage(format!("Failed to remove archives: {}", e)))
    }

    // ========================================================================
    // Available releases
    // ========================================================================

    /// (plugin, published_at, tag)가 이미 저장되어 있는지
    pub fn available_release_unchanged(
        &self,
        plugin: &str,
        published_at: &str,
        tag_name: &str,
    ) -> Result<bool> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row(
                r#"
                SELECT COUNT(*) FROM plugin_available
                WHERE plugin = ?1 AND published_at = ?2 AND tag_name = ?3
                "#,
                params![plugin, published_at, tag_name],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to check release: {}", e)))?;

        Ok(count > 0)
    }

    /// 릴리스 upsert ((plugin, tag_name) 기준)
    pub fn upsert_available(&self, release: &AvailableRelease) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO plugin_available
                (plugin, description, author, webpage, tag_name, published_at, compat,
                 requires, body, info, readme, changelog, archive, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(plugin, tag_name) DO UPDATE SET
                description = excluded.description,
                author = excluded.author,
                webpage = excluded.webpage,
                published_at = excluded.published_at,
                compat = excluded.compat,
                requires = excluded.requires,
                body = excluded.body,
                info = excluded.info,
                readme = excluded.readme,
                changelog = excluded.changelog,
                archive = excluded.archive,
                last_updated = excluded.last_updated
            "#,
            params![
                release.plugin,
                release.description,
                release.author,
                release.webpage,
                release.tag_name,
                release.published_at,
                release.compat,
                release.requires,
                release.body,
                release.info,
                release.readme,
                release.changelog,
                release.archive,
                now(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to upsert release: {}", e)))?;

        Ok(())
    }

    /// 릴리스 조회
    pub fn get_available(&self, plugin: &str, tag_name: &str) -> Result<Option<AvailableRelease>> {
        let conn = self.lock()?;

        conn.query_row(
            &format!(
                "SELECT {} FROM plugin_available WHERE plugin = ?1 AND tag_name = ?2",
                AVAILABLE_COLUMNS
            ),
            params![plugin, tag_name],
            map_available,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get release: {}", e)))
    }

    /// 전체 릴리스 목록
    pub fn list_available(&self) -> Result<Vec<AvailableRelease>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM plugin_available ORDER BY plugin ASC, published_at DESC",
                AVAILABLE_COLUMNS
            ))
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let releases = stmt
            .query_map([], map_available)
            .map_err(|e| Error::Storage(format!("Failed to query releases: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(releases)
    }
}
