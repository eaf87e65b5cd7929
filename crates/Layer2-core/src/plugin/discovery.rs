//! Plugin Discovery - 플러그인 디렉토리 발견
//!
//! 플러그인 루트 아래의 디렉토리와 레지스트리를 합쳐 운영자용 목록을 만든다.
//! 호스트에 통합된 플러그인은 목록에서 빠진다.

use super::descriptor::DescriptorCache;
use super::status::{PluginStatus, UnavailableReason};
use plugdeck_foundation::{log_target, PlugdeckConfig, PluginRecord, PluginUpsert, Result, Storage};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

// ============================================================================
// PluginListing
// ============================================================================

/// 목록 항목
#[derive(Debug, Clone, Serialize)]
pub struct PluginListing {
    pub directory: String,
    /// 표시 이름
    pub name: String,
    pub version: String,
    pub author: String,
    pub status: PluginStatus,
    /// 레지스트리 id (로드 순서). 미등록이면 None
    pub load_order: Option<i64>,
    /// 아카이브 존재 여부 (상태 8은 여기서 파생)
    pub archived: bool,
    /// 원격 노드에서 본 로컬 레지스트리 상태
    pub remote_status: Option<PluginStatus>,
    pub requires: String,
    pub capabilities: String,
}

/// scan 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// 새로 등록된 디렉토리
    pub registered: Vec<String>,
    /// 미설치 레코드 중 상태가 바뀐 디렉토리
    pub refreshed: Vec<String>,
}

// ============================================================================
// PluginDiscovery
// ============================================================================

/// 플러그인 발견 시스템
pub struct PluginDiscovery {
    storage: Storage,
    plugins_dir: PathBuf,
    host_version: String,
    integrated: Vec<String>,
    primary: bool,
}

impl PluginDiscovery {
    pub fn new(storage: Storage, config: &PlugdeckConfig) -> Self {
        Self {
            storage,
            plugins_dir: config.paths.plugins_dir.clone(),
            host_version: config.host.version.clone(),
            integrated: config.host.integrated_plugins.clone(),
            primary: config.node.is_primary(),
        }
    }

    /// 플러그인 루트 아래 디렉토리 (숨김/통합 제외, 정렬)
    pub fn directories(&self) -> Result<Vec<String>> {
        if !self.plugins_dir.is_dir() {
            debug!(
                target: log_target::PLUGIN,
                dir = %self.plugins_dir.display(),
                "Plugin directory does not exist"
            );
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.plugins_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || self.integrated.contains(&name) {
                continue;
            }
            dirs.push(name);
        }
        dirs.sort();
        Ok(dirs)
    }

    /// 운영자용 목록
    ///
    /// 레지스트리에 있으나 디렉토리가 사라진 플러그인은 -5로 표시된다.
    pub fn discover(&self) -> Result<Vec<PluginListing>> {
        let mut cache = DescriptorCache::new(self.plugins_dir.clone(), self.host_version.clone());
        let archived = self.storage.archived_plugins()?;
        let mut records: HashMap<String, PluginRecord> = self
            .storage
            .list_plugins()?
            .into_iter()
            .map(|r| (r.directory.clone(), r))
            .collect();

        let mut listings = Vec::new();

        for dir in self.directories()? {
            let record = records.remove(&dir);
            let descriptor = cache.get(&dir);

            let registry_status = record
                .as_ref()
                .and_then(|r| PluginStatus::from_code(r.status));
            let status = match registry_status {
                Some(status) if status.is_installed() => status,
                _ => descriptor.status,
            };

            let (name, version, author) = match &record {
                Some(r) if status.is_installed() => {
                    (r.name.clone(), r.version.clone(), r.author.clone())
                }
                _ => (
                    descriptor.longname.clone(),
                    descriptor.version.clone(),
                    descriptor.author.clone(),
                ),
            };

            listings.push(PluginListing {
                archived: archived.contains(&dir),
                remote_status: self.remote_status(registry_status),
                load_order: record.as_ref().map(|r| r.id),
                requires: descriptor.requires.clone(),
                capabilities: descriptor.capabilities.clone(),
                directory: dir,
                name,
                version,
                author,
                status,
            });
        }

        // 디렉토리가 사라진 레코드
        for (dir, record) in records {
            if self.integrated.contains(&dir) {
                continue;
            }
            listings.push(PluginListing {
                archived: archived.contains(&dir),
                remote_status: self.remote_status(PluginStatus::from_code(record.status)),
                load_order: Some(record.id),
                requires: String::new(),
                capabilities: String::new(),
                name: record.name,
                version: record.version,
                author: record.author,
                status: PluginStatus::Unavailable(UnavailableReason::DirectoryMissing),
                directory: dir,
            });
        }

        listings.sort_by(|a, b| {
            a.load_order
                .unwrap_or(i64::MAX)
                .cmp(&b.load_order.unwrap_or(i64::MAX))
                .then_with(|| a.directory.cmp(&b.directory))
        });

        Ok(listings)
    }

    fn remote_status(&self, status: Option<PluginStatus>) -> Option<PluginStatus> {
        if self.primary {
            None
        } else {
            status
        }
    }

    /// 새 디렉토리를 레지스트리에 등록하고 미설치 레코드의 상태를 갱신
    ///
    /// 설치된 플러그인의 상태는 건드리지 않는다.
    pub fn scan(&self) -> Result<ScanSummary> {
        let mut cache = DescriptorCache::new(self.plugins_dir.clone(), self.host_version.clone());
        let mut summary = ScanSummary::default();
        let dirs = self.directories()?;

        for dir in &dirs {
            let descriptor = cache.get(dir);
            let code = descriptor.status.code();

            match self.storage.get_plugin(dir)? {
                None => {
                    self.storage.upsert_plugin(&PluginUpsert {
                        directory: dir.clone(),
                        name: descriptor.longname.clone(),
                        author: descriptor.author.clone(),
                        webpage: descriptor.homepage.clone(),
                        version: descriptor.version.clone(),
                        status: code,
                    })?;
                    summary.registered.push(dir.clone());
                }
                Some(record) if record.status <= 0 && record.status != code => {
                    self.storage.set_plugin_status(dir, code)?;
                    summary.refreshed.push(dir.clone());
                }
                Some(_) => {}
            }
        }

        let missing = PluginStatus::Unavailable(UnavailableReason::DirectoryMissing).code();
        for record in self.storage.list_plugins()? {
            if record.status > 0
                || record.status == missing
                || dirs.contains(&record.directory)
                || self.integrated.contains(&record.directory)
            {
                continue;
            }
            self.storage.set_plugin_status(&record.directory, missing)?;
            summary.refreshed.push(record.directory);
        }

        info!(
            target: log_target::PLUGIN,
            registered = summary.registered.len(),
            refreshed = summary.refreshed.len(),
            "Plugin directory scan finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugdeck_foundation::{ConnectionMode, NewArchive};
    use std::fs;
    use tempfile::TempDir;

    fn plugin(root: &std::path::Path, dir: &str, info: Option<&str>) {
        let path = root.join(dir);
        fs::create_dir_all(&path).unwrap();
        if let Some(info) = info {
            fs::write(path.join("INFO"), info).unwrap();
        }
    }

    fn fixture() -> (TempDir, PlugdeckConfig) {
        let temp = TempDir::new().unwrap();
        plugin(temp.path(), "thold", Some("[info]\nname = thold\ncompat = 1.0\n"));
        plugin(temp.path(), "bare", None);
        plugin(temp.path(), "bad name", Some("[info]\nname = bad name\ncompat = 1.0\n"));
        plugin(temp.path(), "builtin", Some("[info]\nname = builtin\ncompat = 1.0\n"));
        plugin(temp.path(), ".git", None);

        let config = PlugdeckConfig::new()
            .with_plugins_dir(temp.path())
            .with_integrated("builtin");
        (temp, config)
    }

    #[test]
    fn test_directories_skip_hidden_and_integrated() {
        let (_temp, config) = fixture();
        let discovery = PluginDiscovery::new(Storage::in_memory().unwrap(), &config);

        assert_eq!(
            discovery.directories().unwrap(),
            vec!["bad name".to_string(), "bare".to_string(), "thold".to_string()]
        );
    }

    #[test]
    fn test_discover_statuses() {
        let (_temp, config) = fixture();
        let storage = Storage::in_memory().unwrap();
        storage
            .upsert_plugin(&PluginUpsert {
                directory: "gone".into(),
                name: "Gone".into(),
                status: 4,
                ..Default::default()
            })
            .unwrap();
        storage
            .insert_archive(&NewArchive {
                plugin: "thold".into(),
                ..Default::default()
            })
            .unwrap();

        let listings = PluginDiscovery::new(storage, &config).discover().unwrap();
        let status_of = |dir: &str| {
            listings
                .iter()
                .find(|l| l.directory == dir)
                .map(|l| l.status.code())
                .unwrap()
        };

        assert_eq!(status_of("gone"), -5);
        assert_eq!(status_of("bare"), -4);
        assert_eq!(status_of("bad name"), -3);
        assert_eq!(status_of("thold"), 0);
        assert!(listings.iter().find(|l| l.directory == "thold").unwrap().archived);
        assert!(listings.iter().all(|l| l.remote_status.is_none()));
    }

    #[test]
    fn test_scan_registers_and_marks_missing() {
        let (temp, config) = fixture();
        let storage = Storage::in_memory().unwrap();
        let discovery = PluginDiscovery::new(storage.clone(), &config);

        let summary = discovery.scan().unwrap();
        assert_eq!(summary.registered.len(), 3);
        assert_eq!(storage.plugin_status("bare").unwrap(), Some(-4));
        assert_eq!(storage.plugin_status("builtin").unwrap(), None);

        fs::remove_dir_all(temp.path().join("bare")).unwrap();
        let summary = discovery.scan().unwrap();
        assert_eq!(summary.refreshed, vec!["bare".to_string()]);
        assert_eq!(storage.plugin_status("bare").unwrap(), Some(-5));
    }

    #[test]
    fn test_remote_status_on_secondary_node() {
        let (_temp, config) = fixture();
        let config = config.with_node(3, ConnectionMode::Offline);
        let storage = Storage::in_memory().unwrap();
        storage
            .upsert_plugin(&PluginUpsert {
                directory: "thold".into(),
                name: "Thresholds".into(),
                status: 1,
                ..Default::default()
            })
            .unwrap();

        let listings = PluginDiscovery::new(storage, &config).discover().unwrap();
        let thold = listings.iter().find(|l| l.directory == "thold").unwrap();
        assert_eq!(thold.remote_status, Some(PluginStatus::ACTIVE));
        assert_eq!(thold.name, "Thresholds");
    }
}
