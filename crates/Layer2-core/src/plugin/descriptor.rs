//! Plugin Descriptor - 플러그인 메타데이터 (INFO 파일)
//!
//! 각 플러그인 디렉토리의 `INFO` 파일은 INI 형식이며 `[info]` 섹션을 가진다.
//!
//! ```ini
//! [info]
//! name = thold
//! longname = Threshold Alerts
//! version = 1.8.2
//! compat = 1.2.0
//! requires = syslog:>=2.0 monitor
//! capabilities = online_view:1 remote_collect:1
//! noremove = data,logs
//! ```
//!
//! 없는 필드는 기본값으로 채운 뒤 디렉토리 이름/호환성을 검증하여 상태를 결정한다.
//! 로딩은 순수 읽기이며, 실패 사유(없음/읽기 불가/파싱 실패)는 구분해 로그로 남긴다.

use super::capability::CapabilitySet;
use super::status::{PluginStatus, UnavailableReason};
use super::version::compare_versions;
use plugdeck_foundation::{log_target, Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// descriptor 파일 이름
pub const DESCRIPTOR_FILE: &str = "INFO";

/// descriptor의 필수 섹션
const INFO_SECTION: &str = "info";

// ============================================================================
// INI parsing
// ============================================================================

/// 파싱된 INI 문서: 섹션 → (키 → 값)
pub type IniDocument = BTreeMap<String, BTreeMap<String, String>>;

/// 최소 INI 파서
///
/// - `;` 또는 `#`으로 시작하는 줄은 주석
/// - 섹션 밖의 키는 "" 섹션에 들어간다
/// - 값을 감싼 따옴표는 제거
pub fn parse_ini(text: &str) -> Result<IniDocument> {
    let mut doc = IniDocument::new();
    let mut section = String::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let name = rest.strip_suffix(']').ok_or_else(|| {
                Error::Validation(format!("Unterminated section header on line {}", idx + 1))
            })?;
            section = name.trim().to_string();
            doc.entry(section.clone()).or_default();
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::Validation(format!("Expected 'key = value' on line {}", idx + 1))
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Validation(format!("Empty key on line {}", idx + 1)));
        }

        doc.entry(section.clone())
            .or_default()
            .insert(key.to_string(), unquote(value.trim()).to_string());
    }

    Ok(doc)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

// ============================================================================
// Descriptor
// ============================================================================

/// descriptor 로딩 실패 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorIssue {
    Missing,
    Unreadable,
    ParseFailed,
}

impl DescriptorIssue {
    fn message(&self) -> &'static str {
        match self {
            DescriptorIssue::Missing => "INFO file does not exist.",
            DescriptorIssue::Unreadable => "INFO file not readable.",
            DescriptorIssue::ParseFailed => "Parsing INI file failed.",
        }
    }
}

/// 플러그인 descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// 플러그인 디렉토리 이름 (= plugin id)
    pub directory: String,
    pub name: String,
    pub longname: String,
    pub version: String,
    pub author: String,
    pub homepage: String,
    /// 최소 호스트 버전
    pub compat: Option<String>,
    pub requires: String,
    pub capabilities: String,
    /// 복원 시 삭제하지 않는 경로
    pub noremove: Vec<String>,
    pub status: PluginStatus,
    /// 로딩 실패 사유 (있다면)
    pub issue: Option<DescriptorIssue>,
}

impl Descriptor {
    /// `[info]` 섹션으로부터 descriptor 생성 (기본값 병합 + 검증)
    ///
    /// `info`가 None이면 descriptor 파일이 없는 것으로 본다.
    pub fn from_info(
        directory: &str,
        info: Option<&BTreeMap<String, String>>,
        host_version: &str,
    ) -> Self {
        let empty = BTreeMap::new();
        let fields = info.unwrap_or(&empty);
        let get = |key: &str| fields.get(key).map(|v| v.trim().to_string());

        let display = ucfirst(directory);
        let homepage = get("homepage")
            .or_else(|| get("webpage"))
            .unwrap_or_else(|| "Not Stated".to_string());

        let mut descriptor = Self {
            directory: directory.to_string(),
            name: get("name").unwrap_or_else(|| display.clone()),
            longname: get("longname").unwrap_or(display),
            version: get("version").unwrap_or_else(|| "Unknown".to_string()),
            author: get("author").unwrap_or_else(|| "Unknown".to_string()),
            homepage,
            compat: get("compat").filter(|c| !c.is_empty()),
            requires: get("requires").unwrap_or_default(),
            capabilities: get("capabilities").unwrap_or_default(),
            noremove: get("noremove")
                .map(|v| {
                    v.split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|p| !p.is_empty())
                        .map(|p| p.trim_matches('/').to_string())
                        .collect()
                })
                .unwrap_or_default(),
            status: if info.is_some() {
                PluginStatus::NotInstalled
            } else {
                PluginStatus::Unavailable(UnavailableReason::NoDescriptor)
            },
            issue: if info.is_some() {
                None
            } else {
                Some(DescriptorIssue::Missing)
            },
        };

        if descriptor.status == PluginStatus::NotInstalled {
            descriptor.status = descriptor.validate(host_version);
        }

        descriptor
    }

    /// 디렉토리 이름 → 이름 일치 → 호환성 순으로 검증
    fn validate(&self, host_version: &str) -> PluginStatus {
        if self.directory.contains(' ') {
            return PluginStatus::Unavailable(UnavailableReason::InvalidDirectoryName);
        }
        if self.directory.to_lowercase() != self.name.to_lowercase() {
            return PluginStatus::Unavailable(UnavailableReason::NameMismatch);
        }
        match &self.compat {
            Some(compat) if compare_versions(host_version, compat) != Ordering::Less => {
                PluginStatus::NotInstalled
            }
            _ => PluginStatus::Unavailable(UnavailableReason::Incompatible),
        }
    }

    /// 실패 사유 표시와 함께 기본 descriptor 생성
    fn defaulted(directory: &str, issue: DescriptorIssue, host_version: &str) -> Self {
        let mut descriptor = Self::from_info(directory, None, host_version);
        descriptor.issue = Some(issue);
        descriptor
    }

    /// 선언된 capability 집합
    pub fn capability_set(&self) -> CapabilitySet {
        CapabilitySet::parse(&self.capabilities)
    }

    /// 설치 가능한 상태인지 (검증 통과)
    pub fn is_loadable(&self) -> bool {
        self.issue.is_none() && !matches!(self.status, PluginStatus::Unavailable(_))
    }
}

/// 첫 글자만 대문자로
pub fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// 디렉토리의 descriptor 경로
pub fn descriptor_path(plugins_dir: &Path, directory: &str) -> PathBuf {
    plugins_dir.join(directory).join(DESCRIPTOR_FILE)
}

/// descriptor 로딩
///
/// 실패해도 에러를 반환하지 않는다. 기본값이 채워진 descriptor에 상태 -4와
/// 실패 사유가 기록된다.
pub fn load_descriptor(plugins_dir: &Path, directory: &str, host_version: &str) -> Descriptor {
    let path = descriptor_path(plugins_dir, directory);

    if !path.is_file() {
        warn!(
            target: log_target::PLUGIN,
            plugin = directory,
            "Loading plugin INFO file failed. {}",
            DescriptorIssue::Missing.message()
        );
        return Descriptor::defaulted(directory, DescriptorIssue::Missing, host_version);
    }

    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            warn!(
                target: log_target::PLUGIN,
                plugin = directory,
                error = %e,
                "Loading plugin INFO file failed. {}",
                DescriptorIssue::Unreadable.message()
            );
            return Descriptor::defaulted(directory, DescriptorIssue::Unreadable, host_version);
        }
    };

    let info = match parse_ini(&text) {
        Ok(mut doc) => doc.remove(INFO_SECTION),
        Err(e) => {
            debug!(target: log_target::PLUGIN, plugin = directory, "INI error: {}", e);
            None
        }
    };

    match info {
        Some(info) => Descriptor::from_info(directory, Some(&info), host_version),
        None => {
            warn!(
                target: log_target::PLUGIN,
                plugin = directory,
                "Loading plugin INFO file failed. {}",
                DescriptorIssue::ParseFailed.message()
            );
            Descriptor::defaulted(directory, DescriptorIssue::ParseFailed, host_version)
        }
    }
}

// ============================================================================
// DescriptorCache
// ============================================================================

/// 요청 단위 descriptor 캐시
///
/// 한 번의 작업(목록 표시, 의존성 검사 등) 동안 같은 INFO 파일을 반복해서
/// 읽지 않는다. 작업이 끝나면 버린다.
#[derive(Debug)]
pub struct DescriptorCache {
    plugins_dir: PathBuf,
    host_version: String,
    entries: HashMap<String, Descriptor>,
}

impl DescriptorCache {
    pub fn new(plugins_dir: impl Into<PathBuf>, host_version: impl Into<String>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            host_version: host_version.into(),
            entries: HashMap::new(),
        }
    }

    /// 캐시된 descriptor, 없으면 로딩
    pub fn get(&mut self, directory: &str) -> &Descriptor {
        let plugins_dir = &self.plugins_dir;
        let host_version = &self.host_version;
        self.entries
            .entry(directory.to_string())
            .or_insert_with(|| load_descriptor(plugins_dir, directory, host_version))
    }

    /// 캐시 무효화 (restore 이후 등)
    pub fn invalidate(&mut self, directory: &str) {
        self.entries.remove(directory);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
