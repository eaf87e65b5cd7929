//! Dependency Resolver - requires 문자열 검사
//!
//! `requires = syslog:>=2.0,<3.0 monitor` 처럼 공백으로 구분된 토큰 목록이다.
//! 토큰은 `dep` 또는 `dep:range`. 의존 플러그인은 설치되어 있어야 하고
//! (status >= 1), 버전 범위가 있으면 설치된 버전이 범위를 만족해야 한다.
//!
//! 첫 실패에서 멈추지 않는다. 만족하지 못한 의존성을 모두 모아 하나의
//! 메시지로 돌려준다.

use super::descriptor::{Descriptor, DescriptorCache};
use super::version::VersionRange;
use plugdeck_foundation::{Error, Result, Storage};
use serde::{Deserialize, Serialize};

/// 의존성으로 인정되는 설치 상태 (1, 4, 7)
const DEPENDENT_STATUSES: [i32; 3] = [1, 4, 7];

/// 단일 의존성
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub plugin: String,
    pub range: Option<VersionRange>,
}

impl Requirement {
    /// `dep` 또는 `dep:range`
    pub fn parse(token: &str) -> Result<Self> {
        let (plugin, range) = match token.split_once(':') {
            Some((plugin, range)) => (plugin.trim(), Some(range.trim())),
            None => (token.trim(), None),
        };

        if plugin.is_empty() {
            return Err(Error::Validation(format!(
                "Dependency '{}' has no plugin name",
                token
            )));
        }

        let range = match range {
            Some(r) if !r.is_empty() => Some(VersionRange::parse(r)?),
            _ => None,
        };

        Ok(Self {
            plugin: plugin.to_string(),
            range,
        })
    }
}

/// requires 문자열 파싱 (모든 토큰이 유효해야 함)
pub fn parse_requires(requires: &str) -> Result<Vec<Requirement>> {
    requires.split_whitespace().map(Requirement::parse).collect()
}

/// 만족하지 못한 의존성
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnmetDependency {
    NotInstalled {
        plugin: String,
    },
    VersionMismatch {
        plugin: String,
        required: String,
        installed: String,
    },
    InvalidRequirement {
        token: String,
    },
}

/// 의존성 검사 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCheck {
    pub ok: bool,
    /// 운영자용 집계 메시지 (ok면 빈 문자열)
    pub message: String,
    pub unmet: Vec<UnmetDependency>,
}

impl DependencyCheck {
    fn satisfied() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    /// 실패를 `Error::Dependency`로
    pub fn into_result(self) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(Error::Dependency(self.message))
        }
    }
}

/// 단어마다 첫 글자 대문자
fn ucwords(s: &str) -> String {
    s.split(' ')
        .map(super::descriptor::ucfirst)
        .collect::<Vec<_>>()
        .join(" ")
}

/// 설치 가능 여부 검사
///
/// 레지스트리 읽기 실패만 `Err`로 돌려준다. 의존성 실패는 `ok == false`.
pub fn can_install(storage: &Storage, descriptor: &Descriptor) -> Result<DependencyCheck> {
    let requires = descriptor.requires.trim();
    if requires.is_empty() {
        return Ok(DependencyCheck::satisfied());
    }

    let target = ucwords(&descriptor.directory);
    let mut messages = Vec::new();
    let mut unmet = Vec::new();

    for token in requires.split_whitespace() {
        let requirement = match Requirement::parse(token) {
            Ok(r) => r,
            Err(_) => {
                messages.push(format!(
                    "Invalid dependency '{}' declared by {}.",
                    token, target
                ));
                unmet.push(UnmetDependency::InvalidRequirement {
                    token: token.to_string(),
                });
                continue;
            }
        };

        let dep_name = ucwords(&requirement.plugin);
        let record = storage.get_plugin(&requirement.plugin)?;

        let installed = match record {
            Some(r) if r.status >= 1 => r,
            _ => {
                messages.push(format!(
                    "{} is required for {}, and it is not installed.",
                    dep_name, target
                ));
                unmet.push(UnmetDependency::NotInstalled {
                    plugin: requirement.plugin,
                });
                continue;
            }
        };

        if let Some(range) = &requirement.range {
            if !range.satisfied_by(&installed.version) {
                let message = match range.minimum() {
                    Some(min) => format!(
                        "{} Version {} or above is required for {}.",
                        dep_name, min, target
                    ),
                    None => format!(
                        "{} Version {} is required for {}.",
                        dep_name, range, target
                    ),
                };
                messages.push(message);
                unmet.push(UnmetDependency::VersionMismatch {
                    plugin: requirement.plugin,
                    required: range.to_string(),
                    installed: installed.version,
                });
            }
        }
    }

    if unmet.is_empty() {
        return Ok(DependencyCheck::satisfied());
    }

    Ok(DependencyCheck {
        ok: false,
        message: messages.join(" "),
        unmet,
    })
}

/// 이 플러그인을 requires로 선언한 설치된 플러그인들
pub fn dependents_of(
    storage: &Storage,
    cache: &mut DescriptorCache,
    plugin: &str,
) -> Result<Vec<String>> {
    let mut dependents = Vec::new();

    for record in storage.list_plugins()? {
        if record.directory == plugin || !DEPENDENT_STATUSES.contains(&record.status) {
            continue;
        }

        let descriptor = cache.get(&record.directory);
        let depends = descriptor
            .requires
            .split_whitespace()
            .filter_map(|t| Requirement::parse(t).ok())
            .any(|r| r.plugin == plugin);

        if depends {
            dependents.push(record.directory);
        }
    }

    Ok(dependents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugdeck_foundation::PluginUpsert;

    fn installed(storage: &Storage, dir: &str, version: &str, status: i32) {
        storage
            .upsert_plugin(&PluginUpsert {
                directory: dir.to_string(),
                name: dir.to_string(),
                version: version.to_string(),
                status,
                ..Default::default()
            })
            .unwrap();
    }

    fn descriptor(dir: &str, requires: &str) -> Descriptor {
        let mut d = Descriptor::from_info(dir, None, "1.2.25");
        d.requires = requires.to_string();
        d
    }

    #[test]
    fn test_parse_requires_tokens() {
        let reqs = parse_requires("a:>=1.0 b c:>=1.2,<2").unwrap();
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[0].plugin, "a");
        assert!(reqs[1].range.is_none());
        assert_eq!(reqs[2].range.as_ref().unwrap().clauses().len(), 2);
        assert!(parse_requires(":1.0").is_err());
        assert!(parse_requires("").unwrap().is_empty());
    }

    #[test]
    fn test_empty_requires_always_succeeds() {
        let storage = Storage::in_memory().unwrap();
        let check = can_install(&storage, &descriptor("thold", "  ")).unwrap();
        assert!(check.ok);
        assert!(check.message.is_empty());
    }

    #[test]
    fn test_version_too_low_names_dependency() {
        let storage = Storage::in_memory().unwrap();
        installed(&storage, "a", "0.9", 1);
        installed(&storage, "b", "3.0", 4);

        let check = can_install(&storage, &descriptor("thold", "a:>=1.0 b")).unwrap();
        assert!(!check.ok);
        assert_eq!(check.message, "A Version 1.0 or above is required for Thold.");
        assert_eq!(check.unmet.len(), 1);

        installed(&storage, "a", "1.0", 1);
        assert!(can_install(&storage, &descriptor("thold", "a:>=1.0 b")).unwrap().ok);
    }

    #[test]
    fn test_all_failures_are_collected() {
        let storage = Storage::in_memory().unwrap();
        installed(&storage, "monitor", "1.0", 0);

        let check = can_install(&storage, &descriptor("thold", "syslog monitor:2.0 x:>>1")).unwrap();
        assert!(!check.ok);
        assert_eq!(check.unmet.len(), 3);
        assert!(check.message.contains("Syslog is required for Thold, and it is not installed."));
        assert!(check.message.contains("Monitor is required for Thold"));
        assert!(check.message.contains("Invalid dependency 'x:>>1'"));
        assert!(matches!(
            check.clone().into_result(),
            Err(Error::Dependency(_))
        ));
    }

    #[test]
    fn test_dependents_of() {
        let temp = tempfile::TempDir::new().unwrap();
        for (dir, requires) in [("thold", "monitor:1.0"), ("syslog", ""), ("audit", "monitor")] {
            std::fs::create_dir_all(temp.path().join(dir)).unwrap();
            std::fs::write(
                temp.path().join(dir).join("INFO"),
                format!("[info]\nname = {}\ncompat = 1.0\nrequires = {}\n", dir, requires),
            )
            .unwrap();
        }

        let storage = Storage::in_memory().unwrap();
        installed(&storage, "monitor", "1.0", 1);
        installed(&storage, "thold", "1.0", 4);
        installed(&storage, "syslog", "1.0", 1);
        installed(&storage, "audit", "1.0", 0);

        let mut cache = DescriptorCache::new(temp.path(), "1.2.25");
        let deps = dependents_of(&storage, &mut cache, "monitor").unwrap();
        assert_eq!(deps, vec!["thold".to_string()]);
    }
}
