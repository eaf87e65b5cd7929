//! Plugin Status - 플러그인 상태
//!
//! 레지스트리에는 정수 코드(-5..7)로 저장되지만, 코드 안에서는 "아직 설치되지
//! 않음(이유 포함)"과 "설치됨(현재 상태)"을 분리한 합 타입으로 다룬다.
//!
//! | code | 의미 |
//! |---|---|
//! | -5 | 디렉토리 없음 (등록되었으나 파일이 사라짐) |
//! | -4 | descriptor 없음 |
//! | -3 | 디렉토리 이름에 공백 |
//! | -2 | 디렉토리 이름과 descriptor 이름 불일치 |
//! | -1 | 호스트 버전과 호환 불가 |
//! | 0 | 발견됨, 미설치 |
//! | 1 | 설치됨, 활성 |
//! | 2 | 설치됨, 설정 검사 실패 |
//! | 3 | 업그레이드 대기 (예약) |
//! | 4 | 설치됨, 비활성 |
//! | 7 | 런타임 에러로 자동 비활성화 |
//!
//! 8(archived)은 상태가 아니라 아카이브 존재 여부에서 파생된다.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 설치 불가 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnavailableReason {
    DirectoryMissing,
    NoDescriptor,
    InvalidDirectoryName,
    NameMismatch,
    Incompatible,
}

/// 설치된 플러그인의 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstalledState {
    Active,
    ConfigIssues,
    AwaitingUpgrade,
    Inactive,
    DisabledByError,
}

/// 플러그인 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginStatus {
    /// 설치할 수 없음
    Unavailable(UnavailableReason),
    /// 발견되었으나 설치되지 않음
    NotInstalled,
    /// 설치됨
    Installed(InstalledState),
}

/// 가상 상태 코드: 아카이브됨
pub const ARCHIVED_CODE: i32 = 8;

/// 설치된 상태의 코드 전체 (조건부 상태 전이에 쓴다)
pub const INSTALLED_CODES: [i32; 5] = [1, 2, 3, 4, 7];

impl PluginStatus {
    pub const ACTIVE: Self = PluginStatus::Installed(InstalledState::Active);
    pub const INACTIVE: Self = PluginStatus::Installed(InstalledState::Inactive);
    pub const CONFIG_ISSUES: Self = PluginStatus::Installed(InstalledState::ConfigIssues);
    pub const DISABLED_BY_ERROR: Self = PluginStatus::Installed(InstalledState::DisabledByError);

    /// 레지스트리 저장 코드
    pub fn code(&self) -> i32 {
        match self {
            PluginStatus::Unavailable(reason) => match reason {
                UnavailableReason::DirectoryMissing => -5,
                UnavailableReason::NoDescriptor => -4,
                UnavailableReason::InvalidDirectoryName => -3,
                UnavailableReason::NameMismatch => -2,
                UnavailableReason::Incompatible => -1,
            },
            PluginStatus::NotInstalled => 0,
            PluginStatus::Installed(state) => match state {
                InstalledState::Active => 1,
                InstalledState::ConfigIssues => 2,
                InstalledState::AwaitingUpgrade => 3,
                InstalledState::Inactive => 4,
                InstalledState::DisabledByError => 7,
            },
        }
    }

    /// 코드 → 상태. 알 수 없는 코드는 None
    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            -5 => PluginStatus::Unavailable(UnavailableReason::DirectoryMissing),
            -4 => PluginStatus::Unavailable(UnavailableReason::NoDescriptor),
            -3 => PluginStatus::Unavailable(UnavailableReason::InvalidDirectoryName),
            -2 => PluginStatus::Unavailable(UnavailableReason::NameMismatch),
            -1 => PluginStatus::Unavailable(UnavailableReason::Incompatible),
            0 => PluginStatus::NotInstalled,
            1 => PluginStatus::Installed(InstalledState::Active),
            2 => PluginStatus::Installed(InstalledState::ConfigIssues),
            3 => PluginStatus::Installed(InstalledState::AwaitingUpgrade),
            4 => PluginStatus::Installed(InstalledState::Inactive),
            7 => PluginStatus::Installed(InstalledState::DisabledByError),
            _ => return None,
        };
        Some(status)
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, PluginStatus::Installed(_))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, PluginStatus::Installed(InstalledState::Active))
    }

    /// 운영자 표시용 라벨
    pub fn label(&self) -> &'static str {
        match self {
            PluginStatus::Unavailable(UnavailableReason::DirectoryMissing) => "Plugin directory missing",
            PluginStatus::Unavailable(UnavailableReason::NoDescriptor) => "Plugin is missing INFO file",
            PluginStatus::Unavailable(UnavailableReason::InvalidDirectoryName) => {
                "Plugin directory is not valid"
            }
            PluginStatus::Unavailable(UnavailableReason::NameMismatch) => {
                "Plugin directory does not match name"
            }
            PluginStatus::Unavailable(UnavailableReason::Incompatible) => "Not compatible",
            PluginStatus::NotInstalled => "Not Installed",
            PluginStatus::Installed(InstalledState::Active) => "Active",
            PluginStatus::Installed(InstalledState::ConfigIssues) => "Configuration Issues",
            PluginStatus::Installed(InstalledState::AwaitingUpgrade) => "Awaiting Upgrade",
            PluginStatus::Installed(InstalledState::Inactive) => "Installed",
            PluginStatus::Installed(InstalledState::DisabledByError) => "Disabled",
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping_is_total_for_known_codes() {
        for code in [-5, -4, -3, -2, -1, 0, 1, 2, 3, 4, 7] {
            let status = PluginStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(PluginStatus::from_code(5).is_none());
        assert!(PluginStatus::from_code(ARCHIVED_CODE).is_none());
    }

    #[test]
    fn test_installed_split() {
        assert!(!PluginStatus::NotInstalled.is_installed());
        assert!(!PluginStatus::Unavailable(UnavailableReason::NoDescriptor).is_installed());
        assert!(PluginStatus::CONFIG_ISSUES.is_installed());
        assert!(PluginStatus::ACTIVE.is_active());
        assert!(!PluginStatus::INACTIVE.is_active());

        for code in INSTALLED_CODES {
            assert!(PluginStatus::from_code(code).unwrap().is_installed());
        }
    }
}
