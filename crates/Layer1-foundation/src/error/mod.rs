//! Error types for Plugdeck
//!
//! 모든 에러를 중앙에서 관리
//!
//! 검증/의존성 실패는 상태 코드나 `DependencyCheck` 같은 구조화된 값으로
//! 반환되고, 라이프사이클 경계에서 작업을 거부할 때만 `Error`로 변환된다.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Plugdeck 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 플러그인 라이프사이클 관련
    // ========================================================================
    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("Plugin '{plugin}' is missing the required '{entry_point}' entry point")]
    EntryPointMissing { plugin: String, entry_point: String },

    #[error("Plugin '{0}' is busy with another lifecycle operation")]
    Busy(String),

    #[error("Security rejection: {0}")]
    SecurityRejection(String),

    #[error("Filesystem error: {op} failed for {path}: {message}")]
    Filesystem {
        op: String,
        path: String,
        message: String,
    },

    // ========================================================================
    // 원격 저장소 관련
    // ========================================================================
    #[error("Remote fetch failed: {0}")]
    RemoteFetch(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 운영자에게 그대로 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Dependency(_)
                | Error::EntryPointMissing { .. }
                | Error::Busy(_)
                | Error::Filesystem { .. }
                | Error::RateLimited(_)
                | Error::NotFound(_)
                | Error::InvalidInput(_)
                | Error::Validation(_)
        )
    }

    /// 누락된 엔트리 포인트 에러 생성 헬퍼
    pub fn entry_point_missing(plugin: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Error::EntryPointMissing {
            plugin: plugin.into(),
            entry_point: entry_point.into(),
        }
    }

    /// 파일시스템 에러 생성 헬퍼
    pub fn filesystem(
        op: impl Into<String>,
        path: impl AsRef<std::path::Path>,
        message: impl std::fmt::Display,
    ) -> Self {
        Error::Filesystem {
            op: op.into(),
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_message_names_routine() {
        let err = Error::entry_point_missing("thold", "install");
        assert_eq!(
            err.to_string(),
            "Plugin 'thold' is missing the required 'install' entry point"
        );
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_filesystem_message_names_path() {
        let err = Error::filesystem("create_dir", "/srv/plugins/thold/lib", "permission denied");
        let msg = err.to_string();
        assert!(msg.contains("create_dir"));
        assert!(msg.contains("/srv/plugins/thold/lib"));
    }
}
