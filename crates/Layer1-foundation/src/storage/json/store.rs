//! JSON 파일 저장소
//!
//! 설정 파일 로드/저장. 여러 호스트 프로세스가 같은 파일을 읽을 수 있으므로
//! 저장은 임시 파일에 쓴 뒤 rename 한다.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// JSON 설정 저장소
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// 글로벌 설정 (~/.config/plugdeck/)
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))?
            .join("plugdeck");
        Ok(Self::new(dir))
    }

    /// 프로젝트 설정 (<root>/.plugdeck/)
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(".plugdeck"))
    }

    /// 현재 디렉토리 프로젝트 설정
    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Cannot get current directory: {}", e)))?;
        Ok(Self::project(cwd))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    /// JSON 로드
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.file_path(filename);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// JSON 로드 (Optional) - 파일이 없으면 None
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        if !self.file_path(filename).exists() {
            return Ok(None);
        }
        self.load(filename).map(Some)
    }

    /// JSON 저장 (tmp 파일 → rename)
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| Error::Config(format!("Failed to create directory: {}", e)))?;

        let path = self.file_path(filename);
        let tmp = self.file_path(&format!(".{}.tmp", filename));
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| Error::Config(format!("Failed to serialize: {}", e)))?;

        std::fs::write(&tmp, content)
            .map_err(|e| Error::Config(format!("Failed to write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Config(format!("Failed to replace {}: {}", path.display(), e)))
    }
}
