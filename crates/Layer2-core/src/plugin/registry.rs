//! Module Registry - 플러그인 모듈 저장소
//!
//! 디렉토리 이름 → `PluginModule`. 디스패처는 동기 경로에서 핸들러를 찾으므로
//! 잠금은 `parking_lot::RwLock`을 사용한다.

use super::traits::PluginModule;
use crate::hook::HookHandler;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 플러그인 모듈 레지스트리
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<dyn PluginModule>>>,
}

impl ModuleRegistry {
    /// 새 레지스트리 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 모듈 등록. 같은 디렉토리가 이미 있으면 false
    pub fn register(&self, module: Arc<dyn PluginModule>) -> bool {
        let directory = module.directory().to_string();
        let mut modules = self.modules.write();

        if modules.contains_key(&directory) {
            warn!("Plugin module {} is already registered", directory);
            return false;
        }

        modules.insert(directory.clone(), module);
        info!("Registered plugin module: {}", directory);
        true
    }

    /// 빌더 스타일 등록
    pub fn with(self, module: Arc<dyn PluginModule>) -> Self {
        self.register(module);
        self
    }

    /// 모듈 등록 해제
    pub fn unregister(&self, directory: &str) -> Option<Arc<dyn PluginModule>> {
        let removed = self.modules.write().remove(directory);
        if removed.is_some() {
            debug!("Unregistered plugin module: {}", directory);
        }
        removed
    }

    /// 모듈 조회
    pub fn get(&self, directory: &str) -> Option<Arc<dyn PluginModule>> {
        self.modules.read().get(directory).cloned()
    }

    pub fn contains(&self, directory: &str) -> bool {
        self.modules.read().contains_key(directory)
    }

    /// 핸들러 조회: 모듈이 없거나 함수가 없으면 None
    pub fn handler(&self, directory: &str, function: &str) -> Option<HookHandler> {
        self.get(directory)?.handler(function)
    }

    /// 등록된 디렉토리 (정렬)
    pub fn directories(&self) -> Vec<String> {
        let mut dirs: Vec<String> = self.modules.read().keys().cloned().collect();
        dirs.sort();
        dirs
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.directories())
            .finish()
    }
}
