//! Hook 타입 정의
//!
//! - `HookHandler`: 플러그인 모듈이 함수 이름에 대해 돌려주는 핸들러
//! - `HandlerOutcome` / `DispatchReport`: 한 번의 디스패치에서 각 핸들러가
//!   어떻게 처리되었는지

use crate::plugin::HookKind;
use plugdeck_foundation::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// HookHandler
// ============================================================================

/// 부수효과 Hook 핸들러: 인자 목록을 받기만 한다
pub type ActionFn = dyn Fn(&[Value]) -> Result<()> + Send + Sync;

/// 값 변환 Hook 핸들러: 값을 받아 같은 모양의 값을 돌려준다
pub type FilterFn = dyn Fn(Value) -> Result<Value> + Send + Sync;

/// Hook 핸들러
#[derive(Clone)]
pub enum HookHandler {
    Action(Arc<ActionFn>),
    Filter(Arc<FilterFn>),
}

impl HookHandler {
    pub fn action(f: impl Fn(&[Value]) -> Result<()> + Send + Sync + 'static) -> Self {
        HookHandler::Action(Arc::new(f))
    }

    pub fn filter(f: impl Fn(Value) -> Result<Value> + Send + Sync + 'static) -> Self {
        HookHandler::Filter(Arc::new(f))
    }

    pub fn kind(&self) -> HookKind {
        match self {
            HookHandler::Action(_) => HookKind::Action,
            HookHandler::Filter(_) => HookKind::Filter,
        }
    }
}

impl fmt::Debug for HookHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookHandler::Action(_) => write!(f, "HookHandler::Action"),
            HookHandler::Filter(_) => write!(f, "HookHandler::Filter"),
        }
    }
}

// ============================================================================
// Dispatch report
// ============================================================================

/// 핸들러 하나의 처리 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum HandlerOutcome {
    /// 실행됨
    Ran,
    /// 호스트 내장 플러그인
    SkippedIntegrated,
    /// 원격 노드에서 capability 부족
    SkippedCapability,
    /// 경로 탐색 시도로 거부
    SecurityRejected,
    /// 핸들러 파일 없음
    FileMissing,
    /// 모듈이 없거나 함수가 없음
    FunctionMissing,
    /// Action/Filter 종류 불일치
    WrongKind,
    /// 핸들러가 에러 반환
    Failed(String),
    /// 핸들러 panic
    Panicked(String),
}

impl HandlerOutcome {
    pub fn ran(&self) -> bool {
        matches!(self, HandlerOutcome::Ran)
    }
}

/// 핸들러 처리 기록
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerReport {
    pub plugin: String,
    pub function: String,
    pub outcome: HandlerOutcome,
}

/// 값 변환 Hook의 계약 위반 (모양이 바뀜)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractViolation {
    pub plugin: String,
    pub function: String,
}

/// 디스패치 결과 보고
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub hook: String,
    pub handlers: Vec<HandlerReport>,
    pub violations: Vec<ContractViolation>,
}

impl DispatchReport {
    pub fn new(hook: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            ..Default::default()
        }
    }

    pub(crate) fn record(&mut self, plugin: &str, function: &str, outcome: HandlerOutcome) {
        self.handlers.push(HandlerReport {
            plugin: plugin.to_string(),
            function: function.to_string(),
            outcome,
        });
    }

    /// 실행된 플러그인 (순서대로)
    pub fn ran(&self) -> Vec<&str> {
        self.handlers
            .iter()
            .filter(|h| h.outcome.ran())
            .map(|h| h.plugin.as_str())
            .collect()
    }

    pub fn outcome_of(&self, plugin: &str) -> Option<&HandlerOutcome> {
        self.handlers
            .iter()
            .find(|h| h.plugin == plugin)
            .map(|h| &h.outcome)
    }
}
