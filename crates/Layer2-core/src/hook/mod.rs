//! # Hook System
//!
//! 플러그인이 등록한 핸들러를 이름 있는 확장 지점(Hook)에서 실행한다.
//!
//! ## 개요
//!
//! - 바인딩은 레지스트리(`plugin_hooks`)에 있고, 소유 플러그인의 로드 순서
//!   (`plugin_config.id`)대로 실행된다
//! - 핸들러 구현은 `PluginModule::handler`가 함수 이름으로 돌려준다
//! - 캐시는 `DispatchContext` 단위이며 프로세스 전역 상태가 없다
//!
//! ## 예시
//!
//! ```ignore
//! let dispatcher = HookDispatcher::new(storage, modules, &config);
//! let mut ctx = dispatcher.context();
//!
//! dispatcher.dispatch(&mut ctx, "page_head", vec![])?;
//! let actions = dispatcher.dispatch_function(&mut ctx, "device_action_array", json!({}))?;
//! ```

mod debounce;
mod dispatcher;
mod types;

pub use debounce::WarningLimiter;
pub use dispatcher::{DispatchContext, HookDispatcher};
pub use types::{
    ActionFn, ContractViolation, DispatchReport, FilterFn, HandlerOutcome, HandlerReport,
    HookHandler,
};
