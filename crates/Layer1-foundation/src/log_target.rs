//! Log targets
//!
//! 로거의 서브시스템 태그는 tracing `target`으로 표현한다.
//! `RUST_LOG=plugdeck::security=warn` 처럼 필터링할 수 있다.

/// 라이프사이클 이벤트, 핸들러 경고
pub const PLUGIN: &str = "plugdeck::plugin";

/// 경로 탐색(path traversal) 거부
pub const SECURITY: &str = "plugdeck::security";

/// 원격 poller 복제 신호
pub const REPLICATION: &str = "plugdeck::replication";

/// 원격 릴리스 수집 통계
pub const FETCH: &str = "plugdeck::fetch";
