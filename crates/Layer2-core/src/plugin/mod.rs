//! # Plugin Lifecycle
//!
//! 플러그인 디렉토리, 레지스트리, 링크된 모듈을 묶어 라이프사이클을 관리한다.
//!
//! ## 개요
//!
//! - `descriptor`: `INFO` 파일 파싱과 설치 가능 여부 검증
//! - `dependency`: `requires` 절 평가, 역의존성 조회
//! - `capability`: capability 집합과 hook 필터링 규칙
//! - `manager`: install / uninstall / enable / disable / archive / restore
//! - `discovery`: 디렉토리 스캔과 운영자용 목록
//! - `releases`: 원격 저장소에서 릴리스 메타데이터 수집
//! - `replication`: 원격 poller로 레지스트리 변경 전달
//!
//! ## 상태 흐름
//!
//! ```text
//!   (negative) ──┐
//!                ▼
//!   discovered (0) ── install ──▶ inactive (4) / config issues (2)
//!                                   │  ▲
//!                            enable │  │ disable
//!                                   ▼  │
//!                                 active (1) ── handler 누락 ──▶ disabled by error (7)
//! ```
//!
//! ## 예시
//!
//! ```ignore
//! let modules = Arc::new(ModuleRegistry::new().with(Arc::new(Thold)));
//! let manager = PluginManager::new(config, storage, modules);
//!
//! manager.install("thold").await?;
//! manager.enable("thold").await?;
//! ```

mod archive;
mod capability;
mod dependency;
mod descriptor;
mod discovery;
mod manager;
mod registry;
mod releases;
mod replication;
mod status;
mod traits;
mod version;

pub use archive::{
    apply_restore, hash_directory, list_files, pack_directory, plan_restore, read_entries,
    snapshot_directory, ArchiveEntry, ArchiveLayout, DirectorySnapshot, RestorePlan,
    RestoreReport,
};
pub use capability::{
    capabilities_of, required_capabilities, should_run, Capability, CapabilitySet, HookKind,
    INTERNAL_PLUGIN,
};
pub use dependency::{
    can_install, dependents_of, parse_requires, DependencyCheck, Requirement, UnmetDependency,
};
pub use descriptor::{
    descriptor_path, load_descriptor, parse_ini, ucfirst, Descriptor, DescriptorCache,
    DescriptorIssue, IniDocument, DESCRIPTOR_FILE,
};
pub use discovery::{PluginDiscovery, PluginListing, ScanSummary};
pub use manager::{
    validate_plugin_id, ArchiveOutcome, InstallOutcome, PluginCheckReport, PluginManager,
    RestoreOutcome, RestoreSource, UninstallOutcome,
};
pub use registry::ModuleRegistry;
pub use releases::{
    FetchSummary, GithubApi, ReleaseFetcher, ReleaseInfo, RepositoryApi, DEVELOP_TAG,
    REPO_PREFIX,
};
pub use replication::{NoopTransport, ReplicationTransport, Replicator, PLUGINS_CLASS};
pub use status::{InstalledState, PluginStatus, UnavailableReason, ARCHIVED_CODE};
pub use traits::{ConfigCheck, ContextPhase, ModuleVersion, PluginContext, PluginModule};
pub use version::{compare_versions, Comparator, LooseVersion, VersionClause, VersionRange};
