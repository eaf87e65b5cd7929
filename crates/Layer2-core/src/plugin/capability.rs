//! Remote Capability - 분산 배포용 플러그인 capability
//!
//! descriptor의 `capabilities` 필드(`online_view:1 remote_collect:1` 형식)를
//! 파싱하고, 원격(non-primary) 노드에서 어떤 Hook을 실행할지 결정한다.
//!
//! ## 규칙
//!
//! - 필요 capability 테이블에 없는 Hook은 항상 실행
//! - `remote_collect`/`remote_poller`는 연결 모드와 무관하게 선언만 있으면 실행
//! - online 모드는 `online_*`, offline/recovery 모드는 `offline_*`만 본다
//! - 같은 모드의 `*_mgmt`는 `*_view`를 포함한다

use super::descriptor::DescriptorCache;
use plugdeck_foundation::ConnectionMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 호스트 자체를 나타내는 가상 플러그인
pub const INTERNAL_PLUGIN: &str = "internal";

/// capability 어휘
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    OnlineView,
    OnlineMgmt,
    OfflineView,
    OfflineMgmt,
    RemoteCollect,
    RemotePoller,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::OnlineView,
        Capability::OnlineMgmt,
        Capability::OfflineView,
        Capability::OfflineMgmt,
        Capability::RemoteCollect,
        Capability::RemotePoller,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::OnlineView => "online_view",
            Capability::OnlineMgmt => "online_mgmt",
            Capability::OfflineView => "offline_view",
            Capability::OfflineMgmt => "offline_mgmt",
            Capability::RemoteCollect => "remote_collect",
            Capability::RemotePoller => "remote_poller",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    fn index(&self) -> usize {
        *self as usize
    }

    /// 연결 모드와 무관한 capability
    fn is_mode_independent(&self) -> bool {
        matches!(self, Capability::RemoteCollect | Capability::RemotePoller)
    }

    /// 이 capability가 해당 모드에서 의미가 있는지
    fn applies_to(&self, mode: ConnectionMode) -> bool {
        match self {
            Capability::OnlineView | Capability::OnlineMgmt => mode == ConnectionMode::Online,
            Capability::OfflineView | Capability::OfflineMgmt => mode != ConnectionMode::Online,
            Capability::RemoteCollect | Capability::RemotePoller => true,
        }
    }

    /// view를 포함하는 mgmt
    fn implied_by(&self) -> Option<Capability> {
        match self {
            Capability::OnlineView => Some(Capability::OnlineMgmt),
            Capability::OfflineView => Some(Capability::OfflineMgmt),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CapabilitySet
// ============================================================================

/// 선언된 capability 집합
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    flags: [bool; 6],
}

impl CapabilitySet {
    /// `name:0|1` 토큰 목록 파싱. 모르는 토큰은 무시
    pub fn parse(s: &str) -> Self {
        let mut set = Self::default();
        for token in s.split_whitespace() {
            let (name, value) = token.split_once(':').unwrap_or((token, "0"));
            if let Some(cap) = Capability::parse(name.trim()) {
                set.flags[cap.index()] = value.trim() == "1";
            }
        }
        set
    }

    /// 호스트 자신: 전부 true
    pub fn internal() -> Self {
        Self { flags: [true; 6] }
    }

    pub fn with(mut self, cap: Capability) -> Self {
        self.flags[cap.index()] = true;
        self
    }

    /// 직접 선언 여부
    pub fn declares(&self, cap: Capability) -> bool {
        self.flags[cap.index()]
    }

    /// mgmt → view 포함 규칙을 적용한 보유 여부
    pub fn has(&self, cap: Capability) -> bool {
        self.declares(cap) || cap.implied_by().is_some_and(|m| self.declares(m))
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.declares(*c))
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = Capability::ALL
            .iter()
            .map(|c| format!("{}:{}", c, self.declares(*c) as u8))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

// ============================================================================
// Required capability tables
// ============================================================================

/// Hook 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// 인자 목록을 통과시키는 부수효과 Hook
    Action,
    /// 값을 연쇄 변환하는 Hook
    Filter,
}

const COLLECT: &[Capability] = &[Capability::RemoteCollect];
const POLLER: &[Capability] = &[Capability::RemotePoller];
const VIEW: &[Capability] = &[Capability::OnlineView, Capability::OfflineView];
const MGMT: &[Capability] = &[Capability::OnlineMgmt, Capability::OfflineMgmt];

/// Hook 실행에 필요한 capability. 테이블에 없으면 None
pub fn required_capabilities(kind: HookKind, hook: &str) -> Option<&'static [Capability]> {
    match kind {
        HookKind::Action => match hook {
            "poller_top" | "update_host_status" | "poller_output" | "poller_finishing"
            | "poller_exiting" => Some(COLLECT),
            "poller_bottom" => Some(POLLER),
            "page_head" | "top_header_tabs" | "top_graph_header_tabs" | "graph_buttons" => {
                Some(VIEW)
            }
            "graphs_new_top_links" => Some(MGMT),
            _ => None,
        },
        HookKind::Filter => match hook {
            "poller_output" | "cacti_stats_update" => Some(COLLECT),
            "top_header" | "top_graph_header" | "rrd_graph_graph_options" => Some(VIEW),
            "data_sources_table" | "device_action_array" | "data_source_action_array"
            | "graphs_action_array" => Some(MGMT),
            _ => None,
        },
    }
}

/// 원격 노드에서 Hook을 실행할지 결정
pub fn should_run(
    caps: &CapabilitySet,
    required: Option<&[Capability]>,
    mode: ConnectionMode,
) -> bool {
    let Some(required) = required else {
        return true;
    };

    required.iter().any(|cap| {
        if cap.is_mode_independent() {
            caps.declares(*cap)
        } else {
            cap.applies_to(mode) && caps.has(*cap)
        }
    })
}

/// 플러그인의 capability 집합
///
/// descriptor가 없거나 읽을 수 없으면 전부 false.
pub fn capabilities_of(plugin: &str, cache: &mut DescriptorCache) -> CapabilitySet {
    if plugin == INTERNAL_PLUGIN {
        return CapabilitySet::internal();
    }

    let descriptor = cache.get(plugin);
    if descriptor.issue.is_some() {
        return CapabilitySet::default();
    }
    descriptor.capability_set()
}
