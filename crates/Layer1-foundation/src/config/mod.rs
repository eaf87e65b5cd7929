//! Config - 통합 설정 관리
//!
//! - `plugdeck.rs` - PlugdeckConfig 통합 설정

mod plugdeck;

pub use plugdeck::{
    ConnectionMode, DispatchConfig, HostConfig, NodeConfig, PathsConfig, PlugdeckConfig,
    RepositoryConfig, DEFAULT_PRESERVED_FILES, PLUGDECK_CONFIG_FILE,
};
