//! 바이너리에 링크된 플러그인 모듈
//!
//! 플러그인 코드는 런타임에 로드되지 않는다. 호스트 빌드에 함께 링크된
//! 모듈만 install / dispatch 대상이 된다.

use async_trait::async_trait;
use plugdeck_core::{
    ConfigCheck, HookHandler, ModuleRegistry, ModuleVersion, PluginContext, PluginModule,
};
use plugdeck_foundation::Result;
use serde_json::{json, Value};
use tracing::info;

/// 이 빌드에 포함된 모듈
pub fn linked_modules() -> ModuleRegistry {
    ModuleRegistry::new().with(std::sync::Arc::new(Hello))
}

// ============================================================================
// hello
// ============================================================================

/// 예제 플러그인: 설정 Hook, 페이지 Hook, 장치 action 필터, realm 하나
struct Hello;

#[async_trait]
impl PluginModule for Hello {
    fn directory(&self) -> &str {
        "hello"
    }

    fn version(&self) -> Option<ModuleVersion> {
        Some(
            ModuleVersion::new("Hello", "1.0")
                .with_author("Plugdeck Contributors")
                .with_homepage("https://github.com/plugdeck/plugdeck"),
        )
    }

    async fn install(&self, ctx: &PluginContext) -> Option<Result<()>> {
        Some(register(ctx))
    }

    async fn setup_hooks(&self, ctx: &PluginContext) -> Option<Result<()>> {
        Some(register(ctx))
    }

    fn check_config(&self) -> Option<ConfigCheck> {
        Some(ConfigCheck::Ready)
    }

    fn handler(&self, function: &str) -> Option<HookHandler> {
        match function {
            "hello_config_settings" => Some(HookHandler::action(|_| Ok(()))),
            "hello_page_head" => Some(HookHandler::action(|args: &[Value]| {
                info!(args = args.len(), "hello: page_head");
                Ok(())
            })),
            "hello_device_action_array" => Some(HookHandler::filter(|value: Value| {
                let mut actions = match value {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                actions.insert("hello_greet".to_string(), json!("Say hello"));
                Ok(Value::Object(actions))
            })),
            _ => None,
        }
    }
}

fn register(ctx: &PluginContext) -> Result<()> {
    ctx.register_hook("config_settings", "setup.php", "hello_config_settings", true)?;
    ctx.register_hook("page_head", "setup.php", "hello_page_head", true)?;
    ctx.register_hook(
        "device_action_array",
        "setup.php",
        "hello_device_action_array",
        true,
    )?;
    ctx.register_realm("hello.php", "View Hello Page")?;
    Ok(())
}
