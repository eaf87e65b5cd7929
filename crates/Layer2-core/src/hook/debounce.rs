//! Warning debounce
//!
//! 누락된 핸들러 경고를 (plugin, hook) 단위로 TTL 동안 한 번만 남긴다.
//! 디스패치 컨텍스트보다 오래 살아야 하므로 디스패처가 소유한다.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// (plugin, hook) 키 기반 경고 제한기
#[derive(Debug)]
pub struct WarningLimiter {
    ttl: Duration,
    seen: Mutex<HashMap<(String, String), Instant>>,
}

impl WarningLimiter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// 이번에 경고를 남겨야 하면 true
    pub fn should_warn(&self, plugin: &str, hook: &str) -> bool {
        self.should_warn_at(plugin, hook, Instant::now())
    }

    fn should_warn_at(&self, plugin: &str, hook: &str, now: Instant) -> bool {
        let mut seen = self.seen.lock();
        let key = (plugin.to_string(), hook.to_string());

        match seen.get(&key) {
            Some(last) if now.duration_since(*last) < self.ttl => false,
            _ => {
                seen.insert(key, now);
                true
            }
        }
    }

    /// 만료된 항목 정리
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.seen
            .lock()
            .retain(|_, last| now.duration_since(*last) < self.ttl);
    }

    pub fn reset(&self) {
        self.seen.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_once_per_ttl() {
        let limiter = WarningLimiter::new(Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.should_warn_at("thold", "config_arrays", start));
        assert!(!limiter.should_warn_at("thold", "config_arrays", start + Duration::from_secs(10)));
        assert!(limiter.should_warn_at("thold", "page_head", start));
        assert!(limiter.should_warn_at("monitor", "config_arrays", start));
        assert!(limiter.should_warn_at("thold", "config_arrays", start + Duration::from_secs(61)));
    }

    #[test]
    fn test_reset() {
        let limiter = WarningLimiter::new(Duration::from_secs(60));
        assert!(limiter.should_warn("a", "b"));
        limiter.reset();
        assert!(limiter.should_warn("a", "b"));
    }
}
