//! Replication - 원격 poller로 레지스트리 변경 신호 전달
//!
//! 레지스트리를 바꾸는 모든 라이프사이클 작업 뒤에 호출된다.
//! 전송 실패는 로그만 남기고 로컬 작업을 실패시키지 않는다.

use async_trait::async_trait;
use plugdeck_foundation::{log_target, PollerRecord, Result, Storage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 복제 대상 테이블 그룹
pub const PLUGINS_CLASS: &str = "plugins";

/// 원격 poller 전송 계층
#[async_trait]
pub trait ReplicationTransport: Send + Sync {
    /// 지정한 클래스의 테이블을 poller로 밀어낸다
    async fn replicate_out(&self, poller_id: i64, class: &str) -> Result<()>;

    /// poller에서 플러그인 테이블 삭제
    async fn drop_table(&self, poller_id: i64, table: &str) -> Result<()>;
}

/// 아무것도 보내지 않는 전송 (단일 노드)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransport;

#[async_trait]
impl ReplicationTransport for NoopTransport {
    async fn replicate_out(&self, _poller_id: i64, _class: &str) -> Result<()> {
        Ok(())
    }

    async fn drop_table(&self, _poller_id: i64, _table: &str) -> Result<()> {
        Ok(())
    }
}

/// 복제 신호 발신기
#[derive(Clone)]
pub struct Replicator {
    storage: Storage,
    transport: Arc<dyn ReplicationTransport>,
    poller_interval: Duration,
}

impl Replicator {
    pub fn new(
        storage: Storage,
        transport: Arc<dyn ReplicationTransport>,
        poller_interval: Duration,
    ) -> Self {
        Self {
            storage,
            transport,
            poller_interval,
        }
    }

    /// 최근 heartbeat가 있는 원격 poller (id > 1, 활성)
    pub fn fresh_pollers(&self) -> Result<Vec<PollerRecord>> {
        let now = chrono::Utc::now().timestamp();
        self.fresh_pollers_at(now)
    }

    fn fresh_pollers_at(&self, now: i64) -> Result<Vec<PollerRecord>> {
        let window = (self.poller_interval.as_secs() as i64).saturating_mul(2);
        Ok(self
            .storage
            .list_pollers()?
            .into_iter()
            .filter(|p| p.id > 1 && !p.disabled)
            .filter(|p| now - p.last_seen < window)
            .collect())
    }

    /// 레지스트리 변경 신호. 보낸 poller 수를 돌려준다
    pub async fn replicate(&self) -> usize {
        let pollers = match self.fresh_pollers() {
            Ok(pollers) => pollers,
            Err(e) => {
                warn!(target: log_target::REPLICATION, "Unable to list pollers: {}", e);
                return 0;
            }
        };

        let mut sent = 0;
        for poller in pollers {
            match self.transport.replicate_out(poller.id, PLUGINS_CLASS).await {
                Ok(()) => {
                    debug!(
                        target: log_target::REPLICATION,
                        poller = poller.id,
                        hostname = %poller.hostname,
                        "Replicated plugin tables"
                    );
                    sent += 1;
                }
                Err(e) => warn!(
                    target: log_target::REPLICATION,
                    poller = poller.id,
                    hostname = %poller.hostname,
                    "Plugin replication failed: {}",
                    e
                ),
            }
        }
        sent
    }

    /// 모든 원격 poller에서 테이블 삭제 (heartbeat와 무관)
    pub async fn drop_remote_table(&self, table: &str) -> usize {
        let pollers = match self.storage.list_pollers() {
            Ok(pollers) => pollers,
            Err(e) => {
                warn!(target: log_target::REPLICATION, "Unable to list pollers: {}", e);
                return 0;
            }
        };

        let mut dropped = 0;
        for poller in pollers.into_iter().filter(|p| p.id > 1) {
            match self.transport.drop_table(poller.id, table).await {
                Ok(()) => dropped += 1,
                Err(e) => warn!(
                    target: log_target::REPLICATION,
                    poller = poller.id,
                    table,
                    "Remote table drop failed: {}",
                    e
                ),
            }
        }
        dropped
    }
}

impl std::fmt::Debug for Replicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicator")
            .field("poller_interval", &self.poller_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use plugdeck_foundation::Error;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(i64, String)>>,
        fail_for: Option<i64>,
    }

    #[async_trait]
    impl ReplicationTransport for Recording {
        async fn replicate_out(&self, poller_id: i64, class: &str) -> Result<()> {
            if self.fail_for == Some(poller_id) {
                return Err(Error::Http("connection refused".into()));
            }
            self.sent.lock().push((poller_id, class.to_string()));
            Ok(())
        }

        async fn drop_table(&self, poller_id: i64, table: &str) -> Result<()> {
            self.sent.lock().push((poller_id, format!("drop:{}", table)));
            Ok(())
        }
    }

    fn poller(id: i64, disabled: bool, last_seen: i64) -> PollerRecord {
        PollerRecord {
            id,
            hostname: format!("poller-{}", id),
            disabled,
            last_seen,
        }
    }

    fn seeded() -> Storage {
        let storage = Storage::in_memory().unwrap();
        let now = chrono::Utc::now().timestamp();
        storage.upsert_poller(&poller(1, false, now)).unwrap();
        storage.upsert_poller(&poller(2, false, now - 10)).unwrap();
        storage.upsert_poller(&poller(3, true, now)).unwrap();
        storage.upsert_poller(&poller(4, false, now - 10_000)).unwrap();
        storage.upsert_poller(&poller(5, false, now - 100)).unwrap();
        storage
    }

    #[tokio::test]
    async fn test_replicates_only_fresh_remote_pollers() {
        let transport = Arc::new(Recording::default());
        let replicator = Replicator::new(seeded(), transport.clone(), Duration::from_secs(300));

        assert_eq!(replicator.replicate().await, 2);
        let sent = transport.sent.lock().clone();
        assert_eq!(
            sent,
            vec![(2, "plugins".to_string()), (5, "plugins".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_pollers() {
        let transport = Arc::new(Recording {
            fail_for: Some(2),
            ..Default::default()
        });
        let replicator = Replicator::new(seeded(), transport.clone(), Duration::from_secs(300));

        assert_eq!(replicator.replicate().await, 1);
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_remote_table_ignores_heartbeat() {
        let transport = Arc::new(Recording::default());
        let replicator = Replicator::new(seeded(), transport.clone(), Duration::from_secs(300));

        assert_eq!(replicator.drop_remote_table("thold_data").await, 4);
    }
}
