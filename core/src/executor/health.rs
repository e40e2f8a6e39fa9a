use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use super::engine::SessionEngine;
use super::pool::{Worker, WorkerStatus};
use super::traits::WorkExecutor;
use super::types::{EngineConfig, WorkerId};

/// Detects busy workers that stopped heartbeating.
///
/// Detection is bounded by `timeout + interval`: a worker that goes silent
/// right after a scan is caught by the first scan past its deadline.
#[derive(Debug, Clone, Copy)]
pub struct HealthMonitor {
    interval: Duration,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.heartbeat_interval(), config.heartbeat_timeout())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Busy workers whose last heartbeat is older than the timeout.
    pub fn scan<'a>(&self, workers: impl IntoIterator<Item = &'a Worker>, now: Instant) -> Vec<WorkerId> {
        workers
            .into_iter()
            .filter(|w| w.status == WorkerStatus::Busy)
            .filter(|w| now.saturating_duration_since(w.last_heartbeat) > self.timeout)
            .map(|w| w.id)
            .collect()
    }

    /// Scan the session's pool every interval until the task is aborted.
    pub(crate) async fn watch<E: WorkExecutor>(self, engine: Arc<SessionEngine<E>>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            engine.check_health(&self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: WorkerId, status: WorkerStatus, last_heartbeat: Instant) -> Worker {
        Worker {
            id,
            status,
            current_task: None,
            last_heartbeat,
            tasks_completed: 0,
        }
    }

    #[test]
    fn flags_only_silent_busy_workers() {
        let monitor = HealthMonitor::new(Duration::from_millis(100), Duration::from_secs(1));
        let start = Instant::now();
        let workers = vec![
            worker(0, WorkerStatus::Busy, start),
            worker(1, WorkerStatus::Idle, start),
            worker(2, WorkerStatus::Busy, start + Duration::from_millis(900)),
        ];

        assert!(monitor.scan(&workers, start + Duration::from_millis(500)).is_empty());
        assert_eq!(monitor.scan(&workers, start + Duration::from_millis(1500)), vec![0]);
        assert_eq!(monitor.scan(&workers, start + Duration::from_secs(3)), vec![0, 2]);
    }

    #[test]
    fn exact_timeout_is_not_stale() {
        let monitor = HealthMonitor::new(Duration::from_millis(10), Duration::from_millis(50));
        let start = Instant::now();
        let workers = [worker(0, WorkerStatus::Busy, start)];
        assert!(monitor.scan(&workers, start + Duration::from_millis(50)).is_empty());
    }

    #[test]
    fn from_config_uses_heartbeat_settings() {
        let config = EngineConfig {
            heartbeat_interval_ms: 20,
            heartbeat_timeout_ms: 200,
            ..EngineConfig::default()
        };
        let monitor = HealthMonitor::from_config(&config);
        assert_eq!(monitor.interval(), Duration::from_millis(20));
        assert_eq!(monitor.timeout(), Duration::from_millis(200));
    }
}
