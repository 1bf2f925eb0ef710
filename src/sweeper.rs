use std::time::{Duration, SystemTime};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::ArtifactStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

/// Periodically deletes store files older than the retention threshold.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    store: ArtifactStore,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: ArtifactStore, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    pub async fn sweep_once(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        let stale = match self.store.list_older_than(self.retention, now).await {
            Ok(stale) => stale,
            Err(error) => {
                warn!("Retention sweep could not list the store: {error}");
                return report;
            }
        };

        for file in stale {
            match self.store.remove(&file).await {
                Ok(()) => {
                    debug!("Removed expired file {:?}", file.path);
                    report.removed += 1;
                }
                Err(error) => {
                    warn!("{error}");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Sweeps immediately, then once per interval until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Retention sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.sweep_once(SystemTime::now()).await;
                    if report.removed > 0 || report.failed > 0 {
                        info!(
                            "Retention sweep removed {} file(s), {} failure(s)",
                            report.removed, report.failed
                        );
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::store::{ArtifactId, ArtifactKind};
    use tempfile::tempdir;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[tokio::test]
    async fn files_past_retention_are_deleted() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let path = store.merged_path(ArtifactId::new(), "mp4");
        tokio::fs::write(&path, b"x").await.unwrap();

        let sweeper = RetentionSweeper::new(store, HOUR, HOUR);
        let report = sweeper
            .sweep_once(SystemTime::now() + Duration::from_secs(61 * 60))
            .await;

        assert_eq!(report, SweepReport { removed: 1, failed: 0 });
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn recent_files_are_retained() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let slot = store.reserve(ArtifactKind::Audio);
        let path = PathBuf::from(slot.template.to_string_lossy().replace("%(ext)s", "m4a"));
        tokio::fs::write(&path, b"x").await.unwrap();

        let sweeper = RetentionSweeper::new(store, HOUR, HOUR);
        let report = sweeper
            .sweep_once(SystemTime::now() + Duration::from_secs(30 * 60))
            .await;

        assert_eq!(report, SweepReport::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn cancelled_sweeper_stops() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let shutdown = CancellationToken::new();

        let handle = RetentionSweeper::new(store, HOUR, HOUR).spawn(shutdown.clone());
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
