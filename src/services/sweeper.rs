//! Reclamation Sweeper.
//!
//! Removes expired files (blob, then record) and, optionally, blobs that no
//! record ever claimed. Every step tolerates already-missing state, so passes
//! are idempotent and may race with lazy reclamation in the resolver.

use crate::services::share_service::{ShareResult, ShareService};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// Outcome of one reclamation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired files whose blob and record were both removed.
    pub cleaned: usize,
    /// Expired files left in place after a per-item failure.
    pub failed: usize,
    /// Unclaimed blobs removed by the orphan pass.
    pub orphans: usize,
}

impl ShareService {
    /// Reclaim every record expired as of now.
    pub async fn sweep_expired(&self) -> ShareResult<SweepReport> {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Only the initial scan can fail the pass; per-item failures are logged
    /// and counted in `failed`.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> ShareResult<SweepReport> {
        let expired = self.records.list_expired(now).await?;
        let mut report = SweepReport::default();

        for record in expired {
            if let Err(err) = self.blobs.delete(&record.object_path).await {
                warn!(file_id = %record.id, object_path = %record.object_path, error = %err, "cleanup: blob delete failed");
                report.failed += 1;
                continue;
            }
            if let Err(err) = self.records.delete(record.id).await {
                warn!(file_id = %record.id, error = %err, "cleanup: record delete failed");
                report.failed += 1;
                continue;
            }
            debug!(file_id = %record.id, share_id = %record.share_id, "reclaimed expired file");
            report.cleaned += 1;
        }

        Ok(report)
    }

    /// Delete blobs older than `grace` that no record references. These are
    /// uploads whose confirm phase never completed or failed.
    pub async fn sweep_orphans_at(&self, now: DateTime<Utc>, grace: Duration) -> ShareResult<usize> {
        let candidates = self.blobs.list_older_than(now - grace).await?;
        let mut removed = 0;

        for object_path in candidates {
            match self.records.get_by_object_path(&object_path).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => {
                    warn!(object_path = %object_path, error = %err, "orphan sweep: lookup failed");
                    continue;
                }
            }
            match self.blobs.delete(&object_path).await {
                Ok(()) => {
                    debug!(object_path = %object_path, "removed orphaned blob");
                    removed += 1;
                }
                Err(err) => warn!(object_path = %object_path, error = %err, "orphan sweep: delete failed"),
            }
        }

        Ok(removed)
    }

    /// Expiry pass, then an orphan pass when `orphan_grace` is set.
    pub async fn sweep_all_at(
        &self,
        now: DateTime<Utc>,
        orphan_grace: Option<Duration>,
    ) -> ShareResult<SweepReport> {
        let mut report = self.sweep_expired_at(now).await?;
        if let Some(grace) = orphan_grace {
            report.orphans = self.sweep_orphans_at(now, grace).await?;
        }
        Ok(report)
    }
}

/// Spawn a background task that periodically runs the sweeper.
///
/// Returns a `JoinHandle` that can be used to abort the task on shutdown.
pub fn spawn_sweeper(
    service: ShareService,
    interval: std::time::Duration,
    orphan_grace: Option<Duration>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so startup stays cheap.
        timer.tick().await;

        loop {
            timer.tick().await;
            match service.sweep_all_at(Utc::now(), orphan_grace).await {
                Ok(SweepReport {
                    cleaned: 0,
                    failed: 0,
                    orphans: 0,
                }) => {}
                Ok(report) => info!(
                    cleaned = report.cleaned,
                    failed = report.failed,
                    orphans = report.orphans,
                    "sweeper pass finished"
                ),
                Err(e) => warn!(error = %e, "sweeper pass failed"),
            }
        }
    })
}
