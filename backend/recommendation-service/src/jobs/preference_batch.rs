// ============================================
// Preference Batch Job (用戶偏好批量更新任務)
// ============================================
//
// Periodically rebuilds preference vectors for recently active users.
// Designed to run as a Kubernetes CronJob or standalone process.
//
// Workflow:
// 1. Fetch users with enough interactions in the lookback window
// 2. Rebuild each user's preference (single upsert per user)
// 3. Drop the cached preference so the serving path picks it up
//
// Usage:
//   recommendation-service --mode preference-batch

use crate::services::profile_builder::PreferenceBuilder;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::info;

/// Preference batch job statistics
#[derive(Debug, Clone, Default)]
pub struct BatchJobStats {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub users_processed: usize,
    pub users_updated: usize,
    pub users_skipped: usize,
    pub users_failed: usize,
    pub total_duration_ms: u64,
}

/// Preference batch job runner
pub struct PreferenceBatchJob {
    builder: Arc<PreferenceBuilder>,
}

impl PreferenceBatchJob {
    pub fn new(builder: Arc<PreferenceBuilder>) -> Self {
        Self { builder }
    }

    /// Run one pass, or loop on the configured interval when `run_once` is off.
    pub async fn run(&self) -> Result<BatchJobStats> {
        loop {
            let stats = self.run_single_pass().await?;

            info!(
                processed = stats.users_processed,
                updated = stats.users_updated,
                skipped = stats.users_skipped,
                failed = stats.users_failed,
                duration_ms = stats.total_duration_ms,
                "Preference batch job pass completed"
            );

            let config = self.builder.config();
            if config.run_once {
                return Ok(stats);
            }

            info!(interval_secs = config.interval_secs, "Sleeping until next pass");
            sleep(Duration::from_secs(config.interval_secs)).await;
        }
    }

    pub async fn run_single_pass(&self) -> Result<BatchJobStats> {
        let start_time = Instant::now();
        let started_at = Utc::now();

        let summary = self.builder.rebuild_active_users().await?;

        Ok(BatchJobStats {
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            users_processed: summary.total_users,
            users_updated: summary.updated,
            users_skipped: summary.skipped,
            users_failed: summary.errors,
            total_duration_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}
