// ============================================
// Background Jobs Module (後台任務模組)
// ============================================
//
// Contains background job runners for:
// 1. Preference vector rebuilds (active-user sweep)
// 2. Product embedding backfill
//
// These jobs can be triggered via:
// - CronJob (Kubernetes)
// - Command line argument (--mode preference-batch | embedding-refresh)

pub mod embedding_refresh;
pub mod preference_batch;

pub use embedding_refresh::{EmbeddingRefreshJob, EmbeddingRefreshStats};
pub use preference_batch::{BatchJobStats, PreferenceBatchJob};
