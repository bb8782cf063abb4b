// # Sync State Store Trait
//
// Defines the interface for durable sync-run history.
//
// ## Purpose
//
// Every trigger produces exactly one persisted `SyncRun`; the
// orchestrator writes each lifecycle transition through `record_run`,
// and the status-reporting interface reads runs back without ever
// blocking an in-progress run's writes.
//
// ## Ownership
//
// The orchestrator is the sole writer. Runs are append-only from the
// reader's point of view: a run is upserted by `run_id` while alive and
// never mutated after reaching a terminal status.

use async_trait::async_trait;

use crate::model::SyncRun;

/// Trait for sync-run store implementations
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Persist a run, upserting by `run_id`
    ///
    /// Called once per lifecycle transition (pending, running, terminal).
    async fn record_run(&self, run: &SyncRun) -> Result<(), crate::Error>;

    /// Get the most recently created run, if any ever existed
    async fn latest_status(&self) -> Result<Option<SyncRun>, crate::Error>;

    /// Get up to `limit` runs, most recent first
    async fn status_history(&self, limit: usize) -> Result<Vec<SyncRun>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
