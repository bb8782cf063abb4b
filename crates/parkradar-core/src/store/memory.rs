// # Memory Store
//
// In-memory implementation of LotStore and SyncStateStore.
//
// ## Purpose
//
// Backs tests and deployments where persistence across restarts is not
// required; the first sync after a restart simply repopulates the store.
//
// ## Crash Behavior
//
// - All rows and run history are lost on restart/crash
// - No recovery possible (state is in-memory only)

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{City, ParkingLot, SyncRun};
use crate::traits::{LotStore, SyncStateStore};

/// In-memory store implementation
///
/// Rows live in a `BTreeMap` keyed by `(city, park_id)` behind an
/// `RwLock`, so iteration order is deterministic and `commit_city` is
/// atomic under the single write lock. Run history is an insertion-
/// ordered vector upserted by `run_id`.
///
/// # Example
///
/// ```rust,no_run
/// use parkradar_core::store::MemoryStore;
/// use parkradar_core::traits::LotStore;
/// use parkradar_core::model::City;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///     let lots = store.lots_for_city(City::Taipei).await?;
///     assert!(lots.is_empty());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    lots: Arc<RwLock<BTreeMap<(City, String), ParkingLot>>>,
    runs: Arc<RwLock<Vec<SyncRun>>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of lot rows in the store
    pub async fn lot_count(&self) -> usize {
        self.lots.read().await.len()
    }

    /// Get the number of recorded runs
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Clear all rows and run history
    pub async fn clear(&self) {
        self.lots.write().await.clear();
        self.runs.write().await.clear();
    }
}

#[async_trait]
impl LotStore for MemoryStore {
    async fn get(&self, city: City, park_id: &str) -> Result<Option<ParkingLot>, Error> {
        let guard = self.lots.read().await;
        Ok(guard.get(&(city, park_id.to_string())).cloned())
    }

    async fn lots_for_city(&self, city: City) -> Result<Vec<ParkingLot>, Error> {
        let guard = self.lots.read().await;
        Ok(guard
            .range((city, String::new())..)
            .take_while(|((c, _), _)| *c == city)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn all_lots(&self) -> Result<Vec<ParkingLot>, Error> {
        let guard = self.lots.read().await;
        Ok(guard.values().cloned().collect())
    }

    async fn commit_city(&self, city: City, rows: Vec<ParkingLot>) -> Result<(), Error> {
        // Validate the whole batch before touching the map, so a bad
        // batch commits nothing.
        if let Some(row) = rows.iter().find(|r| r.city != city) {
            return Err(Error::store(format!(
                "Batch for {} contains a row for {}",
                city, row.city
            )));
        }

        let mut guard = self.lots.write().await;
        for row in rows {
            guard.insert((city, row.park_id.clone()), row);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory store (everything is already "persisted")
        Ok(())
    }
}

#[async_trait]
impl SyncStateStore for MemoryStore {
    async fn record_run(&self, run: &SyncRun) -> Result<(), Error> {
        let mut guard = self.runs.write().await;
        match guard.iter_mut().find(|r| r.run_id == run.run_id) {
            Some(existing) => *existing = run.clone(),
            None => guard.push(run.clone()),
        }
        Ok(())
    }

    async fn latest_status(&self) -> Result<Option<SyncRun>, Error> {
        let guard = self.runs.read().await;
        Ok(guard.last().cloned())
    }

    async fn status_history(&self, limit: usize) -> Result<Vec<SyncRun>, Error> {
        let guard = self.runs.read().await;
        Ok(guard.iter().rev().take(limit).cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalLot, ParkingType, RunStatus};
    use chrono::Utc;

    fn row(city: City, park_id: &str) -> ParkingLot {
        ParkingLot::from_canonical(
            city,
            CanonicalLot {
                park_id: park_id.to_string(),
                name: park_id.to_string(),
                address: None,
                coordinates: None,
                total_spaces: None,
                available_spaces: None,
                fare_description: None,
                parking_type: ParkingType::OffStreet,
                data_updated_at: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn city_scoped_reads() {
        let store = MemoryStore::new();
        store
            .commit_city(City::Taipei, vec![row(City::Taipei, "A")])
            .await
            .unwrap();
        store
            .commit_city(City::Kaohsiung, vec![row(City::Kaohsiung, "A")])
            .await
            .unwrap();

        assert_eq!(store.lot_count().await, 2);
        let taipei = store.lots_for_city(City::Taipei).await.unwrap();
        assert_eq!(taipei.len(), 1);
        assert_eq!(taipei[0].city, City::Taipei);
    }

    #[tokio::test]
    async fn mismatched_city_batch_rejected() {
        let store = MemoryStore::new();
        let result = store
            .commit_city(City::Taipei, vec![row(City::Kaohsiung, "A")])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_upsert_and_history_order() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut first = SyncRun::new("run-1", vec![City::Taipei], now);
        store.record_run(&first).await.unwrap();
        let second = SyncRun::new("run-2", vec![City::Tainan], now);
        store.record_run(&second).await.unwrap();

        // Transition the first run; this must not duplicate it
        first.status = RunStatus::Failed;
        store.record_run(&first).await.unwrap();
        assert_eq!(store.run_count().await, 2);

        let latest = store.latest_status().await.unwrap().unwrap();
        assert_eq!(latest.run_id, "run-2");

        let history = store.status_history(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].run_id, "run-2");
        assert_eq!(history[1].status, RunStatus::Failed);

        let limited = store.status_history(1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
