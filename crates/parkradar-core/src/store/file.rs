// # File Store
//
// File-backed implementation of LotStore and SyncStateStore with crash
// recovery.
//
// ## Purpose
//
// Keeps parking rows and run history across daemon restarts without an
// external database. Each committed city batch and each run transition
// is written through to disk, so the durability boundary matches the
// reconciliation transaction.
//
// ## Crash Recovery
//
// - Atomic writes: new state goes to a temporary file, then rename
// - Corruption detection: JSON validation on load
// - Automatic backup: keeps .backup of last known good state
// - Recovery: falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "lots": [ { "city": "Taipei", "park_id": "TPE001", ... } ],
//   "runs": [ { "run_id": "...", "status": "succeeded", ... } ]
// }
// ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{City, ParkingLot, SyncRun};
use crate::traits::{LotStore, SyncStateStore};

/// Store file format version, used for future migration if format changes
const STORE_FILE_VERSION: &str = "1.0";

/// File-backed store with atomic writes and backup recovery
///
/// # Example
///
/// ```rust,no_run
/// use parkradar_core::store::FileStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStore::new("/var/lib/parkradar/store.json").await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
    // Serializes stage-persist-swap sequences so concurrent commits
    // cannot interleave their snapshots or temp-file writes.
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Debug, Clone, Default)]
struct FileState {
    lots: BTreeMap<(City, String), ParkingLot>,
    runs: Vec<SyncRun>,
}

/// Serializable store file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    lots: Vec<ParkingLot>,
    runs: Vec<SyncRun>,
}

impl FileStore {
    /// Create or load a file store
    ///
    /// This will:
    /// 1. Try to load an existing store file
    /// 2. If corruption is detected, try to load from backup
    /// 3. If both fail, start with empty state
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let state = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Load state from file with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load the main store file
    /// 2. If it fails to parse, try loading the backup
    /// 3. If the backup also fails, start with empty state
    async fn load_with_recovery(path: &Path) -> Result<FileState, Error> {
        match Self::load(path).await {
            Ok(state) => {
                tracing::debug!(
                    "Loaded store from file: {} lots, {} runs",
                    state.lots.len(),
                    state.runs.len()
                );
                Ok(state)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Store file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );
                let backup = Self::backup_path(path);
                if backup.exists() {
                    match Self::load(&backup).await {
                        Ok(state) => {
                            tracing::info!(
                                "Recovered store from backup: {} lots",
                                state.lots.len()
                            );
                            if let Err(restore_err) = fs::copy(&backup, path).await {
                                tracing::error!(
                                    "Failed to restore store file from backup: {}",
                                    restore_err
                                );
                            }
                            Ok(state)
                        }
                        Err(backup_err) => {
                            tracing::error!(
                                "Backup also corrupted: {}. Starting with empty state.",
                                backup_err
                            );
                            Ok(FileState::default())
                        }
                    }
                } else {
                    tracing::warn!("No backup file found. Starting with empty state.");
                    Ok(FileState::default())
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Load state from a single file
    async fn load(path: &Path) -> Result<FileState, Error> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(FileState::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store(format!("Failed to read store file {}: {}", path.display(), e))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content)?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        let lots = file
            .lots
            .into_iter()
            .map(|row| ((row.city, row.park_id.clone()), row))
            .collect();

        Ok(FileState {
            lots,
            runs: file.runs,
        })
    }

    /// Serialize a staged state snapshot and write it to disk atomically
    ///
    /// Callers hold `write_lock` and swap the snapshot into `self.state`
    /// only after this returns Ok, so a failed write leaves prior state
    /// untouched both in memory and on disk.
    async fn persist(&self, state: &FileState) -> Result<(), Error> {
        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            lots: state.lots.values().cloned().collect(),
            runs: state.runs.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.flush().await.map_err(|e| {
                Error::store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Keep a backup of the current file before replacing it
        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl LotStore for FileStore {
    async fn get(&self, city: City, park_id: &str) -> Result<Option<ParkingLot>, Error> {
        let guard = self.state.read().await;
        Ok(guard.lots.get(&(city, park_id.to_string())).cloned())
    }

    async fn lots_for_city(&self, city: City) -> Result<Vec<ParkingLot>, Error> {
        let guard = self.state.read().await;
        Ok(guard
            .lots
            .range((city, String::new())..)
            .take_while(|((c, _), _)| *c == city)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn all_lots(&self) -> Result<Vec<ParkingLot>, Error> {
        let guard = self.state.read().await;
        Ok(guard.lots.values().cloned().collect())
    }

    async fn commit_city(&self, city: City, rows: Vec<ParkingLot>) -> Result<(), Error> {
        if let Some(row) = rows.iter().find(|r| r.city != city) {
            return Err(Error::store(format!(
                "Batch for {} contains a row for {}",
                city, row.city
            )));
        }

        let _write_guard = self.write_lock.lock().await;

        // Stage the batch on a snapshot; readers keep seeing prior state
        // until the disk write succeeds.
        let staged = {
            let guard = self.state.read().await;
            let mut next = guard.clone();
            for row in rows {
                next.lots.insert((city, row.park_id.clone()), row);
            }
            next
        };

        self.persist(&staged).await?;
        *self.state.write().await = staged;
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let _write_guard = self.write_lock.lock().await;
        let snapshot = self.state.read().await.clone();
        self.persist(&snapshot).await
    }
}

#[async_trait]
impl SyncStateStore for FileStore {
    async fn record_run(&self, run: &SyncRun) -> Result<(), Error> {
        let _write_guard = self.write_lock.lock().await;

        let staged = {
            let guard = self.state.read().await;
            let mut next = guard.clone();
            match next.runs.iter_mut().find(|r| r.run_id == run.run_id) {
                Some(existing) => *existing = run.clone(),
                None => next.runs.push(run.clone()),
            }
            next
        };

        self.persist(&staged).await?;
        *self.state.write().await = staged;
        Ok(())
    }

    async fn latest_status(&self) -> Result<Option<SyncRun>, Error> {
        let guard = self.state.read().await;
        Ok(guard.runs.last().cloned())
    }

    async fn status_history(&self, limit: usize) -> Result<Vec<SyncRun>, Error> {
        let guard = self.state.read().await;
        Ok(guard.runs.iter().rev().take(limit).cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        let _write_guard = self.write_lock.lock().await;
        let snapshot = self.state.read().await.clone();
        self.persist(&snapshot).await
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
                address: Some("1 Test Rd".to_string()),
                coordinates: None,
                total_spaces: Some(10),
                available_spaces: Some(3),
                fare_description: None,
                parking_type: ParkingType::OffStreet,
                data_updated_at: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStore::new(&path).await.unwrap();
            store
                .commit_city(City::Taipei, vec![row(City::Taipei, "A")])
                .await
                .unwrap();
            let mut run = SyncRun::new("run-1", vec![City::Taipei], Utc::now());
            run.status = RunStatus::Succeeded;
            store.record_run(&run).await.unwrap();
        }

        let reopened = FileStore::new(&path).await.unwrap();
        let lot = reopened.get(City::Taipei, "A").await.unwrap();
        assert!(lot.is_some());
        let latest = reopened.latest_status().await.unwrap().unwrap();
        assert_eq!(latest.run_id, "run-1");
        assert_eq!(latest.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn recovers_from_corrupted_file_via_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStore::new(&path).await.unwrap();
            store
                .commit_city(City::Taipei, vec![row(City::Taipei, "A")])
                .await
                .unwrap();
            // Second write creates the backup of the first good state
            store
                .commit_city(City::Taipei, vec![row(City::Taipei, "B")])
                .await
                .unwrap();
        }

        // Corrupt the main file
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let recovered = FileStore::new(&path).await.unwrap();
        // Backup held the state before the last write: lot A only
        assert!(recovered.get(City::Taipei, "A").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_disk_write_leaves_prior_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::new(&path).await.unwrap();
        store
            .commit_city(City::Taipei, vec![row(City::Taipei, "A")])
            .await
            .unwrap();

        // Occupy the temp path with a directory so the next write fails
        let temp = dir.path().join("store.tmp");
        tokio::fs::create_dir(&temp).await.unwrap();

        let result = store
            .commit_city(City::Taipei, vec![row(City::Taipei, "B")])
            .await;
        assert!(result.is_err());

        // The failed batch must not be visible to readers
        assert!(store.get(City::Taipei, "B").await.unwrap().is_none());
        assert!(store.get(City::Taipei, "A").await.unwrap().is_some());
        assert_eq!(store.all_lots().await.unwrap().len(), 1);

        // A failed run transition must not be visible either
        let run = SyncRun::new("run-x", vec![City::Taipei], Utc::now());
        assert!(store.record_run(&run).await.is_err());
        assert!(store.latest_status().await.unwrap().is_none());

        // Once the write path is clear again, in-memory and on-disk
        // state agree: the failed batch never existed
        tokio::fs::remove_dir(&temp).await.unwrap();
        store
            .commit_city(City::Taipei, vec![row(City::Taipei, "C")])
            .await
            .unwrap();

        let reopened = FileStore::new(&path).await.unwrap();
        assert!(reopened.get(City::Taipei, "A").await.unwrap().is_some());
        assert!(reopened.get(City::Taipei, "B").await.unwrap().is_none());
        assert!(reopened.get(City::Taipei, "C").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("fresh.json")).await.unwrap();
        assert!(store.all_lots().await.unwrap().is_empty());
        assert!(store.latest_status().await.unwrap().is_none());
    }
}
