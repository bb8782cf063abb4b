// # Lot Store Trait
//
// Defines the interface for durable parking-lot rows.
//
// ## Purpose
//
// The store is the single source of truth for `ParkingLot` rows, keyed
// by `(city, park_id)`. Reads and sync writes meet only here: query
// reads never block sync writes beyond the store's own isolation.
//
// ## Transactional boundary
//
// `commit_city` is the one write path and must be atomic: either every
// row in the batch lands, or none do. The reconciler computes the batch;
// the store only commits it. Rows are never deleted — a row absent from
// a batch keeps its previous state.
//
// ## Implementations
//
// - In-memory: [`crate::store::MemoryStore`]
// - File-backed with atomic rename: [`crate::store::FileStore`]

use async_trait::async_trait;

use crate::model::{City, ParkingLot};

/// Trait for parking-lot store implementations
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait LotStore: Send + Sync {
    /// Get a single row by its natural key
    async fn get(&self, city: City, park_id: &str) -> Result<Option<ParkingLot>, crate::Error>;

    /// Get all rows for a city
    async fn lots_for_city(&self, city: City) -> Result<Vec<ParkingLot>, crate::Error>;

    /// Get all rows in the store
    ///
    /// Ordering is implementation-defined; callers needing a stable
    /// order sort themselves.
    async fn all_lots(&self) -> Result<Vec<ParkingLot>, crate::Error>;

    /// Atomically upsert a batch of rows for one city
    ///
    /// Rows in the batch replace existing rows with the same key and
    /// create the rest. Rows absent from the batch are left untouched.
    /// On error, no row from the batch is visible.
    async fn commit_city(&self, city: City, rows: Vec<ParkingLot>) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
