// # parkradar-core
//
// Core library for the ParkRadar parking-availability system.
//
// ## Architecture Overview
//
// This library provides the synchronization and geospatial query engine:
// - **FeedSource**: Trait for fetching region-scoped parking data from
//   an upstream transit-data feed
// - **LotStore / SyncStateStore**: Traits for durable parking rows and
//   sync-run history
// - **Reconciler**: Upserts fetched records against previously-stored
//   state without losing history or duplicating entries
// - **SyncOrchestrator**: Coordinates fetch + reconcile across cities,
//   enforcing single-flight per city and aggregating partial failures
// - **QueryEngine**: Filtered listing and proximity queries with correct
//   distance ordering and pagination
//
// ## Design Principles
//
// 1. **Separation of Concerns**: feed adapters own everything
//    upstream-facing; the orchestrator owns coordination; stores own
//    durability
// 2. **Availability over completeness**: rows are never deleted, and
//    queries serve whatever is stored regardless of sync health
// 3. **Idempotency**: reconciliation classifies created/updated/
//    unchanged against stored state, so repeated syncs are safe
// 4. **Library-First**: all core functionality is usable without the
//    daemon

pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod sync;
pub mod traits;

// Re-export core types for convenience
pub use config::{RetryConfig, StoreConfig, SyncConfig};
pub use error::{Error, Result};
pub use model::{
    CanonicalLot, City, CityOutcome, Coordinates, FeedPage, ParkingLot, ParkingType, RunStatus,
    SyncRun,
};
pub use query::{ListFilter, ListPage, NearbyPage, NearbyQuery, QueryEngine};
pub use reconcile::Reconciler;
pub use retry::RetryPolicy;
pub use store::{FileStore, MemoryStore};
pub use sync::{SyncEvent, SyncOrchestrator};
pub use traits::{FeedSource, FeedStream, LotStore, SyncStateStore};
