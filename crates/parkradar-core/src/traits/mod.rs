//! Core traits for the sync and query engine
//!
//! This module defines the abstract interfaces that all implementations
//! must follow.
//!
//! - [`FeedSource`]: fetch region-scoped parking data from an upstream feed
//! - [`LotStore`]: durable parking-lot rows keyed by `(city, park_id)`
//! - [`SyncStateStore`]: durable sync-run history for status reporting

pub mod feed_source;
pub mod lot_store;
pub mod sync_state_store;

pub use feed_source::{FeedSource, FeedStream};
pub use lot_store::LotStore;
pub use sync_state_store::SyncStateStore;
