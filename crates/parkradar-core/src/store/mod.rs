// # Store Implementations
//
// This module provides implementations of the LotStore and
// SyncStateStore traits for different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
