//! Test doubles and common utilities for contract tests
//!
//! This module provides a scriptable feed source and data builders so
//! contract tests can drive the orchestrator and query engine without
//! any network or real upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use parkradar_core::error::Error;
use parkradar_core::model::{CanonicalLot, City, Coordinates, FeedPage, ParkingType};
use parkradar_core::traits::{FeedSource, FeedStream};

/// Per-city behavior of the scripted feed
#[derive(Debug, Clone)]
pub enum Script {
    /// Yield these pages, then end the stream
    Pages(Vec<FeedPage>),
    /// Fail immediately with an upstream-unavailable error
    Fail(String),
    /// Yield these pages, then fail mid-pagination
    FailAfter(Vec<FeedPage>, String),
}

/// A feed source whose per-city behavior is scripted by the test
pub struct ScriptedFeedSource {
    scripts: HashMap<City, Script>,
    /// Optional delay before any page is yielded (for overlap tests)
    delay: Option<Duration>,
    /// Fetch counter per city
    fetch_counts: Arc<std::sync::Mutex<HashMap<City, usize>>>,
}

impl ScriptedFeedSource {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            delay: None,
            fetch_counts: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    pub fn with_script(mut self, city: City, script: Script) -> Self {
        self.scripts.insert(city, script);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `fetch` was called for a city
    pub fn fetch_count(&self, city: City) -> usize {
        *self.fetch_counts.lock().unwrap().get(&city).unwrap_or(&0)
    }
}

impl FeedSource for ScriptedFeedSource {
    fn fetch(&self, city: City) -> FeedStream {
        *self
            .fetch_counts
            .lock()
            .unwrap()
            .entry(city)
            .or_insert(0) += 1;

        // Unscripted cities yield no records
        let script = self
            .scripts
            .get(&city)
            .cloned()
            .unwrap_or(Script::Pages(Vec::new()));
        let delay = self.delay;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match script {
                Script::Pages(pages) => {
                    for page in pages {
                        if tx.send(Ok(page)).await.is_err() {
                            return;
                        }
                    }
                }
                Script::Fail(msg) => {
                    let _ = tx.send(Err(Error::upstream(msg))).await;
                }
                Script::FailAfter(pages, msg) => {
                    for page in pages {
                        if tx.send(Ok(page)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(Err(Error::upstream(msg))).await;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}

/// Build a canonical lot without coordinates
pub fn lot(park_id: &str, available: Option<u32>) -> CanonicalLot {
    CanonicalLot {
        park_id: park_id.to_string(),
        name: format!("Lot {}", park_id),
        address: None,
        coordinates: None,
        total_spaces: Some(100),
        available_spaces: available,
        fare_description: None,
        parking_type: ParkingType::OffStreet,
        data_updated_at: None,
    }
}

/// Build a canonical lot at a position
pub fn lot_at(park_id: &str, lat: f64, lng: f64) -> CanonicalLot {
    CanonicalLot {
        coordinates: Some(Coordinates::new(lat, lng).unwrap()),
        ..lot(park_id, Some(10))
    }
}

/// Wrap lots into a single feed page with no normalization drops
pub fn page(lots: Vec<CanonicalLot>) -> FeedPage {
    FeedPage { lots, dropped: 0 }
}
