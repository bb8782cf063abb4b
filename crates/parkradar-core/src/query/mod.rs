//! Geospatial query engine
//!
//! Serves the client-facing read path over the lot store, independent of
//! sync timing: a flat filtered listing with pagination, a proximity
//! query with correct distance ordering, and single-lot lookup. Queries
//! never fail because of sync health; they return whatever is currently
//! stored, however stale.
//!
//! Out-of-range paging and radius parameters are clamped to their
//! bounds, not rejected. Only unusable input (a center coordinate
//! outside the valid lat/lng ranges) surfaces as `InvalidInput`.

pub mod geo;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::{City, Coordinates, ParkingLot};
use crate::traits::LotStore;

pub use geo::haversine_distance_m;

/// Paging bounds for the flat listing
const LIST_LIMIT_RANGE: (usize, usize) = (1, 200);
const LIST_LIMIT_DEFAULT: usize = 50;

/// Bounds for proximity queries
const NEARBY_RADIUS_RANGE_M: (f64, f64) = (100.0, 10_000.0);
const NEARBY_RADIUS_DEFAULT_M: f64 = 1_000.0;
const NEARBY_LIMIT_RANGE: (usize, usize) = (1, 100);
const NEARBY_LIMIT_DEFAULT: usize = 20;

/// Filters and paging for [`QueryEngine::list`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilter {
    /// Restrict to one city
    pub city: Option<City>,
    /// `Some(true)` keeps rows with known availability > 0;
    /// `Some(false)` keeps rows with known availability == 0.
    /// Rows with unknown availability match neither.
    pub has_available: Option<bool>,
    /// Page size; clamped to 1..=200, default 50
    pub limit: Option<usize>,
    /// Page offset; default 0
    pub offset: Option<usize>,
}

/// One page of a flat listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPage {
    /// Total rows matching the filter, across all pages
    pub total: usize,
    /// Rows on this page
    pub items: Vec<ParkingLot>,
    /// Effective (clamped) page size
    pub limit: usize,
    /// Effective page offset
    pub offset: usize,
}

/// Parameters for [`QueryEngine::nearby`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyQuery {
    /// Center latitude in decimal degrees
    pub lat: f64,
    /// Center longitude in decimal degrees
    pub lng: f64,
    /// Search radius in meters; clamped to 100..=10000, default 1000
    pub radius_m: Option<f64>,
    /// Result cap; clamped to 1..=100, default 20
    pub limit: Option<usize>,
}

/// A lot with its computed distance from the query center
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyLot {
    /// The matching row
    pub lot: ParkingLot,
    /// Great-circle distance from the center, rounded to two decimals
    pub distance_meters: f64,
}

/// Result of a proximity query, sorted by distance ascending
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyPage {
    /// Matching lots within the radius, closest first
    pub items: Vec<NearbyLot>,
    /// The query center
    pub center: Coordinates,
    /// Effective (clamped) radius in meters
    pub radius_m: f64,
}

/// Read-side engine over the lot store
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn LotStore>,
}

impl QueryEngine {
    /// Create a query engine over a lot store
    pub fn new(store: Arc<dyn LotStore>) -> Self {
        Self { store }
    }

    /// Flat filtered listing with pagination
    ///
    /// Ordered by `(city, name, park_id)` so repeated calls paginate
    /// deterministically. `total` counts all matches, not just this page.
    pub async fn list(&self, filter: ListFilter) -> Result<ListPage> {
        let limit = clamp(filter.limit.unwrap_or(LIST_LIMIT_DEFAULT), LIST_LIMIT_RANGE);
        let offset = filter.offset.unwrap_or(0);

        let mut rows = match filter.city {
            Some(city) => self.store.lots_for_city(city).await?,
            None => self.store.all_lots().await?,
        };

        if let Some(wanted) = filter.has_available {
            rows.retain(|row| match row.available_spaces {
                Some(n) if wanted => n > 0,
                Some(n) => n == 0,
                // Unknown availability is never "available" and never
                // "full"; it matches neither filter value.
                None => false,
            });
        }

        rows.sort_by(|a, b| {
            (a.city, &a.name, &a.park_id).cmp(&(b.city, &b.name, &b.park_id))
        });

        let total = rows.len();
        let items: Vec<ParkingLot> = rows.into_iter().skip(offset).take(limit).collect();

        debug!(total, page = items.len(), limit, offset, "Listed parking lots");

        Ok(ListPage {
            total,
            items,
            limit,
            offset,
        })
    }

    /// Proximity query around a center point
    ///
    /// Candidates are rows with coordinates; each gets a haversine
    /// distance, rows beyond the radius are dropped, and the rest sort
    /// by distance ascending with `park_id` as the tie-break so ordering
    /// is stable across repeated calls.
    pub async fn nearby(&self, query: NearbyQuery) -> Result<NearbyPage> {
        // Unusable centers are rejected; out-of-range radius/limit are
        // clamped per contract.
        let center = Coordinates::new(query.lat, query.lng)?;
        let radius_m = query
            .radius_m
            .unwrap_or(NEARBY_RADIUS_DEFAULT_M)
            .clamp(NEARBY_RADIUS_RANGE_M.0, NEARBY_RADIUS_RANGE_M.1);
        let limit = clamp(query.limit.unwrap_or(NEARBY_LIMIT_DEFAULT), NEARBY_LIMIT_RANGE);

        let mut items: Vec<NearbyLot> = self
            .store
            .all_lots()
            .await?
            .into_iter()
            .filter_map(|lot| {
                let coords = lot.coordinates?;
                let distance = haversine_distance_m(center, coords);
                (distance <= radius_m).then(|| NearbyLot {
                    distance_meters: round2(distance),
                    lot,
                })
            })
            .collect();

        items.sort_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then_with(|| a.lot.park_id.cmp(&b.lot.park_id))
        });
        items.truncate(limit);

        debug!(
            matches = items.len(),
            radius_m, "Answered nearby parking query"
        );

        Ok(NearbyPage {
            items,
            center,
            radius_m,
        })
    }

    /// Look up a single lot by its upstream identifier
    ///
    /// Scans across cities; upstream identifiers embed the region in
    /// practice, so cross-city collisions are not expected.
    pub async fn find_by_id(&self, park_id: &str) -> Result<Option<ParkingLot>> {
        let rows = self.store.all_lots().await?;
        Ok(rows.into_iter().find(|row| row.park_id == park_id))
    }
}

fn clamp(value: usize, (lo, hi): (usize, usize)) -> usize {
    value.clamp(lo, hi)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
