//! Contract test: geospatial queries and pagination
//!
//! Constraints verified:
//! - Nearby returns only lots within the (clamped) radius, ordered by
//!   ascending distance with park_id as the tie-break
//! - Computed distances are within 1 m of known separations
//! - List pagination yields disjoint pages summing to total
//! - Out-of-range limit/radius parameters are clamped, not rejected

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::*;
use parkradar_core::model::{City, ParkingLot};
use parkradar_core::query::{ListFilter, NearbyQuery, QueryEngine};
use parkradar_core::store::MemoryStore;
use parkradar_core::traits::LotStore;

const CENTER_LAT: f64 = 25.04;
const CENTER_LNG: f64 = 121.51;
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Latitude offset (degrees) corresponding to `meters` of great-circle
/// distance, exact by construction for pure-latitude displacement
fn lat_offset(meters: f64) -> f64 {
    (meters / EARTH_RADIUS_M).to_degrees()
}

async fn seed(store: &MemoryStore, city: City, lots: Vec<parkradar_core::model::CanonicalLot>) {
    let now = Utc::now();
    let rows: Vec<ParkingLot> = lots
        .into_iter()
        .map(|l| ParkingLot::from_canonical(city, l, now))
        .collect();
    store.commit_city(city, rows).await.unwrap();
}

fn engine(store: &MemoryStore) -> QueryEngine {
    QueryEngine::new(Arc::new(store.clone()))
}

#[tokio::test]
async fn nearby_filters_and_orders_by_distance() {
    let store = MemoryStore::new();
    seed(
        &store,
        City::Taipei,
        vec![
            lot_at("FAR", CENTER_LAT + lat_offset(2000.0), CENTER_LNG),
            lot_at("MID", CENTER_LAT + lat_offset(500.0), CENTER_LNG),
            lot_at("NEAR", CENTER_LAT + lat_offset(50.0), CENTER_LNG),
        ],
    )
    .await;

    let result = engine(&store)
        .nearby(NearbyQuery {
            lat: CENTER_LAT,
            lng: CENTER_LNG,
            radius_m: Some(1000.0),
            limit: None,
        })
        .await
        .unwrap();

    let ids: Vec<&str> = result.items.iter().map(|i| i.lot.park_id.as_str()).collect();
    assert_eq!(ids, vec!["NEAR", "MID"]);

    assert!((result.items[0].distance_meters - 50.0).abs() < 1.0);
    assert!((result.items[1].distance_meters - 500.0).abs() < 1.0);
}

#[tokio::test]
async fn nearby_skips_lots_without_coordinates() {
    let store = MemoryStore::new();
    seed(
        &store,
        City::Taipei,
        vec![
            lot("NOCOORD", Some(5)),
            lot_at("NEAR", CENTER_LAT + lat_offset(100.0), CENTER_LNG),
        ],
    )
    .await;

    let result = engine(&store)
        .nearby(NearbyQuery {
            lat: CENTER_LAT,
            lng: CENTER_LNG,
            radius_m: None,
            limit: None,
        })
        .await
        .unwrap();

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].lot.park_id, "NEAR");
}

#[tokio::test]
async fn equal_distances_tie_break_by_park_id() {
    let store = MemoryStore::new();
    let offset = lat_offset(300.0);
    seed(
        &store,
        City::Taipei,
        vec![
            lot_at("B", CENTER_LAT + offset, CENTER_LNG),
            lot_at("A", CENTER_LAT + offset, CENTER_LNG),
            lot_at("C", CENTER_LAT + offset, CENTER_LNG),
        ],
    )
    .await;

    let result = engine(&store)
        .nearby(NearbyQuery {
            lat: CENTER_LAT,
            lng: CENTER_LNG,
            radius_m: None,
            limit: None,
        })
        .await
        .unwrap();

    let ids: Vec<&str> = result.items.iter().map(|i| i.lot.park_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn oversized_radius_and_undersized_limit_are_clamped() {
    let store = MemoryStore::new();
    seed(
        &store,
        City::Taipei,
        vec![
            lot_at("IN", CENTER_LAT + lat_offset(9000.0), CENTER_LNG),
            lot_at("OUT", CENTER_LAT + lat_offset(12_000.0), CENTER_LNG),
        ],
    )
    .await;

    // radius=50000 behaves as radius=10000
    let result = engine(&store)
        .nearby(NearbyQuery {
            lat: CENTER_LAT,
            lng: CENTER_LNG,
            radius_m: Some(50_000.0),
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(result.radius_m, 10_000.0);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].lot.park_id, "IN");

    // limit=0 behaves as limit=1
    let listing = engine(&store)
        .list(ListFilter {
            limit: Some(0),
            ..ListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(listing.limit, 1);
    assert_eq!(listing.items.len(), 1);
    assert_eq!(listing.total, 2);
}

#[tokio::test]
async fn invalid_center_is_rejected_not_clamped() {
    let store = MemoryStore::new();
    let result = engine(&store)
        .nearby(NearbyQuery {
            lat: 95.0,
            lng: CENTER_LNG,
            radius_m: None,
            limit: None,
        })
        .await;
    assert!(matches!(
        result,
        Err(parkradar_core::Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn pagination_pages_are_disjoint_and_sum_to_total() {
    let store = MemoryStore::new();
    let lots: Vec<_> = (0..45)
        .map(|i| lot(&format!("P{:03}", i), Some(1)))
        .collect();
    seed(&store, City::Taipei, lots).await;

    let engine = engine(&store);
    let mut seen = std::collections::HashSet::new();
    let mut fetched = 0;

    for page_index in 0..3 {
        let page = engine
            .list(ListFilter {
                limit: Some(20),
                offset: Some(page_index * 20),
                ..ListFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 45);
        fetched += page.items.len();
        for item in &page.items {
            assert!(
                seen.insert(item.park_id.clone()),
                "duplicate {} across pages",
                item.park_id
            );
        }
    }

    assert_eq!(fetched, 45);
}

#[tokio::test]
async fn list_filters_by_city_and_availability() {
    let store = MemoryStore::new();
    seed(
        &store,
        City::Taipei,
        vec![lot("OPEN", Some(4)), lot("FULL", Some(0)), lot("UNKNOWN", None)],
    )
    .await;
    seed(&store, City::Tainan, vec![lot("TNN", Some(9))]).await;

    let engine = engine(&store);

    let taipei = engine
        .list(ListFilter {
            city: Some(City::Taipei),
            ..ListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(taipei.total, 3);

    // has_available=true requires known availability > 0; unknown
    // availability matches neither filter value
    let open = engine
        .list(ListFilter {
            city: Some(City::Taipei),
            has_available: Some(true),
            ..ListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(open.total, 1);
    assert_eq!(open.items[0].park_id, "OPEN");

    let full = engine
        .list(ListFilter {
            city: Some(City::Taipei),
            has_available: Some(false),
            ..ListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(full.total, 1);
    assert_eq!(full.items[0].park_id, "FULL");
}

#[tokio::test]
async fn find_by_id_scans_across_cities() {
    let store = MemoryStore::new();
    seed(&store, City::Taipei, vec![lot("TPE1", Some(1))]).await;
    seed(&store, City::Tainan, vec![lot("TNN1", Some(2))]).await;

    let engine = engine(&store);
    let found = engine.find_by_id("TNN1").await.unwrap().unwrap();
    assert_eq!(found.city, City::Tainan);
    assert!(engine.find_by_id("MISSING").await.unwrap().is_none());
}
