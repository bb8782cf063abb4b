//! Reconciliation engine
//!
//! Merges a city's fetched records into the store, classifying every
//! record as created, updated, or unchanged against previously-stored
//! state. The whole batch commits atomically through
//! [`LotStore::commit_city`]; a store failure rolls the city back and
//! surfaces as `ReconciliationFailed`, leaving prior state untouched.
//!
//! Rows absent from a successful fetch are neither deleted nor marked:
//! they keep their last `updated_at`, and consumers infer staleness from
//! elapsed time. A transient upstream omission must not cause data loss.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{CanonicalLot, City, CityOutcome, ParkingLot};
use crate::traits::LotStore;

/// Reconciles normalized feed records into the lot store
#[derive(Debug, Clone)]
pub struct Reconciler {
    /// Whether content-identical records still advance `updated_at`
    touch_unchanged: bool,
}

impl Reconciler {
    /// Create a reconciler
    ///
    /// `touch_unchanged` controls the freshness policy for records whose
    /// content did not change: when true, their `updated_at` advances on
    /// every successful fetch touch so staleness reads as `now -
    /// updated_at`.
    pub fn new(touch_unchanged: bool) -> Self {
        Self { touch_unchanged }
    }

    /// Upsert one city's fetched records into the store
    ///
    /// `dropped` carries the normalization-failure count from the fetch
    /// and lands in the outcome's `failed` counter.
    ///
    /// # Returns
    ///
    /// - `Ok(CityOutcome)`: counts of created/updated/unchanged/failed
    /// - `Err(Error::ReconciliationFailed)`: the store transaction
    ///   failed; no record from this batch was committed
    pub async fn reconcile(
        &self,
        store: &dyn LotStore,
        city: City,
        lots: Vec<CanonicalLot>,
        dropped: u64,
    ) -> Result<CityOutcome> {
        let now = Utc::now();

        let existing: BTreeMap<String, ParkingLot> = store
            .lots_for_city(city)
            .await
            .map_err(|e| Error::reconciliation(city, e.to_string()))?
            .into_iter()
            .map(|row| (row.park_id.clone(), row))
            .collect();

        let mut outcome = CityOutcome {
            failed: dropped,
            ..CityOutcome::default()
        };

        // Later duplicates of the same park_id within one fetch win,
        // preserving the uniqueness of the (city, park_id) key.
        let mut batch: BTreeMap<String, ParkingLot> = BTreeMap::new();
        let mut classes: BTreeMap<String, Class> = BTreeMap::new();

        for lot in lots {
            match existing.get(&lot.park_id) {
                None => {
                    let park_id = lot.park_id.clone();
                    batch.insert(park_id.clone(), ParkingLot::from_canonical(city, lot, now));
                    classes.insert(park_id, Class::Created);
                }
                Some(row) if row.content_eq(&lot) => {
                    if self.touch_unchanged {
                        let mut touched = row.clone();
                        touched.updated_at = now;
                        batch.insert(lot.park_id.clone(), touched);
                    }
                    classes.insert(lot.park_id, Class::Unchanged);
                }
                Some(row) => {
                    let mut updated = row.clone();
                    let park_id = lot.park_id.clone();
                    updated.apply(lot, now);
                    batch.insert(park_id.clone(), updated);
                    classes.insert(park_id, Class::Updated);
                }
            }
        }

        for class in classes.values() {
            match class {
                Class::Created => outcome.created += 1,
                Class::Updated => outcome.updated += 1,
                Class::Unchanged => outcome.unchanged += 1,
            }
        }

        if !batch.is_empty() {
            store
                .commit_city(city, batch.into_values().collect())
                .await
                .map_err(|e| Error::reconciliation(city, e.to_string()))?;
        }

        debug!(
            city = %city,
            created = outcome.created,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            failed = outcome.failed,
            "Reconciled city batch"
        );

        Ok(outcome)
    }
}

enum Class {
    Created,
    Updated,
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParkingType;
    use crate::store::MemoryStore;

    fn canonical(park_id: &str, available: Option<u32>) -> CanonicalLot {
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

    #[tokio::test]
    async fn fresh_records_are_all_created() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(true);

        let lots = vec![canonical("A", Some(5)), canonical("B", None)];
        let outcome = reconciler
            .reconcile(&store, City::Taipei, lots, 0)
            .await
            .unwrap();

        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.updated, 0);
        assert_eq!(outcome.unchanged, 0);
        assert!(store.get(City::Taipei, "A").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unchanged_content_still_touches_updated_at() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(true);

        reconciler
            .reconcile(&store, City::Taipei, vec![canonical("A", Some(5))], 0)
            .await
            .unwrap();
        let first = store.get(City::Taipei, "A").await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let outcome = reconciler
            .reconcile(&store, City::Taipei, vec![canonical("A", Some(5))], 0)
            .await
            .unwrap();
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(outcome.created, 0);

        let second = store.get(City::Taipei, "A").await.unwrap().unwrap();
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn touch_unchanged_disabled_leaves_row_alone() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(false);

        reconciler
            .reconcile(&store, City::Taipei, vec![canonical("A", Some(5))], 0)
            .await
            .unwrap();
        let first = store.get(City::Taipei, "A").await.unwrap().unwrap();

        let outcome = reconciler
            .reconcile(&store, City::Taipei, vec![canonical("A", Some(5))], 0)
            .await
            .unwrap();
        assert_eq!(outcome.unchanged, 1);

        let second = store.get(City::Taipei, "A").await.unwrap().unwrap();
        assert_eq!(second.updated_at, first.updated_at);
    }

    #[tokio::test]
    async fn changed_content_is_updated() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(true);

        reconciler
            .reconcile(&store, City::Taipei, vec![canonical("A", Some(5))], 0)
            .await
            .unwrap();
        let outcome = reconciler
            .reconcile(&store, City::Taipei, vec![canonical("A", Some(3))], 0)
            .await
            .unwrap();

        assert_eq!(outcome.updated, 1);
        let row = store.get(City::Taipei, "A").await.unwrap().unwrap();
        assert_eq!(row.available_spaces, Some(3));
    }

    #[tokio::test]
    async fn absent_rows_survive_a_successful_fetch() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(true);

        reconciler
            .reconcile(
                &store,
                City::Taipei,
                vec![canonical("A", Some(5)), canonical("B", Some(2))],
                0,
            )
            .await
            .unwrap();

        // Next fetch omits B entirely
        reconciler
            .reconcile(&store, City::Taipei, vec![canonical("A", Some(4))], 0)
            .await
            .unwrap();

        let b = store.get(City::Taipei, "B").await.unwrap();
        assert!(b.is_some(), "absence is a freshness signal, not a delete");
    }

    #[tokio::test]
    async fn duplicate_park_ids_collapse_last_wins() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(true);

        let outcome = reconciler
            .reconcile(
                &store,
                City::Taipei,
                vec![canonical("A", Some(1)), canonical("A", Some(9))],
                0,
            )
            .await
            .unwrap();

        assert_eq!(outcome.created, 1);
        let row = store.get(City::Taipei, "A").await.unwrap().unwrap();
        assert_eq!(row.available_spaces, Some(9));
    }

    #[tokio::test]
    async fn dropped_count_lands_in_failed() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(true);

        let outcome = reconciler
            .reconcile(&store, City::Taipei, vec![canonical("A", None)], 3)
            .await
            .unwrap();

        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.created, 1);
    }
}
