//! Sync orchestrator
//!
//! The orchestrator coordinates fetch + reconcile across one or more
//! cities per run:
//!
//! 1. Resolve the requested city set (empty → all supported cities)
//! 2. Enforce single-flight per city: overlapping triggers are rejected
//! 3. Persist the run as `pending`, then `running`
//! 4. Fetch and reconcile each city concurrently, bounded by the
//!    configured concurrency limit
//! 5. Aggregate per-city outcomes into one terminal status and persist it
//!
//! ## Architecture
//!
//! ```text
//! trigger ──▶ ┌──────────────────┐
//!             │ SyncOrchestrator │──── SyncRun transitions ──▶ SyncStateStore
//!             └──────────────────┘
//!                      │ per-city tasks (bounded)
//!        ┌─────────────┼─────────────┐
//!        ▼             ▼             ▼
//!   FeedSource    Reconciler      Events
//!   (fetch)       (LotStore)      (notify)
//! ```
//!
//! Cities in a batch are independent: one city's failure never aborts
//! its siblings. The only state shared across city tasks is the feed
//! credential and rate budget, both owned by the feed adapter.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::{CanonicalLot, City, CityOutcome, RunStatus, SyncRun};
use crate::reconcile::Reconciler;
use crate::traits::{FeedSource, LotStore, SyncStateStore};

/// Events emitted by the orchestrator for external monitoring
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A run moved from pending to running
    RunStarted {
        run_id: String,
        cities: usize,
    },

    /// A city finished without a city-level error
    CityCompleted {
        run_id: String,
        city: City,
        created: u64,
        updated: u64,
        unchanged: u64,
    },

    /// A city failed (fetch, reconcile, or timeout)
    CityFailed {
        run_id: String,
        city: City,
        error: String,
    },

    /// A run reached a terminal status
    RunFinished {
        run_id: String,
        status: RunStatus,
    },
}

/// Coordinates sync runs across cities
///
/// ## Lifecycle
///
/// 1. Create with [`SyncOrchestrator::new()`]
/// 2. Call [`SyncOrchestrator::trigger_sync()`] per trigger (HTTP call
///    or scheduler); the future resolves to the terminal [`SyncRun`]
///
/// ## Threading
///
/// The orchestrator is cheap to clone and safe to share; concurrent
/// triggers for disjoint city sets may run at the same time, while
/// overlapping triggers are rejected with `SyncAlreadyInProgress`.
#[derive(Clone)]
pub struct SyncOrchestrator {
    feed: Arc<dyn FeedSource>,
    lots: Arc<dyn LotStore>,
    runs: Arc<dyn SyncStateStore>,
    config: SyncConfig,
    reconciler: Reconciler,

    /// Cities with a run currently in flight (single-flight guard)
    in_flight: Arc<Mutex<HashSet<City>>>,

    /// Bounds concurrent per-city tasks across all runs
    limiter: Arc<Semaphore>,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<SyncEvent>,
}

/// Process-wide suffix so run identifiers stay unique even when several
/// runs start within the same millisecond
static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

impl SyncOrchestrator {
    /// Create a new orchestrator
    ///
    /// # Returns
    ///
    /// A tuple of (orchestrator, event_receiver) where event_receiver
    /// yields [`SyncEvent`]s as runs progress.
    pub fn new(
        feed: Arc<dyn FeedSource>,
        lots: Arc<dyn LotStore>,
        runs: Arc<dyn SyncStateStore>,
        config: SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<SyncEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let reconciler = Reconciler::new(config.touch_unchanged);
        let limiter = Arc::new(Semaphore::new(config.max_concurrency));

        let orchestrator = Self {
            feed,
            lots,
            runs,
            config,
            reconciler,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            limiter,
            event_tx: tx,
        };

        Ok((orchestrator, rx))
    }

    /// Trigger a sync run for the given cities
    ///
    /// An empty or omitted city set targets all supported cities.
    /// Duplicate codes are collapsed, preserving request order.
    ///
    /// # Returns
    ///
    /// - `Ok(SyncRun)`: the terminal run record, already persisted
    /// - `Err(Error::SyncAlreadyInProgress)`: one of the requested
    ///   cities is part of a running sync; no run record was created
    pub async fn trigger_sync(&self, cities: Option<Vec<City>>) -> Result<SyncRun> {
        let cities = resolve_cities(cities);

        self.mark_in_flight(&cities).await?;
        let result = self.execute_run(cities.clone()).await;
        self.clear_in_flight(&cities).await;
        result
    }

    /// Mark cities as in flight, rejecting any overlap with a running sync
    async fn mark_in_flight(&self, cities: &[City]) -> Result<()> {
        let mut guard = self.in_flight.lock().await;
        let busy: Vec<City> = cities
            .iter()
            .filter(|c| guard.contains(c))
            .copied()
            .collect();
        if !busy.is_empty() {
            debug!(?busy, "Rejecting overlapping sync trigger");
            return Err(Error::already_in_progress(&busy));
        }
        guard.extend(cities.iter().copied());
        Ok(())
    }

    async fn clear_in_flight(&self, cities: &[City]) {
        let mut guard = self.in_flight.lock().await;
        for city in cities {
            guard.remove(city);
        }
    }

    /// Run the full lifecycle for an already-marked city set
    async fn execute_run(&self, cities: Vec<City>) -> Result<SyncRun> {
        let run_id = self.next_run_id();
        let mut run = SyncRun::new(run_id.clone(), cities.clone(), Utc::now());

        // Exactly one persisted run per trigger, created before any work
        self.runs.record_run(&run).await?;

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        self.runs.record_run(&run).await?;
        self.emit_event(SyncEvent::RunStarted {
            run_id: run_id.clone(),
            cities: cities.len(),
        });
        info!(run_id = %run_id, cities = cities.len(), "Sync run started");

        run.outcomes = self.run_cities(&run_id, &cities).await;

        let ok = run.outcomes.values().filter(|o| o.is_ok()).count();
        run.status = if ok == cities.len() {
            RunStatus::Succeeded
        } else if ok == 0 {
            RunStatus::Failed
        } else {
            RunStatus::PartialFailure
        };
        run.finished_at = Some(Utc::now());
        self.runs.record_run(&run).await?;

        self.emit_event(SyncEvent::RunFinished {
            run_id: run_id.clone(),
            status: run.status,
        });
        info!(
            run_id = %run_id,
            status = %run.status,
            created = run.total_created(),
            "Sync run finished"
        );

        Ok(run)
    }

    /// Fetch and reconcile every city concurrently, bounded by the limiter
    async fn run_cities(&self, run_id: &str, cities: &[City]) -> BTreeMap<City, CityOutcome> {
        let mut join_set: JoinSet<(City, CityOutcome)> = JoinSet::new();

        for &city in cities {
            let feed = Arc::clone(&self.feed);
            let lots = Arc::clone(&self.lots);
            let reconciler = self.reconciler.clone();
            let limiter = Arc::clone(&self.limiter);

            join_set.spawn(async move {
                let _permit = match limiter.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (city, CityOutcome::failure("concurrency limiter closed"));
                    }
                };

                let outcome = sync_one_city(feed.as_ref(), lots.as_ref(), &reconciler, city).await;
                (city, outcome)
            });
        }

        let mut outcomes: BTreeMap<City, CityOutcome> = BTreeMap::new();

        let collect = async {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((city, outcome)) => {
                        self.report_city(run_id, city, &outcome);
                        outcomes.insert(city, outcome);
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => error!("City sync task panicked: {}", e),
                }
            }
        };

        match self.config.run_timeout() {
            Some(deadline) => {
                if tokio::time::timeout(deadline, collect).await.is_err() {
                    // Cooperative cancellation: store commits are atomic,
                    // so aborting at an await point cannot leave a
                    // half-committed city.
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}

                    for &city in cities {
                        if !outcomes.contains_key(&city) {
                            let outcome = CityOutcome::failure(
                                Error::timeout("run deadline exceeded").to_string(),
                            );
                            self.report_city(run_id, city, &outcome);
                            outcomes.insert(city, outcome);
                        }
                    }
                }
            }
            None => collect.await,
        }

        outcomes
    }

    fn report_city(&self, run_id: &str, city: City, outcome: &CityOutcome) {
        match &outcome.error {
            None => {
                self.emit_event(SyncEvent::CityCompleted {
                    run_id: run_id.to_string(),
                    city,
                    created: outcome.created,
                    updated: outcome.updated,
                    unchanged: outcome.unchanged,
                });
            }
            Some(err) => {
                warn!(city = %city, error = %err, "City sync failed");
                self.emit_event(SyncEvent::CityFailed {
                    run_id: run_id.to_string(),
                    city,
                    error: err.clone(),
                });
            }
        }
    }

    fn next_run_id(&self) -> String {
        let seq = RUN_SEQ.fetch_add(1, Ordering::SeqCst);
        format!("run-{}-{}", Utc::now().timestamp_millis(), seq)
    }

    /// Emit a sync event
    fn emit_event(&self, event: SyncEvent) {
        // Send event, dropping it with a warning if the channel is full;
        // the orchestrator never blocks on a slow event consumer.
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Fetch one city and reconcile it; all failures fold into the outcome
async fn sync_one_city(
    feed: &dyn FeedSource,
    lots: &dyn LotStore,
    reconciler: &Reconciler,
    city: City,
) -> CityOutcome {
    let (records, dropped) = match collect_feed(feed, city).await {
        Ok(collected) => collected,
        Err(e) => return CityOutcome::failure(e.to_string()),
    };

    debug!(city = %city, records = records.len(), dropped, "Fetched city feed");

    match reconciler.reconcile(lots, city, records, dropped).await {
        Ok(outcome) => outcome,
        Err(e) => CityOutcome::failure(e.to_string()),
    }
}

/// Drain a city's feed stream into one batch
///
/// A mid-pagination error invalidates the whole fetch: nothing collected
/// so far is reconciled.
async fn collect_feed(feed: &dyn FeedSource, city: City) -> Result<(Vec<CanonicalLot>, u64)> {
    let mut stream = feed.fetch(city);
    let mut lots = Vec::new();
    let mut dropped = 0u64;

    while let Some(page) = stream.next().await {
        let page = page?;
        dropped += page.dropped;
        lots.extend(page.lots);
    }

    Ok((lots, dropped))
}

/// Expand an optional request into a concrete, de-duplicated city list
fn resolve_cities(cities: Option<Vec<City>>) -> Vec<City> {
    let requested = match cities {
        Some(list) if !list.is_empty() => list,
        _ => City::all().to_vec(),
    };

    let mut seen = HashSet::new();
    requested
        .into_iter()
        .filter(|c| seen.insert(*c))
        .collect()
}
