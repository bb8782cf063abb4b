// # Feed Source Trait
//
// Defines the interface for fetching region-scoped parking data from an
// upstream transit-data feed.
//
// ## Implementations
//
// - TDX (Taiwan Transport Data eXchange): `parkradar-feed-tdx` crate
// - Scripted doubles for contract tests: `tests/common`
//
// ## Responsibility boundaries
//
// A feed source owns everything upstream-facing: credentials and their
// single-flight refresh, pagination, per-request retry/backoff, and
// normalization of raw payloads into canonical records. It must NOT
// touch the store or make reconciliation decisions; those belong to the
// orchestrator and the reconciler.

use tokio_stream::Stream;
use std::pin::Pin;

use crate::error::Result;
use crate::model::{City, FeedPage};

/// A finite stream of normalized feed pages for one city
///
/// The stream ends after the last page. It is not restartable: an `Err`
/// item invalidates the whole fetch for that city, and the consumer must
/// not poll further.
pub type FeedStream = Pin<Box<dyn Stream<Item = Result<FeedPage>> + Send + 'static>>;

/// Trait for upstream feed implementations
///
/// # Thread safety
///
/// Implementations must be thread-safe: the orchestrator calls `fetch`
/// concurrently for distinct cities, bounded by its concurrency limit.
///
/// # Error contract
///
/// Per-record normalization failures are absorbed into
/// [`FeedPage::dropped`], never surfaced as stream errors. Stream errors
/// are city-fatal and already post-retry:
///
/// - `Error::Auth` — credential refresh was attempted once and failed
/// - `Error::UpstreamUnavailable` — transient failures exhausted the
///   retry budget
/// - `Error::MalformedPayload` — the response body was not decodable at
///   all (as opposed to individual bad records)
pub trait FeedSource: Send + Sync {
    /// Fetch all parking records for a city as a lazy page stream
    ///
    /// Pagination is applied transparently; callers see only pages of
    /// normalized records. A failure mid-pagination invalidates the whole
    /// fetch for that city.
    fn fetch(&self, city: City) -> FeedStream;

    /// Get the feed source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}
