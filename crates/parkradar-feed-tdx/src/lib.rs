// # TDX Feed Adapter
//
// This crate provides the Feed Client Adapter for the TDX (Taiwan
// Transport Data eXchange) open-data platform.
//
// ## Responsibilities
//
// - OIDC client-credentials authentication with a cached bearer token;
//   refresh is single-flight, so concurrent city tasks observing an
//   expired token await one in-flight refresh instead of issuing
//   redundant token requests
// - Region-scoped, paginated fetches of the off-street car-park and
//   real-time availability endpoints, exposed as a lazy page stream
// - Per-request retry with exponential backoff and jitter, driven by
//   the core RetryPolicy: 429 and transport/5xx failures are retried,
//   401/403 gets one token refresh-and-retry and is then fatal,
//   exhausting the budget surfaces UpstreamUnavailable for that city
// - Normalization of raw payloads into canonical records; records with
//   missing identity or out-of-range coordinates are dropped and
//   counted, never propagated as fatal errors
//
// ## Not in this crate
//
// Reconciliation, single-flight-per-city scheduling, and run tracking
// are owned by the orchestrator in parkradar-core. This adapter never
// touches the store.
//
// ## API Reference
//
// - Auth: POST `{auth_url}` with `grant_type=client_credentials`
// - Car parks: GET `/v1/Parking/OffStreet/CarPark/City/{City}`
// - Availability: GET `/v1/Parking/OffStreet/ParkingAvailability/City/{City}`
//
// A 404 from a region endpoint means the city has no data, not an error.

mod normalize;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use parkradar_core::model::{City, FeedPage};
use parkradar_core::retry::RetryPolicy;
use parkradar_core::traits::{FeedSource, FeedStream};
use parkradar_core::{Error, Result};

use normalize::{RawAvailability, RawCarPark, normalize_page};

/// Default TDX auth endpoint (OIDC client-credentials)
const DEFAULT_AUTH_URL: &str =
    "https://tdx.transportdata.tw/auth/realms/TDXConnect/protocol/openid-connect/token";

/// Default TDX API base URL
const DEFAULT_BASE_URL: &str = "https://tdx.transportdata.tw/api/basic";

/// Default HTTP timeout for API requests
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Default page size for `$top`/`$skip` pagination
const DEFAULT_PAGE_SIZE: usize = 1_000;

/// Default refresh margin before token expiry
///
/// TDX tokens are valid for a day; refreshing this far ahead of expiry
/// keeps a token from dying mid-pagination.
const DEFAULT_TOKEN_MARGIN_SECS: i64 = 300;

/// TDX adapter configuration
///
/// # Security
///
/// The client secret never appears in logs; the Debug implementation
/// redacts it.
#[derive(Clone)]
pub struct TdxConfig {
    /// TDX application client ID
    pub client_id: String,
    /// TDX application client secret
    /// ⚠️ NEVER log this value
    pub client_secret: String,
    /// Token endpoint URL
    pub auth_url: String,
    /// API base URL
    pub base_url: String,
    /// Records requested per page
    pub page_size: usize,
    /// Per-request HTTP timeout in seconds
    pub http_timeout_secs: u64,
    /// Seconds before expiry at which the token is considered stale
    pub token_margin_secs: i64,
}

impl TdxConfig {
    /// Create a configuration with default endpoints
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            token_margin_secs: DEFAULT_TOKEN_MARGIN_SECS,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(Error::config("TDX client ID cannot be empty"));
        }
        if self.client_secret.is_empty() {
            return Err(Error::config("TDX client secret cannot be empty"));
        }
        if self.page_size == 0 {
            return Err(Error::config("TDX page_size must be > 0"));
        }
        Ok(())
    }
}

// Custom Debug implementation that hides the client secret
impl std::fmt::Debug for TdxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdxConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .field("auth_url", &self.auth_url)
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// A cached bearer token with its hard expiry
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, margin_secs: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(margin_secs) < self.expires_at
    }
}

/// Token endpoint response body
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    86_400
}

/// TDX feed client
///
/// Cheap to clone; all clones share the HTTP connection pool and the
/// cached credential.
#[derive(Debug, Clone)]
pub struct TdxFeedClient {
    config: TdxConfig,
    http: reqwest::Client,
    policy: RetryPolicy,
    /// Cached credential; the Mutex makes refresh single-flight
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl TdxFeedClient {
    /// Create a new TDX feed client
    pub fn new(config: TdxConfig, policy: RetryPolicy) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            policy,
            token: Arc::new(Mutex::new(None)),
        })
    }

    /// Get a valid bearer token, refreshing if necessary
    ///
    /// The refresh happens while holding the token lock, so concurrent
    /// callers with an expired token queue behind one request and then
    /// all observe the fresh credential. `force` discards the cache
    /// (used for the one refresh-and-retry after a 401/403).
    async fn access_token(&self, force: bool) -> Result<String> {
        let mut guard = self.token.lock().await;

        if !force {
            if let Some(token) = guard.as_ref() {
                if token.is_fresh(self.config.token_margin_secs) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!("Requesting new TDX access token");
        let response = self
            .http
            .post(&self.config.auth_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::http(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                429 => Error::rate_limited("Token endpoint rate limited"),
                _ => Error::auth(format!("Token request rejected with status {}", status)),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::auth(format!("Failed to parse token response: {}", e)))?;

        let token = CachedToken {
            access_token: body.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(body.expires_in),
        };
        let access_token = token.access_token.clone();
        *guard = Some(token);

        Ok(access_token)
    }

    /// Authenticated GET with retry/backoff
    ///
    /// Returns `Ok(None)` for 404 (no data for the city). Transient
    /// failures (429, 5xx, transport errors) are retried per the
    /// policy; a 401/403 gets one token refresh-and-retry and is then
    /// fatal. Exhausting the retry budget surfaces UpstreamUnavailable.
    async fn get_json(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Option<serde_json::Value>> {
        let mut attempt: u32 = 0;
        let mut refreshed = false;

        loop {
            let token = self.access_token(false).await?;

            let outcome = self
                .http
                .get(url)
                .query(params)
                .bearer_auth(&token)
                .header("Accept", "application/json")
                .send()
                .await;

            let transient = match outcome {
                Ok(response) => {
                    let status = response.status();
                    match status.as_u16() {
                        200..=299 => {
                            let body = response.json().await.map_err(|e| {
                                Error::malformed(format!("Undecodable response body: {}", e))
                            })?;
                            return Ok(Some(body));
                        }
                        404 => return Ok(None),
                        401 | 403 => {
                            if refreshed {
                                return Err(Error::auth(format!(
                                    "Request rejected with status {} after token refresh",
                                    status
                                )));
                            }
                            debug!("Got {}, refreshing token once", status);
                            refreshed = true;
                            self.access_token(true).await?;
                            continue;
                        }
                        429 => Error::rate_limited(format!("Rate limited by upstream: {}", url)),
                        500..=599 => {
                            Error::upstream(format!("Upstream server error {}: {}", status, url))
                        }
                        _ => {
                            return Err(Error::http(format!(
                                "Unexpected status {} for {}",
                                status, url
                            )));
                        }
                    }
                }
                Err(e) => Error::http(format!("Transport error for {}: {}", url, e)),
            };

            if !self.policy.allows_retry(attempt) {
                return Err(Error::upstream(format!(
                    "Retries exhausted after {} attempts: {}",
                    attempt + 1,
                    transient
                )));
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %transient,
                "Transient feed error, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Fetch the full availability map for a city, keyed by CarParkID
    async fn fetch_availability(&self, city: City) -> Result<HashMap<String, RawAvailability>> {
        let url = format!(
            "{}/v1/Parking/OffStreet/ParkingAvailability/City/{}",
            self.config.base_url, city
        );

        let mut map = HashMap::new();
        let mut skip = 0usize;

        loop {
            let params = page_params(self.config.page_size, skip);
            let Some(body) = self.get_json(&url, &params).await? else {
                break;
            };
            let entries: Vec<RawAvailability> =
                serde_json::from_value(unwrap_list(body, "ParkingAvailabilities"))
                    .map_err(|e| Error::malformed(format!("Availability payload: {}", e)))?;

            let count = entries.len();
            for entry in entries {
                if let Some(id) = entry.car_park_id.clone().filter(|id| !id.is_empty()) {
                    map.insert(id, entry);
                }
            }

            if count < self.config.page_size {
                break;
            }
            skip += self.config.page_size;
        }

        Ok(map)
    }

    /// Page through a city's car parks, sending normalized pages
    async fn stream_city(&self, city: City, tx: &mpsc::Sender<Result<FeedPage>>) -> Result<()> {
        let availability = self.fetch_availability(city).await?;
        debug!(city = %city, availability = availability.len(), "Fetched availability map");

        let url = format!(
            "{}/v1/Parking/OffStreet/CarPark/City/{}",
            self.config.base_url, city
        );
        let mut skip = 0usize;

        loop {
            let params = page_params(self.config.page_size, skip);
            let Some(body) = self.get_json(&url, &params).await? else {
                break;
            };
            let raw: Vec<RawCarPark> = serde_json::from_value(unwrap_list(body, "CarParks"))
                .map_err(|e| Error::malformed(format!("Car park payload: {}", e)))?;

            let count = raw.len();
            let page = normalize_page(raw, &availability);
            if tx.send(Ok(page)).await.is_err() {
                // Consumer dropped the stream; stop paging
                return Ok(());
            }

            if count < self.config.page_size {
                break;
            }
            skip += self.config.page_size;
        }

        Ok(())
    }
}

impl FeedSource for TdxFeedClient {
    fn fetch(&self, city: City) -> FeedStream {
        let client = self.clone();
        let (tx, rx) = mpsc::channel(2);

        tokio::spawn(async move {
            if let Err(e) = client.stream_city(city, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    fn source_name(&self) -> &'static str {
        "tdx"
    }
}

/// OData-style pagination parameters
fn page_params(top: usize, skip: usize) -> [(&'static str, String); 3] {
    [
        ("$format", "JSON".to_string()),
        ("$top", top.to_string()),
        ("$skip", skip.to_string()),
    ]
}

/// TDX endpoints return either a bare array or an object wrapping the
/// array under a well-known key
fn unwrap_list(body: serde_json::Value, key: &str) -> serde_json::Value {
    match body {
        serde_json::Value::Array(_) => body,
        serde_json::Value::Object(mut map) => {
            map.remove(key).unwrap_or(serde_json::Value::Array(Vec::new()))
        }
        _ => serde_json::Value::Array(Vec::new()),
    }
}
