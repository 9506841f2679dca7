//! Image search against the SerpApi Google Images endpoint.
//!
//! Every call first passes through a process-wide [`SlidingWindowLimiter`], so
//! all clients together stay within the provider's call budget. Responses are parsed
//! into typed structs and turned into [`SearchHit`]s at this boundary; hits
//! without a usable image or page URL never leave the crate.

mod limiter;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use imageset_shared::{DatasetError, Result, SearchHit, SearchSettings};

pub use limiter::SlidingWindowLimiter;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("imageset/", env!("CARGO_PKG_VERSION"));

/// Provider message for a query without results; not a failure.
const NO_RESULTS_MARKER: &str = "hasn't returned any results";

// ---------------------------------------------------------------------------
// ImageSearchClient
// ---------------------------------------------------------------------------

/// Finds candidate images for a query.
#[async_trait]
pub trait ImageSearchClient: Send + Sync {
    /// Return at most the configured number of hits for `query`.
    ///
    /// Fails with [`DatasetError::Search`] on provider or network failure.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SerpResponse {
    #[serde(default)]
    images_results: Vec<SerpImageResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerpImageResult {
    /// Full-size image URL.
    #[serde(default)]
    original: Option<String>,
    /// Page the image appears on.
    #[serde(default)]
    link: Option<String>,
}

impl SerpImageResult {
    fn into_hit(self) -> Option<SearchHit> {
        let image_url = Url::parse(self.original.as_deref()?).ok()?;
        let source_page_url = Url::parse(self.link.as_deref()?).ok()?;
        Some(SearchHit {
            image_url,
            source_page_url,
        })
    }
}

// ---------------------------------------------------------------------------
// SerpApiSearchClient
// ---------------------------------------------------------------------------

/// [`ImageSearchClient`] backed by SerpApi.
pub struct SerpApiSearchClient {
    client: Client,
    settings: SearchSettings,
    limiter: Arc<SlidingWindowLimiter>,
}

impl SerpApiSearchClient {
    /// Create a client drawing from the process-wide limiter for the
    /// configured budget.
    pub fn new(settings: &SearchSettings) -> Result<Self> {
        let limiter =
            SlidingWindowLimiter::shared(settings.rate_limit_calls, settings.rate_limit_window);
        Self::with_limiter(settings, limiter)
    }

    /// Create a client that shares an existing limiter.
    pub fn with_limiter(settings: &SearchSettings, limiter: Arc<SlidingWindowLimiter>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DatasetError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            settings: settings.clone(),
            limiter,
        })
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    fn request_url(&self, query: &str) -> Url {
        let mut url = self.settings.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("engine", "google")
            .append_pair("q", query)
            .append_pair("tbm", "isch")
            .append_pair("api_key", self.settings.api_key.expose());
        url
    }
}

#[async_trait]
impl ImageSearchClient for SerpApiSearchClient {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.limiter.acquire().await;

        // The request URL carries the API key; keep it out of error messages.
        let response = self
            .client
            .get(self.request_url(query))
            .send()
            .await
            .map_err(|e| DatasetError::search(format!("'{query}': {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DatasetError::search(format!("'{query}': body read failed: {}", e.without_url())))?;

        if !status.is_success() {
            return Err(DatasetError::search(format!(
                "'{query}': HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let hits = parse_response(&body, self.settings.max_results)
            .map_err(|e| DatasetError::search(format!("'{query}': {e}")))?;

        info!(hits = hits.len(), "image search complete");
        Ok(hits)
    }
}

/// Parse a provider response body into at most `max_results` hits.
fn parse_response(body: &str, max_results: usize) -> std::result::Result<Vec<SearchHit>, String> {
    let parsed: SerpResponse =
        serde_json::from_str(body).map_err(|e| format!("malformed response: {e}"))?;

    if let Some(error) = parsed.error {
        if error.contains(NO_RESULTS_MARKER) {
            debug!(%error, "provider returned no results");
            return Ok(Vec::new());
        }
        return Err(format!("provider error: {error}"));
    }

    let total = parsed.images_results.len();
    let usable: Vec<SearchHit> = parsed
        .images_results
        .into_iter()
        .filter_map(SerpImageResult::into_hit)
        .collect();

    if usable.len() < total {
        warn!(
            skipped = total - usable.len(),
            "search results without usable URLs were dropped"
        );
    }

    Ok(usable.into_iter().take(max_results).collect())
}
