//! Per-image web access: page context scraping and image download.
//!
//! This crate provides:
//! - [`ContextScraper`] / [`HtmlContextScraper`]: text excerpt of a hit's source page
//! - [`ImageFetcher`] / [`DiskImageFetcher`]: download, normalize and store an image
//!
//! Both absorb their own failures: a scrape failure becomes an empty context and
//! a fetch failure becomes `None`.

mod context;
mod fetch;
mod guard;

use reqwest::{Client, Response};

use imageset_shared::{DatasetError, HttpSettings, Result};

pub use context::{ContextScraper, HtmlContextScraper, extract_text};
pub use fetch::{DiskImageFetcher, ImageFetcher, file_name_for};
pub use guard::is_blocked_target;

/// Maximum number of redirects followed for pages and images.
const MAX_REDIRECTS: usize = 5;

/// Largest page body read for context extraction.
pub const MAX_PAGE_BYTES: usize = 5 * 1024 * 1024;

/// Largest image body downloaded.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Build the HTTP client used for every request to a third-party host:
/// page scraping, image downloads and the caption re-download.
///
/// Redirect hops are screened like the original URL; a blocked hop stops the
/// chain and the 3xx response is treated as a failure by the caller.
pub fn build_client(settings: &HttpSettings) -> Result<Client> {
    let allow_private_hosts = settings.allow_private_hosts;
    let policy = reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if is_blocked_target(attempt.url(), allow_private_hosts) {
            attempt.stop()
        } else {
            attempt.follow()
        }
    });

    Client::builder()
        .user_agent(settings.user_agent.as_str())
        .redirect(policy)
        .timeout(settings.timeout)
        .build()
        .map_err(|e| DatasetError::Network(format!("failed to build HTTP client: {e}")))
}

/// Read a response body, failing as soon as it is known to exceed `limit` bytes.
///
/// A declared `Content-Length` over the limit fails before any byte is read;
/// otherwise the body is streamed chunk by chunk and abandoned once it grows
/// past the limit.
pub async fn read_body_capped(
    mut response: Response,
    limit: usize,
) -> std::result::Result<Vec<u8>, String> {
    if let Some(declared) = response.content_length() {
        if declared > limit as u64 {
            return Err(format!("body of {declared} bytes exceeds the {limit} byte limit"));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| format!("body read failed: {e}"))?
    {
        if body.len() + chunk.len() > limit {
            return Err(format!("body exceeds the {limit} byte limit"));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
