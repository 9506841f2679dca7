//! Page context extraction.
//!
//! The text of a search hit's source page grounds its caption. Extraction is
//! best-effort: any failure yields an empty context.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};
use url::Url;

use imageset_shared::{DatasetError, HttpSettings, MAX_CONTEXT_CHARS, Result};

use crate::MAX_PAGE_BYTES;
use crate::guard::is_blocked_target;

/// Elements whose text makes up the context, matched in document order.
static TEXT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, p").expect("static selector"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Extracts a short text excerpt describing a web page.
#[async_trait]
pub trait ContextScraper: Send + Sync {
    /// Text of `url`, at most [`MAX_CONTEXT_CHARS`] characters; empty on failure.
    async fn extract_context(&self, url: &Url) -> String;
}

/// [`ContextScraper`] that downloads the page and reads headings and paragraphs.
pub struct HtmlContextScraper {
    client: Client,
    allow_private_hosts: bool,
    max_body_bytes: usize,
}

impl HtmlContextScraper {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        Ok(Self {
            client: crate::build_client(settings)?,
            allow_private_hosts: settings.allow_private_hosts,
            max_body_bytes: MAX_PAGE_BYTES,
        })
    }

    /// Override the largest page body read (default [`MAX_PAGE_BYTES`]).
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    async fn fetch_html(&self, url: &Url) -> Result<String> {
        if is_blocked_target(url, self.allow_private_hosts) {
            return Err(DatasetError::Scrape(format!("{url}: blocked target")));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| DatasetError::Scrape(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatasetError::Scrape(format!("{url}: HTTP {status}")));
        }

        let body = crate::read_body_capped(response, self.max_body_bytes)
            .await
            .map_err(|e| DatasetError::Scrape(format!("{url}: {e}")))?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait]
impl ContextScraper for HtmlContextScraper {
    #[instrument(skip_all, fields(url = %url))]
    async fn extract_context(&self, url: &Url) -> String {
        match self.fetch_html(url).await {
            Ok(html) => {
                let context = extract_text(&html);
                debug!(chars = context.chars().count(), "context extracted");
                context
            }
            Err(e) => {
                warn!(error = %e, "context extraction failed, continuing without context");
                String::new()
            }
        }
    }
}

/// Join the text of `h1`, `h2` and `p` elements with single spaces and keep
/// the first [`MAX_CONTEXT_CHARS`] characters.
pub fn extract_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    let fragments: Vec<String> = doc
        .select(&TEXT_SELECTOR)
        .map(|el| {
            let raw = el.text().collect::<String>();
            WHITESPACE.replace_all(raw.trim(), " ").into_owned()
        })
        .filter(|text| !text.is_empty())
        .collect();

    fragments.join(" ").chars().take(MAX_CONTEXT_CHARS).collect()
}
