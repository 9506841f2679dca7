//! Core domain types for imageset datasets.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DatasetError, Result};

/// Maximum number of characters kept from a page's text context.
pub const MAX_CONTEXT_CHARS: usize = 1000;

// ---------------------------------------------------------------------------
// DomainSpec
// ---------------------------------------------------------------------------

/// A topical domain derived from the prompt, with the queries to search for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
    /// Domain name (e.g. `solar-energy`).
    pub domain: String,
    /// Search queries, in the order they will be run.
    pub queries: Vec<String>,
}

impl DomainSpec {
    pub fn new(domain: impl Into<String>, queries: Vec<String>) -> Self {
        Self {
            domain: domain.into(),
            queries,
        }
    }
}

// ---------------------------------------------------------------------------
// SearchHit
// ---------------------------------------------------------------------------

/// One image search result before enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchHit {
    /// URL of the original image.
    pub image_url: Url,
    /// Page the image was found on.
    pub source_page_url: Url,
}

// ---------------------------------------------------------------------------
// ImageRecord
// ---------------------------------------------------------------------------

/// A per-image record, enriched step by step (context, local path, caption).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_url: Url,
    pub source_page_url: Url,
    /// Page text excerpt, at most [`MAX_CONTEXT_CHARS`] characters.
    pub context: String,
    #[serde(default)]
    pub caption: Option<String>,
    pub domain: String,
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl ImageRecord {
    /// Start a record for `hit` with the context scraped from its source page.
    pub fn new(hit: &SearchHit, domain: impl Into<String>, context: String) -> Self {
        Self {
            image_url: hit.image_url.clone(),
            source_page_url: hit.source_page_url.clone(),
            context,
            caption: None,
            domain: domain.into(),
            local_path: None,
        }
    }

    pub fn with_local_path(mut self, path: PathBuf) -> Self {
        self.local_path = Some(path);
        self
    }

    pub fn with_caption(mut self, caption: String) -> Self {
        self.caption = Some(caption);
        self
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Summary computed once all records are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
    pub total_images: usize,
    /// Every domain name produced by expansion, de-duplicated in first-seen
    /// order, whether or not it yielded images.
    pub domains: Vec<String>,
}

/// The output artifact: metadata plus all kept image records.
///
/// Built through [`Dataset::assemble`]; there is no API to mutate it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    metadata: DatasetMetadata,
    images: Vec<ImageRecord>,
}

impl Dataset {
    /// Build a dataset stamped with the current time.
    pub fn assemble(prompt: &str, domains: &[DomainSpec], images: Vec<ImageRecord>) -> Self {
        Self::assemble_at(prompt, domains, images, Utc::now())
    }

    /// Build a dataset with an explicit timestamp.
    pub fn assemble_at(
        prompt: &str,
        domains: &[DomainSpec],
        images: Vec<ImageRecord>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut seen = HashSet::new();
        let names = domains
            .iter()
            .filter(|d| seen.insert(d.domain.as_str()))
            .map(|d| d.domain.clone())
            .collect();

        Self {
            metadata: DatasetMetadata {
                prompt: prompt.to_string(),
                timestamp,
                total_images: images.len(),
                domains: names,
            },
            images,
        }
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    /// Check the dataset invariants: the image count matches, every record
    /// was downloaded, and every record belongs to a listed domain.
    pub fn validate(&self) -> Result<()> {
        if self.metadata.total_images != self.images.len() {
            return Err(DatasetError::validation(format!(
                "total_images {} != {} images",
                self.metadata.total_images,
                self.images.len()
            )));
        }

        for record in &self.images {
            match &record.local_path {
                Some(path) if !path.as_os_str().is_empty() => {}
                _ => {
                    return Err(DatasetError::validation(format!(
                        "record for {} has no local path",
                        record.image_url
                    )));
                }
            }

            if !self.metadata.domains.contains(&record.domain) {
                return Err(DatasetError::validation(format!(
                    "record for {} has unknown domain '{}'",
                    record.image_url, record.domain
                )));
            }
        }

        Ok(())
    }
}
