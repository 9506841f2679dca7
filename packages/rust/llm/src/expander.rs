//! Prompt analysis: turn a free-text prompt into domains and search queries.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, instrument};

use imageset_shared::{DatasetError, DomainSpec, LlmSettings, Result};

use crate::client::{ChatClient, ChatMessage, ChatRequest, ResponseFormat};

const SYSTEM_PROMPT: &str = "Analyze the user prompt and identify relevant domains and their search queries. \
Provide specific search queries for each domain that would yield relevant images.";

const FORMAT_INSTRUCTIONS: &str = r#"Respond with a single JSON object of the form:
{"domains": [{"domain": "<domain name>", "search_queries": ["<query>", "..."]}]}
Every domain must have at least one search query. Do not include any other text."#;

/// Matches a response wrapped in a Markdown code fence, capturing the body.
static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\s*```\s*$").expect("static regex")
});

/// Expands a prompt into the domains and queries that drive image search.
#[async_trait]
pub trait DomainExpander: Send + Sync {
    /// Non-empty list of domains, each with at least one query.
    ///
    /// Fails with [`DatasetError::Analysis`] when the model call fails or its
    /// output does not have the expected shape.
    async fn expand(&self, prompt: &str) -> Result<Vec<DomainSpec>>;
}

/// [`DomainExpander`] backed by a chat completion model in JSON mode.
pub struct LlmDomainExpander {
    chat: ChatClient,
    model: String,
}

impl LlmDomainExpander {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        Ok(Self {
            chat: ChatClient::new(settings)?,
            model: settings.analysis_model.clone(),
        })
    }

    fn request_for(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(format!("{SYSTEM_PROMPT}\n\n{FORMAT_INSTRUCTIONS}")),
                ChatMessage::user(prompt),
            ],
            temperature: Some(0.0),
            response_format: Some(ResponseFormat::json_object()),
        }
    }
}

#[async_trait]
impl DomainExpander for LlmDomainExpander {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn expand(&self, prompt: &str) -> Result<Vec<DomainSpec>> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(DatasetError::validation("prompt must not be empty"));
        }

        let raw = self
            .chat
            .complete(&self.request_for(prompt))
            .await
            .map_err(|e| DatasetError::analysis(format!("domain expansion request failed: {e}")))?;

        let domains = parse_domains(&raw)?;
        info!(
            domains = domains.len(),
            queries = domains.iter().map(|d| d.queries.len()).sum::<usize>(),
            "prompt analyzed"
        );
        Ok(domains)
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DomainListPayload {
    domains: Vec<DomainPayload>,
}

#[derive(Debug, Deserialize)]
struct DomainPayload {
    domain: String,
    search_queries: Vec<String>,
}

/// Parse and validate the model's JSON answer.
pub fn parse_domains(raw: &str) -> Result<Vec<DomainSpec>> {
    let body = strip_code_fence(raw);
    let payload: DomainListPayload = serde_json::from_str(body)
        .map_err(|e| DatasetError::analysis(format!("malformed domain list: {e}")))?;

    if payload.domains.is_empty() {
        return Err(DatasetError::analysis("model returned no domains"));
    }

    payload
        .domains
        .into_iter()
        .map(|entry| {
            let name = entry.domain.trim();
            if name.is_empty() {
                return Err(DatasetError::analysis("domain with a blank name"));
            }

            let queries: Vec<String> = entry
                .search_queries
                .iter()
                .map(|q| q.trim())
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect();
            if queries.is_empty() {
                return Err(DatasetError::analysis(format!(
                    "domain '{name}' has no search queries"
                )));
            }

            Ok(DomainSpec::new(name, queries))
        })
        .collect()
}

fn strip_code_fence(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => raw.trim(),
    }
}
