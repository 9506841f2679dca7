//! Minimal client for OpenAI-compatible `POST /chat/completions`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use imageset_shared::{ApiKey, DatasetError, LlmSettings, Result};

/// User-Agent string for LLM requests.
const USER_AGENT: &str = concat!("imageset/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// A chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }
}

/// Plain text, or a list of typed parts for multimodal messages.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// ChatClient
// ---------------------------------------------------------------------------

/// Sends chat completion requests and returns the first choice's text.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    endpoint: Url,
    api_key: ApiKey,
}

impl ChatClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DatasetError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: completions_endpoint(&settings.base_url)?,
            api_key: settings.api_key.clone(),
        })
    }

    /// Send `request` and return the assistant's text.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint.as_str())
            .bearer_auth(self.api_key.expose())
            .json(request)
            .send()
            .await
            .map_err(|e| DatasetError::Network(format!("chat completion request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DatasetError::Network(format!("chat completion body read failed: {e}")))?;

        if !status.is_success() {
            return Err(DatasetError::Network(format!(
                "chat completion returned HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| DatasetError::parse(format!("invalid chat completion response: {e}")))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                model = %request.model,
                tokens_in = usage.prompt_tokens,
                tokens_out = usage.completion_tokens,
                "chat completion usage"
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| DatasetError::parse("chat completion response has no content"))
    }
}

/// `<base_url>/chat/completions`, tolerating a trailing slash on the base.
fn completions_endpoint(base_url: &Url) -> Result<Url> {
    let base = base_url.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/chat/completions"))
        .map_err(|e| DatasetError::config(format!("invalid LLM base URL '{base_url}': {e}")))
}
