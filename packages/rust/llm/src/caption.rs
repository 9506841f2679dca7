//! Image captioning with a vision-capable chat model.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument, warn};
use url::Url;

use imageset_crawler::{MAX_IMAGE_BYTES, build_client, is_blocked_target, read_body_capped};
use imageset_shared::{DatasetError, HttpSettings, LlmSettings, Result};

use crate::client::{ChatClient, ChatMessage, ChatRequest, ContentPart, ImageUrl};

const CAPTION_INSTRUCTION: &str =
    "Generate a concise and descriptive caption that relates the image to its context.";

const DEFAULT_MIME: &str = "image/jpeg";

/// Produces a caption for an image given the text around it.
#[async_trait]
pub trait CaptionAnnotator: Send + Sync {
    /// Caption text; empty when captioning failed.
    async fn caption(&self, image_url: &Url, context: &str) -> String;
}

/// [`CaptionAnnotator`] that sends the image inline as a base64 data URL.
///
/// The image is downloaded again with the same outbound guard and redirect
/// screening as the image fetcher.
pub struct VisionCaptionAnnotator {
    chat: ChatClient,
    http: Client,
    model: String,
    allow_private_hosts: bool,
}

impl VisionCaptionAnnotator {
    pub fn new(llm: &LlmSettings, http: &HttpSettings) -> Result<Self> {
        Ok(Self {
            chat: ChatClient::new(llm)?,
            http: build_client(http)?,
            model: llm.caption_model.clone(),
            allow_private_hosts: http.allow_private_hosts,
        })
    }

    async fn try_caption(&self, image_url: &Url, context: &str) -> Result<String> {
        let image = self.download_data_url(image_url).await?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(format!(
                    "Generate a relevant caption for an image based on its context. Context: {context}"
                )),
                ChatMessage::user_parts(vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image },
                    },
                    ContentPart::Text {
                        text: CAPTION_INSTRUCTION.into(),
                    },
                ]),
            ],
            temperature: None,
            response_format: None,
        };

        let caption = self
            .chat
            .complete(&request)
            .await
            .map_err(|e| DatasetError::Caption(e.to_string()))?;
        Ok(caption.trim().to_string())
    }

    async fn download_data_url(&self, image_url: &Url) -> Result<String> {
        if is_blocked_target(image_url, self.allow_private_hosts) {
            return Err(DatasetError::Caption(format!("{image_url}: blocked target")));
        }

        let response = self
            .http
            .get(image_url.as_str())
            .send()
            .await
            .map_err(|e| DatasetError::Caption(format!("{image_url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatasetError::Caption(format!("{image_url}: HTTP {status}")));
        }

        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = read_body_capped(response, MAX_IMAGE_BYTES)
            .await
            .map_err(|e| DatasetError::Caption(format!("{image_url}: {e}")))?;

        Ok(data_url(&bytes, mime.as_deref()))
    }
}

#[async_trait]
impl CaptionAnnotator for VisionCaptionAnnotator {
    #[instrument(skip_all, fields(url = %image_url))]
    async fn caption(&self, image_url: &Url, context: &str) -> String {
        match self.try_caption(image_url, context).await {
            Ok(caption) => {
                debug!(chars = caption.chars().count(), "caption generated");
                caption
            }
            Err(e) => {
                warn!(error = %e, "captioning failed, keeping record without caption");
                String::new()
            }
        }
    }
}

/// `data:<mime>;base64,<payload>`; non-image content types fall back to JPEG.
fn data_url(bytes: &[u8], content_type: Option<&str>) -> String {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .filter(|ct| ct.starts_with("image/"))
        .unwrap_or(DEFAULT_MIME);
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use imageset_shared::ApiKey;

    use super::*;

    fn llm_settings(base: &str) -> LlmSettings {
        LlmSettings {
            api_key: ApiKey::new("sk-test"),
            base_url: Url::parse(base).unwrap(),
            analysis_model: "analysis-model".into(),
            caption_model: "vision-model".into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn http_settings() -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(5),
            user_agent: "imageset-test".into(),
            jpeg_quality: 75,
            allow_private_hosts: true,
        }
    }

    async fn mount_image(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(server)
            .await;
    }

    #[test]
    fn data_url_uses_content_type() {
        assert_eq!(data_url(b"abc", Some("image/png")), "data:image/png;base64,YWJj");
        assert_eq!(
            data_url(b"abc", Some("image/webp; charset=binary")),
            "data:image/webp;base64,YWJj"
        );
        assert_eq!(data_url(b"abc", Some("text/html")), "data:image/jpeg;base64,YWJj");
        assert_eq!(data_url(b"abc", None), "data:image/jpeg;base64,YWJj");
    }

    #[tokio::test]
    async fn captions_image_with_context() {
        let server = MockServer::start().await;
        mount_image(&server).await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "  A rooftop solar array.\n" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let annotator =
            VisionCaptionAnnotator::new(&llm_settings(&server.uri()), &http_settings()).unwrap();
        let url = Url::parse(&format!("{}/img.png", server.uri())).unwrap();
        let caption = annotator.caption(&url, "Solar panels on homes").await;
        assert_eq!(caption, "A rooftop solar array.");

        let requests = server.received_requests().await.unwrap();
        let chat = requests
            .iter()
            .find(|r| r.url.path() == "/chat/completions")
            .expect("chat request");
        let body: serde_json::Value = serde_json::from_slice(&chat.body).unwrap();
        assert_eq!(body["model"], "vision-model");
        assert_eq!(
            body["messages"][0]["content"],
            "Generate a relevant caption for an image based on its context. Context: Solar panels on homes"
        );
        assert_eq!(
            body["messages"][1]["content"][0]["image_url"]["url"],
            "data:image/png;base64,AQID"
        );
        assert_eq!(body["messages"][1]["content"][1]["text"], CAPTION_INSTRUCTION);
    }

    #[tokio::test]
    async fn model_failure_yields_empty_caption() {
        let server = MockServer::start().await;
        mount_image(&server).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let annotator =
            VisionCaptionAnnotator::new(&llm_settings(&server.uri()), &http_settings()).unwrap();
        let url = Url::parse(&format!("{}/img.png", server.uri())).unwrap();
        assert_eq!(annotator.caption(&url, "").await, "");
    }

    #[tokio::test]
    async fn empty_choices_yield_empty_caption() {
        let server = MockServer::start().await;
        mount_image(&server).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let annotator =
            VisionCaptionAnnotator::new(&llm_settings(&server.uri()), &http_settings()).unwrap();
        let url = Url::parse(&format!("{}/img.png", server.uri())).unwrap();
        assert_eq!(annotator.caption(&url, "ctx").await, "");
    }

    #[tokio::test]
    async fn image_download_failure_skips_model_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let annotator =
            VisionCaptionAnnotator::new(&llm_settings(&server.uri()), &http_settings()).unwrap();
        let url = Url::parse(&format!("{}/gone.png", server.uri())).unwrap();
        assert_eq!(annotator.caption(&url, "ctx").await, "");
    }

    #[tokio::test]
    async fn private_image_host_is_not_downloaded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .expect(0)
            .mount(&server)
            .await;

        // The model endpoint lives on the same loopback server; only the
        // image URL is subject to the guard.
        let mut strict = http_settings();
        strict.allow_private_hosts = false;
        let annotator = VisionCaptionAnnotator::new(&llm_settings(&server.uri()), &strict).unwrap();
        let url = Url::parse(&format!("{}/img.png", server.uri())).unwrap();
        assert_eq!(annotator.caption(&url, "ctx").await, "");

        let requests = server.received_requests().await.unwrap();
        assert!(requests.is_empty());
    }
}
