//! Service seams for the three external network boundaries.
//!
//! Each boundary is an object-safe async trait so callers (and tests) can
//! inject a pre-built implementation through
//! [`crate::config::PipelineConfig`], mirroring the usual "bring your own
//! provider" escape hatch: the default HTTP implementations read their API
//! keys from credentials or the environment, while tests plug in in-process
//! fakes and never touch the network.
//!
//! The request/response payload shapes on the wire belong to the services;
//! this module owns only the *decoded* forms the pipeline consumes
//! ([`OcrResponse`], a raw completion string, raw audio bytes).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Failure of a single request/response exchange with an external service.
///
/// Classified at the HTTP layer so every stage applies the same
/// transient/permanent policy without re-inspecting status codes.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// HTTP 429. `retry_after_secs` comes from the `Retry-After` header when
    /// the service supplies one.
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// The call exceeded its configured timeout.
    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// HTTP 401/403 — retrying will not help.
    #[error("authentication failed: {detail}")]
    Auth { detail: String },

    /// The service rejected the request body (4xx other than auth/rate).
    #[error("request rejected: {detail}")]
    Rejected { detail: String },

    /// The response body did not decode into the expected shape.
    #[error("malformed response: {detail}")]
    Malformed { detail: String },

    /// Server-side failure (5xx).
    #[error("server error (HTTP {status}): {detail}")]
    Http { status: u16, detail: String },

    /// Connection-level failure.
    #[error("network error: {detail}")]
    Network { detail: String },
}

impl ServiceError {
    /// Transient errors are eligible for the owning stage's retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited { .. }
                | ServiceError::Timeout { .. }
                | ServiceError::Http { .. }
                | ServiceError::Network { .. }
        )
    }

    /// Classify a reqwest failure or non-success response.
    fn from_status(status: u16, detail: String) -> Self {
        match status {
            401 | 403 => ServiceError::Auth { detail },
            429 => ServiceError::RateLimited {
                retry_after_secs: None,
            },
            400..=499 => ServiceError::Rejected { detail },
            _ => ServiceError::Http { status, detail },
        }
    }
}

// ── Decoded service payloads ─────────────────────────────────────────────

/// One page of the OCR service's document reading.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrPage {
    /// 1-based page number.
    pub page: usize,
    /// Page content as markdown-like text.
    pub markdown: String,
    /// Images the service located and cropped on this page.
    #[serde(default)]
    pub images: Vec<OcrImage>,
}

/// A cropped image the OCR service located on a page.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrImage {
    /// Service-assigned id, unique within the document.
    pub id: String,
    /// Bounding region in page coordinates: `[x0, y0, x1, y1]`.
    #[serde(default)]
    pub bbox: [f64; 4],
    /// Cropped image bytes, base64.
    pub image_base64: String,
}

/// The decoded OCR response: one entry per page, service page order.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrResponse {
    pub pages: Vec<OcrPage>,
}

// ── Traits ───────────────────────────────────────────────────────────────

/// Document-understanding service: one exchange per document.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// Read `bytes` and return per-page text plus located images.
    /// `include_images` controls whether cropped image payloads are returned.
    async fn read_document(
        &self,
        bytes: &[u8],
        include_images: bool,
    ) -> Result<OcrResponse, ServiceError>;
}

/// Large-language-model completion service for slide planning.
#[async_trait]
pub trait PlannerModel: Send + Sync {
    /// One chat-style exchange; the returned string is the raw model output.
    async fn complete(&self, system: &str, user: &str) -> Result<String, ServiceError>;
}

/// Text-to-speech service: one exchange per narration script.
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Synthesize `text` and return the audio container bytes as delivered
    /// by the service (format varies per call; normalisation happens later).
    async fn speak(&self, text: &str) -> Result<Vec<u8>, ServiceError>;
}

// ── HTTP-backed defaults ─────────────────────────────────────────────────

/// Opaque per-service API tokens.
///
/// `Debug` is implemented by hand so keys never land in logs.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub ocr_api_key: Option<String>,
    pub planner_api_key: Option<String>,
    pub speech_api_key: Option<String>,
}

impl Credentials {
    /// Read keys from the conventional environment variables.
    ///
    /// `SLIDECAST_*` variables win; the service-native names are accepted as
    /// fallbacks so existing shells keep working.
    pub fn from_env() -> Self {
        let pick = |ours: &str, theirs: &str| {
            std::env::var(ours)
                .or_else(|_| std::env::var(theirs))
                .ok()
                .filter(|v| !v.is_empty())
        };
        Self {
            ocr_api_key: pick("SLIDECAST_OCR_API_KEY", "MISTRAL_API_KEY"),
            planner_api_key: pick("SLIDECAST_PLANNER_API_KEY", "GEMINI_API_KEY"),
            speech_api_key: pick("SLIDECAST_SPEECH_API_KEY", "SARVAM_API_KEY"),
        }
    }

    /// Merge: fields already set on `self` win over `other`.
    pub fn or(self, other: Credentials) -> Self {
        Self {
            ocr_api_key: self.ocr_api_key.or(other.ocr_api_key),
            planner_api_key: self.planner_api_key.or(other.planner_api_key),
            speech_api_key: self.speech_api_key.or(other.speech_api_key),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("ocr_api_key", &redact(&self.ocr_api_key))
            .field("planner_api_key", &redact(&self.planner_api_key))
            .field("speech_api_key", &redact(&self.speech_api_key))
            .finish()
    }
}

/// Map a reqwest error into a [`ServiceError`].
fn map_reqwest(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout { elapsed_ms: 0 }
    } else if e.is_connect() {
        ServiceError::Network {
            detail: e.to_string(),
        }
    } else {
        ServiceError::Network {
            detail: e.to_string(),
        }
    }
}

/// Check the response status and pull the body as the error detail on failure.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = resp.text().await.unwrap_or_default();
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        // Keep error bodies short; services sometimes echo whole documents.
        body.chars().take(500).collect()
    };
    if status.as_u16() == 429 {
        return Err(ServiceError::RateLimited {
            retry_after_secs: retry_after,
        });
    }
    Err(ServiceError::from_status(status.as_u16(), detail))
}

/// OCR over HTTP: uploads the document as base64 JSON, decodes per-page
/// markdown and cropped images from the response.
pub struct HttpOcrService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpOcrService {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.mistral.ai/v1/ocr";

    pub fn new(api_key: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: client_with_timeout(timeout_secs),
            endpoint: std::env::var("SLIDECAST_OCR_ENDPOINT")
                .unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string()),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl OcrService for HttpOcrService {
    async fn read_document(
        &self,
        bytes: &[u8],
        include_images: bool,
    ) -> Result<OcrResponse, ServiceError> {
        let body = serde_json::json!({
            "document": { "type": "document_base64", "data": STANDARD.encode(bytes) },
            "include_image_base64": include_images,
        });
        debug!(bytes = bytes.len(), include_images, "OCR request");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;
        let resp = check_status(resp).await?;

        resp.json::<OcrResponse>()
            .await
            .map_err(|e| ServiceError::Malformed {
                detail: e.to_string(),
            })
    }
}

/// Planner completion over HTTP: chat-style request with a JSON response
/// format hint, returns the raw completion text.
pub struct HttpPlannerModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpPlannerModel {
    pub const DEFAULT_ENDPOINT: &'static str =
        "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";
    pub const DEFAULT_MODEL: &'static str = "gemini-2.5-pro";

    pub fn new(api_key: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: client_with_timeout(timeout_secs),
            endpoint: std::env::var("SLIDECAST_PLANNER_ENDPOINT")
                .unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string()),
            api_key: api_key.into(),
            model: std::env::var("SLIDECAST_PLANNER_MODEL")
                .unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl PlannerModel for HttpPlannerModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "response_format": { "type": "json_object" },
        });
        debug!(model = %self.model, prompt_bytes = user.len(), "planner request");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;
        let resp = check_status(resp).await?;

        let completion: ChatCompletion =
            resp.json().await.map_err(|e| ServiceError::Malformed {
                detail: e.to_string(),
            })?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ServiceError::Malformed {
                detail: "completion has no choices".into(),
            })
    }
}

/// TTS over HTTP: posts the script, returns audio container bytes.
pub struct HttpSpeechService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    voice: String,
}

impl HttpSpeechService {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.sarvam.ai/text-to-speech";
    pub const DEFAULT_VOICE: &'static str = "anushka";

    pub fn new(api_key: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: client_with_timeout(timeout_secs),
            endpoint: std::env::var("SLIDECAST_SPEECH_ENDPOINT")
                .unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string()),
            api_key: api_key.into(),
            voice: std::env::var("SLIDECAST_SPEECH_VOICE")
                .unwrap_or_else(|_| Self::DEFAULT_VOICE.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct SpeechResponse {
    /// Base64 audio payloads; the service may chunk long scripts.
    audios: Vec<String>,
}

#[async_trait]
impl SpeechService for HttpSpeechService {
    async fn speak(&self, text: &str) -> Result<Vec<u8>, ServiceError> {
        let body = serde_json::json!({
            "text": text,
            "speaker": self.voice,
            "model": "bulbul:v2",
            "target_language_code": "en-IN",
        });
        debug!(chars = text.len(), voice = %self.voice, "TTS request");

        let resp = self
            .client
            .post(&self.endpoint)
            .header("api-subscription-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;
        let resp = check_status(resp).await?;

        let decoded: SpeechResponse = resp.json().await.map_err(|e| ServiceError::Malformed {
            detail: e.to_string(),
        })?;
        let mut bytes = Vec::new();
        for chunk in &decoded.audios {
            let part = STANDARD
                .decode(chunk)
                .map_err(|e| ServiceError::Malformed {
                    detail: format!("audio chunk is not valid base64: {e}"),
                })?;
            bytes.extend_from_slice(&part);
        }
        if bytes.is_empty() {
            return Err(ServiceError::Malformed {
                detail: "service returned no audio".into(),
            });
        }
        Ok(bytes)
    }
}

fn client_with_timeout(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .expect("reqwest client with static config")
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Resolve the OCR service, from most-specific to least-specific:
/// pre-built provider from config, then a key from config credentials, then
/// the environment.
pub fn resolve_ocr(
    prebuilt: Option<&Arc<dyn OcrService>>,
    credentials: &Credentials,
    timeout_secs: u64,
) -> Result<Arc<dyn OcrService>, String> {
    if let Some(svc) = prebuilt {
        return Ok(Arc::clone(svc));
    }
    let creds = credentials.clone().or(Credentials::from_env());
    match creds.ocr_api_key {
        Some(key) => Ok(Arc::new(HttpOcrService::new(key, timeout_secs))),
        None => Err("Set SLIDECAST_OCR_API_KEY (or MISTRAL_API_KEY) in the environment.".into()),
    }
}

/// Resolve the planner model. Same fallback chain as [`resolve_ocr`].
pub fn resolve_planner(
    prebuilt: Option<&Arc<dyn PlannerModel>>,
    credentials: &Credentials,
    timeout_secs: u64,
) -> Result<Arc<dyn PlannerModel>, String> {
    if let Some(model) = prebuilt {
        return Ok(Arc::clone(model));
    }
    let creds = credentials.clone().or(Credentials::from_env());
    match creds.planner_api_key {
        Some(key) => Ok(Arc::new(HttpPlannerModel::new(key, timeout_secs))),
        None => {
            Err("Set SLIDECAST_PLANNER_API_KEY (or GEMINI_API_KEY) in the environment.".into())
        }
    }
}

/// Resolve the speech service. Same fallback chain as [`resolve_ocr`].
pub fn resolve_speech(
    prebuilt: Option<&Arc<dyn SpeechService>>,
    credentials: &Credentials,
    timeout_secs: u64,
) -> Result<Arc<dyn SpeechService>, String> {
    if let Some(svc) = prebuilt {
        return Ok(Arc::clone(svc));
    }
    let creds = credentials.clone().or(Credentials::from_env());
    match creds.speech_api_key {
        Some(key) => Ok(Arc::new(HttpSpeechService::new(key, timeout_secs))),
        None => Err("Set SLIDECAST_SPEECH_API_KEY (or SARVAM_API_KEY) in the environment.".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ServiceError::RateLimited {
            retry_after_secs: Some(30)
        }
        .is_transient());
        assert!(ServiceError::Timeout { elapsed_ms: 5000 }.is_transient());
        assert!(ServiceError::Http {
            status: 503,
            detail: "overloaded".into()
        }
        .is_transient());
        assert!(!ServiceError::Auth {
            detail: "bad key".into()
        }
        .is_transient());
        assert!(!ServiceError::Rejected {
            detail: "too large".into()
        }
        .is_transient());
    }

    #[test]
    fn from_status_maps_auth_and_client_errors() {
        assert!(matches!(
            ServiceError::from_status(401, "x".into()),
            ServiceError::Auth { .. }
        ));
        assert!(matches!(
            ServiceError::from_status(413, "x".into()),
            ServiceError::Rejected { .. }
        ));
        assert!(matches!(
            ServiceError::from_status(500, "x".into()),
            ServiceError::Http { status: 500, .. }
        ));
    }

    #[test]
    fn credentials_debug_redacts_keys() {
        let creds = Credentials {
            ocr_api_key: Some("sk-secret".into()),
            planner_api_key: None,
            speech_api_key: None,
        };
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<set>"));
        assert!(dbg.contains("<unset>"));
    }

    #[test]
    fn credentials_or_prefers_self() {
        let a = Credentials {
            ocr_api_key: Some("a".into()),
            ..Default::default()
        };
        let b = Credentials {
            ocr_api_key: Some("b".into()),
            planner_api_key: Some("p".into()),
            ..Default::default()
        };
        let merged = a.or(b);
        assert_eq!(merged.ocr_api_key.as_deref(), Some("a"));
        assert_eq!(merged.planner_api_key.as_deref(), Some("p"));
    }

    #[test]
    fn rate_limited_display_mentions_retry_after() {
        let e = ServiceError::RateLimited {
            retry_after_secs: Some(12),
        };
        assert!(e.to_string().contains("12s"));
    }
}
