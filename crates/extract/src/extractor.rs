use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use lettermark_core::ExtractorSettings;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("extractor returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("extractor reply contained no text")]
    EmptyResponse,
    #[error("API key not set: export {0}")]
    MissingApiKey(String),
    #[error("{0}")]
    Other(String),
}

/// Abstraction over the external natural-language extractor.
/// Implementations take the letter text and return the model's raw reply.
pub trait AiExtractor: Send + Sync {
    fn extract(&self, text: &str) -> impl Future<Output = Result<String, ExtractorError>> + Send;
}

/// Instruction prompt sent ahead of the letter text.
pub fn build_prompt(text: &str) -> String {
    format!(
        r#"You read scanned business letters and pull out four fields. The text comes from OCR and may contain recognition errors.

FROM (sender): check the letterhead at the top, the signature block at the bottom and phrases like "for <Company Name>". Give "Name, Company" or just the company.
TO (recipient): look for "To:", "Dear", "Attention:" first, then the address block, then names such as "Embassy of ..." or "Ministry of ...".
DATE: usually top right or under the letterhead, written like "July 12, 2024", "12-07-2024" or "2024-07-12". Return it as YYYY-MM-DD.
SUBJECT: underlined text, "Subject:", "Re:" or "Regarding:"; otherwise the purpose stated in the first paragraph (visa request, meeting request, application). At most 100 characters.

Use null for any field you cannot find.

LETTER TEXT:
{text}

Reply with this JSON object only, no Markdown and no explanation:
{{"from": "...", "to": "...", "date": "YYYY-MM-DD", "subject": "...", "confidence_score": 0.0}}"#
    )
}

// ── Mock backend (always available, used for tests) ───────────────────────────

#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
    /// Never completes; exercises the pipeline timeout.
    Hang,
}

/// Replays a preset reply and counts how often it was called.
#[derive(Debug)]
pub struct MockExtractor {
    reply: MockReply,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new(reply: MockReply) -> Self {
        Self { reply, calls: AtomicUsize::new(0) }
    }

    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(MockReply::Text(text.into()))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(MockReply::Fail(message.into()))
    }

    pub fn hanging() -> Self {
        Self::new(MockReply::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AiExtractor for MockExtractor {
    async fn extract(&self, _text: &str) -> Result<String, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            MockReply::Text(t) => Ok(t.clone()),
            MockReply::Fail(message) => Err(ExtractorError::Other(message.clone())),
            MockReply::Hang => std::future::pending().await,
        }
    }
}

// ── Gemini backend ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String, ExtractorError> {
        self.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text.filter(|t| !t.trim().is_empty()))
            .ok_or(ExtractorError::EmptyResponse)
    }
}

/// Calls the Gemini `generateContent` REST endpoint.
pub struct GeminiExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiExtractor {
    pub fn new(endpoint: &str, model: &str, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Build from settings, reading the key from the configured env var.
    pub fn from_settings(settings: &ExtractorSettings) -> Result<Self, ExtractorError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ExtractorError::MissingApiKey(settings.api_key_env.clone()))?;
        Ok(Self::new(&settings.endpoint, &settings.model, api_key))
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }
}

impl AiExtractor for GeminiExtractor {
    async fn extract(&self, text: &str) -> Result<String, ExtractorError> {
        let prompt = build_prompt(text);
        let body = GenerateRequest {
            contents: [RequestContent { parts: [RequestPart { text: &prompt }] }],
        };

        tracing::debug!(model = %self.model, chars = text.len(), "calling extractor");
        let resp = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExtractorError::Status { status: status.as_u16(), body });
        }

        let reply: GenerateResponse = resp.json().await?;
        reply.into_text()
    }
}
