//! AI texture generation.
//!
//! Wraps a single call to a Gemini-style `generateContent` endpoint. The
//! prompt is wrapped in a fixed template asking for a seamless, top-down,
//! evenly lit tile; the response is scanned for an inline image part and
//! returned as a data URI ready for the texture loader. No retries: retry
//! policy belongs to the caller.

use serde::{Deserialize, Serialize};

const PROMPT_TEMPLATE: &str = "Create a high-quality, seamless, flat texture pattern of: {prompt}. \
Top-down view, even lighting, no perspective, fills the entire frame. \
Suitable for 3D mapping.";

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-exp:generateContent";

const API_KEY_VAR: &str = "GEMINI_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("{API_KEY_VAR} is not set; texture generation needs an API key")]
    MissingApiKey,
    #[error("texture service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("texture service rejected the prompt: {reason}")]
    Rejected { reason: String },
    #[error("texture service response contained no image")]
    NoImage,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

pub struct TextureGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl TextureGenerator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    #[cfg(test)]
    fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// One generation call. Returns a `data:{mime};base64,{payload}` URI.
    ///
    /// The API key is read at the point of use so a missing key surfaces
    /// as a clear error on the first generation attempt rather than at
    /// startup.
    pub async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let api_key =
            std::env::var(API_KEY_VAR).map_err(|_| GenerateError::MissingApiKey)?;

        let text = PROMPT_TEMPLATE.replace("{prompt}", prompt);
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: &text }],
            }],
        };

        log::info!("requesting generated texture for prompt {prompt:?}");
        let response: GenerateResponse = self
            .client
            .post(&self.endpoint)
            .query(&[("key", api_key.as_str())])
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_image_uri(response)
    }
}

impl Default for TextureGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan the candidates for an inline image. A text-only answer is a
/// rejection (typically a safety refusal) and its text becomes the error
/// reason.
fn extract_image_uri(response: GenerateResponse) -> Result<String, GenerateError> {
    let mut reason = None;
    for candidate in response.candidates {
        let Some(content) = candidate.content else {
            continue;
        };
        for part in content.parts {
            if let Some(inline) = part.inline_data {
                return Ok(format!("data:{};base64,{}", inline.mime_type, inline.data));
            }
            if let Some(text) = part.text {
                reason.get_or_insert(text);
            }
        }
    }
    match reason {
        Some(reason) => Err(GenerateError::Rejected { reason }),
        None => Err(GenerateError::NoImage),
    }
}
