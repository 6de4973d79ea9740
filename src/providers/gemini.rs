use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::retry::{is_rate_limited, retry_after};
use super::{ProviderFuture, ProviderKind, VisionProvider, VisionRequest, format_error_parts};
use crate::error::OcrError;
use crate::settings::DEFAULT_GEMINI_BASE_URL;

#[derive(Debug, Clone)]
pub struct Gemini {
    client: reqwest::Client,
    key: String,
    base_url: String,
}

impl Gemini {
    pub fn new(client: reqwest::Client, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base_url = base_url.trim().trim_end_matches('/');
        if !base_url.is_empty() {
            self.base_url = base_url.to_string();
        }
        self
    }
}

impl VisionProvider for Gemini {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn generate<'a>(&'a self, request: VisionRequest<'a>) -> ProviderFuture<'a> {
        Box::pin(async move {
            let url = format!("{}/{}:generateContent", self.base_url, request.model);
            let body = json!({
                "systemInstruction": {"parts": [{"text": request.system}]},
                "contents": [
                    {
                        "role": "user",
                        "parts": [
                            {"text": request.prompt},
                            {
                                "inline_data": {
                                    "mime_type": request.image.mime,
                                    "data": BASE64.encode(&request.image.bytes)
                                }
                            }
                        ]
                    }
                ],
                "generationConfig": {
                    "temperature": request.options.temperature,
                    "maxOutputTokens": request.options.max_output_tokens,
                    "responseMimeType": "application/json"
                }
            });

            debug!(model = request.model, "sending Gemini generateContent request");
            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", self.key.as_str())
                .json(&body)
                .send()
                .await
                .map_err(|err| OcrError::Provider {
                    provider: ProviderKind::Gemini,
                    message: err.to_string(),
                })?;

            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return extract_text_response(&text, request.model);
            }
            if is_rate_limited(status, &text) {
                return Err(OcrError::RateLimited {
                    provider: ProviderKind::Gemini,
                    retry_after,
                });
            }
            Err(OcrError::Provider {
                provider: ProviderKind::Gemini,
                message: format!(
                    "Gemini API error ({}): {}",
                    status,
                    extract_gemini_error(&text).unwrap_or(text)
                ),
            })
        })
    }
}

fn extract_text_response(text: &str, model: &str) -> Result<String, OcrError> {
    let payload: GeminiResponse = serde_json::from_str(text).map_err(|err| OcrError::Provider {
        provider: ProviderKind::Gemini,
        message: format!("failed to parse Gemini response JSON: {}", err),
    })?;
    if let Some(reason) = payload
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(OcrError::Provider {
            provider: ProviderKind::Gemini,
            message: format!("prompt blocked: {}", reason),
        });
    }
    let output = payload
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    if output.trim().is_empty() {
        return Err(OcrError::EmptyResponse {
            provider: ProviderKind::Gemini,
            model: model.to_string(),
        });
    }
    Ok(output)
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
        code: Option<i32>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(
        error.message,
        error.status,
        error.code.map(|value| value.to_string()),
    ))
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}
