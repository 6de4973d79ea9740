use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::retry::{is_rate_limited, retry_after};
use super::{ProviderFuture, ProviderKind, VisionProvider, VisionRequest, format_error_parts};
use crate::error::OcrError;
use crate::settings::DEFAULT_OPENROUTER_BASE_URL;

const APP_TITLE: &str = "amharic-ocr";

/// OpenAI-compatible chat completions through OpenRouter.
#[derive(Debug, Clone)]
pub struct OpenRouter {
    client: reqwest::Client,
    key: String,
    base_url: String,
}

impl OpenRouter {
    pub fn new(client: reqwest::Client, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
            base_url: DEFAULT_OPENROUTER_BASE_URL.to_string(),
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

impl VisionProvider for OpenRouter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    fn generate<'a>(&'a self, request: VisionRequest<'a>) -> ProviderFuture<'a> {
        Box::pin(async move {
            let url = format!("{}/chat/completions", self.base_url);
            let image_url = format!(
                "data:{};base64,{}",
                request.image.mime,
                BASE64.encode(&request.image.bytes)
            );
            let body = json!({
                "model": request.model,
                "messages": [
                    {"role": "system", "content": request.system},
                    {
                        "role": "user",
                        "content": [
                            {"type": "text", "text": request.prompt},
                            {"type": "image_url", "image_url": {"url": image_url}}
                        ]
                    }
                ],
                "temperature": request.options.temperature,
                "max_tokens": request.options.max_output_tokens
            });

            debug!(model = request.model, "sending OpenRouter chat completion");
            let response = self
                .client
                .post(&url)
                .bearer_auth(self.key.as_str())
                .header("X-Title", APP_TITLE)
                .json(&body)
                .send()
                .await
                .map_err(|err| OcrError::Provider {
                    provider: ProviderKind::OpenRouter,
                    message: err.to_string(),
                })?;

            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return extract_chat_response(&text, request.model);
            }
            if is_rate_limited(status, &text) {
                return Err(OcrError::RateLimited {
                    provider: ProviderKind::OpenRouter,
                    retry_after,
                });
            }
            Err(OcrError::Provider {
                provider: ProviderKind::OpenRouter,
                message: format!(
                    "OpenRouter API error ({}): {}",
                    status,
                    extract_openrouter_error(&text).unwrap_or(text)
                ),
            })
        })
    }
}

fn extract_chat_response(text: &str, model: &str) -> Result<String, OcrError> {
    let payload: ChatResponse = serde_json::from_str(text).map_err(|err| OcrError::Provider {
        provider: ProviderKind::OpenRouter,
        message: format!("failed to parse OpenRouter response JSON: {}", err),
    })?;
    let output = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(MessageContent::into_text)
        .unwrap_or_default();
    if output.trim().is_empty() {
        return Err(OcrError::EmptyResponse {
            provider: ProviderKind::OpenRouter,
            model: model.to_string(),
        });
    }
    Ok(output)
}

fn extract_openrouter_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenRouterError>,
    }

    #[derive(Deserialize)]
    struct OpenRouterError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<serde_json::Value>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let code = error.code.map(|value| match value {
        serde_json::Value::String(value) => value,
        other => other.to_string(),
    });
    Some(format_error_parts(error.message, error.kind, code))
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    text: Option<String>,
}

impl MessageContent {
    fn into_text(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}
