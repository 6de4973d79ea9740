use std::time::Duration;

use thiserror::Error;

use crate::providers::ProviderKind;

/// Per-file failure taxonomy shared by every stage of the pipeline.
#[derive(Debug, Clone, Error)]
pub enum OcrError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("unsupported format for cloud submission: {0}")]
    UnsupportedFormat(String),

    #[error("no usable credentials for {0}")]
    MissingCredentials(String),

    #[error("{provider} rate limited the request")]
    RateLimited {
        provider: ProviderKind,
        retry_after: Option<Duration>,
    },

    #[error("{provider} returned an empty response for model {model}")]
    EmptyResponse {
        provider: ProviderKind,
        model: String,
    },

    #[error("model output failed schema validation: {reason}")]
    SchemaValidationFailure { reason: String, best_effort: String },

    #[error("expected Ethiopic text was absent after a focused retry")]
    ScriptMismatch,

    #[error("all cloud routes failed ({})", attempts.join("; "))]
    AllRoutesFailed { attempts: Vec<String> },

    #[error("{provider} request failed: {message}")]
    Provider {
        provider: ProviderKind,
        message: String,
    },

    #[error("local OCR engine failed: {0}")]
    LocalEngine(String),

    #[error("local OCR produced no text")]
    LocalEmpty,

    #[error("failed to render prompt: {0}")]
    Prompt(String),

    #[error("processing was cancelled")]
    Cancelled,
}

impl OcrError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, OcrError::RateLimited { .. })
    }

    /// Stable identifier used in reports and diagnostic notes.
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::SourceUnavailable(_) => "SourceUnavailable",
            OcrError::UnsupportedFormat(_) => "UnsupportedFormat",
            OcrError::MissingCredentials(_) => "MissingCredentials",
            OcrError::RateLimited { .. } => "RateLimited",
            OcrError::EmptyResponse { .. } => "EmptyResponse",
            OcrError::SchemaValidationFailure { .. } => "SchemaValidationFailure",
            OcrError::ScriptMismatch => "ScriptMismatch",
            OcrError::AllRoutesFailed { .. } => "AllRoutesFailed",
            OcrError::Provider { .. } => "Provider",
            OcrError::LocalEngine(_) => "LocalEngine",
            OcrError::LocalEmpty => "LocalEmpty",
            OcrError::Prompt(_) => "Prompt",
            OcrError::Cancelled => "Cancelled",
        }
    }
}
