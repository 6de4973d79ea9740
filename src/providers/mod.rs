use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::error::OcrError;
use crate::settings::ProcessingSettings;

mod gemini;
pub mod normalize;
mod openrouter;
pub(crate) mod retry;

pub use gemini::Gemini;
pub use normalize::{ImagePart, normalize_for_cloud};
pub use openrouter::OpenRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenRouter,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenRouter => "openrouter",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerationOptions {
    pub fn from_settings(settings: &ProcessingSettings) -> Self {
        Self {
            temperature: if settings.low_temperature { 0.1 } else { 0.4 },
            max_output_tokens: settings.max_output_tokens,
        }
    }
}

/// One "image + prompt in, free-form text out" call.
#[derive(Debug, Clone, Copy)]
pub struct VisionRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub image: &'a ImagePart,
    pub model: &'a str,
    pub options: GenerationOptions,
}

pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<String, OcrError>> + Send + 'a>>;

/// A hosted vision-language model. Implementations hold their own
/// credentials and HTTP client; calls are stateless.
pub trait VisionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn generate<'a>(&'a self, request: VisionRequest<'a>) -> ProviderFuture<'a>;
}

/// Provider instances for one batch or session, built once from the
/// credentials and passed to the pipeline by reference.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn VisionProvider>>,
    clients: HashMap<String, reqwest::Client>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &ProcessingSettings) -> Result<Self, OcrError> {
        let mut registry = Self::new();
        registry.refresh(settings)?;
        Ok(registry)
    }

    /// Rebuilds providers for the current credentials, reusing HTTP clients
    /// already created for the same credential.
    pub fn refresh(&mut self, settings: &ProcessingSettings) -> Result<(), OcrError> {
        self.providers.clear();
        if let Some(key) = settings.credentials.key_for(ProviderKind::Gemini) {
            let client = self.client_for(ProviderKind::Gemini, key, settings.request_timeout)?;
            let provider = Gemini::new(client, key).with_base_url(&settings.gemini_base_url);
            self.register(Arc::new(provider));
        }
        if let Some(key) = settings.credentials.key_for(ProviderKind::OpenRouter) {
            let client =
                self.client_for(ProviderKind::OpenRouter, key, settings.request_timeout)?;
            let provider =
                OpenRouter::new(client, key).with_base_url(&settings.openrouter_base_url);
            self.register(Arc::new(provider));
        }
        Ok(())
    }

    pub fn register(&mut self, provider: Arc<dyn VisionProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn VisionProvider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn client_for(
        &mut self,
        kind: ProviderKind,
        key: &str,
        timeout: Duration,
    ) -> Result<reqwest::Client, OcrError> {
        let fingerprint = credential_fingerprint(kind, key, timeout);
        if let Some(client) = self.clients.get(&fingerprint) {
            debug!(provider = %kind, "reusing cached HTTP client");
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| OcrError::Provider {
                provider: kind,
                message: format!("failed to build HTTP client: {}", err),
            })?;
        self.clients.insert(fingerprint, client.clone());
        Ok(client)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds = self.providers.keys().map(|kind| kind.as_str()).collect::<Vec<_>>();
        kinds.sort();
        f.debug_struct("ProviderRegistry")
            .field("providers", &kinds)
            .field("cached_clients", &self.clients.len())
            .finish()
    }
}

/// Cache key that never keeps the raw credential around.
fn credential_fingerprint(kind: ProviderKind, key: &str, timeout: Duration) -> String {
    let digest = md5::compute(format!("{}:{}", kind.as_str(), key));
    format!("{:x}:{}", digest, timeout.as_millis())
}

/// `{"error": {"message", "status"|"type", "code"}}` bodies flattened into one line.
pub(crate) fn format_error_parts(
    message: Option<String>,
    kind: Option<String>,
    code: Option<String>,
) -> String {
    let mut parts = Vec::new();
    if let Some(message) = message
        && !message.trim().is_empty()
    {
        parts.push(message);
    }
    if let Some(kind) = kind
        && !kind.trim().is_empty()
    {
        parts.push(format!("type: {}", kind));
    }
    if let Some(code) = code
        && !code.trim().is_empty()
    {
        parts.push(format!("code: {}", code));
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Credentials;

    #[test]
    fn registry_builds_providers_for_present_keys_only() {
        let settings = ProcessingSettings {
            credentials: Credentials {
                gemini_key: Some("g-key".to_string()),
                openrouter_key: Some("   ".to_string()),
            },
            ..ProcessingSettings::default()
        };
        let registry = ProviderRegistry::from_settings(&settings).unwrap();
        assert!(registry.contains(ProviderKind::Gemini));
        assert!(!registry.contains(ProviderKind::OpenRouter));
    }

    #[test]
    fn refresh_reuses_clients_for_the_same_credential() {
        let settings = ProcessingSettings {
            credentials: Credentials {
                gemini_key: Some("g-key".to_string()),
                openrouter_key: Some("o-key".to_string()),
            },
            ..ProcessingSettings::default()
        };
        let mut registry = ProviderRegistry::from_settings(&settings).unwrap();
        registry.refresh(&settings).unwrap();
        assert_eq!(registry.clients.len(), 2);

        let rotated = ProcessingSettings {
            credentials: Credentials {
                gemini_key: Some("g-key-2".to_string()),
                openrouter_key: Some("o-key".to_string()),
            },
            ..ProcessingSettings::default()
        };
        registry.refresh(&rotated).unwrap();
        assert_eq!(registry.clients.len(), 3);
    }

    #[test]
    fn fingerprint_hides_the_key() {
        let fingerprint = credential_fingerprint(
            ProviderKind::Gemini,
            "super-secret",
            Duration::from_secs(60),
        );
        assert!(!fingerprint.contains("super-secret"));
    }

    #[test]
    fn formats_error_parts() {
        assert_eq!(
            format_error_parts(
                Some("quota exceeded".to_string()),
                Some("RESOURCE_EXHAUSTED".to_string()),
                Some("429".to_string())
            ),
            "quota exceeded | type: RESOURCE_EXHAUSTED | code: 429"
        );
        assert_eq!(format_error_parts(None, None, None), "unknown error");
    }
}
