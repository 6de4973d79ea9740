use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub mod error;
pub mod fallback;
pub mod local;
pub mod logging;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod result;
pub mod router;
pub mod script;
pub mod settings;
pub mod source;
mod test_util;
pub mod validate;

pub use error::OcrError;
pub use pipeline::{BatchOutcome, CancelFlag, FileOutcome, Pipeline, ProgressEvent, ProgressSink, Stage};
pub use providers::{Gemini, OpenRouter, ProviderKind, ProviderRegistry, VisionProvider};
pub use result::OcrResult;
pub use router::{RouteDecision, decide};
pub use settings::{ProcessingSettings, RoutingMode};
pub use source::SourceFile;

/// Command-line level options, applied on top of the layered settings files.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub files: Vec<PathBuf>,
    pub mode: Option<String>,
    pub force_script: Option<bool>,
    pub strict_script: Option<bool>,
    pub primary_model: Option<String>,
    pub fallback_model: Option<String>,
    pub gemini_key: Option<String>,
    pub openrouter_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub language_hint: Option<String>,
    pub settings_path: Option<String>,
}

/// Runs one batch and returns the JSON report.
pub async fn run(config: Config, progress: ProgressSink, cancel: CancelFlag) -> Result<String> {
    if config.files.is_empty() {
        return Err(anyhow!("no input files given"));
    }
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let mut settings = settings::load_settings(settings_path)?;
    apply_overrides(&mut settings, &config)?;
    info!(
        mode = settings.routing_mode.as_str(),
        files = config.files.len(),
        "starting batch"
    );

    let pipeline = Pipeline::from_settings(settings)
        .with_context(|| "failed to initialise providers")?
        .with_progress(progress)
        .with_cancel(cancel);
    let files = config
        .files
        .iter()
        .map(|path| {
            let file = SourceFile::from_path(path);
            match &config.language_hint {
                Some(hint) => file.with_language_hint(hint.as_str()),
                None => file,
            }
        })
        .collect();
    let batch = pipeline.process_batch(files).await;
    info!(
        done = batch.results().count(),
        total = batch.len(),
        "batch finished"
    );
    serde_json::to_string_pretty(&batch.report()).with_context(|| "failed to serialize report")
}

pub fn apply_overrides(settings: &mut ProcessingSettings, config: &Config) -> Result<()> {
    if let Some(mode) = config.mode.as_deref() {
        settings.routing_mode = mode.parse()?;
    }
    if let Some(force) = config.force_script {
        settings.force_script = force;
    }
    if let Some(strict) = config.strict_script {
        settings.strict_script = strict;
    }
    if let Some(model) = non_empty(&config.primary_model) {
        settings.primary_model = model;
    }
    if let Some(model) = non_empty(&config.fallback_model) {
        settings.fallback_model = model;
    }
    if let Some(key) = non_empty(&config.gemini_key) {
        settings.credentials.gemini_key = Some(key);
    }
    if let Some(key) = non_empty(&config.openrouter_key) {
        settings.credentials.openrouter_key = Some(key);
    }
    if let Some(secs) = config.timeout_secs {
        if secs == 0 {
            return Err(anyhow!("--timeout-secs must be greater than zero"));
        }
        settings.request_timeout = Duration::from_secs(secs);
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut settings = ProcessingSettings::default();
        let config = Config {
            mode: Some("cloud".to_string()),
            strict_script: Some(true),
            primary_model: Some("  ".to_string()),
            fallback_model: Some("gemini-2.5-flash-lite".to_string()),
            openrouter_key: Some("or-key".to_string()),
            timeout_secs: Some(20),
            ..Config::default()
        };
        apply_overrides(&mut settings, &config).unwrap();
        assert_eq!(settings.routing_mode, RoutingMode::CloudOnly);
        assert!(settings.force_script);
        assert!(settings.strict_script);
        assert_eq!(settings.primary_model, settings::DEFAULT_PRIMARY_MODEL);
        assert_eq!(settings.fallback_model, "gemini-2.5-flash-lite");
        assert_eq!(
            settings.credentials.key_for(ProviderKind::OpenRouter),
            Some("or-key")
        );
        assert_eq!(settings.request_timeout, Duration::from_secs(20));
    }

    #[test]
    fn rejects_bad_mode_and_zero_timeout() {
        let mut settings = ProcessingSettings::default();
        let bad_mode = Config {
            mode: Some("sometimes".to_string()),
            ..Config::default()
        };
        assert!(apply_overrides(&mut settings, &bad_mode).is_err());
        let zero = Config {
            timeout_secs: Some(0),
            ..Config::default()
        };
        assert!(apply_overrides(&mut settings, &zero).is_err());
    }

    #[tokio::test]
    async fn run_requires_files() {
        let err = run(Config::default(), ProgressSink::disabled(), CancelFlag::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no input files"));
    }
}
