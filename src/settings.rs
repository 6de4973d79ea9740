use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::providers::ProviderKind;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

pub const DEFAULT_PRIMARY_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_ALTERNATE_MODEL: &str = "google/gemini-2.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMode {
    #[default]
    Auto,
    LocalOnly,
    CloudOnly,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Auto => "auto",
            RoutingMode::LocalOnly => "local-only",
            RoutingMode::CloudOnly => "cloud-only",
        }
    }
}

impl FromStr for RoutingMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "auto" => Ok(RoutingMode::Auto),
            "local-only" | "local" => Ok(RoutingMode::LocalOnly),
            "cloud-only" | "cloud" => Ok(RoutingMode::CloudOnly),
            other => Err(anyhow!(
                "unknown routing mode '{}' (expected auto, local-only, cloud-only)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub gemini_key: Option<String>,
    pub openrouter_key: Option<String>,
}

impl Credentials {
    pub fn key_for(&self, provider: ProviderKind) -> Option<&str> {
        let key = match provider {
            ProviderKind::Gemini => self.gemini_key.as_deref(),
            ProviderKind::OpenRouter => self.openrouter_key.as_deref(),
        };
        key.map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn has_any(&self) -> bool {
        self.key_for(ProviderKind::Gemini).is_some()
            || self.key_for(ProviderKind::OpenRouter).is_some()
    }
}

/// Per-batch processing configuration. The pipeline never mutates it.
#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    pub routing_mode: RoutingMode,
    pub force_script: bool,
    pub strict_script: bool,
    pub primary_model: String,
    pub fallback_model: String,
    pub alternate_model: String,
    pub credentials: Credentials,
    pub low_temperature: bool,
    pub max_output_tokens: u32,
    pub request_timeout: Duration,
    pub gemini_base_url: String,
    pub openrouter_base_url: String,
    pub tesseract_binary: String,
    pub local_dpi: u32,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            routing_mode: RoutingMode::Auto,
            force_script: true,
            strict_script: false,
            primary_model: DEFAULT_PRIMARY_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            alternate_model: DEFAULT_ALTERNATE_MODEL.to_string(),
            credentials: Credentials::default(),
            low_temperature: true,
            max_output_tokens: 8192,
            request_timeout: Duration::from_secs(60),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            openrouter_base_url: DEFAULT_OPENROUTER_BASE_URL.to_string(),
            tesseract_binary: "tesseract".to_string(),
            local_dpi: 300,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    routing: Option<RoutingSettings>,
    models: Option<ModelSettings>,
    network: Option<NetworkSettings>,
    local: Option<LocalSettings>,
    credentials: Option<CredentialSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingSettings {
    mode: Option<String>,
    force_script: Option<bool>,
    strict_script: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelSettings {
    primary: Option<String>,
    fallback: Option<String>,
    alternate: Option<String>,
    low_temperature: Option<bool>,
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkSettings {
    timeout_secs: Option<u64>,
    gemini_base_url: Option<String>,
    openrouter_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LocalSettings {
    tesseract: Option<String>,
    dpi: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialSettings {
    gemini_key: Option<String>,
    openrouter_key: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<ProcessingSettings> {
    let mut settings = ProcessingSettings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults)?;
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("amharic-ocr.toml"));
    ordered_paths.push(PathBuf::from("amharic-ocr.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings
                .merge(parsed)
                .with_context(|| format!("invalid settings: {}", path.display()))?;
        }
    }

    settings.apply_env_credentials(|key| std::env::var(key).ok());
    Ok(settings)
}

impl ProcessingSettings {
    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(routing) = incoming.routing {
            if let Some(mode) = routing.mode {
                if !mode.trim().is_empty() {
                    self.routing_mode = mode.parse()?;
                }
            }
            if let Some(force) = routing.force_script {
                self.force_script = force;
            }
            if let Some(strict) = routing.strict_script {
                self.strict_script = strict;
            }
        }
        if let Some(models) = incoming.models {
            merge_string(&mut self.primary_model, models.primary);
            merge_string(&mut self.fallback_model, models.fallback);
            merge_string(&mut self.alternate_model, models.alternate);
            if let Some(low) = models.low_temperature {
                self.low_temperature = low;
            }
            if let Some(max) = models.max_output_tokens {
                if max > 0 {
                    self.max_output_tokens = max;
                }
            }
        }
        if let Some(network) = incoming.network {
            if let Some(secs) = network.timeout_secs {
                if secs > 0 {
                    self.request_timeout = Duration::from_secs(secs);
                }
            }
            merge_string(&mut self.gemini_base_url, network.gemini_base_url);
            merge_string(&mut self.openrouter_base_url, network.openrouter_base_url);
        }
        if let Some(local) = incoming.local {
            merge_string(&mut self.tesseract_binary, local.tesseract);
            if let Some(dpi) = local.dpi {
                if dpi > 0 {
                    self.local_dpi = dpi;
                }
            }
        }
        if let Some(credentials) = incoming.credentials {
            merge_optional(&mut self.credentials.gemini_key, credentials.gemini_key);
            merge_optional(&mut self.credentials.openrouter_key, credentials.openrouter_key);
        }
        Ok(())
    }

    /// Fills credentials the settings files left unset from the environment.
    pub fn apply_env_credentials<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if self.credentials.key_for(ProviderKind::Gemini).is_none() {
            self.credentials.gemini_key = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY"));
        }
        if self.credentials.key_for(ProviderKind::OpenRouter).is_none() {
            self.credentials.openrouter_key = get("OPENROUTER_API_KEY");
        }
    }
}

fn merge_string(target: &mut String, incoming: Option<String>) {
    if let Some(value) = incoming {
        if !value.trim().is_empty() {
            *target = value.trim().to_string();
        }
    }
}

fn merge_optional(target: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = incoming {
        if !value.trim().is_empty() {
            *target = Some(value.trim().to_string());
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".amharic-ocr"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn parses_routing_modes() {
        assert_eq!("auto".parse::<RoutingMode>().unwrap(), RoutingMode::Auto);
        assert_eq!(
            "Local-Only".parse::<RoutingMode>().unwrap(),
            RoutingMode::LocalOnly
        );
        assert_eq!(
            "cloud-only".parse::<RoutingMode>().unwrap(),
            RoutingMode::CloudOnly
        );
        assert!("sometimes".parse::<RoutingMode>().is_err());
    }

    #[test]
    fn loads_defaults_and_writes_home_file() {
        with_temp_home(|home| {
            let settings = load_settings(None).unwrap();
            assert_eq!(settings.routing_mode, RoutingMode::Auto);
            assert_eq!(settings.primary_model, DEFAULT_PRIMARY_MODEL);
            assert_eq!(settings.request_timeout, Duration::from_secs(60));
            assert!(home.join(".amharic-ocr").join("settings.toml").exists());
        });
    }

    #[test]
    fn extra_file_overrides_defaults() {
        with_temp_home(|home| {
            let extra = home.join("batch.toml");
            fs::write(
                &extra,
                r#"
[routing]
mode = "local-only"
strict_script = true

[models]
primary = "gemini-2.5-pro"
max_output_tokens = 2048

[network]
timeout_secs = 15

[credentials]
gemini_key = "  file-key  "
"#,
            )
            .unwrap();
            let settings = load_settings(Some(&extra)).unwrap();
            assert_eq!(settings.routing_mode, RoutingMode::LocalOnly);
            assert!(settings.strict_script);
            assert_eq!(settings.primary_model, "gemini-2.5-pro");
            assert_eq!(settings.fallback_model, DEFAULT_FALLBACK_MODEL);
            assert_eq!(settings.max_output_tokens, 2048);
            assert_eq!(settings.request_timeout, Duration::from_secs(15));
            assert_eq!(
                settings.credentials.key_for(ProviderKind::Gemini),
                Some("file-key")
            );
        });
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        with_temp_home(|home| {
            let err = load_settings(Some(&home.join("nope.toml"))).unwrap_err();
            assert!(err.to_string().contains("settings file not found"));
        });
    }

    #[test]
    fn invalid_mode_in_file_is_an_error() {
        with_temp_home(|home| {
            let extra = home.join("bad.toml");
            fs::write(&extra, "[routing]\nmode = \"whenever\"\n").unwrap();
            assert!(load_settings(Some(&extra)).is_err());
        });
    }

    #[test]
    fn env_credentials_fill_only_missing_keys() {
        let mut settings = ProcessingSettings::default();
        settings.credentials.openrouter_key = Some("from-file".to_string());
        settings.apply_env_credentials(|key| match key {
            "GOOGLE_API_KEY" => Some("google".to_string()),
            "OPENROUTER_API_KEY" => Some("from-env".to_string()),
            _ => None,
        });
        assert_eq!(
            settings.credentials.key_for(ProviderKind::Gemini),
            Some("google")
        );
        assert_eq!(
            settings.credentials.key_for(ProviderKind::OpenRouter),
            Some("from-file")
        );
    }
}
