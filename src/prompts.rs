use tera::{Context as TeraContext, Tera};

use crate::error::OcrError;
use crate::settings::ProcessingSettings;
use crate::source::SourceFile;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.tera");
const EXTRACT_TEMPLATE: &str = include_str!("prompts/extract.tera");
const STRICT_RETRY_TEMPLATE: &str = include_str!("prompts/strict_retry.tera");
const SCRIPT_FOCUS_TEMPLATE: &str = include_str!("prompts/script_focus.tera");

const SCRIPT_NAME: &str = "Ethiopic";
const LANGUAGE_NAME: &str = "Amharic";
const ETHIOPIC_PUNCTUATION: &str = "። ፣ ፤ ፥ ፦ ፧ ፡";

/// The JSON shape every cloud answer must follow.
pub const RESULT_SCHEMA: &str = r#"Required JSON shape:
{
  "extractedText": string,
  "layoutPreservedText": string,
  "detectedLanguage": string (ISO 639-1 code such as "am" or "en"),
  "confidence": number between 0.0 and 1.0,
  "documentType": string,
  "layoutAnalysis": {
    "textBlocks": number,
    "tables": number,
    "images": number,
    "columns": number,
    "complexity": "simple" | "moderate" | "complex"
  }
}"#;

pub fn render_system_prompt(settings: &ProcessingSettings) -> Result<String, OcrError> {
    let mut context = base_context();
    let language_name = if settings.force_script {
        LANGUAGE_NAME
    } else {
        ""
    };
    context.insert("language_name", language_name);
    render(SYSTEM_TEMPLATE, &context, "system")
}

pub fn render_extraction_prompt(
    settings: &ProcessingSettings,
    file: &SourceFile,
) -> Result<String, OcrError> {
    let mut context = base_context();
    context.insert("language_hint", &file.language_hint);
    context.insert("force_script", &settings.force_script);
    context.insert("strict_script", &settings.strict_script);
    render(EXTRACT_TEMPLATE, &context, "extraction")
}

pub fn render_strict_retry_prompt(reason: &str) -> Result<String, OcrError> {
    let mut context = base_context();
    context.insert("reason", reason.trim());
    render(STRICT_RETRY_TEMPLATE, &context, "strict retry")
}

pub fn render_script_focus_prompt(template_like: bool) -> Result<String, OcrError> {
    let mut context = base_context();
    context.insert("template_like", &template_like);
    render(SCRIPT_FOCUS_TEMPLATE, &context, "script focus")
}

fn base_context() -> TeraContext {
    let mut context = TeraContext::new();
    context.insert("script_name", SCRIPT_NAME);
    context.insert("punctuation", ETHIOPIC_PUNCTUATION);
    context.insert("schema", RESULT_SCHEMA);
    context
}

fn render(template: &str, context: &TeraContext, name: &str) -> Result<String, OcrError> {
    Tera::one_off(template, context, false)
        .map(|rendered| rendered.trim().to_string())
        .map_err(|err| OcrError::Prompt(format!("{} prompt: {}", name, err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_forbids_transliteration_and_lists_punctuation() {
        let prompt = render_system_prompt(&ProcessingSettings::default()).unwrap();
        assert!(prompt.contains("Never transliterate"));
        assert!(prompt.contains("Never translate"));
        assert!(prompt.contains(ETHIOPIC_PUNCTUATION));
        assert!(prompt.contains("(Amharic)"));
    }

    #[test]
    fn extraction_prompt_includes_hint_and_script_wording() {
        let file = SourceFile::from_bytes("scan.png", "image/png", vec![1]).with_language_hint("am");
        let settings = ProcessingSettings {
            strict_script: true,
            ..ProcessingSettings::default()
        };
        let prompt = render_extraction_prompt(&settings, &file).unwrap();
        assert!(prompt.contains("expected to be in \"am\""));
        assert!(prompt.contains("written in Ethiopic script"));
        assert!(prompt.contains("Do not output Latin letters"));
        assert!(prompt.contains("\"layoutAnalysis\""));
    }

    #[test]
    fn extraction_prompt_without_script_pinning() {
        let file = SourceFile::from_bytes("scan.png", "image/png", vec![1]);
        let settings = ProcessingSettings {
            force_script: false,
            ..ProcessingSettings::default()
        };
        let prompt = render_extraction_prompt(&settings, &file).unwrap();
        assert!(!prompt.contains("expected to be in"));
        assert!(!prompt.contains("written in Ethiopic script"));
    }

    #[test]
    fn strict_retry_names_the_error_and_forbids_fences() {
        let prompt = render_strict_retry_prompt("missing field `confidence`").unwrap();
        assert!(prompt.starts_with("Your previous answer could not be used: missing field `confidence`"));
        assert!(prompt.contains("Do not wrap it in markdown code fences"));
        assert!(prompt.ends_with('}'));
    }
}
