use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::OcrError;
use crate::prompts::{render_script_focus_prompt, render_strict_retry_prompt};
use crate::providers::ProviderFuture;
use crate::result::LayoutAnalysis;
use crate::script::cleanup::{clean_text, strip_code_fences};
use crate::script::{TemplatePolicy, contains_target_script};

/// Corrective re-prompts allowed per file.
pub const MAX_REPROMPTS: usize = 2;

/// Smallest confidence taken to be a percentage rather than a slight overshoot.
const PERCENT_CONFIDENCE_MIN: f64 = 2.0;

/// The OCR JSON a model is asked to return.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPayload {
    pub extracted_text: String,
    pub layout_preserved_text: String,
    #[serde(default)]
    pub detected_language: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub document_type: Option<String>,
    pub layout_analysis: LayoutAnalysis,
}

impl ParsedPayload {
    /// Confidence in `[0, 1]`. Values from 2 to 100 are read as percent;
    /// anything else out of range (e.g. 1.7) is clamped.
    pub fn normalized_confidence(&self) -> f64 {
        let value = self.confidence;
        if !value.is_finite() {
            0.0
        } else if (PERCENT_CONFIDENCE_MIN..=100.0).contains(&value) {
            value / 100.0
        } else {
            value.clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub reason: String,
    /// Raw text with fences stripped and noise cleaned.
    pub best_effort: String,
}

impl From<ValidationFailure> for OcrError {
    fn from(failure: ValidationFailure) -> Self {
        OcrError::SchemaValidationFailure {
            reason: failure.reason,
            best_effort: failure.best_effort,
        }
    }
}

/// Sends a follow-up prompt about the same image to the route that
/// produced the original answer.
pub trait Reprompt: Send + Sync {
    fn reprompt<'a>(&'a self, prompt: String) -> ProviderFuture<'a>;
}

#[derive(Debug, Clone)]
pub struct RepairPolicy {
    pub force_script: bool,
    pub template: TemplatePolicy,
}

impl RepairPolicy {
    pub fn new(force_script: bool) -> Self {
        Self {
            force_script,
            template: TemplatePolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub result: Result<ParsedPayload, ValidationFailure>,
    pub reprompts: usize,
    pub notes: Vec<String>,
    /// Set when the script-focus retry did not recover target-script text.
    pub script_mismatch: bool,
}

/// Locates the JSON object inside free-form model text.
pub fn extract_json(raw: &str) -> &str {
    if let Some(fenced) = fenced_block(raw) {
        return fenced.trim();
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}'))
        && start < end
    {
        return &raw[start..=end];
    }
    raw.trim()
}

fn fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after_open = &raw[open + 3..];
    // Skip the info string (```json).
    let body_start = after_open.find('\n')? + 1;
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    let block = &body[..close];
    if block.trim().is_empty() {
        None
    } else {
        Some(block)
    }
}

pub fn parse(raw: &str) -> Result<ParsedPayload, ValidationFailure> {
    let candidate = extract_json(raw);
    let failure = |reason: String| ValidationFailure {
        reason,
        best_effort: best_effort_text(raw),
    };
    if candidate.is_empty() {
        return Err(failure("model returned no content".to_string()));
    }
    let payload: ParsedPayload =
        serde_json::from_str(candidate).map_err(|err| failure(format!("invalid JSON: {}", err)))?;
    if !payload.confidence.is_finite() {
        return Err(failure("confidence is not a finite number".to_string()));
    }
    Ok(payload)
}

pub fn best_effort_text(raw: &str) -> String {
    clean_text(&strip_code_fences(raw))
}

/// Parses model output, issuing at most one strict schema re-prompt and at
/// most one script-focus re-prompt.
pub async fn parse_and_repair(
    raw: &str,
    policy: &RepairPolicy,
    reprompter: &dyn Reprompt,
) -> RepairOutcome {
    let mut reprompts = 0usize;
    let mut notes = Vec::new();

    let payload = match parse(raw) {
        Ok(payload) => payload,
        Err(first) => {
            debug!(reason = %first.reason, "model output failed validation; re-prompting");
            reprompts += 1;
            let retried = match render_strict_retry_prompt(&first.reason) {
                Ok(prompt) => reprompter.reprompt(prompt).await,
                Err(err) => Err(err),
            };
            let second = match retried {
                Ok(text) => parse(&text),
                Err(err) => Err(ValidationFailure {
                    reason: err.to_string(),
                    best_effort: String::new(),
                }),
            };
            match second {
                Ok(payload) => {
                    notes.push("recovered after a strict schema re-prompt".to_string());
                    payload
                }
                Err(second) => {
                    warn!(reason = %second.reason, "model output still invalid after strict re-prompt");
                    notes.push(format!("schema validation failed: {}", first.reason));
                    notes.push(format!("strict re-prompt failed: {}", second.reason));
                    return RepairOutcome {
                        result: Err(ValidationFailure {
                            reason: second.reason,
                            best_effort: first.best_effort,
                        }),
                        reprompts,
                        notes,
                        script_mismatch: false,
                    };
                }
            }
        }
    };

    if !policy.force_script || reprompts >= MAX_REPROMPTS {
        return RepairOutcome {
            result: Ok(payload),
            reprompts,
            notes,
            script_mismatch: false,
        };
    }

    let missing_script = !contains_target_script(&payload.extracted_text);
    let template_like = policy
        .template
        .looks_like_stock_template(&payload.extracted_text);
    if !missing_script && !template_like {
        return RepairOutcome {
            result: Ok(payload),
            reprompts,
            notes,
            script_mismatch: false,
        };
    }

    debug!(missing_script, template_like, "issuing script-focus re-prompt");
    reprompts += 1;
    let retried = match render_script_focus_prompt(template_like) {
        Ok(prompt) => reprompter.reprompt(prompt).await,
        Err(err) => Err(err),
    };
    let rejection = match retried {
        Ok(text) => match parse(&text) {
            Ok(candidate) if acceptable_script_output(&candidate, policy) => {
                notes.push("recovered target script after a script-focus re-prompt".to_string());
                return RepairOutcome {
                    result: Ok(candidate),
                    reprompts,
                    notes,
                    script_mismatch: false,
                };
            }
            Ok(_) => "script-focus answer still lacks Ethiopic text".to_string(),
            Err(failure) => format!("script-focus answer invalid: {}", failure.reason),
        },
        Err(err) => format!("script-focus re-prompt failed: {}", err),
    };
    warn!(reason = %rejection, "keeping the original answer");
    notes.push(format!("{}: {}", OcrError::ScriptMismatch, rejection));
    RepairOutcome {
        result: Ok(payload),
        reprompts,
        notes,
        script_mismatch: true,
    }
}

fn acceptable_script_output(candidate: &ParsedPayload, policy: &RepairPolicy) -> bool {
    contains_target_script(&candidate.extracted_text)
        && !policy
            .template
            .looks_like_stock_template(&candidate.extracted_text)
}
