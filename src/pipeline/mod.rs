use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::OcrError;
use crate::fallback::{CloudCall, FallbackChain, FallbackController, PinnedRoute};
use crate::local::{LocalAdapter, LocalEngine, TesseractEngine};
use crate::prompts::{render_extraction_prompt, render_system_prompt};
use crate::providers::{GenerationOptions, ProviderRegistry, normalize_for_cloud};
use crate::result::{EngineKind, LayoutAnalysis, OcrResult, ResultMetadata, now_rfc3339};
use crate::router::{RouteClassifier, RouteDecision, decide_with};
use crate::script::cleanup::{clean_layout_text, clean_text, strip_code_fences};
use crate::script::{TemplatePolicy, adjust_confidence, assess, contains_target_script, detect_language};
use crate::settings::{ProcessingSettings, RoutingMode};
use crate::source::{PreparedImage, SourceFile};
use crate::validate::{RepairPolicy, parse_and_repair};

mod progress;

pub use progress::{CancelFlag, ProgressEvent, ProgressSink, Stage};

/// Confidence given to best-effort text when the answer never validated.
const UNVALIDATED_CONFIDENCE: f64 = 0.2;
/// Ceiling for answers kept after the script-focus retry failed.
const SCRIPT_MISMATCH_CEILING: f64 = 0.4;

/// What happened to one submitted file.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Done(OcrResult),
    Failed {
        file_id: String,
        file_name: String,
        reason: OcrError,
    },
}

impl FileOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, FileOutcome::Done(_))
    }

    pub fn result(&self) -> Option<&OcrResult> {
        match self {
            FileOutcome::Done(result) => Some(result),
            FileOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&OcrError> {
        match self {
            FileOutcome::Done(_) => None,
            FileOutcome::Failed { reason, .. } => Some(reason),
        }
    }
}

/// Per-file outcomes in submission order.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub outcomes: Vec<FileOutcome>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEntry {
    pub index: usize,
    pub file_id: String,
    pub file_name: String,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct BatchReport<'a> {
    pub results: Vec<&'a OcrResult>,
    pub failures: Vec<FailureEntry>,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FileOutcome> {
        self.outcomes.get(index)
    }

    pub fn results(&self) -> impl Iterator<Item = &OcrResult> {
        self.outcomes.iter().filter_map(FileOutcome::result)
    }

    pub fn report(&self) -> BatchReport<'_> {
        let failures = self
            .outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| match outcome {
                FileOutcome::Failed {
                    file_id,
                    file_name,
                    reason,
                } => Some(FailureEntry {
                    index,
                    file_id: file_id.clone(),
                    file_name: file_name.clone(),
                    kind: reason.kind(),
                    reason: reason.to_string(),
                }),
                FileOutcome::Done(_) => None,
            })
            .collect();
        BatchReport {
            results: self.results().collect(),
            failures,
        }
    }
}

/// Drives files one at a time through routing, recognition, repair and
/// assessment. One instance serves one batch or session.
pub struct Pipeline {
    settings: ProcessingSettings,
    registry: ProviderRegistry,
    local: LocalAdapter,
    classifier: Option<Box<dyn RouteClassifier>>,
    template: TemplatePolicy,
    progress: ProgressSink,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(
        settings: ProcessingSettings,
        registry: ProviderRegistry,
        engine: Arc<dyn LocalEngine>,
    ) -> Self {
        Self {
            settings,
            registry,
            local: LocalAdapter::new(engine),
            classifier: None,
            template: TemplatePolicy::default(),
            progress: ProgressSink::disabled(),
            cancel: CancelFlag::new(),
        }
    }

    /// Real providers for the configured credentials plus the tesseract CLI.
    pub fn from_settings(settings: ProcessingSettings) -> Result<Self, OcrError> {
        let registry = ProviderRegistry::from_settings(&settings)?;
        let engine = Arc::new(TesseractEngine::new(settings.tesseract_binary.clone()));
        Ok(Self::new(settings, registry, engine))
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn RouteClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_template_policy(mut self, template: TemplatePolicy) -> Self {
        self.template = template;
        self
    }

    pub fn settings(&self) -> &ProcessingSettings {
        &self.settings
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Processes every file in order. Never fails as a whole.
    pub async fn process_batch(&self, files: Vec<SourceFile>) -> BatchOutcome {
        let total = files.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, file) in files.iter().enumerate() {
            info!(index, total, file = %file.name, "processing file");
            outcomes.push(self.process_file(file).await);
        }
        BatchOutcome { outcomes }
    }

    pub async fn process_file(&self, file: &SourceFile) -> FileOutcome {
        let started = Instant::now();
        match self.run_stages(file).await {
            Ok(mut result) => {
                result.metadata.processing_ms = started.elapsed().as_millis() as u64;
                self.emit(file, Stage::Done, result.metadata.provider.clone(), None);
                FileOutcome::Done(result)
            }
            Err(reason) => {
                warn!(file = %file.name, "file failed: {}", reason);
                self.emit(file, Stage::Failed, None, Some(reason.to_string()));
                FileOutcome::Failed {
                    file_id: file.id.clone(),
                    file_name: file.name.clone(),
                    reason,
                }
            }
        }
    }

    async fn run_stages(&self, file: &SourceFile) -> Result<OcrResult, OcrError> {
        self.checkpoint()?;
        self.emit(file, Stage::Preparing, None, None);
        let image = file.materialize().await?;

        self.checkpoint()?;
        let decision = decide_with(&self.settings, file, self.classifier.as_deref());
        self.emit(
            file,
            Stage::Routed,
            None,
            Some(format!("route: {}", decision.as_str())),
        );

        self.checkpoint()?;
        match decision {
            RouteDecision::Local => self.local_first(file, &image).await,
            RouteDecision::Cloud => self.cloud_first(file, &image).await,
        }
    }

    async fn local_first(&self, file: &SourceFile, image: &PreparedImage) -> Result<OcrResult, OcrError> {
        let engine = self.local.engine_name().to_string();
        self.emit(file, Stage::Recognizing, Some(engine), None);
        let local_error = match self.local.recognize(file, image, &self.settings).await {
            Ok(Some(result)) => return Ok(self.assess_local(file, result, Vec::new())),
            Ok(None) => OcrError::LocalEmpty,
            Err(err) => err,
        };

        let may_fall_back =
            self.settings.routing_mode == RoutingMode::Auto && self.settings.credentials.has_any();
        if !may_fall_back {
            return Err(local_error);
        }
        self.checkpoint()?;
        info!(file = %file.name, "local OCR gave nothing ({}); trying cloud", local_error.kind());
        let mut result = self.run_cloud(file, image).await?;
        result
            .metadata
            .notes
            .insert(0, format!("local OCR fallback to cloud: {}", local_error));
        Ok(result)
    }

    async fn cloud_first(&self, file: &SourceFile, image: &PreparedImage) -> Result<OcrResult, OcrError> {
        let cloud_error = match self.run_cloud(file, image).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        let recoverable = matches!(
            cloud_error,
            OcrError::AllRoutesFailed { .. }
                | OcrError::UnsupportedFormat(_)
                | OcrError::MissingCredentials(_)
        );
        if self.settings.routing_mode != RoutingMode::Auto || !recoverable {
            return Err(cloud_error);
        }
        self.checkpoint()?;
        info!(file = %file.name, "cloud OCR failed ({}); trying local", cloud_error.kind());
        let engine = self.local.engine_name().to_string();
        self.emit(
            file,
            Stage::Recognizing,
            Some(engine),
            Some("cloud failed; falling back to local OCR".to_string()),
        );
        match self.local.recognize(file, image, &self.settings).await {
            Ok(Some(result)) => {
                let note = format!("cloud fallback to local OCR: {}", cloud_error);
                Ok(self.assess_local(file, result, vec![note]))
            }
            Ok(None) => Err(cloud_error),
            Err(local_error) => {
                warn!(file = %file.name, "local fallback failed: {}", local_error);
                Err(cloud_error)
            }
        }
    }

    async fn run_cloud(&self, file: &SourceFile, image: &PreparedImage) -> Result<OcrResult, OcrError> {
        let part = normalize_for_cloud(image)?;
        let chain = FallbackChain::from_settings(&self.settings, &self.registry)?;
        let system = render_system_prompt(&self.settings)?;
        let prompt = render_extraction_prompt(&self.settings, file)?;
        let call = CloudCall {
            system: &system,
            prompt: &prompt,
            image: &part,
            options: GenerationOptions::from_settings(&self.settings),
        };

        let generated = FallbackController::new(&chain, &self.registry, &self.cancel)
            .generate(call, |route| {
                self.emit(file, Stage::Recognizing, Some(route.to_string()), None)
            })
            .await?;
        let route = generated.route.to_string();

        self.checkpoint()?;
        self.emit(file, Stage::Parsing, Some(route.clone()), None);
        let policy = RepairPolicy {
            force_script: self.settings.force_script,
            template: self.template.clone(),
        };
        let reprompter = PinnedRoute::from_generated(&generated, call);
        let repaired = parse_and_repair(&generated.text, &policy, &reprompter).await;

        self.checkpoint()?;
        self.emit(file, Stage::Assessing, Some(route), None);

        let mut notes = generated
            .failures
            .iter()
            .map(|failure| format!("route failed: {}", failure))
            .collect::<Vec<_>>();
        notes.extend(repaired.notes);

        // `scanned` is what the corruption scan sees: fences stripped, noise kept.
        let (scanned, extracted, layout, language, raw_confidence, document_type, layout_analysis, ceiling) =
            match repaired.result {
                Ok(payload) => {
                    let raw_confidence = payload.normalized_confidence();
                    let scanned = strip_code_fences(&payload.extracted_text);
                    let extracted = clean_text(&scanned);
                    let layout = clean_layout_text(&payload.layout_preserved_text);
                    let language = payload
                        .detected_language
                        .map(|value| value.trim().to_lowercase())
                        .filter(|value| !value.is_empty())
                        .unwrap_or_else(|| detect_language(&extracted).to_string());
                    let document_type = payload
                        .document_type
                        .map(|value| value.trim().to_string())
                        .filter(|value| !value.is_empty())
                        .unwrap_or_else(|| "unknown".to_string());
                    let ceiling = repaired.script_mismatch.then_some(SCRIPT_MISMATCH_CEILING);
                    (
                        scanned,
                        extracted,
                        layout,
                        language,
                        raw_confidence,
                        document_type,
                        payload.layout_analysis,
                        ceiling,
                    )
                }
                Err(failure) => {
                    notes.push(OcrError::from(failure.clone()).to_string());
                    let layout = clean_layout_text(&failure.best_effort);
                    let language = detect_language(&failure.best_effort).to_string();
                    (
                        failure.best_effort.clone(),
                        failure.best_effort,
                        layout.clone(),
                        language,
                        UNVALIDATED_CONFIDENCE,
                        "unknown".to_string(),
                        LayoutAnalysis::estimate(&layout),
                        Some(UNVALIDATED_CONFIDENCE),
                    )
                }
            };

        let quality = (self.settings.force_script || contains_target_script(&scanned))
            .then(|| assess(&scanned));
        let mut confidence = match &quality {
            Some(assessment) => adjust_confidence(raw_confidence, assessment),
            None => raw_confidence.clamp(0.0, 1.0),
        };
        if let Some(ceiling) = ceiling {
            confidence = confidence.min(ceiling);
        }

        Ok(OcrResult {
            id: uuid::Uuid::new_v4().to_string(),
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            extracted_text: extracted,
            layout_preserved_text: layout,
            detected_language: language,
            confidence,
            document_type,
            layout_analysis,
            metadata: ResultMetadata {
                engine: EngineKind::Cloud,
                provider: Some(generated.route.provider.to_string()),
                model: Some(generated.route.model.clone()),
                local_engine: None,
                processed_at: now_rfc3339(),
                processing_ms: 0,
                route_attempts: generated.attempts,
                reprompts: repaired.reprompts,
                quality,
                notes,
            },
        })
    }

    /// Local output skips parsing. The adapter already scanned the engine's
    /// raw text, so this pass only reports the stage and attaches notes.
    fn assess_local(&self, file: &SourceFile, mut result: OcrResult, notes: Vec<String>) -> OcrResult {
        self.emit(
            file,
            Stage::Assessing,
            result.metadata.local_engine.clone(),
            None,
        );
        result.metadata.notes.extend(notes);
        result
    }

    fn checkpoint(&self) -> Result<(), OcrError> {
        if self.cancel.is_cancelled() {
            Err(OcrError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, file: &SourceFile, stage: Stage, provider: Option<String>, message: Option<String>) {
        self.progress.emit(ProgressEvent {
            file_id: file.id.clone(),
            stage,
            progress: stage.fraction(),
            provider,
            message,
        });
    }
}
