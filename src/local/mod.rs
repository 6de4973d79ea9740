use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::OcrError;
use crate::result::{EngineKind, LayoutAnalysis, OcrResult, ResultMetadata, now_rfc3339};
use crate::script::cleanup::{clean_layout_text, clean_text};
use crate::script::{adjust_confidence, assess, contains_target_script, detect_language};
use crate::settings::ProcessingSettings;
use crate::source::{PreparedImage, SourceFile};

mod tesseract;

pub use tesseract::TesseractEngine;

/// The engine does not expose per-page certainty, so local results start here.
pub const LOCAL_BASELINE_CONFIDENCE: f64 = 0.8;

const TARGET_LANGUAGE_CODE: &str = "am";
const TARGET_LANGUAGE_PACK: &str = "amh";
const LATIN_LANGUAGE_PACK: &str = "eng";
const SINGLE_COLUMN_SEGMENTATION: u32 = 4;
const LATIN_LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub languages: String,
    pub page_segmentation: u32,
    pub dpi: u32,
    pub blacklist: Option<String>,
}

impl LocalConfig {
    pub fn for_settings(settings: &ProcessingSettings) -> Self {
        let languages = if settings.force_script || settings.strict_script {
            TARGET_LANGUAGE_PACK.to_string()
        } else {
            format!("{}+{}", TARGET_LANGUAGE_PACK, LATIN_LANGUAGE_PACK)
        };
        Self {
            languages,
            page_segmentation: SINGLE_COLUMN_SEGMENTATION,
            dpi: settings.local_dpi,
            blacklist: settings
                .strict_script
                .then(|| LATIN_LETTERS.to_string()),
        }
    }
}

pub type LocalFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, OcrError>> + Send + 'a>>;

/// A loaded engine instance, owned by exactly one recognition call.
pub trait RecognitionWorker: Send {
    fn configure<'a>(&'a mut self, config: &'a LocalConfig) -> LocalFuture<'a, ()>;
    fn recognize<'a>(&'a mut self, image: &'a PreparedImage) -> LocalFuture<'a, String>;
    fn terminate(self: Box<Self>) -> LocalFuture<'static, ()>;
}

/// On-device OCR capability.
pub trait LocalEngine: Send + Sync {
    fn name(&self) -> &str;
    fn load(&self) -> LocalFuture<'_, Box<dyn RecognitionWorker>>;
}

#[derive(Clone)]
pub struct LocalAdapter {
    engine: Arc<dyn LocalEngine>,
}

impl LocalAdapter {
    pub fn new(engine: Arc<dyn LocalEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Runs one recognition with a fresh worker. `Ok(None)` means the engine
    /// found no text. The worker is terminated on every path.
    pub async fn recognize(
        &self,
        file: &SourceFile,
        image: &PreparedImage,
        settings: &ProcessingSettings,
    ) -> Result<Option<OcrResult>, OcrError> {
        let config = LocalConfig::for_settings(settings);
        debug!(
            engine = self.engine.name(),
            languages = %config.languages,
            "loading local OCR worker"
        );
        let mut worker = self.engine.load().await?;
        let outcome = run_worker(worker.as_mut(), &config, image).await;
        if let Err(err) = worker.terminate().await {
            warn!(engine = self.engine.name(), "failed to terminate OCR worker: {}", err);
        }
        let text = outcome?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.build_result(file, &text, settings)))
    }

    /// Corruption is scanned on the engine's raw text; cleanup would erase
    /// the punctuation runs and symbol noise the scan counts.
    fn build_result(&self, file: &SourceFile, text: &str, settings: &ProcessingSettings) -> OcrResult {
        let quality = contains_target_script(text).then(|| assess(text));
        let confidence = match &quality {
            Some(assessment) => adjust_confidence(LOCAL_BASELINE_CONFIDENCE, assessment),
            None => LOCAL_BASELINE_CONFIDENCE,
        };
        let extracted_text = clean_text(text);
        let layout_preserved_text = clean_layout_text(text);
        let detected_language = if settings.force_script {
            TARGET_LANGUAGE_CODE.to_string()
        } else {
            detect_language(&extracted_text).to_string()
        };
        OcrResult {
            id: uuid::Uuid::new_v4().to_string(),
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            layout_analysis: LayoutAnalysis::estimate(&layout_preserved_text),
            extracted_text,
            layout_preserved_text,
            detected_language,
            confidence,
            document_type: "unknown".to_string(),
            metadata: ResultMetadata {
                engine: EngineKind::Local,
                provider: None,
                model: None,
                local_engine: Some(self.engine.name().to_string()),
                processed_at: now_rfc3339(),
                processing_ms: 0,
                route_attempts: 0,
                reprompts: 0,
                quality,
                notes: Vec::new(),
            },
        }
    }
}

async fn run_worker(
    worker: &mut dyn RecognitionWorker,
    config: &LocalConfig,
    image: &PreparedImage,
) -> Result<String, OcrError> {
    worker.configure(config).await?;
    worker.recognize(image).await
}
