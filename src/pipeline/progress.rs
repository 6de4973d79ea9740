use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Per-file processing states, in the order a successful file visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Preparing,
    Routed,
    Recognizing,
    Parsing,
    Assessing,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preparing => "preparing",
            Stage::Routed => "routed",
            Stage::Recognizing => "recognizing",
            Stage::Parsing => "parsing",
            Stage::Assessing => "assessing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    /// Fraction of the file's work completed on entering this stage.
    pub fn fraction(&self) -> f32 {
        match self {
            Stage::Preparing => 0.05,
            Stage::Routed => 0.15,
            Stage::Recognizing => 0.35,
            Stage::Parsing => 0.7,
            Stage::Assessing => 0.85,
            Stage::Done | Stage::Failed => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub file_id: String,
    #[serde(rename = "stageName")]
    pub stage: Stage,
    #[serde(rename = "fractionalProgress")]
    pub progress: f32,
    #[serde(rename = "activeProvider")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Side channel for progress events. Sending never blocks and a dropped
/// receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Cooperative cancellation shared between the caller and the pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractions_increase_through_successful_stages() {
        let stages = [
            Stage::Preparing,
            Stage::Routed,
            Stage::Recognizing,
            Stage::Parsing,
            Stage::Assessing,
            Stage::Done,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].fraction() < pair[1].fraction());
        }
    }

    #[test]
    fn events_serialize_with_ui_field_names() {
        let event = ProgressEvent {
            file_id: "file-1".to_string(),
            stage: Stage::Recognizing,
            progress: Stage::Recognizing.fraction(),
            provider: Some("gemini/gemini-2.5-flash".to_string()),
            message: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["fileId"], "file-1");
        assert_eq!(value["stageName"], "recognizing");
        assert!((value["fractionalProgress"].as_f64().unwrap() - 0.35).abs() < 1e-6);
        assert_eq!(value["activeProvider"], "gemini/gemini-2.5-flash");
        assert!(value.get("message").is_none());
        assert!(value.get("stage").is_none());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let flag = CancelFlag::new();
        let shared = flag.clone();
        assert!(!shared.is_cancelled());
        flag.cancel();
        assert!(shared.is_cancelled());
    }

    #[tokio::test]
    async fn sink_delivers_in_order_and_tolerates_closed_receiver() {
        let (sink, mut rx) = ProgressSink::channel();
        for stage in [Stage::Preparing, Stage::Routed] {
            sink.emit(ProgressEvent {
                file_id: "f".to_string(),
                stage,
                progress: stage.fraction(),
                provider: None,
                message: None,
            });
        }
        assert_eq!(rx.recv().await.unwrap().stage, Stage::Preparing);
        assert_eq!(rx.recv().await.unwrap().stage, Stage::Routed);
        drop(rx);
        sink.emit(ProgressEvent {
            file_id: "f".to_string(),
            stage: Stage::Done,
            progress: 1.0,
            provider: None,
            message: None,
        });
        ProgressSink::disabled().emit(ProgressEvent {
            file_id: "f".to_string(),
            stage: Stage::Done,
            progress: 1.0,
            provider: None,
            message: None,
        });
    }
}
