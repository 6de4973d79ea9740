use serde::{Deserialize, Deserializer, Serialize};

use crate::script::QualityAssessment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutAnalysis {
    #[serde(deserialize_with = "deserialize_count")]
    pub text_blocks: u32,
    #[serde(deserialize_with = "deserialize_count")]
    pub tables: u32,
    #[serde(deserialize_with = "deserialize_count")]
    pub images: u32,
    #[serde(deserialize_with = "deserialize_count")]
    pub columns: u32,
    pub complexity: Complexity,
}

impl LayoutAnalysis {
    /// Rough layout summary for engines that do not report one.
    pub fn estimate(text: &str) -> Self {
        let text_blocks = text
            .split("\n\n")
            .filter(|block| !block.trim().is_empty())
            .count() as u32;
        let mut tables = 0u32;
        let mut in_table = false;
        for line in text.lines() {
            let is_row = line.trim_start().starts_with('|') && line.matches('|').count() >= 2;
            if is_row && !in_table {
                tables += 1;
            }
            in_table = is_row;
        }
        let complexity = if tables > 0 || text_blocks > 12 {
            Complexity::Complex
        } else if text_blocks > 4 {
            Complexity::Moderate
        } else {
            Complexity::Simple
        };
        Self {
            text_blocks,
            tables,
            images: 0,
            columns: 1,
            complexity,
        }
    }
}

/// Numeric counts arrive from models as integers or floats (`2.0`).
fn deserialize_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "count must be a non-negative number (got {})",
            value
        )));
    }
    Ok(value.round().min(u32::MAX as f64) as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Local,
    Cloud,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub engine: EngineKind,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub local_engine: Option<String>,
    pub processed_at: String,
    pub processing_ms: u64,
    pub route_attempts: usize,
    pub reprompts: usize,
    pub quality: Option<QualityAssessment>,
    pub notes: Vec<String>,
}

/// The single result emitted for a successfully processed file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub id: String,
    pub file_id: String,
    pub file_name: String,
    pub extracted_text: String,
    pub layout_preserved_text: String,
    pub detected_language: String,
    pub confidence: f64,
    pub document_type: String,
    pub layout_analysis: LayoutAnalysis,
    pub metadata: ResultMetadata,
}

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_blocks_and_tables() {
        let text = "ርዕስ\n\nአንቀጽ አንድ\n\n| ስም | ዕድሜ |\n|---|---|\n| አበበ | 30 |";
        let layout = LayoutAnalysis::estimate(text);
        assert_eq!(layout.text_blocks, 3);
        assert_eq!(layout.tables, 1);
        assert_eq!(layout.columns, 1);
        assert_eq!(layout.complexity, Complexity::Complex);
    }

    #[test]
    fn counts_accept_float_json() {
        let layout: LayoutAnalysis = serde_json::from_str(
            r#"{"textBlocks": 2.0, "tables": 0, "images": 1, "columns": 1, "complexity": "simple"}"#,
        )
        .unwrap();
        assert_eq!(layout.text_blocks, 2);
        assert_eq!(layout.images, 1);
    }

    #[test]
    fn rejects_unknown_complexity_and_negative_counts() {
        assert!(
            serde_json::from_str::<LayoutAnalysis>(
                r#"{"textBlocks": 1, "tables": 0, "images": 0, "columns": 1, "complexity": "wild"}"#,
            )
            .is_err()
        );
        assert!(
            serde_json::from_str::<LayoutAnalysis>(
                r#"{"textBlocks": -1, "tables": 0, "images": 0, "columns": 1, "complexity": "simple"}"#,
            )
            .is_err()
        );
    }
}
