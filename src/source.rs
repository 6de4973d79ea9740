use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::OcrError;

pub const OCTET_STREAM_MIME: &str = "application/octet-stream";
pub const PDF_MIME: &str = "application/pdf";

/// Where a submitted file's bytes live until the pipeline materializes them.
#[derive(Debug, Clone)]
pub enum SourceContent {
    Bytes(Vec<u8>),
    DataUrl(String),
    Path(PathBuf),
}

/// A document submitted to the pipeline. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub content: SourceContent,
    pub language_hint: Option<String>,
}

/// Image bytes plus the resolved MIME type, ready for either engine.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl SourceFile {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            mime_type: mime_type.into(),
            content: SourceContent::Bytes(bytes),
            language_hint: None,
        }
    }

    pub fn from_data_url(name: impl Into<String>, data_url: impl Into<String>) -> Self {
        let data_url = data_url.into();
        let mime_type = data_url_mime(&data_url).unwrap_or_default();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            mime_type,
            content: SourceContent::DataUrl(data_url),
            language_hint: None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(|value| value.to_string())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = mime_from_extension(&name).unwrap_or_default().to_string();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            mime_type,
            content: SourceContent::Path(path.to_path_buf()),
            language_hint: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_language_hint(mut self, hint: impl Into<String>) -> Self {
        let hint = hint.into();
        if !hint.trim().is_empty() {
            self.language_hint = Some(hint.trim().to_lowercase());
        }
        self
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|value| value.to_str())
            .map(|value| value.to_ascii_lowercase())
    }

    /// Declared MIME type, falling back to the file extension. Pure; never
    /// looks at the content.
    pub fn declared_mime(&self) -> String {
        let declared = self.mime_type.trim().to_lowercase();
        if !declared.is_empty() && declared != OCTET_STREAM_MIME {
            return declared;
        }
        mime_from_extension(&self.name)
            .map(|value| value.to_string())
            .unwrap_or(declared)
    }

    pub async fn materialize(&self) -> Result<PreparedImage, OcrError> {
        let bytes = match &self.content {
            SourceContent::Bytes(bytes) => bytes.clone(),
            SourceContent::DataUrl(url) => decode_data_url(url)?,
            SourceContent::Path(path) => tokio::fs::read(path).await.map_err(|err| {
                OcrError::SourceUnavailable(format!("{}: {}", path.display(), err))
            })?,
        };
        if bytes.is_empty() {
            return Err(OcrError::SourceUnavailable(format!(
                "{} has no content",
                self.name
            )));
        }
        let mime = resolve_mime(&self.declared_mime(), &bytes);
        Ok(PreparedImage { bytes, mime })
    }
}

fn resolve_mime(declared: &str, bytes: &[u8]) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    if declared.is_empty() {
        OCTET_STREAM_MIME.to_string()
    } else {
        declared.to_string()
    }
}

pub fn mime_from_extension(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|value| value.to_str())?
        .to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "pdf" => PDF_MIME,
        _ => return None,
    };
    Some(mime)
}

fn data_url_mime(url: &str) -> Option<String> {
    let rest = url.trim().strip_prefix("data:")?;
    let (meta, _) = rest.split_once(',')?;
    let mime = meta.split(';').next()?.trim();
    if mime.is_empty() {
        None
    } else {
        Some(mime.to_lowercase())
    }
}

fn decode_data_url(url: &str) -> Result<Vec<u8>, OcrError> {
    let rest = url
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| OcrError::SourceUnavailable("preview is not a data URL".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| OcrError::SourceUnavailable("data URL has no payload".to_string()))?;
    if !meta.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        return Err(OcrError::SourceUnavailable(
            "data URL is not base64 encoded".to_string(),
        ));
    }
    BASE64
        .decode(payload.trim())
        .map_err(|err| OcrError::SourceUnavailable(format!("invalid data URL payload: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[tokio::test]
    async fn decodes_base64_data_url() {
        let url = format!("data:image/png;base64,{}", BASE64.encode(PNG_MAGIC));
        let file = SourceFile::from_data_url("scan.png", url);
        assert_eq!(file.mime_type, "image/png");
        let image = file.materialize().await.unwrap();
        assert_eq!(image.bytes, PNG_MAGIC);
        assert_eq!(image.mime, "image/png");
    }

    #[tokio::test]
    async fn missing_path_is_source_unavailable() {
        let file = SourceFile::from_path("/definitely/not/here/scan.png");
        let err = file.materialize().await.unwrap_err();
        assert!(matches!(err, OcrError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_bytes_are_source_unavailable() {
        let file = SourceFile::from_bytes("blank.png", "image/png", Vec::new());
        assert!(matches!(
            file.materialize().await,
            Err(OcrError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn sniffed_mime_wins_over_declared() {
        let file = SourceFile::from_bytes("scan.bin", OCTET_STREAM_MIME, PNG_MAGIC.to_vec());
        let image = file.materialize().await.unwrap();
        assert_eq!(image.mime, "image/png");
    }

    #[test]
    fn declared_mime_falls_back_to_extension() {
        let file = SourceFile::from_bytes("Page-1.TIF", "", vec![1]);
        assert_eq!(file.declared_mime(), "image/tiff");
        assert_eq!(file.extension().as_deref(), Some("tif"));
    }

    #[test]
    fn rejects_non_base64_data_url() {
        let err = decode_data_url("data:text/plain,hello").unwrap_err();
        assert!(matches!(err, OcrError::SourceUnavailable(_)));
    }
}
