use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use super::{LocalConfig, LocalEngine, LocalFuture, RecognitionWorker};
use crate::error::OcrError;
use crate::source::PreparedImage;

/// Formats the tesseract CLI reads directly; everything else goes through PNG.
const NATIVE_INPUTS: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/tiff", "tif"),
    ("image/bmp", "bmp"),
    ("image/webp", "webp"),
];

/// Drives the `tesseract` command-line program as a worker.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        let binary = binary.into();
        let binary = if binary.trim().is_empty() {
            "tesseract".to_string()
        } else {
            binary.trim().to_string()
        };
        Self { binary }
    }
}

impl LocalEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn load(&self) -> LocalFuture<'_, Box<dyn RecognitionWorker>> {
        Box::pin(async move {
            let worker = TesseractWorker::spawn(&self.binary)
                .await
                .map_err(|err| OcrError::LocalEngine(format!("{:#}", err)))?;
            Ok(Box::new(worker) as Box<dyn RecognitionWorker>)
        })
    }
}

struct TesseractWorker {
    binary: String,
    workdir: Option<TempDir>,
    config: Option<LocalConfig>,
}

impl TesseractWorker {
    async fn spawn(binary: &str) -> Result<Self> {
        let output = Command::new(binary)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {} (is it installed?)", binary))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("{} --version failed: {}", binary, stderr.trim()));
        }
        let workdir = tempfile::Builder::new()
            .prefix("amharic-ocr-")
            .tempdir()
            .with_context(|| "failed to create OCR working directory")?;
        debug!(binary, dir = %workdir.path().display(), "tesseract worker ready");
        Ok(Self {
            binary: binary.to_string(),
            workdir: Some(workdir),
            config: None,
        })
    }

    async fn run(&self, image: &PreparedImage) -> Result<String> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("tesseract worker used before configure"))?;
        let workdir = self
            .workdir
            .as_ref()
            .ok_or_else(|| anyhow!("tesseract worker already terminated"))?;
        let input = write_input(workdir.path(), image).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg(&input)
            .arg("stdout")
            .arg("-l")
            .arg(&config.languages)
            .arg("--psm")
            .arg(config.page_segmentation.to_string())
            .arg("--dpi")
            .arg(config.dpi.to_string());
        if let Some(blacklist) = &config.blacklist {
            command
                .arg("-c")
                .arg(format!("tessedit_char_blacklist={}", blacklist));
        }
        let output = command
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("tesseract failed: {}", stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl RecognitionWorker for TesseractWorker {
    fn configure<'a>(&'a mut self, config: &'a LocalConfig) -> LocalFuture<'a, ()> {
        Box::pin(async move {
            self.config = Some(config.clone());
            Ok(())
        })
    }

    fn recognize<'a>(&'a mut self, image: &'a PreparedImage) -> LocalFuture<'a, String> {
        Box::pin(async move {
            self.run(image)
                .await
                .map_err(|err| OcrError::LocalEngine(format!("{:#}", err)))
        })
    }

    fn terminate(mut self: Box<Self>) -> LocalFuture<'static, ()> {
        let workdir = self.workdir.take();
        Box::pin(async move {
            if let Some(dir) = workdir {
                let path = dir.path().display().to_string();
                dir.close().map_err(|err| {
                    OcrError::LocalEngine(format!("failed to remove {}: {}", path, err))
                })?;
                debug!(dir = %path, "tesseract worker terminated");
            }
            Ok(())
        })
    }
}

async fn write_input(dir: &Path, image: &PreparedImage) -> Result<PathBuf> {
    let native = NATIVE_INPUTS
        .iter()
        .find(|(mime, _)| *mime == image.mime)
        .map(|(_, ext)| *ext);
    let (bytes, ext) = match native {
        Some(ext) => (image.bytes.clone(), ext),
        None => (reencode_png(&image.bytes, &image.mime)?, "png"),
    };
    let path = dir.join(format!("input.{}", ext));
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn reencode_png(bytes: &[u8], mime: &str) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes)
        .with_context(|| format!("failed to decode {} for local OCR", mime))?;
    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, image::ImageFormat::Png)
        .with_context(|| "failed to re-encode image as PNG")?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_binary_defaults_to_tesseract() {
        assert_eq!(TesseractEngine::new("  ").binary, "tesseract");
        assert_eq!(TesseractEngine::new("/opt/bin/tesseract").binary, "/opt/bin/tesseract");
    }

    #[tokio::test]
    async fn native_inputs_are_written_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let image = PreparedImage {
            bytes: vec![0xFF, 0xD8, 0xFF],
            mime: "image/jpeg".to_string(),
        };
        let path = write_input(dir.path(), &image).await.unwrap();
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(std::fs::read(path).unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn undecodable_foreign_formats_fail() {
        let dir = tempfile::tempdir().unwrap();
        let image = PreparedImage {
            bytes: b"%PDF-1.7".to_vec(),
            mime: "application/pdf".to_string(),
        };
        assert!(write_input(dir.path(), &image).await.is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_a_local_engine_error() {
        let engine = TesseractEngine::new("amharic-ocr-no-such-binary");
        let err = match engine.load().await {
            Ok(_) => panic!("load should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, OcrError::LocalEngine(_)));
    }

    #[tokio::test]
    async fn terminate_removes_the_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let worker = Box::new(TesseractWorker {
            binary: "tesseract".to_string(),
            workdir: Some(dir),
            config: None,
        });
        worker.terminate().await.unwrap();
        assert!(!path.exists());
    }
}
