use std::io::Cursor;

use tracing::debug;

use crate::error::OcrError;
use crate::source::PreparedImage;

const PASSTHROUGH_MIMES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/heic",
    "image/heif",
];

/// Image payload in a form every vision provider accepts inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Passes natively supported formats through and re-encodes anything else
/// the decoder understands as PNG.
pub fn normalize_for_cloud(image: &PreparedImage) -> Result<ImagePart, OcrError> {
    let mime = canonical_mime(&image.mime);
    if PASSTHROUGH_MIMES.contains(&mime.as_str()) {
        return Ok(ImagePart {
            mime,
            bytes: image.bytes.clone(),
        });
    }
    let decoded = image::load_from_memory(&image.bytes)
        .map_err(|err| OcrError::UnsupportedFormat(format!("{}: {}", image.mime, err)))?;
    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|err| OcrError::UnsupportedFormat(format!("PNG re-encode failed: {}", err)))?;
    debug!(from = %image.mime, "re-encoded image as PNG for cloud upload");
    Ok(ImagePart {
        mime: "image/png".to_string(),
        bytes: out.into_inner(),
    })
}

fn canonical_mime(mime: &str) -> String {
    let mime = mime.trim().to_ascii_lowercase();
    match mime.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => mime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(format: image::ImageFormat) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            4,
            3,
            image::Rgb([200, 10, 10]),
        ));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn png_passes_through_untouched() {
        let bytes = encoded(image::ImageFormat::Png);
        let part = normalize_for_cloud(&PreparedImage {
            bytes: bytes.clone(),
            mime: "image/png".to_string(),
        })
        .unwrap();
        assert_eq!(part.mime, "image/png");
        assert_eq!(part.bytes, bytes);
    }

    #[test]
    fn jpg_alias_is_canonicalized() {
        let part = normalize_for_cloud(&PreparedImage {
            bytes: vec![1, 2, 3],
            mime: "image/jpg".to_string(),
        })
        .unwrap();
        assert_eq!(part.mime, "image/jpeg");
    }

    #[test]
    fn bmp_is_reencoded_as_png() {
        let part = normalize_for_cloud(&PreparedImage {
            bytes: encoded(image::ImageFormat::Bmp),
            mime: "image/bmp".to_string(),
        })
        .unwrap();
        assert_eq!(part.mime, "image/png");
        assert_eq!(infer::get(&part.bytes).unwrap().mime_type(), "image/png");
    }

    #[test]
    fn undecodable_bytes_are_unsupported() {
        let err = normalize_for_cloud(&PreparedImage {
            bytes: b"%PDF-1.7 not an image".to_vec(),
            mime: "application/pdf".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, OcrError::UnsupportedFormat(_)));
    }
}
