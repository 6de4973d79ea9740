//! Local-vs-cloud routing. Pure: no I/O, never fails.

use serde::Serialize;

use crate::settings::{ProcessingSettings, RoutingMode};
use crate::source::SourceFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteDecision {
    Local,
    Cloud,
}

impl RouteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteDecision::Local => "local",
            RouteDecision::Cloud => "cloud",
        }
    }
}

/// Formats the vision providers accept directly or after a PNG re-encode.
const CLOUD_IMAGE_MIMES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/heic",
    "image/heif",
    "image/gif",
    "image/bmp",
];

/// Multi-page raster formats only the local engine reads.
const LOCAL_ONLY_EXTENSIONS: &[&str] = &["tif", "tiff"];

/// Feature vector handed to an optional learned classifier.
#[derive(Debug, Clone, Serialize)]
pub struct RouteFeatures {
    pub mime_type: String,
    pub extension: Option<String>,
    pub has_cloud_credential: bool,
    pub force_script: bool,
    pub strict_script: bool,
    pub language_hint: Option<String>,
}

impl RouteFeatures {
    pub fn from_file(settings: &ProcessingSettings, file: &SourceFile) -> Self {
        Self {
            mime_type: file.declared_mime(),
            extension: file.extension(),
            has_cloud_credential: settings.credentials.has_any(),
            force_script: settings.force_script,
            strict_script: settings.strict_script,
            language_hint: file.language_hint.clone(),
        }
    }
}

/// Learned override for the credential/script heuristics. Returning `None`
/// or an unknown label means "use the heuristic".
pub trait RouteClassifier: Send + Sync {
    fn classify(&self, features: &RouteFeatures) -> Option<String>;
}

pub fn decide(settings: &ProcessingSettings, file: &SourceFile) -> RouteDecision {
    decide_with(settings, file, None)
}

pub fn decide_with(
    settings: &ProcessingSettings,
    file: &SourceFile,
    classifier: Option<&dyn RouteClassifier>,
) -> RouteDecision {
    match settings.routing_mode {
        RoutingMode::LocalOnly => return RouteDecision::Local,
        RoutingMode::CloudOnly => return RouteDecision::Cloud,
        RoutingMode::Auto => {}
    }

    let features = RouteFeatures::from_file(settings, file);
    if !cloud_can_ingest(&features.mime_type, features.extension.as_deref()) {
        return RouteDecision::Local;
    }

    if let Some(classifier) = classifier
        && let Some(decision) = classifier
            .classify(&features)
            .and_then(|label| parse_label(&label))
        && (decision == RouteDecision::Local || features.has_cloud_credential)
    {
        return decision;
    }

    heuristic(&features)
}

pub fn cloud_can_ingest(mime_type: &str, extension: Option<&str>) -> bool {
    if let Some(ext) = extension
        && LOCAL_ONLY_EXTENSIONS.contains(&ext)
    {
        return false;
    }
    CLOUD_IMAGE_MIMES.contains(&mime_type.trim().to_lowercase().as_str())
}

/// Forced-script requests and plain requests both prefer the hosted model
/// once a key exists; without one everything stays on-device.
fn heuristic(features: &RouteFeatures) -> RouteDecision {
    if features.has_cloud_credential {
        RouteDecision::Cloud
    } else {
        RouteDecision::Local
    }
}

fn parse_label(label: &str) -> Option<RouteDecision> {
    match label.trim().to_lowercase().as_str() {
        "local" | "tesseract" | "offline" => Some(RouteDecision::Local),
        "cloud" | "remote" | "vision" => Some(RouteDecision::Cloud),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Credentials;

    fn settings(mode: RoutingMode, gemini: Option<&str>, force_script: bool) -> ProcessingSettings {
        ProcessingSettings {
            routing_mode: mode,
            force_script,
            credentials: Credentials {
                gemini_key: gemini.map(str::to_string),
                openrouter_key: None,
            },
            ..ProcessingSettings::default()
        }
    }

    fn png() -> SourceFile {
        SourceFile::from_bytes("page.png", "image/png", vec![1])
    }

    fn tiff() -> SourceFile {
        SourceFile::from_bytes("scan.tiff", "image/tiff", vec![1])
    }

    struct FixedLabel(&'static str);

    impl RouteClassifier for FixedLabel {
        fn classify(&self, _features: &RouteFeatures) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[test]
    fn local_only_always_routes_local() {
        let settings = settings(RoutingMode::LocalOnly, Some("key"), true);
        assert_eq!(decide(&settings, &png()), RouteDecision::Local);
        assert_eq!(
            decide_with(&settings, &png(), Some(&FixedLabel("cloud"))),
            RouteDecision::Local
        );
    }

    #[test]
    fn cloud_only_wins_even_for_unsupported_formats() {
        let settings = settings(RoutingMode::CloudOnly, None, false);
        assert_eq!(decide(&settings, &tiff()), RouteDecision::Cloud);
    }

    #[test]
    fn unsupported_formats_route_local_regardless_of_credentials() {
        for key in [None, Some("key")] {
            for force in [false, true] {
                let settings = settings(RoutingMode::Auto, key, force);
                assert_eq!(decide(&settings, &tiff()), RouteDecision::Local);
                let pdf = SourceFile::from_bytes("doc.pdf", "application/pdf", vec![1]);
                assert_eq!(decide(&settings, &pdf), RouteDecision::Local);
            }
        }
    }

    #[test]
    fn tiff_extension_routes_local_even_with_image_mime() {
        let settings = settings(RoutingMode::Auto, Some("key"), false);
        let mislabeled = SourceFile::from_bytes("scan.tif", "image/png", vec![1]);
        assert_eq!(decide(&settings, &mislabeled), RouteDecision::Local);
    }

    #[test]
    fn credentials_select_cloud_in_auto() {
        assert_eq!(
            decide(&settings(RoutingMode::Auto, Some("key"), true), &png()),
            RouteDecision::Cloud
        );
        assert_eq!(
            decide(&settings(RoutingMode::Auto, Some("key"), false), &png()),
            RouteDecision::Cloud
        );
        assert_eq!(
            decide(&settings(RoutingMode::Auto, None, true), &png()),
            RouteDecision::Local
        );
    }

    #[test]
    fn blank_credentials_do_not_count() {
        let settings = settings(RoutingMode::Auto, Some("   "), true);
        assert_eq!(decide(&settings, &png()), RouteDecision::Local);
    }

    #[test]
    fn classifier_overrides_heuristic_with_known_labels_only() {
        let settings = settings(RoutingMode::Auto, Some("key"), true);
        assert_eq!(
            decide_with(&settings, &png(), Some(&FixedLabel("LOCAL"))),
            RouteDecision::Local
        );
        assert_eq!(
            decide_with(&settings, &png(), Some(&FixedLabel("banana"))),
            RouteDecision::Cloud
        );
    }

    #[test]
    fn classifier_cannot_pick_cloud_without_credentials() {
        let settings = settings(RoutingMode::Auto, None, false);
        assert_eq!(
            decide_with(&settings, &png(), Some(&FixedLabel("cloud"))),
            RouteDecision::Local
        );
    }
}
