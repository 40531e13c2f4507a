//! doorward-vision — Face detection and embedding extraction.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference. [`OnnxExtractor`]
//! plugs the pair into the gallery as an [`EmbeddingExtractor`].

pub mod alignment;
pub mod detector;
pub mod recognizer;

pub use detector::{DetectorError, FaceBox, FaceDetector};
pub use recognizer::{FaceRecognizer, RecognizerError};

use doorward_core::{Embedding, EmbeddingExtractor, ExtractError};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// `$XDG_DATA_HOME/doorward/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = std::env::var_os("HOME").unwrap_or_else(|| "/tmp".into());
            PathBuf::from(home).join(".local/share")
        });
    data_home.join("doorward").join("models")
}

/// SCRFD + ArcFace behind the gallery's extractor seam.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, VisionError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn model_version(&self) -> Option<&str> {
        Some(recognizer::MODEL_VERSION)
    }

    fn extract(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ExtractError::InvalidImage(format!(
                "zero-size frame {}x{}",
                image.width(),
                image.height()
            )));
        }

        let faces = self
            .detector
            .detect(image)
            .map_err(|e| ExtractError::Backend(e.to_string()))?;
        tracing::debug!(faces = faces.len(), "detected faces");

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            match self.recognizer.embed(image, face) {
                Ok(embedding) => embeddings.push(embedding),
                Err(RecognizerError::NoLandmarks) => {
                    tracing::debug!(score = face.score, "skipping face without landmarks");
                }
                Err(e) => return Err(ExtractError::Backend(e.to_string())),
            }
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_dir_ends_in_doorward_models() {
        let dir = default_model_dir();
        assert!(dir.ends_with("doorward/models"), "{}", dir.display());
    }

    #[test]
    fn test_load_reports_missing_detector() {
        let dir = std::env::temp_dir().join("doorward-no-models-here");
        let err = OnnxExtractor::load(&dir).err().expect("load should fail");
        assert!(matches!(err, VisionError::Detector(DetectorError::ModelNotFound(_))));
    }
}
