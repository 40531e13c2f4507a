//! Deterministic stand-ins for the vision model.
//!
//! [`PixelFaceExtractor`] reads the top row of a frame: every non-black pixel
//! is one "face", and its embedding is the pixel's RGB scaled to `[0, 1]`.
//! Faces come back left to right, which is their detection order.

use crate::extractor::{EmbeddingExtractor, ExtractError};
use crate::types::Embedding;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

pub const PIXEL_MODEL_VERSION: &str = "pixel-v1";

/// Fake extractor keyed on top-row pixel colours.
#[derive(Debug, Default)]
pub struct PixelFaceExtractor {
    calls: usize,
    model_version: Option<String>,
}

impl PixelFaceExtractor {
    pub fn new() -> Self {
        Self {
            calls: 0,
            model_version: Some(PIXEL_MODEL_VERSION.to_string()),
        }
    }

    /// Same extractor reporting a different model version.
    pub fn with_model_version(version: &str) -> Self {
        Self {
            calls: 0,
            model_version: Some(version.to_string()),
        }
    }

    /// Number of frames processed so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl EmbeddingExtractor for PixelFaceExtractor {
    fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    fn extract(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractError> {
        self.calls += 1;
        if image.height() == 0 {
            return Ok(Vec::new());
        }
        let faces = (0..image.width())
            .map(|x| image.get_pixel(x, 0))
            .filter(|px| px.0 != [0, 0, 0])
            .map(|px| Embedding {
                values: rgb_values(px.0),
                model_version: self.model_version.clone(),
            })
            .collect();
        Ok(faces)
    }
}

/// Extractor whose backend always fails.
#[derive(Debug, Default)]
pub struct BrokenExtractor;

impl EmbeddingExtractor for BrokenExtractor {
    fn extract(&mut self, _image: &RgbImage) -> Result<Vec<Embedding>, ExtractError> {
        Err(ExtractError::Backend("model session crashed".into()))
    }
}

/// Embedding [`PixelFaceExtractor`] produces for a face pixel.
pub fn face_embedding(rgb: [u8; 3]) -> Embedding {
    Embedding {
        values: rgb_values(rgb),
        model_version: Some(PIXEL_MODEL_VERSION.to_string()),
    }
}

/// Encode a PNG whose top row holds the given face pixels.
///
/// An empty slice yields a single black pixel, i.e. a frame with no face.
pub fn png_with_faces(faces: &[[u8; 3]]) -> Vec<u8> {
    let width = faces.len().max(1) as u32;
    let mut img = RgbImage::new(width, 1);
    for (x, rgb) in faces.iter().enumerate() {
        img.put_pixel(x as u32, 0, Rgb(*rgb));
    }
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("in-memory PNG encoding");
    bytes
}

fn rgb_values(rgb: [u8; 3]) -> Vec<f32> {
    rgb.iter().map(|&c| c as f32 / 255.0).collect()
}
