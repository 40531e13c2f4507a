//! Embedding extraction capability.
//!
//! The gallery never looks inside the vision model. It only needs something
//! that turns a decoded frame into zero or more embeddings, one per detected
//! face, in detection order.

use crate::types::Embedding;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    /// The frame itself is unusable (wrong size, corrupt pixels). Only that
    /// frame is affected.
    #[error("invalid input image: {0}")]
    InvalidImage(String),
    /// The model or runtime failed. Rebuilds abort on this.
    #[error("extraction backend failed: {0}")]
    Backend(String),
}

/// Detects faces in a frame and returns one embedding per face.
pub trait EmbeddingExtractor {
    /// Identifier of the model behind the embeddings, if known.
    ///
    /// Cached galleries built with a different model are discarded.
    fn model_version(&self) -> Option<&str> {
        None
    }

    /// Embeddings for every face found, in detection order. An empty vector
    /// means no face was found.
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractError>;
}

impl<T: EmbeddingExtractor + ?Sized> EmbeddingExtractor for Box<T> {
    fn model_version(&self) -> Option<&str> {
        (**self).model_version()
    }

    fn extract(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractError> {
        (**self).extract(image)
    }
}

/// Decode encoded image bytes (JPEG, PNG, ...) into an RGB frame.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    image::load_from_memory(bytes).map(|img| img.to_rgb8())
}
