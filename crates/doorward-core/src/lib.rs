//! doorward-core — Face gallery and recognition matching engine.
//!
//! Keeps enrolled household members as face embeddings rebuilt from a
//! directory of photos, caches the gallery on disk, and classifies the
//! faces of a camera frame against it by Euclidean distance.

pub mod builder;
pub mod cache;
pub mod enrollment;
pub mod extractor;
pub mod image_store;
pub mod matcher;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use builder::{BuildError, BuildReport, BuildWarning, GalleryBuilder};
pub use cache::{CacheMiss, SnapshotCache};
pub use enrollment::{EnrollError, EnrollmentOutcome, EnrollmentService, ValidationError};
pub use extractor::{decode_rgb, EmbeddingExtractor, ExtractError};
pub use image_store::{ImageEntry, ImageStore};
pub use matcher::{Classification, Matcher, DEFAULT_TOLERANCE};
pub use store::GalleryStore;
pub use types::{Embedding, EnrolledMember, Snapshot};
