//! Full gallery rebuild from the enrolled-image store.

use crate::extractor::{decode_rgb, EmbeddingExtractor, ExtractError};
use crate::image_store::{ImageStore, StoreError, StoreFingerprint};
use crate::types::{EnrolledMember, Snapshot, SnapshotError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use thiserror::Error;

/// Per-photo problem that was skipped during a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildWarning {
    /// No face was detected in the photo.
    NoFace { file: String },
    /// The photo could not be read or decoded.
    Undecodable { file: String, reason: String },
    /// An earlier photo already provided this member name.
    DuplicateName { file: String, name: String, kept: String },
    /// The embedding does not share the gallery's dimension.
    DimensionMismatch {
        file: String,
        expected: usize,
        actual: usize,
    },
    /// The extractor returned an empty or non-finite embedding.
    InvalidEmbedding { file: String },
}

impl BuildWarning {
    pub fn file(&self) -> &str {
        match self {
            BuildWarning::NoFace { file }
            | BuildWarning::Undecodable { file, .. }
            | BuildWarning::DuplicateName { file, .. }
            | BuildWarning::DimensionMismatch { file, .. }
            | BuildWarning::InvalidEmbedding { file } => file,
        }
    }
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildWarning::NoFace { file } => write!(f, "no face found in {file}"),
            BuildWarning::Undecodable { file, reason } => write!(f, "cannot decode {file}: {reason}"),
            BuildWarning::DuplicateName { file, name, kept } => {
                write!(f, "{file} ignored: name {name} already enrolled from {kept}")
            }
            BuildWarning::DimensionMismatch {
                file,
                expected,
                actual,
            } => write!(f, "{file} ignored: {actual}-dim embedding, gallery is {expected}-dim"),
            BuildWarning::InvalidEmbedding { file } => {
                write!(f, "{file} ignored: empty or non-finite embedding")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("image store: {0}")]
    Store(#[from] StoreError),
    #[error("extraction failed on {file}: {source}")]
    Extraction {
        file: String,
        #[source]
        source: ExtractError,
    },
    #[error("inconsistent snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Result of a successful rebuild.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub snapshot: Snapshot,
    pub warnings: Vec<BuildWarning>,
    /// Fingerprint of exactly the photo bytes this snapshot was built from.
    pub fingerprint: String,
    /// Number of photos scanned.
    pub scanned: usize,
}

/// Rebuilds a [`Snapshot`] from every photo in an [`ImageStore`].
///
/// Rebuilds are not incremental: every call decodes and extracts every
/// photo, so the cost is O(photos × extraction time). Photos are processed
/// in file-name order; when two photos derive the same member name, the
/// first one that yields a face is kept and later ones are reported as
/// [`BuildWarning::DuplicateName`].
#[derive(Debug, Clone)]
pub struct GalleryBuilder {
    images: ImageStore,
}

impl GalleryBuilder {
    pub fn new(images: ImageStore) -> Self {
        Self { images }
    }

    pub fn build(&self, extractor: &mut dyn EmbeddingExtractor) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        let entries = self.images.entries()?;

        let mut fingerprint = StoreFingerprint::new();
        let mut members: Vec<EnrolledMember> = Vec::with_capacity(entries.len());
        // member name -> file it was taken from
        let mut taken: HashMap<String, String> = HashMap::new();
        let mut dimension: Option<usize> = None;
        let mut warnings = Vec::new();

        for entry in &entries {
            let bytes = match self.images.read(entry) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warnings.push(BuildWarning::Undecodable {
                        file: entry.file_name.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            fingerprint.add(&entry.file_name, &bytes);

            if let Some(kept) = taken.get(&entry.name) {
                warnings.push(BuildWarning::DuplicateName {
                    file: entry.file_name.clone(),
                    name: entry.name.clone(),
                    kept: kept.clone(),
                });
                continue;
            }

            let image = match decode_rgb(&bytes) {
                Ok(image) => image,
                Err(e) => {
                    warnings.push(BuildWarning::Undecodable {
                        file: entry.file_name.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let embeddings = match extractor.extract(&image) {
                Ok(embeddings) => embeddings,
                Err(ExtractError::InvalidImage(reason)) => {
                    warnings.push(BuildWarning::Undecodable {
                        file: entry.file_name.clone(),
                        reason,
                    });
                    continue;
                }
                Err(source) => {
                    return Err(BuildError::Extraction {
                        file: entry.file_name.clone(),
                        source,
                    })
                }
            };

            // One canonical face per enrollment photo: the first detected.
            let Some(embedding) = embeddings.into_iter().next() else {
                warnings.push(BuildWarning::NoFace {
                    file: entry.file_name.clone(),
                });
                continue;
            };

            if embedding.values.is_empty() || !embedding.is_finite() {
                warnings.push(BuildWarning::InvalidEmbedding {
                    file: entry.file_name.clone(),
                });
                continue;
            }

            let expected = *dimension.get_or_insert(embedding.dimension());
            if embedding.dimension() != expected {
                warnings.push(BuildWarning::DimensionMismatch {
                    file: entry.file_name.clone(),
                    expected,
                    actual: embedding.dimension(),
                });
                continue;
            }

            taken.insert(entry.name.clone(), entry.file_name.clone());
            members.push(EnrolledMember {
                name: entry.name.clone(),
                embedding,
                source: entry.file_name.clone(),
            });
        }

        for warning in &warnings {
            tracing::warn!(file = warning.file(), "{warning}");
        }

        let snapshot = Snapshot::new(members)?;

        tracing::info!(
            scanned = entries.len(),
            members = snapshot.len(),
            warnings = warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "gallery rebuilt"
        );

        Ok(BuildReport {
            snapshot,
            warnings,
            fingerprint: fingerprint.finish(),
            scanned: entries.len(),
        })
    }
}
