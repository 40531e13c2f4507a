//! Classification of query embeddings against the published gallery.

use crate::store::GalleryStore;
use crate::types::{Embedding, EnrolledMember, Snapshot};
use std::sync::Arc;
use thiserror::Error;

/// Maximum Euclidean distance accepted as the same person.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

/// Outcome of classifying one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// A face matched an enrolled member.
    Known { name: String, distance: f32 },
    /// Faces were found but none matched.
    Unknown,
    /// The frame had no face at all.
    NoFace,
}

impl Classification {
    pub fn is_known(&self) -> bool {
        matches!(self, Classification::Known { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatcherError {
    #[error("tolerance must be finite and non-negative, got {0}")]
    InvalidTolerance(f32),
}

/// Closest gallery member to a probe.
#[derive(Debug, Clone, Copy)]
pub struct NearestMatch<'a> {
    pub member: &'a EnrolledMember,
    pub distance: f32,
}

/// Find the member nearest to `probe`.
///
/// Members with a different embedding dimension are not comparable and are
/// skipped. Ties keep the earliest member. `None` for an empty gallery.
pub fn nearest<'a>(snapshot: &'a Snapshot, probe: &Embedding) -> Option<NearestMatch<'a>> {
    let mut best: Option<NearestMatch<'a>> = None;

    for member in snapshot.members() {
        if member.embedding.dimension() != probe.dimension() {
            continue;
        }
        let distance = probe.euclidean_distance(&member.embedding);
        let is_better = match &best {
            None => !distance.is_nan(),
            Some(prev) => distance < prev.distance,
        };
        if is_better {
            best = Some(NearestMatch { member, distance });
        }
    }

    best
}

/// Classify the faces of one frame, in detection order.
///
/// The first face whose nearest member lies within `tolerance` (inclusive)
/// decides the result; later faces are not examined.
pub fn classify_against(snapshot: &Snapshot, queries: &[Embedding], tolerance: f32) -> Classification {
    if queries.is_empty() {
        return Classification::NoFace;
    }

    for (index, query) in queries.iter().enumerate() {
        match nearest(snapshot, query) {
            Some(m) if m.distance <= tolerance => {
                tracing::debug!(
                    face = index,
                    name = %m.member.name,
                    distance = m.distance,
                    "face matched"
                );
                return Classification::Known {
                    name: m.member.name.clone(),
                    distance: m.distance,
                };
            }
            Some(m) => {
                tracing::debug!(face = index, distance = m.distance, "nearest member outside tolerance");
            }
            None => {
                tracing::debug!(face = index, "no comparable gallery member");
            }
        }
    }

    Classification::Unknown
}

/// Matcher bound to a gallery store.
#[derive(Clone)]
pub struct Matcher {
    gallery: Arc<GalleryStore>,
    tolerance: f32,
}

impl Matcher {
    pub fn new(gallery: Arc<GalleryStore>, tolerance: f32) -> Result<Self, MatcherError> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(MatcherError::InvalidTolerance(tolerance));
        }
        Ok(Self { gallery, tolerance })
    }

    pub fn with_default_tolerance(gallery: Arc<GalleryStore>) -> Self {
        Self {
            gallery,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Classify against whatever snapshot is published right now.
    pub fn classify(&self, queries: &[Embedding]) -> Classification {
        let snapshot = self.gallery.read();
        classify_against(&snapshot, queries, self.tolerance)
    }
}
