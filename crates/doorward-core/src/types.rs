use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Only meaningful for equal dimensions; callers check
    /// [`dimension`](Self::dimension) first.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// True when every component is finite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// One enrolled household member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledMember {
    pub name: String,
    pub embedding: Embedding,
    /// File name of the enrollment photo this embedding came from.
    pub source: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("duplicate member name: {0}")]
    DuplicateName(String),
    #[error("member {name} has a {actual}-dim embedding, gallery is {expected}-dim")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("member {0} has an empty or non-finite embedding")]
    InvalidEmbedding(String),
}

/// Immutable, ordered set of enrolled members used for matching.
///
/// Names are unique and all embeddings share one dimension. A snapshot is
/// never mutated after construction; rebuilds produce a new one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    members: Vec<EnrolledMember>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(members: Vec<EnrolledMember>) -> Result<Self, SnapshotError> {
        let mut names = HashSet::with_capacity(members.len());
        let expected = members.first().map(|m| m.embedding.dimension());

        for member in &members {
            if member.embedding.values.is_empty() || !member.embedding.is_finite() {
                return Err(SnapshotError::InvalidEmbedding(member.name.clone()));
            }
            if let Some(expected) = expected {
                let actual = member.embedding.dimension();
                if actual != expected {
                    return Err(SnapshotError::DimensionMismatch {
                        name: member.name.clone(),
                        expected,
                        actual,
                    });
                }
            }
            if !names.insert(member.name.as_str()) {
                return Err(SnapshotError::DuplicateName(member.name.clone()));
            }
        }

        Ok(Self { members })
    }

    pub fn members(&self) -> &[EnrolledMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&EnrolledMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name.clone()).collect()
    }

    /// Embedding dimension shared by every member, `None` when empty.
    pub fn dimension(&self) -> Option<usize> {
        self.members.first().map(|m| m.embedding.dimension())
    }

    /// Model version of the embeddings, taken from the first member.
    pub fn model_version(&self) -> Option<&str> {
        self.members
            .first()
            .and_then(|m| m.embedding.model_version.as_deref())
    }
}
