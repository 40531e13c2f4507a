//! On-disk snapshot cache.
//!
//! A JSON document tagged with a format name and version. The cache only
//! shortens cold starts: it is keyed on the fingerprint of the image store
//! and the extractor's model version, and anything that does not line up
//! is reported as a [`CacheMiss`] so the caller rebuilds from the photos.

use crate::types::{Embedding, EnrolledMember, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CACHE_FORMAT: &str = "doorward-gallery";
pub const CACHE_VERSION: u32 = 1;

/// Why a cached snapshot could not be used.
#[derive(Error, Debug)]
pub enum CacheMiss {
    #[error("no cache file")]
    Missing,
    #[error("cache file unreadable: {0}")]
    Unreadable(io::Error),
    #[error("cache file malformed: {0}")]
    Malformed(serde_json::Error),
    #[error("unsupported cache format {format:?} version {version}")]
    UnsupportedFormat { format: String, version: u32 },
    #[error("enrolled photos changed since the cache was written")]
    StaleStore,
    #[error("cache built with model {cached:?}, extractor is {current:?}")]
    ModelChanged {
        cached: Option<String>,
        current: Option<String>,
    },
    #[error("cache contents inconsistent: {0}")]
    Inconsistent(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Just enough of the record to reject foreign or future formats before
/// decoding the rest.
#[derive(Deserialize)]
struct CacheHeader {
    format: String,
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    format: String,
    version: u32,
    store_fingerprint: String,
    model_version: Option<String>,
    built_at: DateTime<Utc>,
    dimension: Option<usize>,
    members: Vec<CachedMember>,
}

#[derive(Serialize, Deserialize)]
struct CachedMember {
    name: String,
    source: String,
    embedding: Vec<f32>,
}

/// Snapshot cache file.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `snapshot`, keyed on the store fingerprint it was built from.
    ///
    /// Written to a temporary sibling and renamed, so readers see either the
    /// old file or the new one.
    pub fn save(&self, snapshot: &Snapshot, store_fingerprint: &str) -> Result<(), CacheError> {
        let record = CacheRecord {
            format: CACHE_FORMAT.to_string(),
            version: CACHE_VERSION,
            store_fingerprint: store_fingerprint.to_string(),
            model_version: snapshot.model_version().map(str::to_string),
            built_at: Utc::now(),
            dimension: snapshot.dimension(),
            members: snapshot
                .members()
                .iter()
                .map(|m| CachedMember {
                    name: m.name.clone(),
                    source: m.source.clone(),
                    embedding: m.embedding.values.clone(),
                })
                .collect(),
        };
        let bytes = serde_json::to_vec(&record)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(parent, e))?;
        }
        let tmp = self.tmp_path();
        fs::write(&tmp, &bytes).map_err(|e| self.io_error(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            self.io_error(&self.path, e)
        })?;

        tracing::debug!(
            path = %self.path.display(),
            members = snapshot.len(),
            bytes = bytes.len(),
            "gallery cache written"
        );
        Ok(())
    }

    /// Load the cached snapshot if it matches the current store and model.
    pub fn load(
        &self,
        store_fingerprint: &str,
        model_version: Option<&str>,
    ) -> Result<Snapshot, CacheMiss> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CacheMiss::Missing),
            Err(e) => return Err(CacheMiss::Unreadable(e)),
        };

        let header: CacheHeader = serde_json::from_slice(&bytes).map_err(CacheMiss::Malformed)?;
        if header.format != CACHE_FORMAT || header.version != CACHE_VERSION {
            return Err(CacheMiss::UnsupportedFormat {
                format: header.format,
                version: header.version,
            });
        }

        let record: CacheRecord = serde_json::from_slice(&bytes).map_err(CacheMiss::Malformed)?;
        if record.store_fingerprint != store_fingerprint {
            return Err(CacheMiss::StaleStore);
        }
        if record.model_version.as_deref() != model_version && !record.members.is_empty() {
            return Err(CacheMiss::ModelChanged {
                cached: record.model_version,
                current: model_version.map(str::to_string),
            });
        }

        let members = record
            .members
            .into_iter()
            .map(|m| {
                if Some(m.embedding.len()) != record.dimension {
                    return Err(CacheMiss::Inconsistent(format!(
                        "member {} has {} values, header says {:?}",
                        m.name,
                        m.embedding.len(),
                        record.dimension
                    )));
                }
                Ok(EnrolledMember {
                    name: m.name,
                    embedding: Embedding {
                        values: m.embedding,
                        model_version: record.model_version.clone(),
                    },
                    source: m.source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let snapshot =
            Snapshot::new(members).map_err(|e| CacheMiss::Inconsistent(e.to_string()))?;

        tracing::debug!(
            path = %self.path.display(),
            members = snapshot.len(),
            built_at = %record.built_at,
            "gallery cache loaded"
        );
        Ok(snapshot)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, path: &Path, source: io::Error) -> CacheError {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "w600k_r50";

    fn sample() -> Snapshot {
        let member = |name: &str, values: Vec<f32>| EnrolledMember {
            name: name.into(),
            embedding: Embedding {
                values,
                model_version: Some(MODEL.into()),
            },
            source: format!("{name}.jpg"),
        };
        Snapshot::new(vec![
            member("alice", vec![0.25, -0.5, 0.125]),
            member("bob", vec![1.0, 0.0, -1.0]),
        ])
        .unwrap()
    }

    fn cache() -> (tempfile::TempDir, SnapshotCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().join("gallery.json"));
        (dir, cache)
    }

    #[test]
    fn test_save_then_load() {
        let (_dir, cache) = cache();
        cache.save(&sample(), "abc").unwrap();
        assert_eq!(cache.load("abc", Some(MODEL)).unwrap(), sample());
    }

    #[test]
    fn test_empty_snapshot_loads_under_any_model() {
        let (_dir, cache) = cache();
        cache.save(&Snapshot::empty(), "abc").unwrap();
        assert!(cache.load("abc", Some(MODEL)).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file() {
        let (_dir, cache) = cache();
        assert!(matches!(cache.load("abc", None), Err(CacheMiss::Missing)));
    }

    #[test]
    fn test_truncated_file_is_malformed() {
        let (_dir, cache) = cache();
        cache.save(&sample(), "abc").unwrap();
        let bytes = fs::read(cache.path()).unwrap();
        fs::write(cache.path(), &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(cache.load("abc", Some(MODEL)), Err(CacheMiss::Malformed(_))));
    }

    #[test]
    fn test_foreign_bytes_are_malformed() {
        let (_dir, cache) = cache();
        // e.g. a pickle left over from an older deployment
        fs::write(cache.path(), b"\x80\x04\x95\x00\x00").unwrap();
        assert!(matches!(cache.load("abc", None), Err(CacheMiss::Malformed(_))));
    }

    #[test]
    fn test_future_version_is_unsupported() {
        let (_dir, cache) = cache();
        cache.save(&sample(), "abc").unwrap();
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(cache.path()).unwrap()).unwrap();
        value["version"] = serde_json::json!(CACHE_VERSION + 1);
        value["members"] = serde_json::json!("reshaped in v2");
        fs::write(cache.path(), serde_json::to_vec(&value).unwrap()).unwrap();

        match cache.load("abc", Some(MODEL)) {
            Err(CacheMiss::UnsupportedFormat { version, .. }) => assert_eq!(version, CACHE_VERSION + 1),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn test_stale_fingerprint() {
        let (_dir, cache) = cache();
        cache.save(&sample(), "abc").unwrap();
        assert!(matches!(cache.load("def", Some(MODEL)), Err(CacheMiss::StaleStore)));
    }

    #[test]
    fn test_model_change() {
        let (_dir, cache) = cache();
        cache.save(&sample(), "abc").unwrap();
        assert!(matches!(
            cache.load("abc", Some("other-model")),
            Err(CacheMiss::ModelChanged { .. })
        ));
    }

    #[test]
    fn test_inconsistent_dimension() {
        let (_dir, cache) = cache();
        cache.save(&sample(), "abc").unwrap();
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(cache.path()).unwrap()).unwrap();
        value["members"][1]["embedding"] = serde_json::json!([1.0]);
        fs::write(cache.path(), serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(matches!(
            cache.load("abc", Some(MODEL)),
            Err(CacheMiss::Inconsistent(_))
        ));
    }

    #[test]
    fn test_duplicate_names_in_cache_rejected() {
        let (_dir, cache) = cache();
        cache.save(&sample(), "abc").unwrap();
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(cache.path()).unwrap()).unwrap();
        value["members"][1]["name"] = serde_json::json!("alice");
        fs::write(cache.path(), serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(matches!(
            cache.load("abc", Some(MODEL)),
            Err(CacheMiss::Inconsistent(_))
        ));
    }

    #[test]
    fn test_save_creates_parent_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path().join("nested/deeper/gallery.json"));
        cache.save(&sample(), "abc").unwrap();
        let names: Vec<_> = fs::read_dir(dir.path().join("nested/deeper"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["gallery.json"]);
    }
}
