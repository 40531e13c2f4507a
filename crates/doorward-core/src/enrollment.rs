//! Enrollment orchestration: validate, persist the photo, rebuild, publish.

use crate::builder::{BuildError, BuildWarning, GalleryBuilder};
use crate::cache::{CacheMiss, SnapshotCache};
use crate::extractor::{decode_rgb, EmbeddingExtractor};
use crate::image_store::{validate_name, ImageEntry, ImageStore, NameError, StoreError};
use crate::store::GalleryStore;
use crate::types::Snapshot;
use image::ImageFormat;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("photo is empty")]
    EmptyImage,
    #[error("photo must be a JPEG or PNG image")]
    UnsupportedFormat,
    #[error("photo cannot be decoded: {0}")]
    Undecodable(String),
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid enrollment: {0}")]
    Validation(#[from] ValidationError),
    #[error("no enrolled member named {0}")]
    NotEnrolled(String),
    #[error("image store: {0}")]
    Store(#[from] StoreError),
    #[error("gallery rebuild failed: {0}")]
    Build(#[from] BuildError),
}

/// Result of an explicit or enrollment-triggered rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildSummary {
    pub generation: u64,
    pub members: Vec<String>,
    pub warnings: Vec<BuildWarning>,
    pub scanned: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentOutcome {
    pub name: String,
    /// File the photo was stored as.
    pub file: String,
    /// False when the photo was stored but no usable face was found in it.
    pub enrolled: bool,
    pub members: Vec<String>,
    pub warnings: Vec<BuildWarning>,
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovalOutcome {
    pub name: String,
    pub removed_files: Vec<String>,
    pub members: Vec<String>,
    pub generation: u64,
}

/// Where the gallery published at startup came from.
#[derive(Debug)]
pub enum StartupSource {
    Cache,
    Rebuilt(CacheMiss),
}

#[derive(Debug)]
pub struct Startup {
    pub source: StartupSource,
    pub generation: u64,
    pub members: usize,
}

/// Owns the enrolled-image store, the snapshot cache and the write side of
/// the [`GalleryStore`].
///
/// Every operation that changes the store or publishes runs under one
/// internal lock, so rebuilds never interleave. Readers of the gallery never
/// take that lock.
pub struct EnrollmentService {
    images: ImageStore,
    builder: GalleryBuilder,
    cache: SnapshotCache,
    gallery: Arc<GalleryStore>,
    rebuild_lock: Mutex<()>,
}

impl EnrollmentService {
    pub fn new(images: ImageStore, cache: SnapshotCache, gallery: Arc<GalleryStore>) -> Self {
        Self {
            builder: GalleryBuilder::new(images.clone()),
            images,
            cache,
            gallery,
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn gallery(&self) -> &Arc<GalleryStore> {
        &self.gallery
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    /// Names in the published gallery.
    pub fn members(&self) -> Vec<String> {
        self.gallery.read().names()
    }

    /// Photos in the store, whether or not they produced a member.
    pub fn entries(&self) -> Result<Vec<ImageEntry>, StoreError> {
        self.images.entries()
    }

    /// Cold start: publish the cached gallery if it still matches the photos
    /// and the extractor's model, otherwise rebuild.
    pub fn load_or_rebuild(
        &self,
        extractor: &mut dyn EmbeddingExtractor,
    ) -> Result<Startup, BuildError> {
        let _guard = self.lock();
        let fingerprint = self.images.fingerprint()?;

        match self.cache.load(&fingerprint, extractor.model_version()) {
            Ok(snapshot) => {
                let members = snapshot.len();
                let generation = self.gallery.publish(snapshot);
                tracing::info!(
                    path = %self.cache.path().display(),
                    members,
                    "gallery restored from cache"
                );
                Ok(Startup {
                    source: StartupSource::Cache,
                    generation,
                    members,
                })
            }
            Err(miss) => {
                tracing::info!(
                    path = %self.cache.path().display(),
                    reason = %miss,
                    "gallery cache miss; rebuilding from photos"
                );
                let (summary, _) = self.rebuild_locked(extractor)?;
                Ok(Startup {
                    source: StartupSource::Rebuilt(miss),
                    generation: summary.generation,
                    members: summary.members.len(),
                })
            }
        }
    }

    /// Full rebuild from the photos; the published gallery is replaced only
    /// if the rebuild succeeds.
    pub fn rebuild(
        &self,
        extractor: &mut dyn EmbeddingExtractor,
    ) -> Result<RebuildSummary, BuildError> {
        let _guard = self.lock();
        self.rebuild_locked(extractor).map(|(summary, _)| summary)
    }

    /// Enroll `photo` under `name`, replacing any earlier photo of that name,
    /// then rebuild and publish.
    ///
    /// Invalid input is rejected before anything is written. If the rebuild
    /// fails the photo stays stored and the previous gallery stays published.
    pub fn enroll(
        &self,
        name: &str,
        photo: &[u8],
        extractor: &mut dyn EmbeddingExtractor,
    ) -> Result<EnrollmentOutcome, EnrollError> {
        let name = validate_name(name).map_err(ValidationError::from)?;
        let extension = photo_extension(photo)?;

        let _guard = self.lock();
        let entry = self.images.put(&name, extension, photo)?;
        tracing::info!(name = %name, file = %entry.file_name, bytes = photo.len(), "enrollment photo stored");

        let (summary, snapshot) = self.rebuild_locked(extractor)?;
        let enrolled = snapshot
            .get(&name)
            .is_some_and(|m| m.source == entry.file_name);
        if enrolled {
            tracing::info!(name = %name, members = summary.members.len(), "member enrolled");
        } else {
            tracing::warn!(name = %name, file = %entry.file_name, "photo stored but no usable face found");
        }

        Ok(EnrollmentOutcome {
            name,
            file: entry.file_name,
            enrolled,
            members: summary.members,
            warnings: summary.warnings,
            generation: summary.generation,
        })
    }

    /// Delete every photo of `name` and rebuild.
    pub fn remove(
        &self,
        name: &str,
        extractor: &mut dyn EmbeddingExtractor,
    ) -> Result<RemovalOutcome, EnrollError> {
        let name = validate_name(name).map_err(ValidationError::from)?;

        let _guard = self.lock();
        let removed_files = self.images.remove(&name)?;
        if removed_files.is_empty() {
            return Err(EnrollError::NotEnrolled(name));
        }
        tracing::info!(name = %name, files = ?removed_files, "enrollment photos removed");

        let (summary, _) = self.rebuild_locked(extractor)?;
        Ok(RemovalOutcome {
            name,
            removed_files,
            members: summary.members,
            generation: summary.generation,
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.rebuild_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Build off to the side, publish, then refresh the cache.
    fn rebuild_locked(
        &self,
        extractor: &mut dyn EmbeddingExtractor,
    ) -> Result<(RebuildSummary, Arc<Snapshot>), BuildError> {
        let report = self.builder.build(extractor)?;
        let snapshot = Arc::new(report.snapshot);
        let generation = self.gallery.publish(Arc::clone(&snapshot));

        if let Err(e) = self.cache.save(&snapshot, &report.fingerprint) {
            tracing::warn!(error = %e, "failed to write gallery cache");
        }

        let summary = RebuildSummary {
            generation,
            members: snapshot.names(),
            warnings: report.warnings,
            scanned: report.scanned,
        };
        Ok((summary, snapshot))
    }
}

/// Check the upload is a decodable JPEG or PNG and pick its stored extension.
fn photo_extension(photo: &[u8]) -> Result<&'static str, ValidationError> {
    if photo.is_empty() {
        return Err(ValidationError::EmptyImage);
    }
    let extension = match image::guess_format(photo) {
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(ImageFormat::Png) => "png",
        _ => return Err(ValidationError::UnsupportedFormat),
    };
    decode_rgb(photo).map_err(|e| ValidationError::Undecodable(e.to_string()))?;
    Ok(extension)
}
