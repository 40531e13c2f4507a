use doorward_core::enrollment::{RebuildSummary, RemovalOutcome, Startup};
use doorward_core::{
    decode_rgb, BuildError, Embedding, EmbeddingExtractor, EnrollError, EnrollmentOutcome,
    EnrollmentService, ExtractError,
};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("bad image: {0}")]
    BadImage(String),
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the recognition thread.
struct RecognizeRequest {
    image: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<Embedding>, EngineError>>,
}

/// Clone-safe handle to the recognition thread.
#[derive(Clone)]
pub struct RecognizerHandle {
    tx: mpsc::Sender<RecognizeRequest>,
}

impl RecognizerHandle {
    /// Decode an uploaded frame and extract one embedding per face.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Vec<Embedding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RecognizeRequest {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the recognition engine on a dedicated OS thread.
///
/// The thread owns its extractor, so recognition never waits behind a
/// gallery rebuild running on the gallery worker.
pub fn spawn_recognizer<E>(
    mut extractor: E,
    debug_frame_path: Option<PathBuf>,
) -> Result<RecognizerHandle, EngineError>
where
    E: EmbeddingExtractor + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<RecognizeRequest>(4);

    std::thread::Builder::new()
        .name("doorward-recognizer".into())
        .spawn(move || {
            tracing::info!("recognition engine started");
            while let Some(req) = rx.blocking_recv() {
                let result = run_recognize(&mut extractor, &req.image, debug_frame_path.as_ref());
                let _ = req.reply.send(result);
            }
            tracing::info!("recognition engine exiting");
        })?;

    Ok(RecognizerHandle { tx })
}

fn run_recognize(
    extractor: &mut dyn EmbeddingExtractor,
    image: &[u8],
    debug_frame_path: Option<&PathBuf>,
) -> Result<Vec<Embedding>, EngineError> {
    let frame = decode_rgb(image).map_err(|e| EngineError::BadImage(e.to_string()))?;

    if let Some(path) = debug_frame_path {
        match frame.save(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "saved recognition frame"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to save recognition frame"),
        }
    }

    match extractor.extract(&frame) {
        Ok(faces) => Ok(faces),
        Err(ExtractError::InvalidImage(reason)) => Err(EngineError::BadImage(reason)),
        Err(e) => Err(e.into()),
    }
}

/// Messages sent from HTTP handlers to the gallery worker.
enum GalleryRequest {
    LoadOrRebuild {
        reply: oneshot::Sender<Result<Startup, EngineError>>,
    },
    Enroll {
        name: String,
        photo: Vec<u8>,
        reply: oneshot::Sender<Result<EnrollmentOutcome, EngineError>>,
    },
    Remove {
        name: String,
        reply: oneshot::Sender<Result<RemovalOutcome, EngineError>>,
    },
    Rebuild {
        reply: oneshot::Sender<Result<RebuildSummary, EngineError>>,
    },
}

/// Clone-safe handle to the gallery worker.
#[derive(Clone)]
pub struct GalleryHandle {
    tx: mpsc::Sender<GalleryRequest>,
}

impl GalleryHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> GalleryRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Publish the cached gallery, or rebuild it from the photos.
    pub async fn load_or_rebuild(&self) -> Result<Startup, EngineError> {
        self.call(|reply| GalleryRequest::LoadOrRebuild { reply }).await
    }

    /// Store a photo for `name` and rebuild.
    pub async fn enroll(&self, name: String, photo: Vec<u8>) -> Result<EnrollmentOutcome, EngineError> {
        self.call(|reply| GalleryRequest::Enroll { name, photo, reply })
            .await
    }

    /// Delete the photos of `name` and rebuild.
    pub async fn remove(&self, name: String) -> Result<RemovalOutcome, EngineError> {
        self.call(|reply| GalleryRequest::Remove { name, reply }).await
    }

    pub async fn rebuild(&self) -> Result<RebuildSummary, EngineError> {
        self.call(|reply| GalleryRequest::Rebuild { reply }).await
    }
}

/// Spawn the gallery worker on a dedicated OS thread.
///
/// Requests are served one at a time, so rebuilds never interleave.
pub fn spawn_gallery_worker<E>(
    service: EnrollmentService,
    mut extractor: E,
) -> Result<GalleryHandle, EngineError>
where
    E: EmbeddingExtractor + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<GalleryRequest>(8);

    std::thread::Builder::new()
        .name("doorward-gallery".into())
        .spawn(move || {
            tracing::info!("gallery worker started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    GalleryRequest::LoadOrRebuild { reply } => {
                        let result = service.load_or_rebuild(&mut extractor).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    GalleryRequest::Enroll { name, photo, reply } => {
                        let result = service
                            .enroll(&name, &photo, &mut extractor)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    GalleryRequest::Remove { name, reply } => {
                        let result = service.remove(&name, &mut extractor).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    GalleryRequest::Rebuild { reply } => {
                        let result = service.rebuild(&mut extractor).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("gallery worker exiting");
        })?;

    Ok(GalleryHandle { tx })
}
