use std::sync::Arc;

use axum::{http::StatusCode, Json};
use doorward_core::enrollment::EnrollError;
use doorward_core::{GalleryStore, ImageStore, Matcher};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::actuator::DoorActuator;
use crate::engine::{EngineError, GalleryHandle, RecognizerHandle};

pub mod app;
mod gallery;
mod recognize;

pub use app::app;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub recognizer: RecognizerHandle,
    pub gallery_worker: GalleryHandle,
    pub gallery: Arc<GalleryStore>,
    pub matcher: Arc<Matcher>,
    pub images: ImageStore,
    pub actuator: Arc<dyn DoorActuator>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub(crate) fn internal_error<E>(err: E) -> ApiError
where
    E: std::error::Error,
{
    error!("internal error: {}", err);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Caller mistakes become 4xx; everything else is logged and reported as 500.
pub(crate) fn engine_error(err: EngineError) -> ApiError {
    match err {
        EngineError::BadImage(_) => api_error(StatusCode::BAD_REQUEST, "bad image"),
        EngineError::Enroll(EnrollError::Validation(e)) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        EngineError::Enroll(e @ EnrollError::NotEnrolled(_)) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        other => internal_error(other),
    }
}
