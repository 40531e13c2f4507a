use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use doorward_core::Classification;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{api_error, engine_error, ApiError, AppState};

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RecognizeResponse {
    Known { name: String },
    Unknown,
    NoFace,
}

/// Classify the faces in a raw camera frame; unlock the door on a match.
pub async fn post(State(state): State<AppState>, body: Bytes) -> Result<Json<RecognizeResponse>, ApiError> {
    if body.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "no image data"));
    }

    let faces = state
        .recognizer
        .extract(body.to_vec())
        .await
        .map_err(engine_error)?;

    let response = match state.matcher.classify(&faces) {
        Classification::Known { name, distance } => {
            info!(name = %name, distance, faces = faces.len(), "person identified");
            unlock(Arc::clone(&state.actuator), name.clone());
            RecognizeResponse::Known { name }
        }
        Classification::Unknown => {
            warn!(faces = faces.len(), "unknown person detected");
            RecognizeResponse::Unknown
        }
        Classification::NoFace => {
            info!("no face detected");
            RecognizeResponse::NoFace
        }
    };

    Ok(Json(response))
}

/// Fire the actuator without holding up the response.
fn unlock(actuator: Arc<dyn crate::actuator::DoorActuator>, member: String) {
    tokio::spawn(async move {
        if let Err(e) = actuator.unlock(&member).await {
            warn!(member = %member, error = %e, "door actuation failed");
        }
    });
}
