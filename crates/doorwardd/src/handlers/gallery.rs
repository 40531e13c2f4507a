use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use doorward_core::enrollment::{RebuildSummary, RemovalOutcome};
use doorward_core::image_store::StoreError;
use doorward_core::BuildWarning;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{api_error, engine_error, internal_error, ApiError, AppState};

#[derive(Serialize, Debug)]
pub struct EnrollResponse {
    /// `enrolled`, or `no_face` when the photo was stored but yielded no face.
    pub status: String,
    pub name: String,
    pub file: String,
    pub members: Vec<String>,
    pub warnings: Vec<BuildWarning>,
    pub generation: u64,
}

pub async fn enroll(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<EnrollResponse>, ApiError> {
    let mut name: Option<String> = None;
    let mut photo: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(e.status(), e.body_text()))?
    {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("name") => {
                name = Some(field.text().await.map_err(|e| api_error(e.status(), e.body_text()))?);
            }
            Some("photo") => {
                photo = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| api_error(e.status(), e.body_text()))?
                        .to_vec(),
                );
            }
            other => debug!(field = ?other, "ignoring multipart field"),
        }
    }

    let (Some(name), Some(photo)) = (name, photo) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "missing name or photo"));
    };

    let outcome = state
        .gallery_worker
        .enroll(name, photo)
        .await
        .map_err(engine_error)?;

    Ok(Json(EnrollResponse {
        status: if outcome.enrolled { "enrolled" } else { "no_face" }.to_owned(),
        name: outcome.name,
        file: outcome.file,
        members: outcome.members,
        warnings: outcome.warnings,
        generation: outcome.generation,
    }))
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct MemberEntry {
    pub name: String,
    pub file: String,
    /// Whether the photo contributed a member to the published gallery.
    pub recognized: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MembersResponse {
    pub members: Vec<MemberEntry>,
    pub generation: u64,
}

/// Photos in the enrolled store, as the enrollment page listed them.
pub async fn list(State(state): State<AppState>) -> Result<Json<MembersResponse>, ApiError> {
    let images = state.images.clone();
    let entries = tokio::task::spawn_blocking(move || images.entries())
        .await
        .map_err(internal_error)?
        .map_err(internal_error)?;

    let (generation, snapshot) = state.gallery.read_versioned();
    let members = entries
        .into_iter()
        .map(|entry| {
            let recognized = snapshot
                .get(&entry.name)
                .is_some_and(|m| m.source == entry.file_name);
            MemberEntry {
                name: entry.name,
                file: entry.file_name,
                recognized,
            }
        })
        .collect();

    Ok(Json(MembersResponse { members, generation }))
}

/// Serve a stored enrollment photo.
pub async fn photo(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let images = state.images.clone();
    let lookup = file.clone();
    let bytes = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, StoreError> {
        images
            .find(&lookup)?
            .map(|entry| images.read(&entry))
            .transpose()
    })
    .await
    .map_err(internal_error)?
    .map_err(internal_error)?
    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no photo named {file}")))?;

    let content_type = if file.to_ascii_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RemovalOutcome>, ApiError> {
    let outcome = state
        .gallery_worker
        .remove(name)
        .await
        .map_err(engine_error)?;
    info!(name = %outcome.name, members = outcome.members.len(), "member removed");
    Ok(Json(outcome))
}

pub async fn rebuild(State(state): State<AppState>) -> Result<Json<RebuildSummary>, ApiError> {
    let summary = state.gallery_worker.rebuild().await.map_err(engine_error)?;
    info!(
        generation = summary.generation,
        members = summary.members.len(),
        warnings = summary.warnings.len(),
        "gallery rebuilt on request"
    );
    Ok(Json(summary))
}
