use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::face::{
    ClearReferenceResponse, CompareFolderRequest, CompareFolderResponse, JobStatusResponse,
    RegisterBaseFaceResponse,
};
use crate::models::image::{Credentials, Provider};
use crate::models::job::JobStatus;
use crate::routes::ApiError;

/// POST /face/register-base: Upload the reference face for a session.
pub async fn register_base(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<RegisterBaseFaceResponse>, ApiError> {
    let mut session_id: Option<String> = None;
    let mut image_data: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        match field.name() {
            Some("session_id") => {
                let text = field.text().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
                session_id = Some(text);
            }
            Some("image") => {
                let data = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;

                // Validate image format using the `image` crate
                image::guess_format(&data)
                    .map_err(|_| ApiError::BadRequest("Unsupported image format".to_string()))?;

                image_data = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let session_id = session_id.ok_or_else(|| ApiError::BadRequest("session_id is required".to_string()))?;
    let image_data = image_data.ok_or_else(|| ApiError::BadRequest("image is required".to_string()))?;

    state.face.register_reference(&session_id, &image_data).await?;
    tracing::info!(session_id = %session_id, bytes = image_data.len(), "Registered reference face");

    Ok(Json(RegisterBaseFaceResponse { success: true }))
}

/// POST /face/compare-folder: Start comparing a shared folder against the
/// session's reference face.
pub async fn compare_folder(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CompareFolderRequest>, JsonRejection>,
) -> Result<Json<CompareFolderResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let provider: Provider = request
        .provider
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Unsupported provider: {}", request.provider)))?;
    let token = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;

    let job_id = state
        .face
        .start_job(
            &request.session_id,
            &request.folder_link,
            Credentials::new(token, provider),
            request.recursive,
        )
        .await?;

    Ok(Json(CompareFolderResponse {
        job_id,
        status: JobStatus::Processing,
    }))
}

/// GET /face/job-status/{job_id}: Progress of a comparison job.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    Ok(Json(state.face.poll_job(&job_id)?))
}

/// DELETE /face/clear-reference/{session_id}
pub async fn clear_reference(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ClearReferenceResponse>, ApiError> {
    state.face.clear_reference(&session_id).await?;
    Ok(Json(ClearReferenceResponse {
        success: true,
        message: "Reference face cleared".to_string(),
    }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
