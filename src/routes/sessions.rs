use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::documents::VersionResponse;
use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::sessions;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    #[serde(alias = "documentId")]
    pub document_id: Uuid,
    #[serde(default, alias = "templateFileId")]
    pub template_file_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub success: bool,
    pub edit_url: String,
    pub version_id: Uuid,
    pub version_number: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishSessionResponse {
    pub success: bool,
    pub file_url: String,
    pub version: VersionResponse,
}

pub async fn create_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateSessionRequest>,
) -> AppResult<(StatusCode, Json<CreateSessionResponse>)> {
    let session = sessions::create_editing_session(
        &state,
        &user,
        payload.document_id,
        payload.template_file_id,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            success: true,
            edit_url: session.edit_url,
            version_id: session.version.id,
            version_number: session.version.version_number,
        }),
    ))
}

pub async fn finish_session(
    State(state): State<AppState>,
    Path(version_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<FinishSessionResponse>> {
    let finished = sessions::finish_editing_session(&state, &user, version_id).await?;

    Ok(Json(FinishSessionResponse {
        success: true,
        file_url: finished.file_url,
        version: finished.version.into(),
    }))
}
