use axum::extract::{Json, Multipart, State};
use serde::Serialize;
use tracing::error;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::sessions;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTemplateResponse {
    pub success: bool,
    pub file_id: String,
}

pub async fn upload_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<Json<UploadTemplateResponse>> {
    let mut upload: Option<(Vec<u8>, String)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::bad_request("filename is required"))?;
        let data = field.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read file bytes");
            AppError::bad_request(format!("failed to read file bytes: {err}"))
        })?;
        upload = Some((data.to_vec(), file_name));
    }

    let (bytes, file_name) = upload.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }

    let file_id = sessions::upload_template(&state, &user, bytes, &file_name).await?;
    Ok(Json(UploadTemplateResponse {
        success: true,
        file_id,
    }))
}
