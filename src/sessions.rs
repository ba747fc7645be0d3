//! Editing sessions mediated by the bridge.
//!
//! A session starts by cloning a bridge-side template into a fresh draft
//! version and ends when the edited file is exported, stored, and the draft is
//! finalized. Drafts never go back to "no session"; an abandoned draft simply
//! stays a draft.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use diesel::prelude::*;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::bridge::{BridgeAction, BridgeError};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::lineage::{self, VersionDraft};
use crate::models::{NewDownloadLog, UserDocumentVersion};
use crate::schema::{documents, download_logs, user_document_versions};
use crate::state::AppState;
use crate::storage::{content_disposition, exported_version_key};

pub const DOCX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub const EDITING_SESSION_LOG_CONTEXT: &str = "editing_session";

#[derive(Debug, Clone)]
pub struct EditingSession {
    pub edit_url: String,
    pub version: UserDocumentVersion,
}

#[derive(Debug, Clone)]
pub struct FinishedSession {
    pub file_url: String,
    pub version: UserDocumentVersion,
}

/// Registers raw office bytes with the bridge and returns the bridge file id.
pub async fn upload_template(
    state: &AppState,
    user: &AuthenticatedUser,
    bytes: Vec<u8>,
    file_name: &str,
) -> AppResult<String> {
    if !state.bridge.is_configured() {
        return Err(AppError::bridge_not_configured());
    }

    let size = bytes.len();
    let file_id = upload_to_bridge(state, bytes, file_name).await?;

    info!(
        user_id = %user.user_id,
        file_name,
        size,
        bridge_file_id = %file_id,
        "template uploaded to bridge"
    );
    Ok(file_id)
}

async fn upload_to_bridge(state: &AppState, bytes: Vec<u8>, file_name: &str) -> AppResult<String> {
    let action = BridgeAction::Upload {
        file_name: file_name.to_string(),
        content_base64: BASE64.encode(bytes),
    };

    match state.bridge.invoke(action).await {
        Ok(output) => Ok(output.into_string()),
        Err(BridgeError::MalformedResponse(_)) => {
            Err(AppError::bridge_malformed("Failed to get File ID from Bridge"))
        }
        Err(err) => Err(err.into()),
    }
}

/// Clones a template on the bridge and opens a draft version for the caller.
///
/// `template_file_id` falls back to the template registered on the document, then
/// to the one [`convert_document`] registered on its family root.
pub async fn create_editing_session(
    state: &AppState,
    user: &AuthenticatedUser,
    document_id: Uuid,
    template_file_id: Option<String>,
) -> AppResult<EditingSession> {
    let (document, registered_template) = {
        let mut conn = state.db()?;
        let document = lineage::find_document(&mut conn, document_id)?;
        let registered = match document.template_id.clone() {
            Some(id) => Some(id),
            None => lineage::find_root(&mut conn, document.clone())?.template_id,
        };
        (document, registered)
    };

    let template_id = template_file_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .or(registered_template)
        .ok_or_else(|| {
            AppError::bad_request("No template is registered for this document; convert it first")
        })?;

    let file_id = state
        .bridge
        .invoke(BridgeAction::Copy {
            template_id: template_id.clone(),
        })
        .await
        .map(|output| output.into_string())
        .map_err(session_start_failed)?;

    let edit_url = state.bridge.edit_url(&file_id);

    let mut conn = state.db()?;
    let version = lineage::insert_next_version(
        &mut conn,
        VersionDraft {
            id: Uuid::new_v4(),
            document_id,
            user_id: user.user_id,
            version_label: None,
            file_type: document.file_type.clone(),
            content: None,
            is_draft: true,
            bridge_file_id: Some(file_id.clone()),
            bridge_edit_url: Some(edit_url.clone()),
        },
    )
    .map_err(|err| {
        // The bridge copy already exists at this point and is not cleaned up.
        error!(%document_id, bridge_file_id = %file_id, error = %err, "failed to record editing session");
        match err.kind() {
            ErrorKind::NotFound => err,
            _ => AppError::internal(err),
        }
    })?;

    info!(
        %document_id,
        user_id = %user.user_id,
        version_id = %version.id,
        version_number = version.version_number,
        template_id = %template_id,
        "editing session started"
    );

    Ok(EditingSession { edit_url, version })
}

fn session_start_failed(err: BridgeError) -> AppError {
    let cause = match err {
        BridgeError::NotConfigured => return AppError::bridge_not_configured(),
        BridgeError::Remote(message) => message,
        BridgeError::MalformedResponse(field) => format!("bridge response is missing '{field}'"),
        BridgeError::Timeout => "request timed out".to_string(),
        BridgeError::Transport(err) => {
            warn!(error = %err, "bridge transport failure");
            "request failed".to_string()
        }
    };
    AppError::new(
        ErrorKind::BridgeError,
        format!("Failed to create editing session: {cause}"),
    )
}

/// Exports the edited file, stores it under the owner's prefix and finalizes the draft.
pub async fn finish_editing_session(
    state: &AppState,
    user: &AuthenticatedUser,
    version_id: Uuid,
) -> AppResult<FinishedSession> {
    let (version, document_title) = {
        let mut conn = state.db()?;
        let version: UserDocumentVersion = user_document_versions::table
            .filter(user_document_versions::id.eq(version_id))
            .filter(user_document_versions::user_id.eq(user.user_id))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::not_found_with("Version not found or unauthorized"))?;
        let title: String = documents::table
            .find(version.document_id)
            .select(documents::title)
            .first(&mut conn)?;
        (version, title)
    };

    if !version.is_draft {
        return Err(AppError::bad_request("Version has already been finalized"));
    }

    let bridge_file_id = version
        .bridge_file_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("No Google Drive file associated with this version"))?;

    let encoded = match state
        .bridge
        .invoke(BridgeAction::Export {
            file_id: bridge_file_id.clone(),
        })
        .await
    {
        Ok(output) => output.into_string(),
        Err(BridgeError::MalformedResponse(_)) => {
            return Err(AppError::bridge_malformed("Bridge returned empty DOCX data"))
        }
        Err(err) => return Err(err.into()),
    };

    let bytes = BASE64.decode(encoded.trim()).map_err(|err| {
        warn!(%version_id, error = %err, "bridge export is not valid base64");
        AppError::bridge_malformed("Bridge returned invalid DOCX data")
    })?;
    let file_size = bytes.len() as i64;

    let key = exported_version_key(
        user.user_id,
        version.document_id,
        version.version_number,
        version.id,
        "docx",
    );
    let download_name = format!("{} (v{}).docx", document_title, version.version_number);
    let file_path = state
        .storage
        .put_object(
            &key,
            bytes,
            Some(DOCX_MIME_TYPE.to_string()),
            content_disposition("attachment", &download_name),
        )
        .await
        .map_err(|err| {
            error!(%version_id, error = ?err, "failed to store exported version");
            AppError::storage(format!("Upload failed: {err}"))
        })?;

    let file_url = state
        .storage
        .presign_get_object(&file_path, state.signed_url_ttl())
        .await
        .map_err(|err| {
            error!(%version_id, error = ?err, "failed to sign exported version");
            AppError::signed_url_failed()
        })?;

    let mut conn = state.db()?;
    let version = conn.transaction::<UserDocumentVersion, AppError, _>(|conn| {
        let finalized: Option<UserDocumentVersion> = diesel::update(
            user_document_versions::table
                .filter(user_document_versions::id.eq(version.id))
                .filter(user_document_versions::is_draft.eq(true)),
        )
        .set((
            user_document_versions::is_draft.eq(false),
            user_document_versions::exported_file_path.eq(Some(file_path.as_str())),
            user_document_versions::exported_file_size.eq(Some(file_size)),
            user_document_versions::exported_mime_type.eq(Some(DOCX_MIME_TYPE)),
            user_document_versions::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(conn)
        .optional()?;

        let finalized = finalized
            .ok_or_else(|| AppError::bad_request("Version has already been finalized"))?;

        diesel::insert_into(download_logs::table)
            .values(&NewDownloadLog {
                id: Uuid::new_v4(),
                document_id: finalized.document_id,
                user_id: user.user_id,
                context: Some(EDITING_SESSION_LOG_CONTEXT.to_string()),
                metadata: json!({
                    "version_id": finalized.id,
                    "version_number": finalized.version_number,
                    "file_path": file_path,
                }),
            })
            .execute(conn)?;

        Ok(finalized)
    })?;

    info!(
        %version_id,
        document_id = %version.document_id,
        user_id = %user.user_id,
        file_size,
        "editing session finished"
    );

    Ok(FinishedSession { file_url, version })
}

/// Registers the family root of a stored document with the bridge so sessions on
/// any family member can clone it.
pub async fn convert_document(
    state: &AppState,
    user: &AuthenticatedUser,
    document_id: Uuid,
) -> AppResult<String> {
    if !state.bridge.is_configured() {
        return Err(AppError::bridge_not_configured());
    }

    let document = {
        let mut conn = state.db()?;
        let requested = lineage::find_document(&mut conn, document_id)?;
        lineage::find_root(&mut conn, requested)?
    };
    let root_id = document.id;

    let bytes = state
        .storage
        .get_object(&document.file_path)
        .await
        .map_err(|err| {
            error!(%document_id, error = ?err, "failed to fetch document for conversion");
            AppError::storage(format!("Failed to download document: {err}"))
        })?;

    let template_id = upload_to_bridge(state, bytes, &document.file_name).await?;

    let mut conn = state.db()?;
    let updated = diesel::update(documents::table.find(root_id))
        .set((
            documents::template_id.eq(Some(template_id.as_str())),
            documents::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found_with("Document not found"));
    }

    info!(
        %document_id,
        %root_id,
        user_id = %user.user_id,
        bridge_template_id = %template_id,
        "document registered as bridge template"
    );
    Ok(template_id)
}
