use std::path::Path as FsPath;

use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::lineage::{self, DocumentPatch};
use crate::models::{Document, NewDocument, UserDocumentVersion};
use crate::schema::documents;
use crate::search::{self, SearchParams};
use crate::sessions;
use crate::state::AppState;
use crate::storage::{content_disposition, document_key};
use crate::utils::size::{document_size_to_number, version_size_to_string};

#[derive(Serialize, Clone)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub file_type: String,
    pub checksum: String,
    pub parent_document_id: Option<Uuid>,
    pub root_id: Uuid,
    pub is_active: bool,
    pub is_featured: bool,
    pub download_count: i32,
    pub uploaded_by: Uuid,
    pub template_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            root_id: lineage::root_id(&doc),
            id: doc.id,
            title: doc.title,
            description: doc.description,
            category: doc.category,
            tags: doc.tags,
            file_name: doc.file_name,
            file_size: document_size_to_number(doc.file_size),
            mime_type: doc.mime_type,
            file_type: doc.file_type,
            checksum: doc.checksum,
            parent_document_id: doc.parent_document_id,
            is_active: doc.is_active,
            is_featured: doc.is_featured,
            download_count: doc.download_count,
            uploaded_by: doc.uploaded_by,
            template_id: doc.template_id,
            created_at: to_iso(doc.created_at),
            updated_at: to_iso(doc.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct FamilyResponse {
    pub root_id: Uuid,
    pub members: Vec<DocumentResponse>,
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    pub document: DocumentResponse,
    pub family: FamilyResponse,
}

#[derive(Serialize)]
pub struct UpdateDocumentResponse {
    pub document: DocumentResponse,
    /// Number of family rows the update wrote.
    pub touched: usize,
}

#[derive(Serialize)]
pub struct DeleteDocumentResponse {
    pub deleted: Uuid,
    pub removed_files: Vec<String>,
}

#[derive(Serialize)]
pub struct DownloadUrlResponse {
    pub url: String,
    pub expires_in: u64,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub file_size: u64,
}

#[derive(Serialize, Clone)]
pub struct VersionResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub version_number: i32,
    pub version_label: Option<String>,
    pub file_type: String,
    pub content_html: Option<String>,
    pub pdf_annotations: Option<Value>,
    pub exported_file_path: Option<String>,
    /// Decimal string; may exceed what a double can hold.
    pub exported_file_size: Option<String>,
    pub exported_mime_type: Option<String>,
    pub is_draft: bool,
    pub bridge_edit_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<UserDocumentVersion> for VersionResponse {
    fn from(version: UserDocumentVersion) -> Self {
        Self {
            id: version.id,
            document_id: version.document_id,
            user_id: version.user_id,
            version_number: version.version_number,
            version_label: version.version_label,
            file_type: version.file_type,
            content_html: version.content_html,
            pdf_annotations: version.pdf_annotations,
            exported_file_path: version.exported_file_path,
            exported_file_size: version_size_to_string(version.exported_file_size),
            exported_mime_type: version.exported_mime_type,
            is_draft: version.is_draft,
            bridge_edit_url: version.bridge_edit_url,
            created_at: to_iso(version.created_at),
            updated_at: to_iso(version.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct VersionListResponse {
    pub versions: Vec<VersionResponse>,
}

#[derive(Deserialize)]
pub struct SaveVersionRequest {
    pub content_html: Option<String>,
    pub pdf_annotations: Option<Value>,
    pub version_label: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub success: bool,
    pub bridge_template_id: String,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<DocumentListResponse>> {
    let mut conn = state.db()?;
    let documents = search::search_documents(&mut conn, &params)?;
    drop(conn);

    let documents: Vec<DocumentResponse> = documents.into_iter().map(Into::into).collect();
    Ok(Json(DocumentListResponse {
        count: documents.len(),
        documents,
    }))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<DocumentDetailResponse>> {
    let mut conn = state.db()?;
    let document = lineage::find_document(&mut conn, document_id)?;
    let root = lineage::root_id(&document);
    let members = lineage::load_family(&mut conn, root)?;

    Ok(Json(DocumentDetailResponse {
        document: document.into(),
        family: FamilyResponse {
            root_id: root,
            members: members.into_iter().map(Into::into).collect(),
        },
    }))
}

struct UploadForm {
    bytes: Vec<u8>,
    file_name: String,
    content_type: Option<String>,
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    tags: Vec<String>,
    parent_document_id: Option<Uuid>,
    is_featured: bool,
}

async fn read_upload_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut title = None;
    let mut description = None;
    let mut category = None;
    let mut tags = Vec::new();
    let mut parent_document_id = None;
    let mut is_featured = false;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        if name.as_deref() == Some("file") {
            file_name = field.file_name().map(|n| n.to_string());
            content_type = field.content_type().map(|mime| mime.to_string());
            let data = field.bytes().await.map_err(|err| {
                error!(error = %err, "failed to read file bytes");
                AppError::bad_request(format!("failed to read file bytes: {err}"))
            })?;
            file_bytes = Some(data.to_vec());
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|err| AppError::bad_request(format!("invalid form field: {err}")))?;
        let value = non_empty(value);
        match name.as_deref() {
            Some("title") => title = value,
            Some("description") => description = value,
            Some("category") => category = value,
            Some("tags") => {
                tags = lineage::normalize_tags(value.unwrap_or_default().split(','));
            }
            Some("parent_document_id") => {
                parent_document_id = value
                    .map(|raw| {
                        Uuid::parse_str(&raw).map_err(|_| {
                            AppError::bad_request("parent_document_id must be a valid UUID")
                        })
                    })
                    .transpose()?;
            }
            Some("is_featured") => {
                is_featured = matches!(value.as_deref(), Some("true") | Some("1") | Some("on"));
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    let file_name = file_name
        .and_then(non_empty)
        .ok_or_else(|| AppError::bad_request("filename is required"))?;

    Ok(UploadForm {
        bytes,
        file_name,
        content_type,
        title,
        description,
        category,
        tags,
        parent_document_id,
        is_featured,
    })
}

pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    user.require_admin()?;
    let form = read_upload_form(multipart).await?;

    if let Some(parent_id) = form.parent_document_id {
        let mut conn = state.db()?;
        let parent = documents::table
            .find(parent_id)
            .first::<Document>(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::bad_request("parent document does not exist"))?;
        if !parent.is_root() {
            return Err(AppError::bad_request(
                "parent document must be a root document",
            ));
        }
    }

    let document_id = Uuid::new_v4();
    let checksum = hex::encode(Sha256::digest(&form.bytes));
    let file_size = form.bytes.len() as i64;
    let mime_type = detect_mime_type(form.content_type.as_deref(), &form.file_name);
    let key = document_key(document_id, &form.file_name);

    let file_path = state
        .storage
        .put_object(
            &key,
            form.bytes,
            mime_type.clone(),
            content_disposition("inline", &form.file_name),
        )
        .await
        .map_err(|err| {
            error!(error = ?err, file_name = %form.file_name, "document upload failed");
            AppError::storage(format!("Upload failed: {err}"))
        })?;

    let new_document = NewDocument {
        id: document_id,
        title: form
            .title
            .unwrap_or_else(|| derive_document_title(&form.file_name)),
        description: form.description,
        category: form.category,
        tags: form.tags,
        file_type: file_type_for(&form.file_name),
        file_name: form.file_name,
        file_path: file_path.clone(),
        file_size,
        mime_type,
        checksum,
        parent_document_id: form.parent_document_id,
        is_featured: form.is_featured,
        searchable_content: None,
        uploaded_by: user.user_id,
    };

    let mut conn = state.db()?;
    let inserted = diesel::insert_into(documents::table)
        .values(&new_document)
        .get_result::<Document>(&mut conn);
    drop(conn);

    let document = match inserted {
        Ok(document) => document,
        Err(err) => {
            if let Err(cleanup) = state.storage.delete_object(&file_path).await {
                warn!(error = ?cleanup, %file_path, "failed to remove orphaned upload");
            }
            return Err(err.into());
        }
    };

    info!(
        %document_id,
        file_name = %document.file_name,
        file_size,
        parent_document_id = ?document.parent_document_id,
        "document uploaded"
    );
    Ok((StatusCode::CREATED, Json(document.into())))
}

pub async fn update_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<Value>,
) -> AppResult<Json<UpdateDocumentResponse>> {
    user.require_admin()?;
    let patch = DocumentPatch::from_json(&payload)?;

    let mut conn = state.db()?;
    let update = lineage::update_family_metadata(&mut conn, document_id, &patch)?;

    Ok(Json(UpdateDocumentResponse {
        document: update.document.into(),
        touched: update.touched,
    }))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<DeleteDocumentResponse>> {
    user.require_admin()?;

    let mut conn = state.db()?;
    let deleted = lineage::delete_document(&mut conn, document_id)?;
    drop(conn);

    let mut removed_files = Vec::new();
    for path in deleted.all_file_paths() {
        match state.storage.delete_object(path).await {
            Ok(()) => removed_files.push(path.to_string()),
            Err(err) => warn!(error = ?err, %path, %document_id, "failed to evict document file"),
        }
    }

    Ok(Json(DeleteDocumentResponse {
        deleted: deleted.document_id,
        removed_files,
    }))
}

pub async fn download_url(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<DownloadUrlResponse>> {
    let document = {
        let mut conn = state.db()?;
        lineage::find_document(&mut conn, document_id)?
    };

    let ttl = state.signed_url_ttl();
    let url = state
        .storage
        .presign_get_object(&document.file_path, ttl)
        .await
        .map_err(|err| {
            error!(error = ?err, %document_id, "failed to sign document download");
            AppError::signed_url_failed()
        })?;

    let mut conn = state.db()?;
    let updated = diesel::update(documents::table.find(document_id))
        .set(documents::download_count.eq(documents::download_count + 1))
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found_with("Document not found"));
    }

    info!(%document_id, user_id = %user.user_id, "download URL issued");
    Ok(Json(DownloadUrlResponse {
        url,
        expires_in: ttl.as_secs(),
        file_name: document.file_name,
        mime_type: document.mime_type,
        file_size: document_size_to_number(document.file_size),
    }))
}

pub async fn save_version(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<SaveVersionRequest>,
) -> AppResult<(StatusCode, Json<VersionResponse>)> {
    let mut conn = state.db()?;
    let version = lineage::save_version(
        &mut conn,
        document_id,
        user.user_id,
        payload.content_html,
        payload.pdf_annotations,
        payload.version_label,
    )?;

    Ok((StatusCode::CREATED, Json(version.into())))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<VersionListResponse>> {
    let mut conn = state.db()?;
    lineage::find_document(&mut conn, document_id)?;
    let versions = lineage::list_versions(&mut conn, document_id, user.user_id)?;

    Ok(Json(VersionListResponse {
        versions: versions.into_iter().map(Into::into).collect(),
    }))
}

pub async fn convert_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<ConvertResponse>> {
    user.require_admin()?;
    let bridge_template_id = sessions::convert_document(&state, &user, document_id).await?;
    Ok(Json(ConvertResponse {
        success: true,
        bridge_template_id,
    }))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn derive_document_title(file_name: &str) -> String {
    FsPath::new(file_name.trim())
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .unwrap_or("Document")
        .to_string()
}

/// Lower-cased extension, `bin` when there is none.
fn file_type_for(file_name: &str) -> String {
    FsPath::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "bin".to_string())
}

fn detect_mime_type(declared: Option<&str>, file_name: &str) -> Option<String> {
    declared
        .filter(|mime| !mime.is_empty() && *mime != "application/octet-stream")
        .map(str::to_string)
        .or_else(|| {
            mime_guess::from_path(file_name)
                .first()
                .map(|mime| mime.essence_str().to_string())
        })
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
