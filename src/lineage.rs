//! Document families and per-user edit versions.
//!
//! A family is one root document plus the child documents pointing at it. Nesting
//! is at most one level deep, so the root of any document is a single lookup.

use chrono::{NaiveDateTime, Utc};
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::PgConnection;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Document, NewUserDocumentVersion, UserDocumentVersion};
use crate::schema::{documents, user_document_versions};
use crate::utils::json::{classify_bool, classify_string, classify_string_list, Field};

const MAX_VERSION_INSERT_ATTEMPTS: usize = 5;

pub fn root_id(document: &Document) -> Uuid {
    document.parent_document_id.unwrap_or(document.id)
}

pub fn find_document(conn: &mut PgConnection, document_id: Uuid) -> AppResult<Document> {
    documents::table
        .find(document_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("Document not found"))
}

/// The family root of `document`; a root resolves to itself without a query.
pub fn find_root(conn: &mut PgConnection, document: Document) -> AppResult<Document> {
    match document.parent_document_id {
        Some(parent) => find_document(conn, parent),
        None => Ok(document),
    }
}

/// Root first, then children oldest to newest.
pub fn load_family(conn: &mut PgConnection, root: Uuid) -> AppResult<Vec<Document>> {
    let mut members: Vec<Document> = documents::table
        .filter(
            documents::id
                .eq(root)
                .or(documents::parent_document_id.eq(root)),
        )
        .order(documents::created_at.asc())
        .load(conn)?;

    members.sort_by_key(|doc| !doc.is_root());
    Ok(members)
}

/// Trims, drops empties and de-duplicates while keeping first-seen order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let trimmed = tag.as_ref().trim();
        if !trimmed.is_empty() && !normalized.iter().any(|existing| existing == trimmed) {
            normalized.push(trimmed.to_string());
        }
    }
    normalized
}

/// Metadata edit applied to a whole family. Absent fields are never touched.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub is_featured: Option<bool>,
    pub is_active: Option<bool>,
    pub searchable_content: Option<Option<String>>,
}

impl DocumentPatch {
    pub fn from_json(body: &Value) -> AppResult<Self> {
        let body = body
            .as_object()
            .ok_or_else(|| AppError::bad_request("request body must be a JSON object"))?;

        let title = classify_string(body, "title")
            .and_then(|field| field.required("title"))
            .map_err(AppError::bad_request)?;
        let title = match title {
            Some(title) if title.trim().is_empty() => {
                return Err(AppError::bad_request("title must not be empty"))
            }
            Some(title) => Some(title.trim().to_string()),
            None => None,
        };

        let tags = match classify_string_list(body, "tags").map_err(AppError::bad_request)? {
            Field::Omitted => None,
            Field::Null => Some(Vec::new()),
            Field::Value(tags) => Some(normalize_tags(tags)),
        };

        Ok(Self {
            title,
            description: classify_string(body, "description")
                .map_err(AppError::bad_request)?
                .nullable(),
            category: classify_string(body, "category")
                .map_err(AppError::bad_request)?
                .nullable(),
            tags,
            is_featured: classify_bool(body, "is_featured")
                .and_then(|field| field.required("is_featured"))
                .map_err(AppError::bad_request)?,
            is_active: classify_bool(body, "is_active")
                .and_then(|field| field.required("is_active"))
                .map_err(AppError::bad_request)?,
            searchable_content: classify_string(body, "searchable_content")
                .map_err(AppError::bad_request)?
                .nullable(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = documents)]
struct FamilyChangeset<'a> {
    title: Option<&'a str>,
    description: Option<Option<&'a str>>,
    category: Option<Option<&'a str>>,
    tags: Option<&'a Vec<String>>,
    is_featured: Option<bool>,
    is_active: Option<bool>,
    searchable_content: Option<Option<&'a str>>,
    updated_at: NaiveDateTime,
}

impl<'a> FamilyChangeset<'a> {
    fn from_patch(patch: &'a DocumentPatch, now: NaiveDateTime) -> Self {
        Self {
            title: patch.title.as_deref(),
            description: patch.description.as_ref().map(|value| value.as_deref()),
            category: patch.category.as_ref().map(|value| value.as_deref()),
            tags: patch.tags.as_ref(),
            is_featured: patch.is_featured,
            is_active: patch.is_active,
            searchable_content: patch.searchable_content.as_ref().map(|value| value.as_deref()),
            updated_at: now,
        }
    }
}

#[derive(Debug)]
pub struct FamilyUpdate {
    pub document: Document,
    pub touched: usize,
}

pub fn update_family_metadata(
    conn: &mut PgConnection,
    document_id: Uuid,
    patch: &DocumentPatch,
) -> AppResult<FamilyUpdate> {
    if patch.is_empty() {
        return Err(AppError::bad_request("no changes provided"));
    }

    let document = find_document(conn, document_id)?;
    let root = root_id(&document);
    let touched = apply_family_patch(conn, root, patch)?;
    let document = refetch_updated(conn, document_id)?;

    info!(%document_id, root_id = %root, touched, "document family metadata updated");
    Ok(FamilyUpdate { document, touched })
}

/// One statement over every row with `id = root OR parent_document_id = root`.
pub fn apply_family_patch(
    conn: &mut PgConnection,
    root: Uuid,
    patch: &DocumentPatch,
) -> AppResult<usize> {
    let changeset = FamilyChangeset::from_patch(patch, Utc::now().naive_utc());
    let touched = diesel::update(
        documents::table.filter(
            documents::id
                .eq(root)
                .or(documents::parent_document_id.eq(root)),
        ),
    )
    .set(&changeset)
    .execute(conn)?;
    Ok(touched)
}

/// A row that vanished after the update was deleted concurrently.
pub fn refetch_updated(conn: &mut PgConnection, document_id: Uuid) -> AppResult<Document> {
    documents::table
        .find(document_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| {
            warn!(%document_id, "document disappeared between update and re-fetch");
            AppError::not_found_with("Document not found")
        })
}

/// Edited payload of a saved version; which variant is allowed depends on the file type.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionContent {
    RichText(String),
    PdfAnnotations(Value),
}

impl VersionContent {
    pub fn from_parts(
        document: &Document,
        content_html: Option<String>,
        pdf_annotations: Option<Value>,
    ) -> AppResult<Self> {
        let pdf_annotations = pdf_annotations.filter(|value| !value.is_null());
        match (content_html, pdf_annotations) {
            (Some(_), Some(_)) => Err(AppError::bad_request(
                "provide either content_html or pdf_annotations, not both",
            )),
            (None, None) => Err(AppError::bad_request(
                "content_html or pdf_annotations is required",
            )),
            (Some(_), None) if document.is_pdf() => Err(AppError::bad_request(
                "PDF documents are edited through pdf_annotations",
            )),
            (None, Some(_)) if !document.is_pdf() => Err(AppError::bad_request(
                "pdf_annotations are only accepted for PDF documents",
            )),
            (Some(html), None) => Ok(Self::RichText(html)),
            (None, Some(annotations)) => Ok(Self::PdfAnnotations(annotations)),
        }
    }

    fn into_columns(self) -> (Option<String>, Option<Value>) {
        match self {
            Self::RichText(html) => (Some(html), None),
            Self::PdfAnnotations(annotations) => (None, Some(annotations)),
        }
    }
}

/// Everything about a new version except its number, which is assigned at insert time.
#[derive(Debug, Clone)]
pub struct VersionDraft {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub version_label: Option<String>,
    pub file_type: String,
    pub content: Option<VersionContent>,
    pub is_draft: bool,
    pub bridge_file_id: Option<String>,
    pub bridge_edit_url: Option<String>,
}

pub fn next_version_number(
    conn: &mut PgConnection,
    document_id: Uuid,
    user_id: Uuid,
) -> AppResult<i32> {
    let current: Option<i32> = user_document_versions::table
        .filter(user_document_versions::document_id.eq(document_id))
        .filter(user_document_versions::user_id.eq(user_id))
        .select(max(user_document_versions::version_number))
        .get_result(conn)?;
    Ok(current.unwrap_or(0) + 1)
}

/// Inserts `draft` as `max + 1` for its (document, user) pair. The unique
/// constraint on the triple rejects a concurrent duplicate; the number is then
/// recomputed and the insert retried.
pub fn insert_next_version(
    conn: &mut PgConnection,
    draft: VersionDraft,
) -> AppResult<UserDocumentVersion> {
    let (content_html, pdf_annotations) = match draft.content.clone() {
        Some(content) => content.into_columns(),
        None => (None, None),
    };

    for attempt in 1..=MAX_VERSION_INSERT_ATTEMPTS {
        let version_number = next_version_number(conn, draft.document_id, draft.user_id)?;
        let row = NewUserDocumentVersion {
            id: draft.id,
            document_id: draft.document_id,
            user_id: draft.user_id,
            version_number,
            version_label: draft.version_label.clone(),
            file_type: draft.file_type.clone(),
            content_html: content_html.clone(),
            pdf_annotations: pdf_annotations.clone(),
            is_draft: draft.is_draft,
            bridge_file_id: draft.bridge_file_id.clone(),
            bridge_edit_url: draft.bridge_edit_url.clone(),
        };

        match diesel::insert_into(user_document_versions::table)
            .values(&row)
            .get_result::<UserDocumentVersion>(conn)
        {
            Ok(version) => return Ok(version),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info))
                if info.constraint_name() == Some("user_document_versions_number_unique") =>
            {
                warn!(
                    document_id = %draft.document_id,
                    user_id = %draft.user_id,
                    version_number,
                    attempt,
                    "version number taken by a concurrent insert; retrying"
                );
            }
            Err(DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _)) => {
                return Err(AppError::not_found_with("Document not found"));
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(AppError::internal(format!(
        "could not allocate a version number for document {} after {MAX_VERSION_INSERT_ATTEMPTS} attempts",
        draft.document_id
    )))
}

/// Stores an explicitly saved (non-draft) edit.
pub fn save_version(
    conn: &mut PgConnection,
    document_id: Uuid,
    user_id: Uuid,
    content_html: Option<String>,
    pdf_annotations: Option<Value>,
    version_label: Option<String>,
) -> AppResult<UserDocumentVersion> {
    let document = find_document(conn, document_id)?;
    let content = VersionContent::from_parts(&document, content_html, pdf_annotations)?;
    let version_label = version_label
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty());

    let version = insert_next_version(
        conn,
        VersionDraft {
            id: Uuid::new_v4(),
            document_id,
            user_id,
            version_label,
            file_type: document.file_type.clone(),
            content: Some(content),
            is_draft: false,
            bridge_file_id: None,
            bridge_edit_url: None,
        },
    )?;

    info!(
        %document_id,
        %user_id,
        version_number = version.version_number,
        "saved document version"
    );
    Ok(version)
}

/// Newest version number first.
pub fn list_versions(
    conn: &mut PgConnection,
    document_id: Uuid,
    user_id: Uuid,
) -> AppResult<Vec<UserDocumentVersion>> {
    let versions = user_document_versions::table
        .filter(user_document_versions::document_id.eq(document_id))
        .filter(user_document_versions::user_id.eq(user_id))
        .order(user_document_versions::version_number.desc())
        .load(conn)?;
    Ok(versions)
}

#[derive(Debug)]
pub struct DeletedDocument {
    pub document_id: Uuid,
    pub file_path: String,
    /// Files of child documents removed by the cascade when a root is deleted.
    pub cascaded_file_paths: Vec<String>,
}

impl DeletedDocument {
    pub fn all_file_paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.file_path.as_str())
            .chain(self.cascaded_file_paths.iter().map(String::as_str))
    }
}

/// Removes the row; versions, download logs and children go with it through
/// foreign-key cascades. Blob eviction is left to the caller.
pub fn delete_document(conn: &mut PgConnection, document_id: Uuid) -> AppResult<DeletedDocument> {
    conn.transaction::<DeletedDocument, AppError, _>(|conn| {
        let document = find_document(conn, document_id)?;

        let cascaded_file_paths: Vec<String> = if document.is_root() {
            documents::table
                .filter(documents::parent_document_id.eq(document_id))
                .select(documents::file_path)
                .load(conn)?
        } else {
            Vec::new()
        };

        let deleted = diesel::delete(documents::table.find(document_id)).execute(conn)?;
        if deleted == 0 {
            return Err(AppError::not_found_with("Document not found"));
        }

        info!(
            %document_id,
            cascaded_children = cascaded_file_paths.len(),
            "document deleted"
        );

        Ok(DeletedDocument {
            document_id,
            file_path: document.file_path,
            cascaded_file_paths,
        })
    })
}
