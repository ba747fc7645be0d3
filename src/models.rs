use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub file_type: String,
    pub checksum: String,
    pub parent_document_id: Option<Uuid>,
    pub is_active: bool,
    pub is_featured: bool,
    pub searchable_content: Option<String>,
    pub download_count: i32,
    pub uploaded_by: Uuid,
    pub template_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Document {
    pub fn is_root(&self) -> bool {
        self.parent_document_id.is_none()
    }

    pub fn is_pdf(&self) -> bool {
        self.file_type.eq_ignore_ascii_case("pdf")
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub file_type: String,
    pub checksum: String,
    pub parent_document_id: Option<Uuid>,
    pub is_featured: bool,
    pub searchable_content: Option<String>,
    pub uploaded_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = user_document_versions)]
#[diesel(belongs_to(Document))]
pub struct UserDocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub version_number: i32,
    pub version_label: Option<String>,
    pub file_type: String,
    pub content_html: Option<String>,
    pub pdf_annotations: Option<serde_json::Value>,
    pub exported_file_path: Option<String>,
    pub exported_file_size: Option<i64>,
    pub exported_mime_type: Option<String>,
    pub is_draft: bool,
    pub bridge_file_id: Option<String>,
    pub bridge_edit_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_document_versions)]
pub struct NewUserDocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub version_number: i32,
    pub version_label: Option<String>,
    pub file_type: String,
    pub content_html: Option<String>,
    pub pdf_annotations: Option<serde_json::Value>,
    pub is_draft: bool,
    pub bridge_file_id: Option<String>,
    pub bridge_edit_url: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = download_logs)]
#[diesel(belongs_to(Document))]
pub struct DownloadLog {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub downloaded_at: NaiveDateTime,
    pub context: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = download_logs)]
pub struct NewDownloadLog {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub context: Option<String>,
    pub metadata: serde_json::Value,
}
