//! Free-text search and filtered browsing over documents.
//!
//! Text search delegates ranking to the `search_documents` SQL function and then
//! loads full rows, which come back in arbitrary order; they are put back into
//! rank order here before any filtering.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use diesel::prelude::*;
use diesel::sql_types::{Float4, Integer, Nullable, Text, Uuid as SqlUuid};
use diesel::PgConnection;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Document;
use crate::schema::documents;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub category: Option<String>,
    pub file_type: Option<String>,
    pub tags: Option<String>,
    pub featured: Option<bool>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    CreatedAtDesc,
    CreatedAtAsc,
    UpdatedAtDesc,
    TitleAsc,
    TitleDesc,
    DownloadCountDesc,
    FileSizeAsc,
    FileSizeDesc,
}

impl SortKey {
    /// Unknown combinations fall back to newest first.
    pub fn parse(field: Option<&str>, direction: Option<&str>) -> Self {
        let field = field.map(|f| f.trim().to_ascii_lowercase());
        let direction = direction
            .map(|d| d.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "desc".to_string());

        match (field.as_deref(), direction.as_str()) {
            (Some("created_at"), "asc") => Self::CreatedAtAsc,
            (Some("created_at"), "desc") => Self::CreatedAtDesc,
            (Some("updated_at"), "desc") => Self::UpdatedAtDesc,
            (Some("title"), "asc") => Self::TitleAsc,
            (Some("title"), "desc") => Self::TitleDesc,
            (Some("download_count"), "desc") => Self::DownloadCountDesc,
            (Some("file_size"), "asc") => Self::FileSizeAsc,
            (Some("file_size"), "desc") => Self::FileSizeDesc,
            _ => Self::CreatedAtDesc,
        }
    }
}

/// Inclusive created-at window; the upper bound covers the whole `to` day.
pub fn date_range(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
    let start = from.map(|day| day.and_time(NaiveTime::MIN));
    let end = to.and_then(|day| {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).map(|time| day.and_time(time))
    });
    (start, end)
}

pub fn parse_tag_filter(raw: Option<&str>) -> HashSet<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Keeps documents carrying at least one requested tag; order is preserved.
pub fn retain_tagged(docs: &mut Vec<Document>, wanted: &HashSet<String>) {
    if wanted.is_empty() {
        return;
    }
    docs.retain(|doc| doc.tags.iter().any(|tag| wanted.contains(tag)));
}

#[derive(Debug, Clone, QueryableByName)]
pub struct RankedId {
    #[diesel(sql_type = SqlUuid)]
    pub id: Uuid,
    #[diesel(sql_type = Float4)]
    pub rank: f32,
}

struct Ranked {
    rank: f32,
    position: usize,
    document: Document,
}

/// Reorders fetched rows to follow the ranking call. Rows the ranking did not
/// return are dropped; the rank itself is discarded.
pub fn merge_ranked(ranked: &[RankedId], fetched: Vec<Document>) -> Vec<Document> {
    let order: HashMap<Uuid, (usize, f32)> = ranked
        .iter()
        .enumerate()
        .map(|(position, hit)| (hit.id, (position, hit.rank)))
        .collect();

    let mut merged: Vec<Ranked> = fetched
        .into_iter()
        .filter_map(|document| {
            order.get(&document.id).map(|&(position, rank)| Ranked {
                rank,
                position,
                document,
            })
        })
        .collect();

    merged.sort_by(|a, b| {
        b.rank
            .total_cmp(&a.rank)
            .then_with(|| a.position.cmp(&b.position))
    });

    merged.into_iter().map(|entry| entry.document).collect()
}

fn page(params: &SearchParams) -> (i64, i64) {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);
    (limit, offset)
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn search_documents(
    conn: &mut PgConnection,
    params: &SearchParams,
) -> AppResult<Vec<Document>> {
    match non_blank(params.q.as_ref()) {
        Some(query) => text_search(conn, &query, params),
        None => browse(conn, params),
    }
}

fn rank_documents(
    conn: &mut PgConnection,
    query: &str,
    category: Option<String>,
    file_type: Option<String>,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<RankedId>> {
    let limit = i32::try_from(limit).map_err(AppError::internal)?;
    let offset = i32::try_from(offset).map_err(|_| AppError::bad_request("offset is too large"))?;

    let ranked = diesel::sql_query("SELECT id, rank FROM search_documents($1, $2, $3, $4, $5)")
        .bind::<Text, _>(query.to_string())
        .bind::<Nullable<Text>, _>(category)
        .bind::<Nullable<Text>, _>(file_type)
        .bind::<Integer, _>(limit)
        .bind::<Integer, _>(offset)
        .load::<RankedId>(conn)?;
    Ok(ranked)
}

fn text_search(
    conn: &mut PgConnection,
    query: &str,
    params: &SearchParams,
) -> AppResult<Vec<Document>> {
    let (limit, offset) = page(params);
    let ranked = rank_documents(
        conn,
        query,
        non_blank(params.category.as_ref()),
        non_blank(params.file_type.as_ref()),
        limit,
        offset,
    )?;

    debug!(%query, hits = ranked.len(), "ranked document search");
    if ranked.is_empty() {
        return Ok(Vec::new());
    }

    // Children are included on purpose so version-specific matches surface.
    let ids: Vec<Uuid> = ranked.iter().map(|hit| hit.id).collect();
    let fetched: Vec<Document> = documents::table
        .filter(documents::id.eq_any(&ids))
        .load(conn)?;

    let mut docs = merge_ranked(&ranked, fetched);
    retain_tagged(&mut docs, &parse_tag_filter(params.tags.as_deref()));
    Ok(docs)
}

fn browse(conn: &mut PgConnection, params: &SearchParams) -> AppResult<Vec<Document>> {
    let (limit, offset) = page(params);
    let mut query = documents::table
        .filter(documents::parent_document_id.is_null())
        .filter(documents::is_active.eq(true))
        .into_boxed();

    if let Some(category) = non_blank(params.category.as_ref()) {
        query = query.filter(documents::category.eq(category));
    }
    if let Some(file_type) = non_blank(params.file_type.as_ref()) {
        query = query.filter(documents::file_type.eq(file_type));
    }
    if params.featured.unwrap_or(false) {
        query = query.filter(documents::is_featured.eq(true));
    }

    let (start, end) = date_range(params.from_date, params.to_date);
    if let Some(start) = start {
        query = query.filter(documents::created_at.ge(start));
    }
    if let Some(end) = end {
        query = query.filter(documents::created_at.le(end));
    }

    query = match SortKey::parse(params.sort_by.as_deref(), params.sort_order.as_deref()) {
        SortKey::CreatedAtDesc => query.order(documents::created_at.desc()),
        SortKey::CreatedAtAsc => query.order(documents::created_at.asc()),
        SortKey::UpdatedAtDesc => query.order(documents::updated_at.desc()),
        SortKey::TitleAsc => query.order((documents::title.asc(), documents::created_at.desc())),
        SortKey::TitleDesc => query.order((documents::title.desc(), documents::created_at.desc())),
        SortKey::DownloadCountDesc => query.order((
            documents::download_count.desc(),
            documents::created_at.desc(),
        )),
        SortKey::FileSizeAsc => query.order((documents::file_size.asc(), documents::created_at.desc())),
        SortKey::FileSizeDesc => {
            query.order((documents::file_size.desc(), documents::created_at.desc()))
        }
    };

    let mut docs: Vec<Document> = query.limit(limit).offset(offset).load(conn)?;
    retain_tagged(&mut docs, &parse_tag_filter(params.tags.as_deref()));
    Ok(docs)
}
