//! Message-history and media endpoints.

use crate::api::errors::ApiError;
use crate::api::{AppState, guard};
use ntex::web;
use serde::Deserialize;

#[web::get("/messages")]
pub async fn list_sources(
    req: web::HttpRequest,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    Ok(web::HttpResponse::Ok().json(&serde_json::json!({
        "sources": state.messages.sources_with_messages(),
        "total": state.messages.total_count(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct SourcePath {
    pub source_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[web::get("/messages/{source_id}")]
pub async fn get_history(
    req: web::HttpRequest,
    path: web::types::Path<SourcePath>,
    query: web::types::Query<HistoryQuery>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);
    let (messages, has_more) = state.messages.get(&path.source_id, limit, offset);

    Ok(web::HttpResponse::Ok().json(&serde_json::json!({
        "sourceId": path.source_id,
        "messages": messages,
        "hasMore": has_more,
    })))
}

#[web::delete("/messages/{source_id}")]
pub async fn delete_history(
    req: web::HttpRequest,
    path: web::types::Path<SourcePath>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let deleted = state.messages.delete(&path.source_id);
    Ok(web::HttpResponse::Ok().json(&serde_json::json!({"deleted": deleted})))
}

#[derive(Debug, Deserialize)]
pub struct MediaPath {
    pub handle: String,
}

/// Streams a stored media blob back with its recorded MIME type.
#[web::get("/media/{handle}")]
pub async fn get_media(
    req: web::HttpRequest,
    path: web::types::Path<MediaPath>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let info = state
        .media
        .get(&path.handle)
        .ok_or_else(|| ApiError::NotFound(path.handle.clone()))?;

    let bytes = tokio::fs::read(&info.file_path)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(web::HttpResponse::Ok()
        .content_type(info.mime_type.as_str())
        .body(bytes))
}
