//! Statistics and recent-events endpoints.

use crate::api::{AppState, guard};
use ntex::web;
use serde::Deserialize;

#[web::get("/stats")]
pub async fn get_stats(
    req: web::HttpRequest,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;
    Ok(web::HttpResponse::Ok().json(&state.stats.snapshot()))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Canonical event kind to filter on, e.g. `MESSAGES_UPSERT`.
    pub event: Option<String>,
}

#[web::get("/events")]
pub async fn recent_events(
    req: web::HttpRequest,
    query: web::types::Query<EventsQuery>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);
    let (events, total) = state.stats.recent(limit, query.event.as_deref(), offset);
    let has_more = offset + events.len() < total;

    Ok(web::HttpResponse::Ok().json(&serde_json::json!({
        "events": events,
        "total": total,
        "hasMore": has_more,
    })))
}
