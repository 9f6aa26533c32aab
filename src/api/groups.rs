//! Group management endpoints.

use crate::api::{AppState, guard};
use crate::models::contact::Group;
use ntex::web;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct GroupPath {
    pub group_id: String,
}

#[web::get("/groups")]
pub async fn list_groups(
    req: web::HttpRequest,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let snapshot = state.config.snapshot();
    Ok(web::HttpResponse::Ok().json(&serde_json::json!({
        "groups": snapshot.groups,
        "customTypes": snapshot.custom_group_types,
    })))
}

#[web::post("/groups")]
pub async fn add_group(
    req: web::HttpRequest,
    form: web::types::Json<Group>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let stored = state
        .config
        .add_group(form.into_inner())
        .await
        .map_err(crate::api::errors::ApiError::from)?;

    Ok(web::HttpResponse::Created().json(&stored))
}

#[web::put("/groups/{group_id}")]
pub async fn update_group(
    req: web::HttpRequest,
    path: web::types::Path<GroupPath>,
    form: web::types::Json<Group>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let stored = state
        .config
        .update_group(&path.group_id, form.into_inner())
        .await
        .map_err(crate::api::errors::ApiError::from)?;

    Ok(web::HttpResponse::Ok().json(&stored))
}

#[web::delete("/groups/{group_id}")]
pub async fn delete_group(
    req: web::HttpRequest,
    path: web::types::Path<GroupPath>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    state
        .config
        .delete_group(&path.group_id)
        .await
        .map_err(crate::api::errors::ApiError::from)?;

    Ok(web::HttpResponse::Ok().json(&serde_json::json!({"deleted": path.group_id})))
}
