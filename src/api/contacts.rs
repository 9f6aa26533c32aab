//! Contact management endpoints.

use crate::api::{AppState, guard};
use crate::models::contact::Contact;
use ntex::web;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ContactPath {
    pub phone: String,
}

#[web::get("/contacts")]
pub async fn list_contacts(
    req: web::HttpRequest,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let snapshot = state.config.snapshot();
    Ok(web::HttpResponse::Ok().json(&serde_json::json!({
        "contacts": snapshot.contacts,
        "customTypes": snapshot.custom_contact_types,
    })))
}

#[web::post("/contacts")]
pub async fn add_contact(
    req: web::HttpRequest,
    form: web::types::Json<Contact>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let stored = state
        .config
        .add_contact(form.into_inner())
        .await
        .map_err(crate::api::errors::ApiError::from)?;

    Ok(web::HttpResponse::Created().json(&stored))
}

#[web::put("/contacts/{phone}")]
pub async fn update_contact(
    req: web::HttpRequest,
    path: web::types::Path<ContactPath>,
    form: web::types::Json<Contact>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let stored = state
        .config
        .update_contact(&path.phone, form.into_inner())
        .await
        .map_err(crate::api::errors::ApiError::from)?;

    Ok(web::HttpResponse::Ok().json(&stored))
}

#[web::delete("/contacts/{phone}")]
pub async fn delete_contact(
    req: web::HttpRequest,
    path: web::types::Path<ContactPath>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    state
        .config
        .delete_contact(&path.phone)
        .await
        .map_err(crate::api::errors::ApiError::from)?;

    Ok(web::HttpResponse::Ok().json(&serde_json::json!({"deleted": path.phone})))
}
