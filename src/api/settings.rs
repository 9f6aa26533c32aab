//! Destination and entity-type configuration endpoints, plus the
//! dispatcher test/health surface.

use crate::api::{AppState, guard};
use ntex::web;
use serde::Deserialize;
use std::collections::HashMap;

#[web::get("/webhooks")]
pub async fn get_webhooks(
    req: web::HttpRequest,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let snapshot = state.config.snapshot();
    Ok(web::HttpResponse::Ok().json(&serde_json::json!({
        "webhookUrl": state.config.default_webhook(),
        "typeWebhooks": snapshot.type_webhooks,
        "customContactTypes": snapshot.custom_contact_types,
        "customGroupTypes": snapshot.custom_group_types,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DefaultWebhookForm {
    #[serde(rename = "webhookUrl")]
    pub webhook_url: Option<String>,
}

#[web::put("/webhooks")]
pub async fn set_default_webhook(
    req: web::HttpRequest,
    form: web::types::Json<DefaultWebhookForm>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    state
        .config
        .set_default_webhook(form.into_inner().webhook_url)
        .await
        .map_err(crate::api::errors::ApiError::from)?;

    Ok(web::HttpResponse::Ok().json(&serde_json::json!({
        "webhookUrl": state.config.default_webhook(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct TypeWebhooksForm {
    #[serde(rename = "typeWebhooks")]
    pub type_webhooks: HashMap<String, String>,
}

#[web::put("/webhooks/types")]
pub async fn set_type_webhooks(
    req: web::HttpRequest,
    form: web::types::Json<TypeWebhooksForm>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    state
        .config
        .set_type_webhooks(form.into_inner().type_webhooks)
        .await
        .map_err(crate::api::errors::ApiError::from)?;

    Ok(web::HttpResponse::Ok().json(&serde_json::json!({"updated": true})))
}

#[derive(Debug, Deserialize)]
pub struct CustomTypesForm {
    #[serde(rename = "customContactTypes", default)]
    pub custom_contact_types: Vec<String>,
    #[serde(rename = "customGroupTypes", default)]
    pub custom_group_types: Vec<String>,
}

#[web::put("/types")]
pub async fn set_custom_types(
    req: web::HttpRequest,
    form: web::types::Json<CustomTypesForm>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let form = form.into_inner();
    state
        .config
        .set_custom_types(form.custom_contact_types, form.custom_group_types)
        .await
        .map_err(crate::api::errors::ApiError::from)?;

    Ok(web::HttpResponse::Ok().json(&serde_json::json!({"updated": true})))
}

#[derive(Debug, Deserialize, Default)]
pub struct TestForm {
    #[serde(rename = "entityType")]
    pub entity_type: Option<String>,
}

#[web::post("/webhooks/test")]
pub async fn test_webhook(
    req: web::HttpRequest,
    form: web::types::Json<TestForm>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let outcome = state
        .dispatcher
        .test(form.into_inner().entity_type.as_deref())
        .await;

    Ok(web::HttpResponse::Ok().json(&outcome))
}

#[web::get("/webhooks/health")]
pub async fn webhook_health(
    req: web::HttpRequest,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;
    Ok(web::HttpResponse::Ok().json(&state.dispatcher.health()))
}
