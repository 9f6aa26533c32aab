//! Connection state, pairing artifact and outbound send endpoints.

use crate::api::errors::ApiError;
use crate::api::{AppState, guard};
use base64::Engine as _;
use ntex::web;
use serde::Deserialize;

#[web::get("/connection")]
pub async fn get_connection(
    req: web::HttpRequest,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;
    Ok(web::HttpResponse::Ok().json(&state.connection.snapshot()))
}

#[web::get("/qr")]
pub async fn get_qr(
    req: web::HttpRequest,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let qr = state
        .connection
        .qr()
        .ok_or_else(|| ApiError::NotFound("no pairing in progress".to_string()))?;

    Ok(web::HttpResponse::Ok().json(&qr))
}

#[derive(Debug, Deserialize)]
pub struct SendTextForm {
    pub to: String,
    pub message: String,
}

#[web::post("/send")]
pub async fn send_text(
    req: web::HttpRequest,
    form: web::types::Json<SendTextForm>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let adapter = state.adapter.as_ref().ok_or(ApiError::AdapterDisabled)?;
    let form = form.into_inner();

    if !crate::identity::is_valid_phone(&form.to) {
        return Err(ApiError::Validation(format!("invalid recipient: {}", form.to)).into());
    }
    if form.message.trim().is_empty() {
        return Err(ApiError::Validation("empty message body".to_string()).into());
    }

    let message_id = adapter
        .send_text(&form.to, &form.message)
        .await
        .map_err(ApiError::from)?;

    // so replies to it count as mentions
    state.messages.record_outgoing_id(&message_id);

    Ok(web::HttpResponse::Ok().json(&serde_json::json!({"messageId": message_id})))
}

#[derive(Debug, Deserialize)]
pub struct SendMediaForm {
    pub to: String,
    /// Base64-encoded file content.
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub caption: Option<String>,
}

#[web::post("/send/media")]
pub async fn send_media(
    req: web::HttpRequest,
    form: web::types::Json<SendMediaForm>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    guard::require_admin(&req)?;

    let adapter = state.adapter.as_ref().ok_or(ApiError::AdapterDisabled)?;
    let form = form.into_inner();

    if !crate::identity::is_valid_phone(&form.to) {
        return Err(ApiError::Validation(format!("invalid recipient: {}", form.to)).into());
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(form.data.as_bytes())
        .map_err(|_| ApiError::Validation("data is not valid base64".to_string()))?;
    if bytes.is_empty() {
        return Err(ApiError::Validation("empty media payload".to_string()).into());
    }

    let message_id = adapter
        .send_media(&form.to, bytes, &form.mime_type, form.caption)
        .await
        .map_err(ApiError::from)?;

    state.messages.record_outgoing_id(&message_id);

    Ok(web::HttpResponse::Ok().json(&serde_json::json!({"messageId": message_id})))
}
