use crate::api::AppState;
use crate::models::event::{EventKind, EventOrigin, normalize_event_name};
use crate::router::EventRouter;
use crate::{config, consts};
use log::error;
use ntex::web;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::Ordering;

/// Configuration is autosaved once per [`consts::INGRESS_SAVE_EVERY_EVENTS`]
/// accepted events so long-running upstreams cannot outlive a stale file.
async fn count_event(state: &AppState) {
    let seen = state.ingress_events.fetch_add(1, Ordering::Relaxed) + 1;
    if seen % consts::INGRESS_SAVE_EVERY_EVENTS == 0 {
        if let Err(e) = state.config.save().await {
            error!("periodic config save failed: {:#}", e);
        }
    }
}

fn respond(outcome: crate::router::RouteOutcome) -> web::HttpResponse {
    if outcome.success {
        web::HttpResponse::Ok().json(&outcome)
    } else {
        web::HttpResponse::InternalServerError().json(&outcome)
    }
}

/// Shapeless ingress: the event kind is inferred from the payload shape,
/// defaulting to a message insertion.
#[web::post("/filter")]
pub async fn receive(
    payload: web::types::Json<Value>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    let payload = payload.into_inner();
    count_event(&state).await;

    let kind = EventRouter::detect_event_type(&payload)
        .unwrap_or(EventKind::MessagesUpsert)
        .to_string();

    let outcome = state
        .router
        .route_event(&kind, &payload, EventOrigin::Webhook)
        .await;

    Ok(respond(outcome))
}

#[derive(Debug, Deserialize)]
pub struct EventPath {
    pub event: String,
}

/// Named ingress: `POST /filter/messages-upsert` routes as
/// `MESSAGES_UPSERT`. Unknown names still land in the generic handler.
#[web::post("/filter/{event}")]
pub async fn receive_named(
    path: web::types::Path<EventPath>,
    payload: web::types::Json<Value>,
    state: web::types::State<AppState>,
) -> Result<impl web::Responder, web::Error> {
    let payload = payload.into_inner();
    count_event(&state).await;

    let kind = normalize_event_name(&path.event);
    let outcome = state
        .router
        .route_event(&kind, &payload, EventOrigin::Webhook)
        .await;

    Ok(respond(outcome))
}

/// Liveness probe; also handy as an uptime target.
#[web::get("/health")]
pub async fn health() -> impl web::Responder {
    web::HttpResponse::Ok().json(&serde_json::json!({
        "status": "ok",
        "instance": config::APP_CONFIG.instance_name,
    }))
}

pub fn ingress(cfg: &mut web::ServiceConfig) {
    cfg.service((receive, receive_named, health));
}
