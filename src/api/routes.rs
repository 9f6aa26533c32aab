//! Admin route configuration.
//!
//! Everything lives under `/api` and is gated per-handler by
//! [`super::guard::require_admin`].

use ntex::web;

/// # Routes
/// - `GET/POST /api/contacts`, `PUT/DELETE /api/contacts/{phone}`
/// - `GET/POST /api/groups`, `PUT/DELETE /api/groups/{group_id}`
/// - `GET/PUT /api/webhooks`, `PUT /api/webhooks/types`, `PUT /api/types`
/// - `POST /api/webhooks/test`, `GET /api/webhooks/health`
/// - `GET /api/stats`, `GET /api/events`
/// - `GET /api/messages`, `GET/DELETE /api/messages/{source_id}`, `GET /api/media/{handle}`
/// - `GET /api/connection`, `GET /api/qr`, `POST /api/send`, `POST /api/send/media`
pub fn admin(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service((
                super::contacts::list_contacts,
                super::contacts::add_contact,
                super::contacts::update_contact,
                super::contacts::delete_contact,
                super::groups::list_groups,
                super::groups::add_group,
                super::groups::update_group,
                super::groups::delete_group,
            ))
            .service((
                super::settings::get_webhooks,
                super::settings::set_default_webhook,
                super::settings::set_type_webhooks,
                super::settings::set_custom_types,
                super::settings::test_webhook,
                super::settings::webhook_health,
            ))
            .service((
                super::stats::get_stats,
                super::stats::recent_events,
                super::messages::list_sources,
                super::messages::get_history,
                super::messages::delete_history,
                super::messages::get_media,
            ))
            .service((
                super::connection::get_connection,
                super::connection::get_qr,
                super::connection::send_text,
                super::connection::send_media,
            )),
    );
}
