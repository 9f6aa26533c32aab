//! Message-event handling: sender classification, authorization against
//! the configured lists, history recording, the mention hook and the
//! forward decision. Errors never escape a handler; every path folds
//! into a typed result plus stats side effects.

use crate::adapter::resolver::LidResolver;
use crate::identity::{self, ParsedSource, SourceType};
use crate::models::event::{EventAction, StoredEvent};
use crate::models::message::{self, NormalizedMessage};
use crate::router::RouterContext;
use crate::services::dispatcher::{ForwardError, ForwardMeta};
use crate::services::mention::{self, MentionResult};
use crate::services::alerts::Alert;
use crate::store::stats::{AlertLevel, CounterField};
use crate::{consts, utils};
use log::{debug, warn};
use serde_json::{Value, json};

#[derive(Debug, Clone)]
struct Authorization {
    allowed: bool,
    entity_type: Option<String>,
    entity_name: Option<String>,
    reason: Option<String>,
}

impl Authorization {
    fn denied(reason: &str) -> Self {
        Self {
            allowed: false,
            entity_type: None,
            entity_name: None,
            reason: Some(reason.to_string()),
        }
    }

    fn granted(entity_type: &str, entity_name: &str) -> Self {
        Self {
            allowed: true,
            entity_type: Some(entity_type.to_string()),
            entity_name: Some(entity_name.to_string()),
            reason: None,
        }
    }
}

/// Groups match by normalized id, contacts by normalized phone or linked
/// identifier; the session owner's own number is always allowed.
fn authorize(ctx: &RouterContext, parsed: &ParsedSource) -> Authorization {
    if let Some(self_phone) = ctx.adapter_state.self_phone() {
        if identity::normalize_phone(&parsed.source_id) == self_phone {
            return Authorization::granted(consts::SELF_ENTITY_TYPE, "Self");
        }
    }

    match parsed.source_type {
        SourceType::Group => match ctx.config.find_group(&parsed.source_id) {
            Some(group) => Authorization::granted(&group.entity_type, &group.name),
            None => Authorization::denied("not_in_allowed_groups"),
        },
        SourceType::Contact => {
            match ctx
                .config
                .find_contact(&identity::normalize_phone(&parsed.source_id))
            {
                Some(contact) => Authorization::granted(&contact.entity_type, &contact.name),
                None => Authorization::denied("not_in_allowed_contacts"),
            }
        }
        SourceType::Status | SourceType::Unknown => Authorization::denied("unknown_source"),
    }
}

/// Applies linked-identifier resolution to the parsed source (contact
/// events) or to the sender participant (group events).
fn resolve_linked(ctx: &RouterContext, data: &Value, parsed: &mut ParsedSource) -> Option<String> {
    let resolver = LidResolver::new(ctx.adapter_state.clone(), ctx.config.clone());
    let hint = message::sender_pn(data);

    if parsed.source_type == SourceType::Contact && parsed.is_linked_identifier {
        let lid = identity::normalize_phone(&parsed.source_id);
        parsed.source_id = resolver.resolve(&lid, hint);
    }

    let mut sender = message::participant(data).map(str::to_string);
    if parsed.source_type == SourceType::Group {
        if let Some(participant) = &sender {
            if participant.contains("@lid") {
                let lid = identity::normalize_phone(participant);
                sender = Some(resolver.resolve(&lid, hint));
            }
        }
    }

    sender
}

fn record(
    event_kind: &str,
    action: EventAction,
    parsed: &ParsedSource,
    sender_name: &str,
    body: &str,
    entity_type: Option<&str>,
    reason: Option<&str>,
    error: Option<&str>,
) -> StoredEvent {
    let mut record = StoredEvent::new(event_kind, action);
    record.source = Some(parsed.source_id.clone());
    record.source_type = Some(parsed.source_type.to_string());
    record.sender_name = (!sender_name.is_empty()).then(|| sender_name.to_string());
    record.entity_type = entity_type.map(str::to_string);
    record.message_preview = utils::message_preview(body);
    record.message_body = body.to_string();
    record.reason = reason.map(str::to_string);
    record.error = error.map(str::to_string);
    record
}

fn filtered(
    ctx: &RouterContext,
    event_kind: &str,
    parsed: &ParsedSource,
    sender_name: &str,
    body: &str,
    reason: &str,
) -> Value {
    ctx.stats.increment(event_kind, CounterField::Filtered);
    ctx.stats.log_event(record(
        event_kind,
        EventAction::Filtered,
        parsed,
        sender_name,
        body,
        None,
        Some(reason),
        None,
    ));

    json!({"action": "filtered", "reason": reason})
}

/// POSTs the original event to the mention destination. Independent of
/// the regular routing; returns whether the destination accepted it.
async fn post_mention(ctx: &RouterContext, payload: &Value, result: &MentionResult) -> bool {
    let Some(url) = &ctx.options.mention_webhook_url else {
        return false;
    };

    let method = result
        .method
        .map(|m| m.to_string())
        .unwrap_or_default();

    let mut headers = vec![("X-Mention-Method".to_string(), method)];
    if !ctx.options.mention_webhook_token.is_empty() {
        headers.push((
            "Authorization".to_string(),
            format!("Bearer {}", ctx.options.mention_webhook_token),
        ));
    }

    let body = json!({
        "timestamp": utils::now_iso(),
        "mention": result,
        "event": payload,
    });

    match ctx
        .poster
        .post_json(url.clone(), headers, body, consts::MENTION_WEBHOOK_TIMEOUT_SECS)
        .await
    {
        Ok(response) if response.status < 400 => true,
        Ok(response) => {
            warn!("mention destination returned status {}", response.status);
            false
        }
        Err(e) => {
            warn!("mention delivery failed: {}", e);
            false
        }
    }
}

/// Terminal forwarding step shared by inserts, outgoing messages and
/// updates. "Allowed but nowhere to send" is a successful outcome with an
/// explicit reason so coverage gaps stay observable.
async fn forward_allowed(
    ctx: &RouterContext,
    payload: &Value,
    parsed: &ParsedSource,
    auth: &Authorization,
    event_kind: &str,
    sender_name: &str,
    body: &str,
) -> Value {
    let entity_type = auth.entity_type.as_deref();

    if !ctx.dispatcher.has_destination_for(entity_type) {
        ctx.stats.increment(event_kind, CounterField::Forwarded);
        ctx.stats.log_event(record(
            event_kind,
            EventAction::Forwarded,
            parsed,
            sender_name,
            body,
            entity_type,
            Some("no_destination_for_type"),
            None,
        ));
        return json!({"action": "forwarded", "reason": "no_destination_for_type"});
    }

    let meta = ForwardMeta {
        source_id: parsed.source_id.clone(),
        source_type: parsed.source_type.to_string(),
        entity_type: entity_type.map(str::to_string),
        event_kind: event_kind.to_string(),
    };

    match ctx.dispatcher.forward(payload, &meta).await {
        Ok(outcome) => {
            ctx.stats.increment(event_kind, CounterField::Forwarded);
            ctx.stats.log_event(record(
                event_kind,
                EventAction::Forwarded,
                parsed,
                sender_name,
                body,
                entity_type,
                None,
                None,
            ));
            json!({
                "action": "forwarded",
                "destination": outcome.destination,
                "attempt": outcome.attempt,
            })
        }
        Err(e) => {
            ctx.stats.increment(event_kind, CounterField::Failed);
            ctx.stats.log_event(record(
                event_kind,
                EventAction::Failed,
                parsed,
                sender_name,
                body,
                entity_type,
                None,
                Some(&e.to_string()),
            ));

            let failures = match &e {
                ForwardError::Rejected {
                    consecutive_failures,
                    ..
                }
                | ForwardError::Exhausted {
                    consecutive_failures,
                    ..
                } => *consecutive_failures,
                ForwardError::NoDestination => 0,
            };

            if failures == consts::CONSECUTIVE_FAILURES_ALERT_THRESHOLD {
                ctx.alerts
                    .send(
                        Alert::new(
                            AlertLevel::Warning,
                            "WEBHOOK_FAILING",
                            "Webhook destination failing",
                            "A destination rejected several deliveries in a row.",
                        )
                        .detail("failures", failures.to_string())
                        .detail("error", e.to_string()),
                    )
                    .await;
            }

            json!({"action": "failed", "error": e.to_string()})
        }
    }
}

/// The decision pipeline for inbound message events.
pub async fn handle_message_upsert(ctx: &RouterContext, payload: &Value) -> anyhow::Result<Value> {
    let event_kind = "MESSAGES_UPSERT";
    let data = message::event_data(payload);
    let mut parsed = identity::parse_remote_address(message::remote_jid(data));

    if parsed.source_type == SourceType::Status {
        ctx.stats.increment(event_kind, CounterField::Filtered);
        return Ok(json!({"action": "filtered", "reason": "status_broadcast"}));
    }

    let participant = resolve_linked(ctx, data, &mut parsed);

    let content = message::unwrap_content(message::message_content(data));
    if message::is_protocol_only(content) {
        debug!("skipping protocol-only envelope from {}", parsed.source_id);
        return Ok(json!({"action": "logged", "reason": "protocol_only"}));
    }

    let sender_name = message::push_name(data);
    let body = message::message_body(content);

    let auth = authorize(ctx, &parsed);
    if !auth.allowed {
        let reason = auth.reason.as_deref().unwrap_or("not_allowed");
        return Ok(filtered(ctx, event_kind, &parsed, sender_name, &body, reason));
    }

    ctx.messages
        .store(&parsed.source_id, NormalizedMessage::from_event(data, content));

    if parsed.source_type == SourceType::Group && ctx.options.mention_enabled {
        if let Some(self_phone) = ctx.adapter_state.self_phone() {
            let result = mention::detect(
                content,
                &self_phone,
                &ctx.options.mention_keywords,
                &ctx.messages,
            );

            if result.is_mentioned {
                let delivered = post_mention(ctx, payload, &result).await;

                if delivered {
                    ctx.stats.increment(event_kind, CounterField::Forwarded);
                    ctx.stats.log_event(record(
                        event_kind,
                        EventAction::MentionForwarded,
                        &parsed,
                        sender_name,
                        &body,
                        auth.entity_type.as_deref(),
                        result.method.map(|m| m.to_string()).as_deref(),
                        None,
                    ));
                } else {
                    ctx.stats.increment(event_kind, CounterField::Failed);
                    ctx.stats.log_event(record(
                        event_kind,
                        EventAction::Failed,
                        &parsed,
                        sender_name,
                        &body,
                        auth.entity_type.as_deref(),
                        Some("mention_delivery_failed"),
                        None,
                    ));
                }

                if ctx.options.mention_only {
                    return Ok(json!({
                        "action": "mention_forwarded",
                        "delivered": delivered,
                        "mention": result,
                    }));
                }
            }
        }
    }

    let mut outcome = forward_allowed(
        ctx,
        payload,
        &parsed,
        &auth,
        event_kind,
        sender_name,
        &body,
    )
    .await;

    if let (Some(participant), Some(obj)) = (participant, outcome.as_object_mut()) {
        obj.insert("participant".to_string(), Value::String(participant));
    }

    Ok(outcome)
}

/// Messages this instance sent: authorized against the recipient, kept in
/// history as own messages, forwarded only when the flag allows it.
pub async fn handle_outgoing(ctx: &RouterContext, payload: &Value) -> anyhow::Result<Value> {
    let event_kind = "SEND_MESSAGE";
    let data = message::event_data(payload);
    let mut parsed = identity::parse_remote_address(message::remote_jid(data));

    if parsed.source_type == SourceType::Status {
        ctx.stats.increment(event_kind, CounterField::Filtered);
        return Ok(json!({"action": "filtered", "reason": "status_broadcast"}));
    }

    let _ = resolve_linked(ctx, data, &mut parsed);

    let content = message::unwrap_content(message::message_content(data));
    let sender_name = message::push_name(data);
    let body = message::message_body(content);

    let auth = authorize(ctx, &parsed);
    if !auth.allowed {
        let reason = auth.reason.as_deref().unwrap_or("not_allowed");
        return Ok(filtered(ctx, event_kind, &parsed, sender_name, &body, reason));
    }

    let mut normalized = NormalizedMessage::from_event(data, content);
    normalized.from_self = true;
    ctx.messages.store(&parsed.source_id, normalized);

    if !ctx.options.forward_outgoing {
        ctx.stats.log_event(record(
            event_kind,
            EventAction::Stored,
            &parsed,
            sender_name,
            &body,
            auth.entity_type.as_deref(),
            None,
            None,
        ));
        return Ok(json!({"action": "stored"}));
    }

    Ok(forward_allowed(ctx, payload, &parsed, &auth, event_kind, sender_name, &body).await)
}

/// Edits are forwarded only behind their runtime flag; otherwise the
/// event is just visible in the feed.
pub async fn handle_message_update(ctx: &RouterContext, payload: &Value) -> anyhow::Result<Value> {
    let event_kind = "MESSAGES_UPDATE";

    if !ctx.options.forward_message_updates {
        ctx.stats
            .log_event(StoredEvent::new(event_kind, EventAction::Logged));
        return Ok(json!({"action": "logged"}));
    }

    let data = message::event_data(payload);
    let mut parsed = identity::parse_remote_address(message::remote_jid(data));

    if parsed.source_type == SourceType::Status {
        ctx.stats.increment(event_kind, CounterField::Filtered);
        return Ok(json!({"action": "filtered", "reason": "status_broadcast"}));
    }

    let _ = resolve_linked(ctx, data, &mut parsed);

    let auth = authorize(ctx, &parsed);
    if !auth.allowed {
        let reason = auth.reason.as_deref().unwrap_or("not_allowed");
        return Ok(filtered(ctx, event_kind, &parsed, "", "", reason));
    }

    Ok(forward_allowed(ctx, payload, &parsed, &auth, event_kind, "", "").await)
}

/// Events that are only counted and made visible in the feed.
pub fn log_only(ctx: &RouterContext, event_kind: &str) -> anyhow::Result<Value> {
    ctx.stats
        .log_event(StoredEvent::new(event_kind, EventAction::Logged));
    Ok(json!({"action": "logged"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterState;
    use crate::models::contact::{Contact, Group};
    use crate::router::connection::ConnectionTracker;
    use crate::router::RouterOptions;
    use crate::services::alerts::AlertSink;
    use crate::services::dispatcher::WebhookDispatcher;
    use crate::services::{ImplHttpPoster, MockHttpPoster, PostResponse};
    use crate::store::config::ConfigStore;
    use crate::store::messages::MessageStore;
    use crate::store::stats::StatsStore;
    use std::sync::Arc;

    fn ok_response(status: u16) -> PostResponse {
        PostResponse {
            status,
            body: String::new(),
        }
    }

    fn build_ctx(
        poster: MockHttpPoster,
        default_url: Option<&str>,
        options: RouterOptions,
    ) -> RouterContext {
        let base = std::env::temp_dir().join(format!("wa-gw-handler-{}", uuid::Uuid::new_v4()));
        let config = Arc::new(ConfigStore::new(
            base.join("contacts.json"),
            default_url.map(str::to_string),
        ));
        let stats = Arc::new(StatsStore::new(base.join("stats.json"), 50));
        let messages = Arc::new(MessageStore::new(base.join("messages.json"), 100, 5000));
        let poster: ImplHttpPoster = Arc::new(poster);
        let dispatcher = Arc::new(WebhookDispatcher::new(
            poster.clone(),
            config.clone(),
            None,
            "gw".to_string(),
        ));
        let alerts = Arc::new(AlertSink::new(
            poster.clone(),
            stats.clone(),
            None,
            None,
            "gw".to_string(),
        ));
        let connection = Arc::new(ConnectionTracker::new(alerts.clone()));

        RouterContext {
            config,
            stats,
            messages,
            dispatcher,
            alerts,
            connection,
            adapter_state: Arc::new(AdapterState::new()),
            poster,
            options,
        }
    }

    fn message_event(remote: &str, text: &str) -> Value {
        json!({
            "key": {"remoteJid": remote, "id": "MSG-1", "fromMe": false},
            "pushName": "Tester",
            "messageTimestamp": 1700000000,
            "message": {"conversation": text}
        })
    }

    fn vip_contact(phone: &str) -> Contact {
        Contact {
            phone: phone.to_string(),
            name: "Dana Levi".to_string(),
            entity_type: "VIP".to_string(),
            linked_identifier: None,
        }
    }

    #[tokio::test]
    async fn unknown_contact_is_filtered_without_outbound_http() {
        // no expectations: any POST panics the mock
        let ctx = build_ctx(
            MockHttpPoster::new(),
            Some("https://ex.example/w"),
            RouterOptions::default(),
        );

        let payload = message_event("972500000001@s.whatsapp.net", "hi");
        let result = handle_message_upsert(&ctx, &payload).await.unwrap();

        assert_eq!(result["action"], json!("filtered"));
        assert_eq!(ctx.stats.counters_for("MESSAGES_UPSERT").filtered, 1);

        let (recent, _) = ctx.stats.recent(10, None, 0);
        assert_eq!(recent[0].reason.as_deref(), Some("not_in_allowed_contacts"));
        assert_eq!(recent[0].sender_name.as_deref(), Some("Tester"));
        assert_eq!(recent[0].message_body, "hi");
    }

    #[tokio::test]
    async fn allowed_contact_is_forwarded_with_source_headers() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|url, headers, _, _| {
                url == "https://ex.example/w"
                    && headers
                        .iter()
                        .any(|(n, v)| n == consts::HEADER_SOURCE_ID && v == "972500000002")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let ctx = build_ctx(poster, Some("https://ex.example/w"), RouterOptions::default());
        ctx.config
            .add_contact(vip_contact("972500000002"))
            .await
            .unwrap();

        let payload = message_event("972500000002@s.whatsapp.net", "hello");
        let result = handle_message_upsert(&ctx, &payload).await.unwrap();

        assert_eq!(result["action"], json!("forwarded"));
        assert_eq!(ctx.stats.counters_for("MESSAGES_UPSERT").forwarded, 1);
        let (recent, _) = ctx.stats.recent(10, None, 0);
        assert_eq!(recent[0].action, EventAction::Forwarded);
        assert_eq!(recent[0].entity_type.as_deref(), Some("VIP"));
    }

    #[tokio::test]
    async fn type_route_wins_over_default() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|url, _, _, _| url == "https://ex.example/vip")
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let ctx = build_ctx(poster, Some("https://ex.example/d"), RouterOptions::default());
        ctx.config
            .add_contact(vip_contact("972500000003"))
            .await
            .unwrap();
        ctx.config
            .set_type_webhooks(std::collections::HashMap::from([(
                "VIP".to_string(),
                "https://ex.example/vip".to_string(),
            )]))
            .await
            .unwrap();

        let payload = message_event("972500000003@s.whatsapp.net", "to vip");
        let result = handle_message_upsert(&ctx, &payload).await.unwrap();
        assert_eq!(result["destination"], json!("https://ex.example/vip"));
    }

    #[tokio::test]
    async fn allowed_without_any_destination_is_explicit_success() {
        let ctx = build_ctx(MockHttpPoster::new(), None, RouterOptions::default());
        let mut contact = vip_contact("972500000004");
        contact.entity_type = "TEAM".to_string();
        ctx.config.add_contact(contact).await.unwrap();

        let payload = message_event("972500000004@s.whatsapp.net", "hi team");
        let result = handle_message_upsert(&ctx, &payload).await.unwrap();

        assert_eq!(result["action"], json!("forwarded"));
        assert_eq!(result["reason"], json!("no_destination_for_type"));
        assert_eq!(ctx.stats.counters_for("MESSAGES_UPSERT").forwarded, 1);

        let (recent, _) = ctx.stats.recent(10, None, 0);
        assert_eq!(recent[0].reason.as_deref(), Some("no_destination_for_type"));
        assert_eq!(recent[0].action, EventAction::Forwarded);
    }

    #[tokio::test]
    async fn group_matches_with_and_without_suffix() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|_, headers, _, _| {
                headers
                    .iter()
                    .any(|(n, v)| n == consts::HEADER_SOURCE_TYPE && v == "group")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let ctx = build_ctx(poster, Some("https://ex.example/w"), RouterOptions::default());
        ctx.config
            .add_group(Group {
                group_id: "120363000000000000".to_string(),
                name: "Ops team".to_string(),
                entity_type: "WORK".to_string(),
            })
            .await
            .unwrap();

        let payload = message_event("120363000000000000@g.us", "standup?");
        let result = handle_message_upsert(&ctx, &payload).await.unwrap();
        assert_eq!(result["action"], json!("forwarded"));
    }

    #[tokio::test]
    async fn self_phone_is_authorized_as_self_entity() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|_, headers, _, _| {
                headers
                    .iter()
                    .any(|(n, v)| n == consts::HEADER_ENTITY_TYPE && v == consts::SELF_ENTITY_TYPE)
            })
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let ctx = build_ctx(poster, Some("https://ex.example/w"), RouterOptions::default());
        ctx.adapter_state.set_self_phone("972500000099");

        let payload = message_event("972500000099@s.whatsapp.net", "note to self");
        let result = handle_message_upsert(&ctx, &payload).await.unwrap();
        assert_eq!(result["action"], json!("forwarded"));
    }

    #[tokio::test]
    async fn linked_identifier_resolves_before_authorization() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|_, headers, _, _| {
                headers
                    .iter()
                    .any(|(n, v)| n == consts::HEADER_SOURCE_ID && v == "972500000002")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let ctx = build_ctx(poster, Some("https://ex.example/w"), RouterOptions::default());
        ctx.config
            .add_contact(vip_contact("972500000002"))
            .await
            .unwrap();
        ctx.adapter_state.learn_lid("84455217701112", "972500000002");

        let payload = message_event("84455217701112@lid", "via lid");
        let result = handle_message_upsert(&ctx, &payload).await.unwrap();
        assert_eq!(result["action"], json!("forwarded"));
    }

    #[tokio::test]
    async fn mention_only_posts_to_mention_destination_alone() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|url, headers, body, _| {
                url == "https://ex.example/mention"
                    && headers
                        .iter()
                        .any(|(n, v)| n == "Authorization" && v == "Bearer sekrit")
                    && body["event"]["key"]["remoteJid"] == json!("120363000000000000@g.us")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let options = RouterOptions {
            mention_enabled: true,
            mention_webhook_url: Some("https://ex.example/mention".to_string()),
            mention_webhook_token: "sekrit".to_string(),
            mention_keywords: vec!["david".to_string()],
            mention_only: true,
            ..RouterOptions::default()
        };

        let ctx = build_ctx(poster, Some("https://ex.example/w"), options);
        ctx.adapter_state.set_self_phone("972500000099");
        ctx.config
            .add_group(Group {
                group_id: "120363000000000000".to_string(),
                name: "Ops team".to_string(),
                entity_type: "WORK".to_string(),
            })
            .await
            .unwrap();

        let payload = message_event("120363000000000000@g.us", "hello david");
        let result = handle_message_upsert(&ctx, &payload).await.unwrap();

        assert_eq!(result["action"], json!("mention_forwarded"));
        assert_eq!(result["delivered"], json!(true));

        let (recent, _) = ctx.stats.recent(10, None, 0);
        assert_eq!(recent[0].action, EventAction::MentionForwarded);
    }

    #[tokio::test]
    async fn status_broadcast_is_filtered_early() {
        let ctx = build_ctx(
            MockHttpPoster::new(),
            Some("https://ex.example/w"),
            RouterOptions::default(),
        );

        let payload = message_event("status@broadcast", "story");
        let result = handle_message_upsert(&ctx, &payload).await.unwrap();
        assert_eq!(result["reason"], json!("status_broadcast"));
        assert_eq!(ctx.stats.counters_for("MESSAGES_UPSERT").filtered, 1);
    }

    #[tokio::test]
    async fn protocol_only_content_is_skipped() {
        let ctx = build_ctx(
            MockHttpPoster::new(),
            Some("https://ex.example/w"),
            RouterOptions::default(),
        );
        ctx.config
            .add_contact(vip_contact("972500000002"))
            .await
            .unwrap();

        let payload = json!({
            "key": {"remoteJid": "972500000002@s.whatsapp.net", "id": "P1", "fromMe": false},
            "message": {"senderKeyDistributionMessage": {"groupId": "x"}}
        });
        let result = handle_message_upsert(&ctx, &payload).await.unwrap();
        assert_eq!(result["reason"], json!("protocol_only"));
        assert_eq!(ctx.stats.counters_for("MESSAGES_UPSERT").filtered, 0);
    }

    #[tokio::test]
    async fn outgoing_is_stored_but_not_forwarded_without_flag() {
        let ctx = build_ctx(
            MockHttpPoster::new(),
            Some("https://ex.example/w"),
            RouterOptions::default(),
        );
        ctx.config
            .add_contact(vip_contact("972500000002"))
            .await
            .unwrap();

        let payload = json!({
            "key": {"remoteJid": "972500000002@s.whatsapp.net", "id": "OUT-7", "fromMe": true},
            "message": {"conversation": "reply from us"}
        });
        let result = handle_outgoing(&ctx, &payload).await.unwrap();

        assert_eq!(result["action"], json!("stored"));
        assert!(ctx.messages.is_our_message("OUT-7"));
        let (history, _) = ctx.messages.get("972500000002", 10, 0);
        assert!(history[0].from_self);
    }

    #[tokio::test]
    async fn outgoing_forwards_when_flag_enabled() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .withf(|_, headers, _, _| {
                headers
                    .iter()
                    .any(|(n, v)| n == consts::HEADER_EVENT_TYPE && v == "SEND_MESSAGE")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let options = RouterOptions {
            forward_outgoing: true,
            ..RouterOptions::default()
        };
        let ctx = build_ctx(poster, Some("https://ex.example/w"), options);
        ctx.config
            .add_contact(vip_contact("972500000002"))
            .await
            .unwrap();

        let payload = json!({
            "key": {"remoteJid": "972500000002@s.whatsapp.net", "id": "OUT-8", "fromMe": true},
            "message": {"conversation": "fwd me"}
        });
        let result = handle_outgoing(&ctx, &payload).await.unwrap();
        assert_eq!(result["action"], json!("forwarded"));
    }

    #[tokio::test]
    async fn updates_are_logged_unless_enabled() {
        let ctx = build_ctx(
            MockHttpPoster::new(),
            Some("https://ex.example/w"),
            RouterOptions::default(),
        );

        let payload = json!({"key": {"remoteJid": "972500000002@s.whatsapp.net", "id": "U1"}, "update": {"status": 4}});
        let result = handle_message_update(&ctx, &payload).await.unwrap();
        assert_eq!(result["action"], json!("logged"));
    }

    #[tokio::test]
    async fn repeated_rejections_raise_a_warning_alert() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .times(3)
            .returning(|_, _, _, _| Ok(ok_response(403)));

        let ctx = build_ctx(poster, Some("https://ex.example/w"), RouterOptions::default());
        ctx.config
            .add_contact(vip_contact("972500000002"))
            .await
            .unwrap();

        let payload = message_event("972500000002@s.whatsapp.net", "hi");
        for _ in 0..3 {
            let result = handle_message_upsert(&ctx, &payload).await.unwrap();
            assert_eq!(result["action"], json!("failed"));
        }

        let alerts = ctx.stats.snapshot().alerts;
        assert_eq!(alerts.by_level.warning, 1);
        assert_eq!(ctx.stats.counters_for("MESSAGES_UPSERT").failed, 3);
    }

    #[tokio::test]
    async fn wrapped_view_once_image_is_classified_and_stored() {
        let mut poster = MockHttpPoster::new();
        poster
            .expect_post_json()
            .times(1)
            .returning(|_, _, _, _| Ok(ok_response(200)));

        let ctx = build_ctx(poster, Some("https://ex.example/w"), RouterOptions::default());
        ctx.config
            .add_contact(vip_contact("972500000002"))
            .await
            .unwrap();

        let payload = json!({
            "key": {"remoteJid": "972500000002@s.whatsapp.net", "id": "IMG1", "fromMe": false},
            "message": {"viewOnceMessage": {"message": {
                "imageMessage": {"caption": "secret", "jpegThumbnail": "QUJD"}
            }}}
        });

        handle_message_upsert(&ctx, &payload).await.unwrap();

        let (history, _) = ctx.messages.get("972500000002", 10, 0);
        assert_eq!(history[0].msg_type, "image");
        assert!(history[0].has_media);
        assert_eq!(history[0].body, "secret");
        assert!(history[0].thumbnail.as_deref().unwrap().starts_with("data:image/jpeg"));
    }
}
