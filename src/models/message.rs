//! Read-side helpers over the raw message envelope.
//!
//! Upstream payloads are heterogeneous JSON; the exact inbound body must be
//! re-POSTed unchanged, so events travel the pipeline as `serde_json::Value`
//! and this module is the single place that knows the field layout.

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wrappers whose `message` field nests the real content.
const CONTENT_WRAPPERS: [&str; 4] = [
    "ephemeralMessage",
    "viewOnceMessage",
    "viewOnceMessageV2",
    "documentWithCaptionMessage",
];

/// Keys that carry no user payload on their own.
const PROTOCOL_KEYS: [&str; 3] = [
    "protocolMessage",
    "senderKeyDistributionMessage",
    "messageContextInfo",
];

/// Message events may arrive wrapped in a `data` field.
pub fn event_data(payload: &Value) -> &Value {
    match payload.get("data") {
        Some(data) if data.is_object() => data,
        _ => payload,
    }
}

fn key_field<'a>(data: &'a Value, field: &str) -> Option<&'a str> {
    data.get("key")?.get(field)?.as_str()
}

pub fn remote_jid(data: &Value) -> &str {
    key_field(data, "remoteJid").unwrap_or("")
}

pub fn message_id(data: &Value) -> &str {
    key_field(data, "id").unwrap_or("")
}

pub fn from_me(data: &Value) -> bool {
    data.get("key")
        .and_then(|k| k.get("fromMe"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub fn participant(data: &Value) -> Option<&str> {
    key_field(data, "participant").or_else(|| data.get("participant")?.as_str())
}

/// Resolved-phone hint some upstreams attach next to a linked identifier.
pub fn sender_pn(data: &Value) -> Option<&str> {
    key_field(data, "senderPn").or_else(|| data.get("senderPn")?.as_str())
}

pub fn push_name(data: &Value) -> &str {
    data.get("pushName").and_then(Value::as_str).unwrap_or("")
}

/// Epoch seconds (number or numeric string) to an ISO timestamp; falls
/// back to the current time when absent or unparsable.
pub fn message_timestamp_iso(data: &Value) -> String {
    let secs = match data.get("messageTimestamp") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    };

    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(crate::utils::now_iso)
}

pub fn message_content(data: &Value) -> &Value {
    data.get("message").unwrap_or(&Value::Null)
}

/// Peels ephemeral/view-once/document-with-caption wrappers. Depth is
/// bounded; the loop stops as soon as no wrapper key is present.
pub fn unwrap_content(content: &Value) -> &Value {
    let mut current = content;

    for _ in 0..CONTENT_WRAPPERS.len() {
        let Some(inner) = CONTENT_WRAPPERS
            .iter()
            .find_map(|w| current.get(w)?.get("message"))
        else {
            break;
        };
        current = inner;
    }

    current
}

/// True when the unwrapped content carries nothing but key-distribution
/// protocol plumbing.
pub fn is_protocol_only(content: &Value) -> bool {
    let Some(map) = content.as_object() else {
        return false;
    };

    !map.is_empty() && map.keys().all(|k| PROTOCOL_KEYS.contains(&k.as_str()))
}

/// Classification over the content union.
pub fn message_type(content: &Value) -> &'static str {
    let Some(map) = content.as_object() else {
        return "unknown";
    };

    if map.contains_key("conversation") || map.contains_key("extendedTextMessage") {
        "text"
    } else if map.contains_key("imageMessage") {
        "image"
    } else if map.contains_key("videoMessage") {
        "video"
    } else if map.contains_key("audioMessage") {
        "audio"
    } else if map.contains_key("documentMessage") {
        "document"
    } else if map.contains_key("stickerMessage") {
        "sticker"
    } else if map.contains_key("contactMessage") || map.contains_key("contactsArrayMessage") {
        "contact"
    } else if map.contains_key("locationMessage") {
        "location"
    } else if map.contains_key("reactionMessage") {
        "reaction"
    } else {
        "unknown"
    }
}

pub fn has_media(content: &Value) -> bool {
    matches!(
        message_type(content),
        "image" | "video" | "audio" | "document" | "sticker"
    )
}

pub fn media_type(content: &Value) -> Option<String> {
    has_media(content).then(|| message_type(content).to_string())
}

/// Text a human would consider the body of the message.
pub fn message_body(content: &Value) -> String {
    if let Some(text) = content.get("conversation").and_then(Value::as_str) {
        return text.to_string();
    }
    if let Some(text) = content
        .get("extendedTextMessage")
        .and_then(|m| m.get("text"))
        .and_then(Value::as_str)
    {
        return text.to_string();
    }

    for media in ["imageMessage", "videoMessage", "documentMessage"] {
        if let Some(caption) = content
            .get(media)
            .and_then(|m| m.get("caption"))
            .and_then(Value::as_str)
        {
            return caption.to_string();
        }
    }

    if let Some(text) = content
        .get("reactionMessage")
        .and_then(|m| m.get("text"))
        .and_then(Value::as_str)
    {
        return text.to_string();
    }

    if let Some(location) = content.get("locationMessage") {
        let name = location.get("name").and_then(Value::as_str).unwrap_or("");
        let address = location
            .get("address")
            .and_then(Value::as_str)
            .unwrap_or("");
        if !name.is_empty() || !address.is_empty() {
            return format!("{} {}", name, address).trim().to_string();
        }
    }

    if let Some(name) = content
        .get("contactMessage")
        .and_then(|m| m.get("displayName"))
        .and_then(Value::as_str)
    {
        return name.to_string();
    }

    String::new()
}

/// `contextInfo` either sits on the content root or inside the typed
/// sub-message; first hit wins.
pub fn context_info(content: &Value) -> Option<&Value> {
    if let Some(ctx) = content.get("contextInfo") {
        return Some(ctx);
    }

    content
        .as_object()?
        .values()
        .find_map(|sub| sub.get("contextInfo"))
}

pub fn mentioned_jids(context: &Value) -> Vec<String> {
    context
        .get("mentionedJid")
        .and_then(Value::as_array)
        .map(|jids| {
            jids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn stanza_id(context: &Value) -> Option<&str> {
    context.get("stanzaId")?.as_str()
}

pub fn quoted_body(content: &Value) -> Option<String> {
    let quoted = context_info(content)?.get("quotedMessage")?;
    let body = message_body(unwrap_content(quoted));
    (!body.is_empty()).then_some(body)
}

/// Inline JPEG preview bytes some media messages carry, as a data URI.
pub fn inline_thumbnail(content: &Value) -> Option<String> {
    content.as_object()?.values().find_map(|sub| {
        let thumb = sub.get("jpegThumbnail")?.as_str()?;
        (!thumb.is_empty()).then(|| format!("data:image/jpeg;base64,{}", thumb))
    })
}

/// The storable shape of a message after the handler has decided it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedMessage {
    pub id: String,
    pub body: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(rename = "hasMedia")]
    pub has_media: bool,
    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none", default)]
    pub media_type: Option<String>,
    #[serde(rename = "mediaHandle", skip_serializing_if = "Option::is_none", default)]
    pub media_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thumbnail: Option<String>,
    #[serde(rename = "fromSelf")]
    pub from_self: bool,
    pub timestamp: String,
    #[serde(rename = "quotedBody", skip_serializing_if = "Option::is_none", default)]
    pub quoted_body: Option<String>,
    #[serde(rename = "storedAt", default)]
    pub stored_at: String,
}

impl NormalizedMessage {
    /// Derives the normalized artifact from an event's `data` and its
    /// already-unwrapped content.
    pub fn from_event(data: &Value, content: &Value) -> Self {
        Self {
            id: message_id(data).to_string(),
            body: message_body(content),
            msg_type: message_type(content).to_string(),
            has_media: has_media(content),
            media_type: media_type(content),
            media_handle: None,
            thumbnail: inline_thumbnail(content),
            from_self: from_me(data),
            timestamp: message_timestamp_iso(data),
            quoted_body: quoted_body(content),
            stored_at: crate::utils::now_iso(),
        }
    }
}
