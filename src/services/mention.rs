//! Detection of owner mentions inside allowed group messages.
//!
//! Three signals, checked in order: an explicit tag of the owner's JID,
//! a configured keyword in the body, and a reply to a message this
//! instance sent. The first hit wins.

use crate::identity::normalize_phone;
use crate::models::message;
use crate::store::messages::MessageStore;
use derive_more::Display;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum MentionMethod {
    #[display("tag")]
    #[serde(rename = "tag")]
    Tag,
    #[display("keyword")]
    #[serde(rename = "keyword")]
    Keyword,
    #[display("reply")]
    #[serde(rename = "reply")]
    Reply,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MentionResult {
    #[serde(rename = "isMentioned")]
    pub is_mentioned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<MentionMethod>,
    pub keywords: Vec<String>,
}

impl MentionResult {
    fn none() -> Self {
        Self {
            is_mentioned: false,
            method: None,
            keywords: Vec::new(),
        }
    }

    fn hit(method: MentionMethod, keywords: Vec<String>) -> Self {
        Self {
            is_mentioned: true,
            method: Some(method),
            keywords,
        }
    }
}

/// Inspects unwrapped message content for a mention of `self_phone`.
pub fn detect(
    content: &Value,
    self_phone: &str,
    keywords: &[String],
    messages: &MessageStore,
) -> MentionResult {
    let self_digits = normalize_phone(self_phone);
    if self_digits.is_empty() {
        return MentionResult::none();
    }

    let context = message::context_info(content);

    if let Some(ctx) = context {
        let tagged = message::mentioned_jids(ctx).into_iter().any(|jid| {
            let digits = normalize_phone(&jid);
            !digits.is_empty() && (digits == self_digits || digits.ends_with(&self_digits))
        });
        if tagged {
            return MentionResult::hit(MentionMethod::Tag, Vec::new());
        }
    }

    let body = message::message_body(content).to_lowercase();
    if !body.is_empty() {
        let matched: Vec<String> = keywords
            .iter()
            .filter(|k| !k.is_empty() && body.contains(k.as_str()))
            .cloned()
            .collect();
        if !matched.is_empty() {
            return MentionResult::hit(MentionMethod::Keyword, matched);
        }
    }

    if let Some(stanza) = context.and_then(message::stanza_id) {
        if messages.is_our_message(stanza) {
            return MentionResult::hit(MentionMethod::Reply, Vec::new());
        }
    }

    MentionResult::none()
}
