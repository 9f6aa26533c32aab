use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Canonical event kinds the router dispatches on. Anything outside this
/// set goes through the generic handler and is registered in stats under
/// its raw name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum EventKind {
    #[display("MESSAGES_UPSERT")]
    MessagesUpsert,
    #[display("MESSAGES_UPDATE")]
    MessagesUpdate,
    #[display("MESSAGES_DELETE")]
    MessagesDelete,
    #[display("MESSAGES_SET")]
    MessagesSet,
    #[display("SEND_MESSAGE")]
    SendMessage,
    #[display("CONNECTION_UPDATE")]
    ConnectionUpdate,
    #[display("QRCODE_UPDATED")]
    QrcodeUpdated,
    #[display("LOGOUT_INSTANCE")]
    LogoutInstance,
    #[display("REMOVE_INSTANCE")]
    RemoveInstance,
    #[display("APPLICATION_STARTUP")]
    ApplicationStartup,
    #[display("CHATS_UPSERT")]
    ChatsUpsert,
    #[display("CHATS_UPDATE")]
    ChatsUpdate,
    #[display("CHATS_DELETE")]
    ChatsDelete,
    #[display("CHATS_SET")]
    ChatsSet,
    #[display("GROUPS_UPSERT")]
    GroupsUpsert,
    #[display("GROUP_UPDATE")]
    GroupUpdate,
    #[display("GROUP_PARTICIPANTS_UPDATE")]
    GroupParticipantsUpdate,
    #[display("CONTACTS_UPSERT")]
    ContactsUpsert,
    #[display("CONTACTS_UPDATE")]
    ContactsUpdate,
    #[display("CONTACTS_SET")]
    ContactsSet,
    #[display("CALL")]
    Call,
    #[display("LABELS_ASSOCIATION")]
    LabelsAssociation,
    #[display("LABELS_EDIT")]
    LabelsEdit,
    #[display("PRESENCE_UPDATE")]
    PresenceUpdate,
}

impl EventKind {
    /// Parses a canonical event name. Callers normalize path-style names
    /// (`messages-upsert`) with [`normalize_event_name`] first.
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "MESSAGES_UPSERT" => Self::MessagesUpsert,
            "MESSAGES_UPDATE" => Self::MessagesUpdate,
            "MESSAGES_DELETE" => Self::MessagesDelete,
            "MESSAGES_SET" => Self::MessagesSet,
            "SEND_MESSAGE" => Self::SendMessage,
            "CONNECTION_UPDATE" => Self::ConnectionUpdate,
            "QRCODE_UPDATED" => Self::QrcodeUpdated,
            "LOGOUT_INSTANCE" => Self::LogoutInstance,
            "REMOVE_INSTANCE" => Self::RemoveInstance,
            "APPLICATION_STARTUP" => Self::ApplicationStartup,
            "CHATS_UPSERT" => Self::ChatsUpsert,
            "CHATS_UPDATE" => Self::ChatsUpdate,
            "CHATS_DELETE" => Self::ChatsDelete,
            "CHATS_SET" => Self::ChatsSet,
            "GROUPS_UPSERT" => Self::GroupsUpsert,
            "GROUP_UPDATE" => Self::GroupUpdate,
            "GROUP_PARTICIPANTS_UPDATE" => Self::GroupParticipantsUpdate,
            "CONTACTS_UPSERT" => Self::ContactsUpsert,
            "CONTACTS_UPDATE" => Self::ContactsUpdate,
            "CONTACTS_SET" => Self::ContactsSet,
            "CALL" => Self::Call,
            "LABELS_ASSOCIATION" => Self::LabelsAssociation,
            "LABELS_EDIT" => Self::LabelsEdit,
            "PRESENCE_UPDATE" => Self::PresenceUpdate,
            _ => return None,
        };
        Some(kind)
    }
}

/// `messages-upsert` / `messages_upsert` → `MESSAGES_UPSERT`.
pub fn normalize_event_name(name: &str) -> String {
    name.trim().to_uppercase().replace('-', "_")
}

/// Where an envelope entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum EventOrigin {
    #[display("webhook")]
    #[serde(rename = "webhook")]
    Webhook,
    #[display("client")]
    #[serde(rename = "client")]
    Client,
}

/// Terminal outcome recorded for an event in the recent-events feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum EventAction {
    #[display("forwarded")]
    #[serde(rename = "forwarded")]
    Forwarded,
    #[display("filtered")]
    #[serde(rename = "filtered")]
    Filtered,
    #[display("failed")]
    #[serde(rename = "failed")]
    Failed,
    #[display("logged")]
    #[serde(rename = "logged")]
    Logged,
    #[display("stored")]
    #[serde(rename = "stored")]
    Stored,
    #[display("mention_forwarded")]
    #[serde(rename = "mention_forwarded")]
    MentionForwarded,
}

/// Entry of the bounded newest-first recent-events ring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEvent {
    pub id: String,
    pub timestamp: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
    #[serde(rename = "sourceType", skip_serializing_if = "Option::is_none", default)]
    pub source_type: Option<String>,
    #[serde(rename = "senderName", skip_serializing_if = "Option::is_none", default)]
    pub sender_name: Option<String>,
    #[serde(rename = "entityType", skip_serializing_if = "Option::is_none", default)]
    pub entity_type: Option<String>,
    pub action: EventAction,
    #[serde(rename = "messagePreview", default)]
    pub message_preview: String,
    #[serde(rename = "messageBody", default)]
    pub message_body: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

impl StoredEvent {
    pub fn new(event: &str, action: EventAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: crate::utils::now_iso(),
            event: event.to_string(),
            source: None,
            source_type: None,
            sender_name: None,
            entity_type: None,
            action,
            message_preview: String::new(),
            message_body: String::new(),
            error: None,
            reason: None,
        }
    }
}
