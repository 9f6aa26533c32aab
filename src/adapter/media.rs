//! Media handling for client-adapter envelopes: inline thumbnail
//! extraction and the download-with-fallback path.

use crate::adapter::session::Session;
use crate::models::message;
use crate::store::media::MediaStore;
use base64::Engine as _;
use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;

/// Raw bytes of the inline JPEG preview, when the content carries one.
pub fn thumbnail_bytes(content: &Value) -> Option<Vec<u8>> {
    let b64 = content.as_object()?.values().find_map(|sub| {
        let thumb = sub.get("jpegThumbnail")?.as_str()?;
        (!thumb.is_empty()).then_some(thumb)
    })?;

    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| debug!("undecodable inline thumbnail: {}", e))
        .ok()
}

/// Tries the full download through the session; when that fails the inline
/// thumbnail bytes are persisted instead so at least a preview survives.
pub async fn download_with_fallback(
    session: Arc<dyn Session>,
    media_store: Arc<MediaStore>,
    payload: Value,
) {
    let data = message::event_data(&payload);
    let message_id = message::message_id(data).to_string();
    if message_id.is_empty() {
        return;
    }

    let content = message::unwrap_content(message::message_content(data)).clone();

    match session.download_media(payload.clone()).await {
        Ok((bytes, mime_type)) => {
            if media_store.save(&message_id, &bytes, &mime_type).await.is_none() {
                warn!("media for {} was rejected by the store", message_id);
            }
        }
        Err(e) => {
            warn!("media download for {} failed: {:#}", message_id, e);
            if let Some(bytes) = thumbnail_bytes(&content) {
                let _ = media_store
                    .save(&format!("{}_thumb", message_id), &bytes, "image/jpeg")
                    .await;
            }
        }
    }
}
