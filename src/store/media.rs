//! Content-addressed media blobs with a count-bounded index.
//!
//! Blobs land on disk as `<messageId>_<monotonic>.<ext>` beside
//! `media_index.json`; when the file count crosses the cap the globally
//! oldest entries (by save timestamp) are dropped, blob and index both.

use crate::utils;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
    pub timestamp: String,
    /// Tie-breaker for eviction when timestamps collide.
    #[serde(default)]
    pub seq: u64,
}

/// Resolved view handed to the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    #[serde(rename = "filePath")]
    pub file_path: PathBuf,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
}

struct Inner {
    index: HashMap<String, MediaRecord>,
    seq: u64,
}

pub struct MediaStore {
    dir: PathBuf,
    index_path: PathBuf,
    max_files: usize,
    max_bytes: usize,
    inner: RwLock<Inner>,
}

/// Explicit MIME → extension table; anything unknown becomes `.bin`.
fn extension_for(mime_type: &str) -> &'static str {
    let base = mime_type.split(';').next().unwrap_or("").trim();
    match base {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/3gpp" => "3gp",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        "audio/aac" => "aac",
        "audio/wav" => "wav",
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "text/plain" => "txt",
        _ => "bin",
    }
}

fn sanitize_id(message_id: &str) -> String {
    message_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl MediaStore {
    pub fn new(dir: PathBuf, index_path: PathBuf, max_files: usize, max_bytes: usize) -> Self {
        Self {
            dir,
            index_path,
            max_files,
            max_bytes,
            inner: RwLock::new(Inner {
                index: HashMap::new(),
                seq: 0,
            }),
        }
    }

    pub async fn load(&self) -> anyhow::Result<()> {
        if let Some(index) =
            utils::read_json_file::<HashMap<String, MediaRecord>>(&self.index_path).await?
        {
            let mut inner = self.inner.write().unwrap();
            inner.seq = index.len() as u64;
            inner.index = index;
        }
        Ok(())
    }

    async fn persist_index(&self) {
        let snapshot = self.inner.read().unwrap().index.clone();
        if let Err(e) = utils::atomic_write_json(&self.index_path, &snapshot).await {
            error!("failed to persist media index: {:#}", e);
        }
    }

    /// Saves a blob, returning its opaque handle; `None` when the payload
    /// is empty or over the size limit.
    pub async fn save(
        &self,
        message_id: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Option<String> {
        if bytes.is_empty() {
            warn!("rejecting empty media payload for {}", message_id);
            return None;
        }
        if bytes.len() > self.max_bytes {
            warn!(
                "rejecting media for {}: {} bytes exceeds limit {}",
                message_id,
                bytes.len(),
                self.max_bytes
            );
            return None;
        }

        let (handle, file_name, seq) = {
            let mut inner = self.inner.write().unwrap();
            inner.seq += 1;
            let handle = format!("{}_{}", sanitize_id(message_id), inner.seq);
            let file_name = format!("{}.{}", handle, extension_for(mime_type));
            (handle, file_name, inner.seq)
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            error!("failed to create media dir: {:#}", e);
            return None;
        }
        if let Err(e) = tokio::fs::write(self.dir.join(&file_name), bytes).await {
            error!("failed to write media blob {}: {:#}", file_name, e);
            return None;
        }

        let evicted: Vec<String> = {
            let mut inner = self.inner.write().unwrap();
            inner.index.insert(
                handle.clone(),
                MediaRecord {
                    file_name,
                    mime_type: mime_type.to_string(),
                    size: bytes.len() as u64,
                    timestamp: utils::now_iso(),
                    seq,
                },
            );

            let mut evicted = Vec::new();
            while inner.index.len() > self.max_files {
                let Some(oldest) = inner
                    .index
                    .iter()
                    .min_by(|a, b| (&a.1.timestamp, a.1.seq).cmp(&(&b.1.timestamp, b.1.seq)))
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                if let Some(record) = inner.index.remove(&oldest) {
                    evicted.push(record.file_name);
                }
            }
            evicted
        };

        for file_name in evicted {
            if let Err(e) = tokio::fs::remove_file(self.dir.join(&file_name)).await {
                warn!("failed to remove evicted media {}: {:#}", file_name, e);
            }
        }

        self.persist_index().await;
        Some(handle)
    }

    pub fn get(&self, handle: &str) -> Option<MediaInfo> {
        let inner = self.inner.read().unwrap();
        inner.index.get(handle).map(|record| MediaInfo {
            file_path: self.dir.join(&record.file_name),
            mime_type: record.mime_type.clone(),
            size: record.size,
        })
    }

    pub fn count(&self) -> usize {
        self.inner.read().unwrap().index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_media(max_files: usize, max_bytes: usize) -> MediaStore {
        let base = std::env::temp_dir().join(format!("wa-gateway-media-{}", uuid::Uuid::new_v4()));
        MediaStore::new(
            base.join("media"),
            base.join("media_index.json"),
            max_files,
            max_bytes,
        )
    }

    #[tokio::test]
    async fn save_and_get_round_trip() {
        let store = temp_media(10, 1024);
        let handle = store
            .save("MSG-1", b"\xff\xd8jpegdata", "image/jpeg")
            .await
            .unwrap();

        let info = store.get(&handle).unwrap();
        assert_eq!(info.mime_type, "image/jpeg");
        assert_eq!(info.size, 10);
        assert!(info.file_path.to_string_lossy().ends_with(".jpg"));
        assert!(tokio::fs::try_exists(&info.file_path).await.unwrap());
    }

    #[tokio::test]
    async fn empty_and_oversize_payloads_are_rejected() {
        let store = temp_media(10, 8);
        assert!(store.save("M", b"", "image/png").await.is_none());
        assert!(store.save("M", b"123456789", "image/png").await.is_none());
        assert_eq!(store.count(), 0);
    }

    #[tokio::test]
    async fn unknown_mime_maps_to_bin() {
        let store = temp_media(10, 1024);
        let handle = store.save("M", b"blob", "application/x-weird").await.unwrap();
        let info = store.get(&handle).unwrap();
        assert!(info.file_path.to_string_lossy().ends_with(".bin"));
    }

    #[tokio::test]
    async fn count_cap_evicts_oldest() {
        let store = temp_media(2, 1024);
        let h1 = store.save("A", b"one", "text/plain").await.unwrap();
        let h2 = store.save("B", b"two", "text/plain").await.unwrap();
        let h3 = store.save("C", b"three", "text/plain").await.unwrap();

        assert_eq!(store.count(), 2);
        assert!(store.get(&h1).is_none());
        assert!(store.get(&h2).is_some());
        assert!(store.get(&h3).is_some());
    }

    #[tokio::test]
    async fn handles_are_unique_per_save() {
        let store = temp_media(10, 1024);
        let h1 = store.save("SAME", b"a", "text/plain").await.unwrap();
        let h2 = store.save("SAME", b"b", "text/plain").await.unwrap();
        assert_ne!(h1, h2);
    }

    #[tokio::test]
    async fn index_survives_reload() {
        let base = std::env::temp_dir().join(format!("wa-gateway-media-{}", uuid::Uuid::new_v4()));
        let handle = {
            let store = MediaStore::new(
                base.join("media"),
                base.join("media_index.json"),
                10,
                1024,
            );
            store.save("M", b"payload", "application/pdf").await.unwrap()
        };

        let store = MediaStore::new(base.join("media"), base.join("media_index.json"), 10, 1024);
        store.load().await.unwrap();
        assert!(store.get(&handle).is_some());
    }
}
