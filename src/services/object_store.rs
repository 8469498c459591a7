//! Object stores and the storage path scheme.
//!
//! Paths are generated here and nowhere else:
//!
//! ```text
//! reports/{unixMillis}-{sanitizedName}      original PDF
//! images/{requestId}/image-{index}.{ext}    each uploaded image
//! ```

use super::{ObjectStore, StoredObject};
use crate::error::ServiceError;
use crate::report::ImageFormat;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Replace every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn original_pdf_path(file_name: &str, unix_millis: i64) -> String {
    format!("reports/{}-{}", unix_millis, sanitize_file_name(file_name))
}

pub fn image_path(request_id: Uuid, index: usize, format: ImageFormat) -> String {
    format!("images/{}/image-{}.{}", request_id, index, format.extension())
}

// ── Filesystem ───────────────────────────────────────────────────────────

/// Stores objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    /// `public_base_url` is prefixed to every stored path to form its URL.
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ServiceError> {
        let rel = Path::new(path);
        if path.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(ServiceError::Storage(format!("invalid object path: {path}")));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredObject, ServiceError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        debug!(
            "Stored {} ({} bytes, {}) at {}",
            path,
            bytes.len(),
            content_type,
            target.display()
        );
        Ok(StoredObject {
            url: format!("{}/{}", self.public_base_url, path),
            path: path.to_string(),
        })
    }

    async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

/// An object held by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-process object store. URLs use the `memory://` scheme.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<MemoryObject> {
        self.lock().get(path).cloned()
    }

    /// Stored paths in lexical order.
    pub fn paths(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MemoryObject>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredObject, ServiceError> {
        self.lock().insert(
            path.to_string(),
            MemoryObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(StoredObject {
            url: format!("memory://{path}"),
            path: path.to_string(),
        })
    }

    async fn exists(&self) -> bool {
        true
    }
}
