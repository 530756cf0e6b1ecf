//! Key-value blob storage for documents and bundles.
//!
//! Keys are `/`-separated relative paths (`documents/Install_Guide.json`).
//! [`FsBlobStore`] maps them onto a directory; [`MemoryBlobStore`] keeps them
//! in a map for tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use docharvest_shared::{HarvestError, Result};
use tracing::debug;

/// Abstract blob store.
///
/// Implementations must be `Send + Sync`: one store is shared by every
/// fetch worker.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `key`, replacing any previous value.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Read the value at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Keys directly under `prefix` (not recursive), sorted.
    ///
    /// A prefix that does not exist yields an empty list.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Reject keys that could escape the store root.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(HarvestError::validation("blob key is empty"));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(HarvestError::validation(format!(
            "blob key must be a relative '/'-separated path: {key}"
        )));
    }
    if key.split('/').any(|part| part == ".." || part.is_empty()) {
        return Err(HarvestError::validation(format!(
            "blob key contains an invalid segment: {key}"
        )));
    }
    Ok(())
}

fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim_matches('/')
}

fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Blob store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |p, part| p.join(part))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        let target = self.path_for(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HarvestError::io(parent, e))?;
        }

        // Write to a sibling temp file, then rename into place
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = target.with_file_name(format!(".{file_name}.tmp"));
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| HarvestError::io(&temp, e))?;
        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|e| HarvestError::io(&target, e))?;

        debug!(key, size = bytes.len(), "blob written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        let path = self.path_for(key);
        tokio::fs::read(&path)
            .await
            .map_err(|e| HarvestError::io(&path, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = normalize_prefix(prefix);
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            validate_key(prefix)?;
            self.path_for(prefix)
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HarvestError::io(&dir, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HarvestError::io(&dir, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| HarvestError::io(entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // In-progress temp files
            if name.starts_with('.') {
                continue;
            }
            keys.push(join_key(prefix, &name));
        }
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// In-memory blob store for tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_error() -> HarvestError {
        HarvestError::Storage("memory blob store lock poisoned".into())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.blobs
            .write()
            .map_err(|_| Self::lock_error())?
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        self.blobs
            .read()
            .map_err(|_| Self::lock_error())?
            .get(key)
            .cloned()
            .ok_or_else(|| HarvestError::Storage(format!("no blob at key: {key}")))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = normalize_prefix(prefix);
        let blobs = self.blobs.read().map_err(|_| Self::lock_error())?;
        let keys = blobs
            .keys()
            .filter(|key| {
                let rest = if prefix.is_empty() {
                    Some(key.as_str())
                } else {
                    key.strip_prefix(prefix).and_then(|r| r.strip_prefix('/'))
                };
                rest.is_some_and(|r| !r.contains('/'))
            })
            .cloned()
            .collect();
        Ok(keys)
    }
}
