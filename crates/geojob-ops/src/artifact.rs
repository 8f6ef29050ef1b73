//! Object store for downloadable job results. Jobs keep only the returned reference.

use async_trait::async_trait;
use geojob_types::{ArtifactRef, JobId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("invalid artifact key: {0}")]
    InvalidKey(String),
    #[error("artifact io: {0}")]
    Io(String),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<ArtifactRef, ArtifactError>;
}

/// Conventional key for a job's result file.
pub(crate) fn job_artifact_key(job_id: JobId, file_name: &str) -> String {
    format!("jobs/{job_id}/{file_name}")
}

fn check_key(key: &str) -> Result<(), ArtifactError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(ArtifactError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// In-memory artifact store (process lifetime only).
pub struct InMemoryArtifactStore {
    objects: RwLock<HashMap<String, (String, Vec<u8>)>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Content type and bytes stored under `key`.
    pub async fn get(&self, key: &str) -> Option<(String, Vec<u8>)> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<ArtifactRef, ArtifactError> {
        check_key(key)?;
        let size_bytes = bytes.len() as u64;
        self.objects
            .write()
            .await
            .insert(key.to_string(), (content_type.to_string(), bytes));
        Ok(ArtifactRef {
            key: key.to_string(),
            url: format!("memory://{key}"),
            content_type: content_type.to_string(),
            size_bytes,
        })
    }
}

/// Directory-backed artifact store; URLs are `base_url` joined with the key.
pub struct FsArtifactStore {
    root: PathBuf,
    base_url: String,
}

impl FsArtifactStore {
    pub fn new(root: impl AsRef<Path>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env() -> Self {
        let root = std::env::var("GEOJOB_ARTIFACT_DIR").unwrap_or_else(|_| "./artifacts".to_string());
        let base_url = std::env::var("GEOJOB_ARTIFACT_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8002/artifacts".to_string());
        Self::new(root, base_url)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<ArtifactRef, ArtifactError> {
        check_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArtifactError::Io(e.to_string()))?;
        }
        let size_bytes = bytes.len() as u64;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ArtifactError::Io(e.to_string()))?;
        Ok(ArtifactRef {
            key: key.to_string(),
            url: format!("{}/{key}", self.base_url),
            content_type: content_type.to_string(),
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_returns_reference_and_keeps_bytes() {
        let store = InMemoryArtifactStore::new();
        let r = store
            .put("jobs/a/out.json", "application/json", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(r.url, "memory://jobs/a/out.json");
        assert_eq!(r.size_bytes, 2);
        assert_eq!(store.get("jobs/a/out.json").await.unwrap().1, b"{}".to_vec());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let store = InMemoryArtifactStore::new();
        for key in ["", "/etc/passwd", "jobs/../secret", "jobs//x", "a\\b"] {
            assert!(matches!(
                store.put(key, "text/plain", Vec::new()).await,
                Err(ArtifactError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn fs_store_writes_under_root() {
        let root = std::env::temp_dir().join(format!("geojob-artifacts-{}", JobId::new()));
        let store = FsArtifactStore::new(&root, "https://files.example.com/");
        let r = store
            .put("jobs/x/result.geojson", "application/geo+json", b"abc".to_vec())
            .await
            .unwrap();
        assert_eq!(r.url, "https://files.example.com/jobs/x/result.geojson");
        let written = tokio::fs::read(root.join("jobs/x/result.geojson")).await.unwrap();
        assert_eq!(written, b"abc");
        tokio::fs::remove_dir_all(&root).await.ok();
    }
}
