//! Relocation of finished artifacts to external storage.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::AdapterError;

#[async_trait]
pub trait ArtifactRelocator: Send + Sync {
    /// Moves `local_path` into external storage and returns its reference.
    async fn relocate(&self, local_path: &Path, task_id: &str) -> Result<String, AdapterError>;
    /// Time-limited URL for a previously relocated artifact.
    async fn generate_access(&self, external_ref: &str, ttl: Duration) -> Result<String, AdapterError>;
    async fn remove(&self, external_ref: &str) -> bool;
}

/// Relocates artifacts into a mirror directory, usually one that a CDN or
/// static file server publishes. References are `media/<task_id>/<file>`.
pub struct DirectoryRelocator {
    target_root: PathBuf,
    public_base_url: String,
}

impl DirectoryRelocator {
    pub fn new(target_root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            target_root: target_root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn resolve_ref(&self, external_ref: &str) -> Result<PathBuf, AdapterError> {
        let parts: Vec<&str> = external_ref.split('/').collect();
        let valid = parts.len() == 3
            && parts[0] == "media"
            && parts[1..]
                .iter()
                .all(|p| !p.is_empty() && *p != "." && *p != ".." && !p.contains('\\'));
        if !valid {
            return Err(AdapterError::new(format!("malformed artifact reference: {}", external_ref)));
        }
        Ok(self.target_root.join(external_ref))
    }
}

#[async_trait]
impl ArtifactRelocator for DirectoryRelocator {
    async fn relocate(&self, local_path: &Path, task_id: &str) -> Result<String, AdapterError> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AdapterError::new(format!("artifact has no usable file name: {}", local_path.display())))?;
        let external_ref = format!("media/{}/{}", task_id, file_name);
        let target = self.resolve_ref(&external_ref)?;

        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AdapterError::new(format!("failed to prepare relocation target: {}", e)))?;
        }

        // copy rather than rename: the mirror may sit on another filesystem
        tokio::fs::copy(local_path, &target)
            .await
            .map_err(|e| AdapterError::new(format!("failed to relocate artifact: {}", e)))?;

        info!(task_id = %task_id, external_ref = %external_ref, "Artifact relocated");
        Ok(external_ref)
    }

    async fn generate_access(&self, external_ref: &str, ttl: Duration) -> Result<String, AdapterError> {
        let target = self.resolve_ref(external_ref)?;
        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(AdapterError::new(format!("relocated artifact missing: {}", external_ref)));
        }
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("{}/{}?expires={}", self.public_base_url, external_ref, expires))
    }

    async fn remove(&self, external_ref: &str) -> bool {
        let target = match self.resolve_ref(external_ref) {
            Ok(target) => target,
            Err(e) => {
                warn!("Refusing to remove artifact: {}", e);
                return false;
            }
        };
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                if let Some(dir) = target.parent() {
                    let _ = tokio::fs::remove_dir(dir).await;
                }
                info!(external_ref = %external_ref, "Relocated artifact removed");
                true
            }
            Err(e) => {
                warn!(external_ref = %external_ref, "Failed to remove relocated artifact: {}", e);
                false
            }
        }
    }
}
