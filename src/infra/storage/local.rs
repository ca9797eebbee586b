//! Local filesystem storage driver

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{BatchId, TenantId};
use crate::error::{IssuerError, Result};

use super::{object_key, StorageGateway, StoreOptions};

/// Filesystem-backed storage rooted at `STORAGE_PATH`
pub struct LocalStorage {
    root: PathBuf,
    public_base: Option<String>,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base: None,
        }
    }

    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into());
        self
    }

    pub fn from_env() -> Result<Self> {
        let root = std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./storage".to_string());
        let mut storage = Self::new(root);
        if let Ok(base) = std::env::var("STORAGE_PUBLIC_BASE_URL") {
            if !base.is_empty() {
                storage = storage.with_public_base(base);
            }
        }
        Ok(storage)
    }

    /// Resolve a relative path under the root, refusing traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(IssuerError::Storage(format!(
                "path {path:?} escapes the storage root"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageGateway for LocalStorage {
    async fn store(
        &self,
        bytes: &[u8],
        tenant: TenantId,
        batch: BatchId,
        object: &str,
        opts: &StoreOptions,
    ) -> Result<String> {
        let key = object_key(tenant, batch, object, opts);
        let full = self.resolve(&key)?;

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;

        debug!(path = %key, size = bytes.len(), "stored object locally");
        Ok(key)
    }

    async fn retrieve(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::read(&full).await?)
    }

    fn public_url(&self, path: &str) -> Option<String> {
        self.public_base
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), path))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let tenant = TenantId::new();
        let batch = BatchId::new();

        let path = storage
            .store(b"pdf bytes", tenant, batch, "job-1", &StoreOptions::pdf())
            .await
            .unwrap();
        assert!(path.ends_with("job-1.pdf"));

        let bytes = storage.retrieve(&path).await.unwrap();
        assert_eq!(bytes, b"pdf bytes");
    }

    #[tokio::test]
    async fn test_retrieve_missing_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let err = storage.retrieve("certificates/a/b/missing.pdf").await;
        assert!(matches!(err, Err(IssuerError::Storage(_))));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let err = storage.retrieve("../outside.pdf").await;
        assert!(matches!(err, Err(IssuerError::Storage(_))));
    }

    #[test]
    fn test_public_url() {
        let storage = LocalStorage::new("/tmp/x").with_public_base("https://cdn.example/");
        assert_eq!(
            storage.public_url("certificates/a/b/c.pdf").unwrap(),
            "https://cdn.example/certificates/a/b/c.pdf"
        );
        assert!(LocalStorage::new("/tmp/x").public_url("p").is_none());
    }
}
