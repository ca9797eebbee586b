//! Object storage gateway
//!
//! Binary artifacts (original PDFs, QR PNGs, augmented PDFs) are stored
//! under `{folder}/{tenant}/{batch}/{object}{ext}`. Two drivers: local
//! filesystem and S3-compatible.

mod local;
mod s3;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

pub use local::LocalStorage;
pub use s3::S3Storage;

use crate::domain::{BatchId, TenantId};
use crate::error::{IssuerError, Result};

/// Default storage folder for original certificates
pub const DEFAULT_FOLDER: &str = "certificates";
/// Default object extension
pub const DEFAULT_EXTENSION: &str = ".pdf";

/// Per-store options; unset fields fall back to the defaults above
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub folder: Option<String>,
    pub extension: Option<String>,
    pub content_type: Option<String>,
}

impl StoreOptions {
    pub fn pdf() -> Self {
        Self {
            content_type: Some("application/pdf".to_string()),
            ..Self::default()
        }
    }

    pub fn png(folder: &str) -> Self {
        Self {
            folder: Some(folder.to_string()),
            extension: Some(".png".to_string()),
            content_type: Some("image/png".to_string()),
        }
    }

    pub fn pdf_in(folder: &str) -> Self {
        Self {
            folder: Some(folder.to_string()),
            content_type: Some("application/pdf".to_string()),
            ..Self::default()
        }
    }
}

/// Relative object key for an artifact
pub fn object_key(tenant: TenantId, batch: BatchId, object: &str, opts: &StoreOptions) -> String {
    let folder = opts.folder.as_deref().unwrap_or(DEFAULT_FOLDER);
    let extension = opts.extension.as_deref().unwrap_or(DEFAULT_EXTENSION);
    format!("{folder}/{tenant}/{batch}/{object}{extension}")
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Store bytes under the computed key; returns the relative path.
    async fn store(
        &self,
        bytes: &[u8],
        tenant: TenantId,
        batch: BatchId,
        object: &str,
        opts: &StoreOptions,
    ) -> Result<String>;

    /// Retrieve previously stored bytes by relative path.
    async fn retrieve(&self, path: &str) -> Result<Vec<u8>>;

    /// Public URL for a stored object, when the driver can produce one.
    fn public_url(&self, path: &str) -> Option<String>;

    /// Driver name for logs and health output.
    fn name(&self) -> &'static str;
}

/// Build the configured storage driver from the environment.
///
/// `STORAGE_DRIVER` selects `local` (default) or `s3`.
pub async fn storage_from_env() -> Result<std::sync::Arc<dyn StorageGateway>> {
    let driver = std::env::var("STORAGE_DRIVER").unwrap_or_else(|_| "local".to_string());
    match driver.as_str() {
        "local" => Ok(std::sync::Arc::new(LocalStorage::from_env()?)),
        "s3" => Ok(std::sync::Arc::new(S3Storage::from_env().await?)),
        other => Err(IssuerError::Configuration(format!(
            "unknown STORAGE_DRIVER {other:?}; expected \"local\" or \"s3\""
        ))),
    }
}
