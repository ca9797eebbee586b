//! S3-compatible storage driver
//!
//! Against real AWS the driver requests AES-256 server-side encryption;
//! against a custom endpoint (MinIO and friends) SSE is disabled and
//! path-style addressing is used.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ServerSideEncryption;
use tracing::debug;

use crate::domain::{BatchId, TenantId};
use crate::error::{IssuerError, Result};

use super::{object_key, StorageGateway, StoreOptions};

pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    /// AES-256 SSE; on only when no custom endpoint is configured
    server_side_encryption: bool,
    endpoint: Option<String>,
}

impl S3Storage {
    pub async fn from_env() -> Result<Self> {
        let bucket = std::env::var("S3_BUCKET_NAME")
            .map_err(|_| IssuerError::Configuration("S3_BUCKET_NAME is required".to_string()))?;
        let endpoint = std::env::var("AWS_ENDPOINT").ok().filter(|s| !s.is_empty());

        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(url) = &endpoint {
            builder = builder.endpoint_url(url).force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket,
            server_side_encryption: endpoint.is_none(),
            endpoint,
        })
    }
}

#[async_trait]
impl StorageGateway for S3Storage {
    async fn store(
        &self,
        bytes: &[u8],
        tenant: TenantId,
        batch: BatchId,
        object: &str,
        opts: &StoreOptions,
    ) -> Result<String> {
        let key = object_key(tenant, batch, object, opts);

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()));

        if let Some(content_type) = &opts.content_type {
            request = request.content_type(content_type);
        }
        if self.server_side_encryption {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        request
            .send()
            .await
            .map_err(|e| IssuerError::Storage(format!("s3 put {key}: {e}")))?;

        debug!(path = %key, size = bytes.len(), bucket = %self.bucket, "stored object in s3");
        Ok(key)
    }

    async fn retrieve(&self, path: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| IssuerError::Storage(format!("s3 get {path}: {e}")))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| IssuerError::Storage(format!("s3 read {path}: {e}")))?;
        Ok(bytes.into_bytes().to_vec())
    }

    fn public_url(&self, path: &str) -> Option<String> {
        match &self.endpoint {
            Some(endpoint) => Some(format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                path
            )),
            None => Some(format!(
                "https://{}.s3.amazonaws.com/{}",
                self.bucket, path
            )),
        }
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
