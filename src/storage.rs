//! S3/MinIO storage client for oversized submission payloads

use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::config::S3Config;

/// S3/MinIO storage client
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    bucket: String,
}

impl StorageClient {
    /// Create a new storage client from the object-store configuration
    pub fn new(config: &S3Config) -> Self {
        let protocol = if config.use_ssl { "https" } else { "http" };
        let endpoint_url = format!("{}://{}", protocol, config.endpoint);

        info!("Connecting to object store at {}", endpoint_url);

        let credentials =
            Credentials::new(&config.access_key, &config.secret_key, None, None, "s3");

        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
        }
    }

    /// Create the bucket if it does not exist. Best-effort: an existing
    /// bucket (or insufficient permission to create one) is not an error.
    pub async fn ensure_bucket(&self) {
        if let Err(err) = self.client.create_bucket().bucket(&self.bucket).send().await {
            debug!("bucket create skipped for {}: {}", self.bucket, err);
        }
    }

    /// Upload a payload archive under the given key
    pub async fn upload_archive(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/x-tar")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", key))?;
        Ok(())
    }

    /// Mint a time-limited presigned GET URL for a stored object
    pub async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .context("Invalid presign expiry")?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .with_context(|| format!("Failed to presign {}", key))?;
        Ok(request.uri().to_string())
    }
}
