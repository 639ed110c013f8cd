// Blob object storage client (MinIO / S3-compatible)

use crate::config::BlobConfig;
use crate::errors::TransportError;
use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Object storage interface used for archiving downloaded and decrypted files
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn put_object(&self, path: &str, data: &[u8]) -> Result<(), TransportError>;
    async fn get_object(&self, path: &str) -> Result<Vec<u8>, TransportError>;
    async fn delete_object(&self, path: &str) -> Result<(), TransportError>;
}

/// rust-s3 backed client with path-style addressing for MinIO
#[derive(Clone, Debug)]
pub struct BlobClient {
    bucket: Arc<Bucket>,
}

impl BlobClient {
    /// Create a new blob client from configuration
    #[instrument(skip(config), fields(endpoint = %config.endpoint, bucket = %config.bucket))]
    pub fn new(config: &BlobConfig) -> Result<Self, TransportError> {
        info!("Initializing blob storage client");

        // rust-s3 Region::Custom expects the endpoint without a scheme
        let endpoint = config
            .endpoint
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .to_string();

        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| {
            error!(error = %e, "Failed to create blob credentials");
            TransportError::BlobFailed(format!("Failed to create credentials: {}", e))
        })?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint,
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| {
                error!(error = %e, "Failed to create blob bucket");
                TransportError::BlobFailed(format!("Failed to create bucket: {}", e))
            })?
            .with_path_style();

        info!(bucket = %config.bucket, "Blob storage client initialized");

        Ok(Self {
            bucket: Arc::new(bucket),
        })
    }

    /// Health check against the bucket
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), TransportError> {
        self.bucket
            .list("".to_string(), Some("/".to_string()))
            .await
            .map_err(|e| {
                error!(error = %e, "Blob health check failed");
                TransportError::BlobFailed(format!("Health check failed: {}", e))
            })?;
        debug!("Blob health check passed");
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for BlobClient {
    #[instrument(skip(self, data), fields(path = %path, size = data.len()))]
    async fn put_object(&self, path: &str, data: &[u8]) -> Result<(), TransportError> {
        self.bucket.put_object(path, data).await.map_err(|e| {
            error!(error = %e, path = %path, "Failed to store object");
            TransportError::BlobFailed(format!("Failed to put object '{}': {}", path, e))
        })?;

        debug!(path = %path, "Object stored");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn get_object(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let response = self.bucket.get_object(path).await.map_err(|e| {
            error!(error = %e, path = %path, "Failed to retrieve object");
            TransportError::BlobFailed(format!("Failed to get object '{}': {}", path, e))
        })?;

        let data = response.bytes().to_vec();
        debug!(path = %path, size = data.len(), "Object retrieved");
        Ok(data)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete_object(&self, path: &str) -> Result<(), TransportError> {
        self.bucket.delete_object(path).await.map_err(|e| {
            error!(error = %e, path = %path, "Failed to delete object");
            TransportError::BlobFailed(format!("Failed to delete object '{}': {}", path, e))
        })?;

        debug!(path = %path, "Object deleted");
        Ok(())
    }
}
