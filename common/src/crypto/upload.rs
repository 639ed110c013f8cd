// Upload coordination for processed crypto operations
//
// A processed operation can go to blob storage (original content), to an
// SFTP server (encrypted content), or both. The destinations are
// independent: one failing does not stop the other, and the outcome
// reflects every failure.

use crate::errors::CryptoError;
use crate::models::OperationStatus;
use crate::store::{transition_status, OperationStore};
use crate::transport::{BlobStorage, SftpClient};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{error, info, instrument, warn};

/// Where a processed operation should be delivered. Both destinations
/// are optional; with neither set the upload is a no-op success.
#[derive(Debug, Clone, Default)]
pub struct UploadDestinations {
    /// Blob folder for the original content
    pub blob_folder: Option<String>,
    /// SFTP target for the encrypted content
    pub sftp: Option<SftpTarget>,
}

#[derive(Debug, Clone)]
pub struct SftpTarget {
    pub server: String,
    pub remote_dir: String,
}

fn base64_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9+/=]+$").unwrap_or_else(|_| unreachable!()))
}

/// Decode content that arrived base64-encoded, leaving everything else
/// untouched. Content is treated as encoded only when it is UTF-8 text
/// of base64 shape, decodes cleanly, and the decoded form actually
/// differs in length from the input.
pub fn normalize_base64(content: &[u8]) -> Vec<u8> {
    let text = match std::str::from_utf8(content) {
        Ok(text) => text,
        Err(_) => return content.to_vec(),
    };
    if text.is_empty() || !base64_shape().is_match(text) {
        return content.to_vec();
    }
    match BASE64.decode(text.as_bytes()) {
        Ok(decoded) if decoded.len() != content.len() => decoded,
        _ => content.to_vec(),
    }
}

/// Delivers processed operations to their destinations and settles the
/// operation status.
pub struct UploadCoordinator {
    blob: Arc<dyn BlobStorage>,
    sftp: Arc<dyn SftpClient>,
    store: Arc<dyn OperationStore>,
}

impl UploadCoordinator {
    pub fn new(
        blob: Arc<dyn BlobStorage>,
        sftp: Arc<dyn SftpClient>,
        store: Arc<dyn OperationStore>,
    ) -> Self {
        Self { blob, sftp, store }
    }

    /// Upload an operation's content to the requested destinations.
    ///
    /// All destinations succeeding marks the operation UPLOADED and
    /// clears its stored content; any failure marks it FAILED with every
    /// destination error aggregated into one message. Status updates are
    /// best-effort: a store error is logged, not propagated.
    #[instrument(skip(self, destinations), fields(request_id = request_id))]
    pub async fn upload(
        &self,
        request_id: &str,
        destinations: &UploadDestinations,
    ) -> Result<(), CryptoError> {
        let operation = self
            .store
            .find(request_id)
            .await
            .map_err(|e| CryptoError::UploadFailed(e.to_string()))?
            .ok_or_else(|| CryptoError::UploadFailed(format!("Unknown operation: {}", request_id)))?;

        let mut failures: Vec<String> = Vec::new();

        if let Some(folder) = &destinations.blob_folder {
            match &operation.original_content {
                Some(content) => {
                    let normalized = normalize_base64(content);
                    let path = format!("{}/{}", folder.trim_end_matches('/'), operation.file_name);
                    if let Err(e) = self.blob.put_object(&path, &normalized).await {
                        failures.push(format!("blob: {}", e));
                    } else {
                        info!(path = %path, "Original content archived to blob storage");
                    }
                }
                None => failures.push("blob: no original content stored".to_string()),
            }
        }

        if let Some(target) = &destinations.sftp {
            match &operation.processed_content {
                Some(content) => {
                    let remote_path = format!(
                        "{}/{}",
                        target.remote_dir.trim_end_matches('/'),
                        operation.file_name
                    );
                    if let Err(e) = self
                        .sftp
                        .upload(&target.server, &remote_path, content)
                        .await
                    {
                        failures.push(format!("sftp: {}", e));
                    } else {
                        info!(remote_path = %remote_path, "Encrypted content uploaded via SFTP");
                    }
                }
                None => failures.push("sftp: no processed content stored".to_string()),
            }
        }

        if failures.is_empty() {
            if let Err(e) = transition_status(
                self.store.as_ref(),
                request_id,
                OperationStatus::Uploaded,
                None,
            )
            .await
            {
                error!(request_id = request_id, error = %e, "Failed to mark operation uploaded");
            }
            if let Err(e) = self.store.clear_content(request_id).await {
                warn!(request_id = request_id, error = %e, "Failed to clear stored content");
            }
            Ok(())
        } else {
            let message = failures.join("; ");
            if let Err(e) = transition_status(
                self.store.as_ref(),
                request_id,
                OperationStatus::Failed,
                Some(&message),
            )
            .await
            {
                error!(request_id = request_id, error = %e, "Failed to mark operation failed");
            }
            Err(CryptoError::UploadFailed(message))
        }
    }
}
