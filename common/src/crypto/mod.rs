// Crypto operation coordination
//
// Encryption and decryption run against an external service that answers
// asynchronously: we request a token, the service later posts a callback
// with the outcome. The registry correlates those callbacks with the
// completion actions registered when the request went out.

pub mod client;
pub mod registry;
pub mod upload;

pub use client::{CryptoClient, HttpCryptoClient};
pub use registry::{CallbackRegistry, CompletionAction};
pub use upload::{normalize_base64, UploadCoordinator, UploadDestinations};

use crate::config::CryptoConfig;
use crate::errors::CryptoError;
use crate::models::{new_request_id, CryptOperation, OperationStatus, OperationType};
use crate::store::{transition_status, OperationStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};

/// Coordinates token requests, callback delivery, and decrypt waits.
pub struct CryptoService {
    registry: Arc<CallbackRegistry>,
    store: Arc<dyn OperationStore>,
    client: Arc<dyn CryptoClient>,
    config: CryptoConfig,
}

impl CryptoService {
    pub fn new(
        registry: Arc<CallbackRegistry>,
        store: Arc<dyn OperationStore>,
        client: Arc<dyn CryptoClient>,
        config: CryptoConfig,
    ) -> Self {
        Self {
            registry,
            store,
            client,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    /// Start a crypto operation: persist it, register the completion action,
    /// then ask the service for a token. A failed token request removes the
    /// registry entry immediately and marks the operation FAILED.
    #[instrument(skip(self, action), fields(operation_type = %operation_type, file_name = %file_name))]
    pub async fn begin_operation(
        &self,
        operation_type: OperationType,
        file_name: &str,
        action: CompletionAction,
    ) -> Result<String, CryptoError> {
        let request_id = new_request_id(&self.config.app_code);
        let operation =
            CryptOperation::new(request_id.clone(), operation_type, file_name.to_string());

        self.store
            .insert(&operation)
            .await
            .map_err(|e| CryptoError::TokenRequestFailed(e.to_string()))?;

        self.registry
            .register(&request_id, action)
            .await
            .map_err(|e| CryptoError::TokenRequestFailed(e.to_string()))?;

        info!(request_id = %request_id, "Crypto operation registered");

        if let Err(e) = self
            .client
            .request_token(&request_id, operation_type, file_name)
            .await
        {
            error!(request_id = %request_id, error = %e, "Token request failed");
            self.registry.remove(&request_id).await;
            if let Err(store_err) = transition_status(
                self.store.as_ref(),
                &request_id,
                OperationStatus::Failed,
                Some(&e.to_string()),
            )
            .await
            {
                error!(request_id = %request_id, error = %store_err, "Failed to record token request failure");
            }
            return Err(e);
        }

        Ok(request_id)
    }

    /// Deliver a callback from the crypto service.
    ///
    /// Stores the token, then runs the registered completion action at most
    /// once. A callback with no registered handler is still a success: the
    /// entry may already have been consumed or swept.
    #[instrument(skip(self, token))]
    pub async fn handle_callback(
        &self,
        request_id: &str,
        token: Option<&str>,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<(), CryptoError> {
        if !success {
            warn!(request_id = request_id, error = ?error_message, "Crypto service reported failure");
            self.registry.remove(request_id).await;
            transition_status(
                self.store.as_ref(),
                request_id,
                OperationStatus::Failed,
                error_message.or(Some("Crypto service reported failure")),
            )
            .await?;
            return Ok(());
        }

        if let Some(token) = token {
            self.store.set_token(request_id, token).await?;
        }
        transition_status(
            self.store.as_ref(),
            request_id,
            OperationStatus::InProgress,
            None,
        )
        .await?;

        match self.registry.complete(request_id).await {
            None => {
                // Consumed earlier, swept, or never ours. Acknowledge anyway.
                info!(request_id = request_id, "Callback had no registered handler");
                Ok(())
            }
            Some(Ok(())) => {
                info!(request_id = request_id, "Callback completed");
                Ok(())
            }
            Some(Err(e)) => {
                error!(request_id = request_id, error = %e, "Completion action failed");
                transition_status(
                    self.store.as_ref(),
                    request_id,
                    OperationStatus::Failed,
                    Some(&e.to_string()),
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Decrypt file content end to end: request a token, wait for the
    /// callback (bounded), then call the service with the stored token.
    /// With encryption disabled the downloaded bytes are already plain
    /// and pass through without touching the service.
    ///
    /// On timeout the registry entry is left in place for the sweep to
    /// evict, and the operation is marked TIMEOUT.
    #[instrument(skip(self, content), fields(file_name = %file_name, size = content.len()))]
    pub async fn decrypt_file(
        &self,
        file_name: &str,
        content: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if !self.config.encryption_enabled {
            info!(file_name = %file_name, "Encryption disabled, passing content through");
            return Ok(content.to_vec());
        }

        let (tx, rx) = oneshot::channel::<()>();
        let request_id = self
            .begin_operation(
                OperationType::Decryption,
                file_name,
                Box::new(move || {
                    // The waiter may have timed out and dropped the receiver
                    let _ = tx.send(());
                    Ok(())
                }),
            )
            .await?;

        self.store
            .set_original_content(&request_id, content)
            .await
            .map_err(|e| CryptoError::DecryptionFailed {
                request_id: request_id.clone(),
                reason: e.to_string(),
            })?;

        let wait = Duration::from_secs(self.config.decrypt_wait_seconds);
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => {
                warn!(
                    request_id = %request_id,
                    wait_seconds = self.config.decrypt_wait_seconds,
                    "Timed out waiting for decrypt token"
                );
                // Entry stays registered; the sweep is the eviction authority
                if let Err(e) = transition_status(
                    self.store.as_ref(),
                    &request_id,
                    OperationStatus::Timeout,
                    Some("Timed out waiting for crypto callback"),
                )
                .await
                {
                    error!(request_id = %request_id, error = %e, "Failed to record timeout");
                }
                return Err(CryptoError::WaitTimeout(self.config.decrypt_wait_seconds));
            }
        }

        // The store, not the registry, holds the token
        let operation = self
            .store
            .find(&request_id)
            .await
            .map_err(|e| CryptoError::DecryptionFailed {
                request_id: request_id.clone(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| CryptoError::TokenMissing(request_id.clone()))?;

        let token = operation
            .token
            .ok_or_else(|| CryptoError::TokenMissing(request_id.clone()))?;

        let decrypted = match self.client.decrypt(&token, content).await {
            Ok(decrypted) => decrypted,
            Err(e) => {
                if let Err(store_err) = transition_status(
                    self.store.as_ref(),
                    &request_id,
                    OperationStatus::Failed,
                    Some(&e.to_string()),
                )
                .await
                {
                    error!(request_id = %request_id, error = %store_err, "Failed to record decrypt failure");
                }
                return Err(e);
            }
        };

        self.store
            .set_processed_content(&request_id, &decrypted)
            .await
            .map_err(|e| CryptoError::DecryptionFailed {
                request_id: request_id.clone(),
                reason: e.to_string(),
            })?;
        transition_status(
            self.store.as_ref(),
            &request_id,
            OperationStatus::Processed,
            None,
        )
        .await
        .map_err(|e| CryptoError::DecryptionFailed {
            request_id: request_id.clone(),
            reason: e.to_string(),
        })?;

        info!(request_id = %request_id, size = decrypted.len(), "File decrypted");
        Ok(decrypted)
    }

    /// Encrypt file content, or pass it through untouched when encryption
    /// is disabled in configuration.
    #[instrument(skip(self, content), fields(file_name = %file_name, size = content.len()))]
    pub async fn encrypt_file(
        &self,
        file_name: &str,
        content: &[u8],
    ) -> Result<(String, Vec<u8>), CryptoError> {
        let (tx, rx) = oneshot::channel::<()>();
        let request_id = self
            .begin_operation(
                OperationType::Encryption,
                file_name,
                Box::new(move || {
                    let _ = tx.send(());
                    Ok(())
                }),
            )
            .await?;

        self.store
            .set_original_content(&request_id, content)
            .await
            .map_err(|e| CryptoError::EncryptionFailed {
                request_id: request_id.clone(),
                reason: e.to_string(),
            })?;

        if !self.config.encryption_enabled {
            info!(request_id = %request_id, "Encryption disabled, passing content through");
            self.registry.remove(&request_id).await;
            self.store
                .set_processed_content(&request_id, content)
                .await
                .map_err(|e| CryptoError::EncryptionFailed {
                    request_id: request_id.clone(),
                    reason: e.to_string(),
                })?;
            transition_status(
                self.store.as_ref(),
                &request_id,
                OperationStatus::Processed,
                None,
            )
            .await
            .map_err(|e| CryptoError::EncryptionFailed {
                request_id: request_id.clone(),
                reason: e.to_string(),
            })?;
            return Ok((request_id, content.to_vec()));
        }

        let wait = Duration::from_secs(self.config.decrypt_wait_seconds);
        if tokio::time::timeout(wait, rx).await.is_err() {
            warn!(request_id = %request_id, "Timed out waiting for encrypt token");
            if let Err(e) = transition_status(
                self.store.as_ref(),
                &request_id,
                OperationStatus::Timeout,
                Some("Timed out waiting for crypto callback"),
            )
            .await
            {
                error!(request_id = %request_id, error = %e, "Failed to record timeout");
            }
            return Err(CryptoError::WaitTimeout(self.config.decrypt_wait_seconds));
        }

        let operation = self
            .store
            .find(&request_id)
            .await
            .map_err(|e| CryptoError::EncryptionFailed {
                request_id: request_id.clone(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| CryptoError::TokenMissing(request_id.clone()))?;
        let token = operation
            .token
            .ok_or_else(|| CryptoError::TokenMissing(request_id.clone()))?;

        let encrypted = match self.client.encrypt(&token, content).await {
            Ok(encrypted) => encrypted,
            Err(e) => {
                if let Err(store_err) = transition_status(
                    self.store.as_ref(),
                    &request_id,
                    OperationStatus::Failed,
                    Some(&e.to_string()),
                )
                .await
                {
                    error!(request_id = %request_id, error = %store_err, "Failed to record encrypt failure");
                }
                return Err(e);
            }
        };

        self.store
            .set_processed_content(&request_id, &encrypted)
            .await
            .map_err(|e| CryptoError::EncryptionFailed {
                request_id: request_id.clone(),
                reason: e.to_string(),
            })?;
        transition_status(
            self.store.as_ref(),
            &request_id,
            OperationStatus::Processed,
            None,
        )
        .await
        .map_err(|e| CryptoError::EncryptionFailed {
            request_id: request_id.clone(),
            reason: e.to_string(),
        })?;

        info!(request_id = %request_id, "File encrypted");
        Ok((request_id, encrypted))
    }
}
