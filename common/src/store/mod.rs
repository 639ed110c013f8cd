// Durable operation store
//
// The store is the source of truth for crypto operations. The in-memory
// callback registry only correlates request ids with completion actions.

pub mod postgres;

pub use postgres::{DbPool, PgOperationStore};

use crate::errors::StoreError;
use crate::models::{CryptOperation, OperationStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

/// Persistence interface for crypto operations
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Insert a newly requested operation
    async fn insert(&self, operation: &CryptOperation) -> Result<(), StoreError>;

    /// Look up an operation by request id
    async fn find(&self, request_id: &str) -> Result<Option<CryptOperation>, StoreError>;

    /// Update the lifecycle status, optionally recording an error message
    async fn update_status(
        &self,
        request_id: &str,
        status: OperationStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Record the token issued by the crypto service
    async fn set_token(&self, request_id: &str, token: &str) -> Result<(), StoreError>;

    /// Record the original (pre-crypto) file content
    async fn set_original_content(
        &self,
        request_id: &str,
        content: &[u8],
    ) -> Result<(), StoreError>;

    /// Record the processed (encrypted or decrypted) file content
    async fn set_processed_content(
        &self,
        request_id: &str,
        content: &[u8],
    ) -> Result<(), StoreError>;

    /// Drop stored file content once it has been delivered
    async fn clear_content(&self, request_id: &str) -> Result<(), StoreError>;
}

/// Update an operation's status, logging a warning when the transition
/// does not follow the expected lifecycle. The update is applied either way.
pub async fn transition_status(
    store: &dyn OperationStore,
    request_id: &str,
    status: OperationStatus,
    error_message: Option<&str>,
) -> Result<(), StoreError> {
    if let Some(current) = store.find(request_id).await? {
        let expected = status.expected_predecessors();
        if !expected.is_empty() && !expected.contains(&current.status) {
            warn!(
                request_id = request_id,
                from = %current.status,
                to = %status,
                "Unexpected status transition"
            );
        }
    }
    store.update_status(request_id, status, error_message).await
}

/// In-memory store used by tests and local runs without a database
#[derive(Default)]
pub struct InMemoryOperationStore {
    operations: RwLock<HashMap<String, CryptOperation>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_operation<F>(&self, request_id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut CryptOperation),
    {
        let mut operations = self.operations.write().await;
        let op = operations
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.to_string()))?;
        f(op);
        op.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn insert(&self, operation: &CryptOperation) -> Result<(), StoreError> {
        let mut operations = self.operations.write().await;
        if operations.contains_key(&operation.request_id) {
            return Err(StoreError::DuplicateRequestId(
                operation.request_id.clone(),
            ));
        }
        operations.insert(operation.request_id.clone(), operation.clone());
        Ok(())
    }

    async fn find(&self, request_id: &str) -> Result<Option<CryptOperation>, StoreError> {
        Ok(self.operations.read().await.get(request_id).cloned())
    }

    async fn update_status(
        &self,
        request_id: &str,
        status: OperationStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_operation(request_id, |op| {
            op.status = status;
            if let Some(msg) = error_message {
                op.error_message = Some(msg.to_string());
            }
        })
        .await
    }

    async fn set_token(&self, request_id: &str, token: &str) -> Result<(), StoreError> {
        self.with_operation(request_id, |op| op.token = Some(token.to_string()))
            .await
    }

    async fn set_original_content(
        &self,
        request_id: &str,
        content: &[u8],
    ) -> Result<(), StoreError> {
        self.with_operation(request_id, |op| op.original_content = Some(content.to_vec()))
            .await
    }

    async fn set_processed_content(
        &self,
        request_id: &str,
        content: &[u8],
    ) -> Result<(), StoreError> {
        self.with_operation(request_id, |op| {
            op.processed_content = Some(content.to_vec())
        })
        .await
    }

    async fn clear_content(&self, request_id: &str) -> Result<(), StoreError> {
        self.with_operation(request_id, |op| {
            op.original_content = None;
            op.processed_content = None;
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{new_request_id, OperationType};

    fn sample_operation() -> CryptOperation {
        CryptOperation::new(
            new_request_id("OCMSLTA001"),
            OperationType::Decryption,
            "NRO2URA_20250101120000".to_string(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = InMemoryOperationStore::new();
        let op = sample_operation();
        store.insert(&op).await.unwrap();

        let found = store.find(&op.request_id).await.unwrap().unwrap();
        assert_eq!(found.status, OperationStatus::Requested);
    }

    #[tokio::test]
    async fn test_duplicate_request_id_rejected() {
        let store = InMemoryOperationStore::new();
        let op = sample_operation();
        store.insert(&op).await.unwrap();
        assert!(matches!(
            store.insert(&op).await,
            Err(StoreError::DuplicateRequestId(_))
        ));
    }

    #[tokio::test]
    async fn test_update_status_records_error_message() {
        let store = InMemoryOperationStore::new();
        let op = sample_operation();
        store.insert(&op).await.unwrap();

        store
            .update_status(&op.request_id, OperationStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let found = store.find(&op.request_id).await.unwrap().unwrap();
        assert_eq!(found.status, OperationStatus::Failed);
        assert_eq!(found.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_clear_content_drops_both_payloads() {
        let store = InMemoryOperationStore::new();
        let op = sample_operation();
        store.insert(&op).await.unwrap();
        store
            .set_original_content(&op.request_id, b"plain")
            .await
            .unwrap();
        store
            .set_processed_content(&op.request_id, b"cipher")
            .await
            .unwrap();

        store.clear_content(&op.request_id).await.unwrap();

        let found = store.find(&op.request_id).await.unwrap().unwrap();
        assert!(found.original_content.is_none());
        assert!(found.processed_content.is_none());
    }

    #[tokio::test]
    async fn test_transition_status_applies_unexpected_transitions() {
        let store = InMemoryOperationStore::new();
        let op = sample_operation();
        store.insert(&op).await.unwrap();

        // REQUESTED -> UPLOADED skips intermediate states but is applied
        transition_status(&store, &op.request_id, OperationStatus::Uploaded, None)
            .await
            .unwrap();

        let found = store.find(&op.request_id).await.unwrap().unwrap();
        assert_eq!(found.status, OperationStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_missing_operation_update_fails() {
        let store = InMemoryOperationStore::new();
        let result = store
            .update_status("OCMSLTA001-missing", OperationStatus::Failed, None)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
