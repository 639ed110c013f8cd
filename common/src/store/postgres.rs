// PostgreSQL-backed operation store

use crate::config::DatabaseConfig;
use crate::errors::StoreError;
use crate::models::{CryptOperation, OperationStatus, OperationType};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// Database connection pool wrapper
#[derive(Debug, Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    /// Create a new database connection pool
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        info!("Initializing database connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to create database pool");
                StoreError::ConnectionFailed(e.to_string())
            })?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool initialized successfully"
        );

        Ok(Self { pool })
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Perform a health check on the database connection
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Database health check failed");
                StoreError::ConnectionFailed(e.to_string())
            })?;

        tracing::debug!("Database health check passed");
        Ok(())
    }

    /// Close the connection pool gracefully
    #[instrument(skip(self))]
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

/// PostgreSQL implementation of the operation store
pub struct PgOperationStore {
    pool: DbPool,
}

impl PgOperationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<CryptOperation, StoreError> {
        let operation_type: String = row.get("operation_type");
        let status: String = row.get("status");
        Ok(CryptOperation {
            request_id: row.get("request_id"),
            operation_type: OperationType::from_str(&operation_type)
                .map_err(StoreError::QueryFailed)?,
            file_name: row.get("file_name"),
            status: OperationStatus::from_str(&status).map_err(StoreError::QueryFailed)?,
            token: row.get("token"),
            original_content: row.get("original_content"),
            processed_content: row.get("processed_content"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl super::OperationStore for PgOperationStore {
    #[instrument(skip(self, operation), fields(request_id = %operation.request_id))]
    async fn insert(&self, operation: &CryptOperation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO crypt_operations (
                request_id, operation_type, file_name, status,
                token, original_content, processed_content, error_message,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&operation.request_id)
        .bind(operation.operation_type.to_string())
        .bind(&operation.file_name)
        .bind(operation.status.to_string())
        .bind(&operation.token)
        .bind(&operation.original_content)
        .bind(&operation.processed_content)
        .bind(&operation.error_message)
        .bind(operation.created_at)
        .bind(operation.updated_at)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(
            request_id = %operation.request_id,
            operation_type = %operation.operation_type,
            "Operation created"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find(&self, request_id: &str) -> Result<Option<CryptOperation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                request_id, operation_type, file_name, status,
                token, original_content, processed_content, error_message,
                created_at, updated_at
            FROM crypt_operations
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        request_id: &str,
        status: OperationStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE crypt_operations
            SET status = $2,
                error_message = COALESCE($3, error_message),
                updated_at = $4
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(status.to_string())
        .bind(error_message)
        .bind(Utc::now())
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(request_id.to_string()));
        }

        tracing::debug!(request_id = request_id, status = %status, "Operation status updated");
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn set_token(&self, request_id: &str, token: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE crypt_operations
            SET token = $2, updated_at = $3
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(token)
        .bind(Utc::now())
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(request_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, content), fields(content_len = content.len()))]
    async fn set_original_content(
        &self,
        request_id: &str,
        content: &[u8],
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE crypt_operations
            SET original_content = $2, updated_at = $3
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(content)
        .bind(Utc::now())
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(request_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, content), fields(content_len = content.len()))]
    async fn set_processed_content(
        &self,
        request_id: &str,
        content: &[u8],
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE crypt_operations
            SET processed_content = $2, updated_at = $3
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(content)
        .bind(Utc::now())
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(request_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_content(&self, request_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE crypt_operations
            SET original_content = NULL,
                processed_content = NULL,
                updated_at = $2
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(Utc::now())
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(request_id.to_string()));
        }

        tracing::debug!(request_id = request_id, "Stored content cleared");
        Ok(())
    }
}
