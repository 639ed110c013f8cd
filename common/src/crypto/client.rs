// HTTP client for the external crypto service

use crate::config::CryptoConfig;
use crate::errors::CryptoError;
use crate::models::OperationType;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Interface to the crypto service. Token issuance is asynchronous: the
/// service acknowledges the request and answers later via callback.
#[async_trait]
pub trait CryptoClient: Send + Sync {
    /// Ask the service to issue a token for an operation
    async fn request_token(
        &self,
        request_id: &str,
        operation_type: OperationType,
        file_name: &str,
    ) -> Result<(), CryptoError>;

    /// Encrypt content with a previously issued token
    async fn encrypt(&self, token: &str, content: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt content with a previously issued token
    async fn decrypt(&self, token: &str, content: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    request_id: &'a str,
    app_code: &'a str,
    operation_type: String,
    file_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CryptRequest<'a> {
    token: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CryptResponse {
    content: String,
}

/// reqwest-backed implementation
pub struct HttpCryptoClient {
    client: reqwest::Client,
    base_url: String,
    app_code: String,
}

impl HttpCryptoClient {
    pub fn new(config: &CryptoConfig) -> Result<Self, CryptoError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CryptoError::TokenRequestFailed(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_code: config.app_code.clone(),
        })
    }

    async fn crypt_call(
        &self,
        path: &str,
        token: &str,
        content: &[u8],
    ) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&CryptRequest {
                token,
                content: BASE64.encode(content),
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;

        let body: CryptResponse = response.json().await.map_err(|e| e.to_string())?;
        // Payloads travel base64-encoded over JSON
        BASE64
            .decode(body.content.as_bytes())
            .map_err(|e| format!("Invalid base64 payload: {}", e))
    }
}

#[async_trait]
impl CryptoClient for HttpCryptoClient {
    #[instrument(skip(self))]
    async fn request_token(
        &self,
        request_id: &str,
        operation_type: OperationType,
        file_name: &str,
    ) -> Result<(), CryptoError> {
        debug!(request_id = request_id, "Requesting crypto token");

        self.client
            .post(format!("{}/api/v1/tokens", self.base_url))
            .json(&TokenRequest {
                request_id,
                app_code: &self.app_code,
                operation_type: operation_type.to_string(),
                file_name,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CryptoError::TokenRequestFailed(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self, token, content), fields(size = content.len()))]
    async fn encrypt(&self, token: &str, content: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.crypt_call("/api/v1/encrypt", token, content)
            .await
            .map_err(|reason| CryptoError::EncryptionFailed {
                request_id: String::new(),
                reason,
            })
    }

    #[instrument(skip(self, token, content), fields(size = content.len()))]
    async fn decrypt(&self, token: &str, content: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.crypt_call("/api/v1/decrypt", token, content)
            .await
            .map_err(|reason| CryptoError::DecryptionFailed {
                request_id: String::new(),
                reason,
            })
    }
}
