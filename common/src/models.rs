// Domain models for crypto operations and agency response processing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Direction of a crypto operation submitted to the external service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Encryption,
    Decryption,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Encryption => write!(f, "ENCRYPTION"),
            OperationType::Decryption => write!(f, "DECRYPTION"),
        }
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENCRYPTION" => Ok(OperationType::Encryption),
            "DECRYPTION" => Ok(OperationType::Decryption),
            _ => Err(format!("Unknown operation type: {}", s)),
        }
    }
}

/// Lifecycle status of a crypto operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Requested,
    InProgress,
    Processed,
    Uploaded,
    Completed,
    CompletedWithErrors,
    Failed,
    Timeout,
}

impl OperationStatus {
    /// Statuses from which a transition to this one is expected.
    /// Unexpected transitions are applied anyway, with a warning.
    pub fn expected_predecessors(&self) -> &'static [OperationStatus] {
        match self {
            OperationStatus::Requested => &[],
            OperationStatus::InProgress => &[OperationStatus::Requested],
            OperationStatus::Processed => &[OperationStatus::InProgress],
            OperationStatus::Uploaded => &[OperationStatus::Processed],
            OperationStatus::Completed => {
                &[OperationStatus::Processed, OperationStatus::Uploaded]
            }
            OperationStatus::CompletedWithErrors => {
                &[OperationStatus::Processed, OperationStatus::Uploaded]
            }
            OperationStatus::Failed => &[
                OperationStatus::Requested,
                OperationStatus::InProgress,
                OperationStatus::Processed,
            ],
            OperationStatus::Timeout => {
                &[OperationStatus::Requested, OperationStatus::InProgress]
            }
        }
    }

    /// True when no further processing will happen for the operation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed
                | OperationStatus::CompletedWithErrors
                | OperationStatus::Failed
                | OperationStatus::Timeout
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Requested => "REQUESTED",
            OperationStatus::InProgress => "IN_PROGRESS",
            OperationStatus::Processed => "PROCESSED",
            OperationStatus::Uploaded => "UPLOADED",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            OperationStatus::Failed => "FAILED",
            OperationStatus::Timeout => "TIMEOUT",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUESTED" => Ok(OperationStatus::Requested),
            "IN_PROGRESS" => Ok(OperationStatus::InProgress),
            "PROCESSED" => Ok(OperationStatus::Processed),
            "UPLOADED" => Ok(OperationStatus::Uploaded),
            "COMPLETED" => Ok(OperationStatus::Completed),
            "COMPLETED_WITH_ERRORS" => Ok(OperationStatus::CompletedWithErrors),
            "FAILED" => Ok(OperationStatus::Failed),
            "TIMEOUT" => Ok(OperationStatus::Timeout),
            _ => Err(format!("Unknown operation status: {}", s)),
        }
    }
}

/// One crypto operation tracked in the durable store.
///
/// The store, not the in-memory registry, is the source of truth for
/// tokens, content, and status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptOperation {
    pub request_id: String,
    pub operation_type: OperationType,
    pub file_name: String,
    pub status: OperationStatus,
    pub token: Option<String>,
    pub original_content: Option<Vec<u8>>,
    pub processed_content: Option<Vec<u8>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CryptOperation {
    pub fn new(request_id: String, operation_type: OperationType, file_name: String) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            operation_type,
            file_name,
            status: OperationStatus::Requested,
            token: None,
            original_content: None,
            processed_content: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Builds a correlation id in the form `<app_code>-<uuid>`
pub fn new_request_id(app_code: &str) -> String {
    format!("{}-{}", app_code, Uuid::new_v4())
}

/// One row from the exception report data section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub serial_no: String,
    pub id_number: String,
    pub exception_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in [
            "REQUESTED",
            "IN_PROGRESS",
            "PROCESSED",
            "UPLOADED",
            "COMPLETED",
            "COMPLETED_WITH_ERRORS",
            "FAILED",
            "TIMEOUT",
        ] {
            let parsed: OperationStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("DONE".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OperationStatus::Completed.is_terminal());
        assert!(OperationStatus::Timeout.is_terminal());
        assert!(!OperationStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_request_id_format() {
        let id = new_request_id("OCMSLTA001");
        assert!(id.starts_with("OCMSLTA001-"));
        let uuid_part = id.strip_prefix("OCMSLTA001-").unwrap();
        assert!(Uuid::parse_str(uuid_part).is_ok());
    }

    #[test]
    fn test_new_operation_defaults() {
        let op = CryptOperation::new(
            new_request_id("OCMSLTA001"),
            OperationType::Decryption,
            "NRO2URA_20250101120000".to_string(),
        );
        assert_eq!(op.status, OperationStatus::Requested);
        assert!(op.token.is_none());
        assert!(op.error_message.is_none());
    }
}
