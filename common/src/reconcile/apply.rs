// Applying validated agency records to offence notice records

use crate::errors::ApplyError;
use crate::models::ExceptionRecord;
use crate::reconcile::validate::ValidatedRecord;
use async_trait::async_trait;

/// Result of applying one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A notice record was updated
    Updated,
    /// No notice matched the record's keys
    NoMatch,
}

/// Writes agency response data back onto offence notice records.
///
/// Implementations match on UIN and agency reference number and carry
/// the soft flag and reasons into the notice's audit fields.
#[async_trait]
pub trait StatusApplier: Send + Sync {
    async fn apply(&self, record: &ValidatedRecord) -> Result<ApplyOutcome, ApplyError>;

    /// Flag the notice named by an agency exception-report row
    async fn apply_exception(&self, exception: &ExceptionRecord)
        -> Result<ApplyOutcome, ApplyError>;
}

/// Tally of a batch application pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyStats {
    pub updated: usize,
    pub unmatched: usize,
    pub failed: usize,
}

/// Apply every record, isolating failures: one record failing to apply
/// never stops the rest of the batch.
pub async fn apply_all(applier: &dyn StatusApplier, records: &[ValidatedRecord]) -> ApplyStats {
    let mut stats = ApplyStats::default();
    for record in records {
        match applier.apply(record).await {
            Ok(ApplyOutcome::Updated) => stats.updated += 1,
            Ok(ApplyOutcome::NoMatch) => {
                tracing::warn!(uin = %record.record.uin, "No notice matched record");
                stats.unmatched += 1;
            }
            Err(e) => {
                tracing::error!(uin = %record.record.uin, error = %e, "Failed to apply record");
                stats.failed += 1;
            }
        }
    }
    stats
}

/// Cross-reference agency exception rows onto their notices, with the
/// same per-row isolation as `apply_all`.
pub async fn apply_exceptions(
    applier: &dyn StatusApplier,
    exceptions: &[ExceptionRecord],
) -> ApplyStats {
    let mut stats = ApplyStats::default();
    for exception in exceptions {
        match applier.apply_exception(exception).await {
            Ok(ApplyOutcome::Updated) => stats.updated += 1,
            Ok(ApplyOutcome::NoMatch) => {
                tracing::warn!(id_number = %exception.id_number, "No notice matched exception");
                stats.unmatched += 1;
            }
            Err(e) => {
                tracing::error!(id_number = %exception.id_number, error = %e, "Failed to apply exception");
                stats.failed += 1;
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::parse::ResponseRecord;
    use tokio::sync::Mutex;

    struct MockApplier {
        outcomes: Mutex<Vec<Result<ApplyOutcome, ApplyError>>>,
        applied_uins: Mutex<Vec<String>>,
        exception_ids: Mutex<Vec<String>>,
    }

    impl MockApplier {
        fn new(outcomes: Vec<Result<ApplyOutcome, ApplyError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                applied_uins: Mutex::new(Vec::new()),
                exception_ids: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StatusApplier for MockApplier {
        async fn apply(&self, record: &ValidatedRecord) -> Result<ApplyOutcome, ApplyError> {
            self.applied_uins
                .lock()
                .await
                .push(record.record.uin.clone());
            self.outcomes
                .lock()
                .await
                .remove(0)
        }

        async fn apply_exception(
            &self,
            exception: &ExceptionRecord,
        ) -> Result<ApplyOutcome, ApplyError> {
            self.exception_ids
                .lock()
                .await
                .push(exception.id_number.clone());
            self.outcomes
                .lock()
                .await
                .remove(0)
        }
    }

    fn validated(uin: &str) -> ValidatedRecord {
        ValidatedRecord {
            record: ResponseRecord {
                uin: uin.to_string(),
                ..Default::default()
            },
            flag: None,
            reasons: Vec::new(),
            file_name: "NRO2URA_20250101120000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_batch() {
        let applier = MockApplier::new(vec![
            Ok(ApplyOutcome::Updated),
            Err(ApplyError::UpdateFailed("deadlock".to_string())),
            Ok(ApplyOutcome::NoMatch),
        ]);
        let records = vec![
            validated("S1234567A"),
            validated("T7654321B"),
            validated("F1111111C"),
        ];

        let stats = apply_all(&applier, &records).await;

        assert_eq!(stats.updated, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(applier.applied_uins.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_exceptions_applied_with_isolation() {
        let applier = MockApplier::new(vec![
            Ok(ApplyOutcome::Updated),
            Err(ApplyError::UpdateFailed("deadlock".to_string())),
            Ok(ApplyOutcome::NoMatch),
        ]);
        let exceptions = vec![
            ExceptionRecord {
                serial_no: "1".to_string(),
                id_number: "F9999999X".to_string(),
                exception_status: "UIN NOT FOUND".to_string(),
            },
            ExceptionRecord {
                serial_no: "2".to_string(),
                id_number: "S1234567A".to_string(),
                exception_status: "DUPLICATE".to_string(),
            },
            ExceptionRecord {
                serial_no: "3".to_string(),
                id_number: "T7654321B".to_string(),
                exception_status: "UIN NOT FOUND".to_string(),
            },
        ];

        let stats = apply_exceptions(&applier, &exceptions).await;

        assert_eq!(stats.updated, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(
            *applier.exception_ids.lock().await,
            vec!["F9999999X", "S1234567A", "T7654321B"]
        );
    }
}
