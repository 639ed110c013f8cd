// Agency response download and reconciliation
//
// Each run lists the agency drop directory, groups files by their
// 14-digit batch timestamp, and processes groups oldest first. A group
// failing never touches the others; files in a group are downloaded
// sequentially because the agency server rejects parallel channels.

pub mod apply;
pub mod metrics;
pub mod parse;
pub mod validate;

pub use apply::{apply_all, apply_exceptions, ApplyOutcome, ApplyStats, StatusApplier};
pub use metrics::RunMetrics;
pub use parse::{parse_control_totals, parse_exception_report, parse_response_file};
pub use validate::{run_pipeline, PipelineOutcome, ValidatedRecord};

use crate::config::DownloadConfig;
use crate::crypto::CryptoService;
use crate::errors::CryptoError;
use crate::models::ExceptionRecord;
use crate::transport::{BlobStorage, SftpClient};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Decryption seam used by the orchestrator
#[async_trait]
pub trait FileDecryptor: Send + Sync {
    async fn decrypt_file(&self, file_name: &str, content: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

#[async_trait]
impl FileDecryptor for CryptoService {
    async fn decrypt_file(&self, file_name: &str, content: &[u8]) -> Result<Vec<u8>, CryptoError> {
        CryptoService::decrypt_file(self, file_name, content).await
    }
}

/// The files of one batch, tied together by timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileGroup {
    pub timestamp: String,
    pub main: Option<String>,
    pub totals: Option<String>,
    pub exceptions: Option<String>,
}

/// What happened to one group during a run
#[derive(Debug, Clone, Default)]
pub struct GroupReport {
    pub timestamp: String,
    pub records_parsed: usize,
    pub records_kept: usize,
    pub records_rejected: usize,
    pub duplicates_removed: usize,
    pub apply_stats: ApplyStats,
    pub exceptions: usize,
    pub exception_stats: ApplyStats,
    pub error: Option<String>,
}

/// Outcome of a full run
#[derive(Debug, Default)]
pub struct RunReport {
    pub groups: Vec<GroupReport>,
    pub metrics: RunMetrics,
}

impl RunReport {
    pub fn failed_groups(&self) -> usize {
        self.groups.iter().filter(|g| g.error.is_some()).count()
    }
}

/// Group directory entries by batch timestamp.
///
/// Files that match none of the known patterns are ignored; the agency
/// drops unrelated housekeeping files in the same directory.
pub fn group_files(
    file_names: &[String],
    response_prefix: &str,
    report_prefix: &str,
) -> Vec<FileGroup> {
    let main_re = Regex::new(&format!(r"^{}_(\d{{14}})$", regex::escape(response_prefix)));
    let tot_re = Regex::new(&format!(
        r"^{}_(\d{{14}})\.TOT$",
        regex::escape(report_prefix)
    ));
    let exp_re = Regex::new(&format!(
        r"^{}_(\d{{14}})\.EXP$",
        regex::escape(report_prefix)
    ));
    let (main_re, tot_re, exp_re) = match (main_re, tot_re, exp_re) {
        (Ok(m), Ok(t), Ok(e)) => (m, t, e),
        _ => return Vec::new(),
    };

    fn entry<'a>(groups: &'a mut BTreeMap<String, FileGroup>, ts: &str) -> &'a mut FileGroup {
        groups.entry(ts.to_string()).or_insert_with(|| FileGroup {
            timestamp: ts.to_string(),
            ..Default::default()
        })
    }

    let mut groups: BTreeMap<String, FileGroup> = BTreeMap::new();
    for name in file_names {
        if let Some(ts) = main_re.captures(name).and_then(|c| c.get(1)) {
            entry(&mut groups, ts.as_str()).main = Some(name.clone());
        } else if let Some(ts) = tot_re.captures(name).and_then(|c| c.get(1)) {
            entry(&mut groups, ts.as_str()).totals = Some(name.clone());
        } else if let Some(ts) = exp_re.captures(name).and_then(|c| c.get(1)) {
            entry(&mut groups, ts.as_str()).exceptions = Some(name.clone());
        }
    }

    // BTreeMap iteration gives oldest batch first
    groups.into_values().collect()
}

/// Drives the download, decrypt, validate, apply, reconcile, cleanup
/// sequence for every pending batch.
pub struct DownloadOrchestrator {
    sftp: Arc<dyn SftpClient>,
    blob: Arc<dyn BlobStorage>,
    decryptor: Arc<dyn FileDecryptor>,
    applier: Arc<dyn StatusApplier>,
    config: DownloadConfig,
}

impl DownloadOrchestrator {
    pub fn new(
        sftp: Arc<dyn SftpClient>,
        blob: Arc<dyn BlobStorage>,
        decryptor: Arc<dyn FileDecryptor>,
        applier: Arc<dyn StatusApplier>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            sftp,
            blob,
            decryptor,
            applier,
            config,
        }
    }

    /// Run one full reconciliation pass
    #[instrument(skip(self))]
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::default();

        let file_names = match self
            .sftp
            .list_files(&self.config.server_name, &self.config.remote_dir)
            .await
        {
            Ok(names) => names,
            Err(e) => {
                error!(error = %e, "Failed to list agency drop directory");
                return report;
            }
        };

        let groups = group_files(
            &file_names,
            &self.config.response_prefix,
            &self.config.report_prefix,
        );
        info!(files = file_names.len(), groups = groups.len(), "Listed agency drop directory");

        // Decrypted files, cached by name for the remainder of the run
        let mut cache: HashMap<String, Vec<u8>> = HashMap::new();

        for group in groups {
            let timestamp = group.timestamp.clone();
            match self
                .process_group(&group, &mut cache, &mut report.metrics)
                .await
            {
                Ok(mut group_report) => {
                    group_report.timestamp = timestamp;
                    report.groups.push(group_report);
                }
                Err(e) => {
                    // One bad batch must not block the ones behind it
                    error!(timestamp = %timestamp, error = %e, "Batch processing failed");
                    report.metrics.increment("groupsFailed");
                    report.groups.push(GroupReport {
                        timestamp,
                        error: Some(e),
                        ..Default::default()
                    });
                }
            }
        }

        // One summable line per run
        if !report.metrics.is_empty() {
            info!("{}", report.metrics);
        }
        report
    }

    /// Download a file and run it through the decryptor, caching the
    /// result by name so nothing is fetched twice in one run.
    async fn fetch_file(
        &self,
        name: &str,
        cache: &mut HashMap<String, Vec<u8>>,
        metrics: &mut RunMetrics,
    ) -> Result<Vec<u8>, String> {
        if let Some(content) = cache.get(name) {
            return Ok(content.clone());
        }

        let path = format!("{}/{}", self.config.remote_dir.trim_end_matches('/'), name);
        let downloaded = self
            .sftp
            .download(&self.config.server_name, &path)
            .await
            .map_err(|e| format!("download {}: {}", name, e))?;
        metrics.increment("filesDownloaded");

        let decrypted = self
            .decryptor
            .decrypt_file(name, &downloaded)
            .await
            .map_err(|e| format!("decrypt {}: {}", name, e))?;
        metrics.increment("filesDecrypted");

        cache.insert(name.to_string(), decrypted.clone());
        Ok(decrypted)
    }

    async fn process_group(
        &self,
        group: &FileGroup,
        cache: &mut HashMap<String, Vec<u8>>,
        metrics: &mut RunMetrics,
    ) -> Result<GroupReport, String> {
        let mut group_report = GroupReport::default();

        let main_name = match &group.main {
            Some(name) => name,
            None => {
                // Usually the agency is still writing the batch; the
                // report files stay behind for the next run to pick up
                return Err(format!(
                    "no response file for batch {}",
                    group.timestamp
                ));
            }
        };

        let decrypted = self.fetch_file(main_name, cache, metrics).await?;

        // Audit mirror; the batch still applies if it cannot be written
        let blob_path = format!(
            "{}/{}",
            self.config.blob_folder.trim_end_matches('/'),
            main_name
        );
        if let Err(e) = self.blob.put_object(&blob_path, &decrypted).await {
            warn!(file = %main_name, error = %e, "Blob archive failed");
        }

        let parsed = parse_response_file(&decrypted)
            .map_err(|e| format!("parse {}: {}", main_name, e))?;
        group_report.records_parsed = parsed.records.len();
        metrics.add("recordsParsed", parsed.records.len() as u64);

        // Reports are advisory: any failure here degrades to a warning
        // and the batch proceeds on the main file alone
        let totals = match &group.totals {
            Some(tot_name) => match self.fetch_file(tot_name, cache, metrics).await {
                Ok(content) => match parse_control_totals(&content) {
                    Ok(totals) => Some(totals),
                    Err(e) => {
                        warn!(file = %tot_name, error = %e, "Control totals unreadable");
                        None
                    }
                },
                Err(e) => {
                    warn!(file = %tot_name, error = %e, "Control totals unavailable");
                    None
                }
            },
            None => None,
        };

        let exceptions: Vec<ExceptionRecord> = match &group.exceptions {
            Some(exp_name) => match self.fetch_file(exp_name, cache, metrics).await {
                Ok(content) => match parse_exception_report(&content) {
                    Ok(exceptions) => exceptions,
                    Err(e) => {
                        warn!(file = %exp_name, error = %e, "Exception report unreadable");
                        Vec::new()
                    }
                },
                Err(e) => {
                    warn!(file = %exp_name, error = %e, "Exception report unavailable");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let outcome = run_pipeline(parsed.records, main_name);
        group_report.records_kept = outcome.records.len();
        group_report.records_rejected = outcome.rejected;
        group_report.duplicates_removed = outcome.duplicates_removed;
        metrics.add("recordsRejected", outcome.rejected as u64);
        metrics.add("duplicatesRemoved", outcome.duplicates_removed as u64);
        metrics.add(
            "recordsFlagged",
            outcome.records.iter().filter(|r| r.flag.is_some()).count() as u64,
        );

        let stats = apply_all(self.applier.as_ref(), &outcome.records).await;
        group_report.apply_stats = stats;
        metrics.add("recordsApplied", stats.updated as u64);
        metrics.add("recordsUnmatched", stats.unmatched as u64);
        metrics.add("recordsApplyFailed", stats.failed as u64);

        group_report.exceptions = exceptions.len();
        metrics.add("exceptionsReported", exceptions.len() as u64);
        for exception in &exceptions {
            warn!(
                serial_no = %exception.serial_no,
                id_number = %exception.id_number,
                status = %exception.exception_status,
                "Agency exception"
            );
        }
        let exception_stats = apply_exceptions(self.applier.as_ref(), &exceptions).await;
        group_report.exception_stats = exception_stats;
        metrics.add("exceptionsApplied", exception_stats.updated as u64);
        metrics.add("exceptionsUnmatched", exception_stats.unmatched as u64);
        metrics.add("exceptionsApplyFailed", exception_stats.failed as u64);

        if let Some(totals) = &totals {
            self.reconcile_totals(&group.timestamp, totals, &group_report, metrics);
        }

        self.cleanup_group(group, metrics).await;

        info!(
            timestamp = %group.timestamp,
            parsed = group_report.records_parsed,
            kept = group_report.records_kept,
            applied = group_report.apply_stats.updated,
            exceptions = group_report.exceptions,
            "Batch processed"
        );
        Ok(group_report)
    }

    fn reconcile_totals(
        &self,
        timestamp: &str,
        totals: &HashMap<String, u64>,
        group_report: &GroupReport,
        metrics: &mut RunMetrics,
    ) {
        if let Some(&declared) = totals.get("TOTAL_RECORDS_READ") {
            if declared != group_report.records_parsed as u64 {
                warn!(
                    timestamp = %timestamp,
                    declared = declared,
                    parsed = group_report.records_parsed,
                    "Control total mismatch"
                );
            }
        }

        // The agency's own counters travel with the run summary
        for (total_key, metric_key) in [
            ("TOTAL_RECORDS_READ", "totalRecordsRead"),
            ("RECORDS_MATCHED", "recordsMatched"),
            ("INVALID_UIN_FIN", "invalidUinFin"),
            ("VALID_UIN_FIN_UNMATCHED", "validUinFinUnmatched"),
        ] {
            if let Some(&value) = totals.get(total_key) {
                metrics.add(metric_key, value);
            }
        }
    }

    /// Remove a processed batch's files from the drop directory.
    /// Best-effort: a leftover file only means it is seen (and skipped
    /// as already-applied work) on the next run.
    async fn cleanup_group(&self, group: &FileGroup, metrics: &mut RunMetrics) {
        let names = [&group.main, &group.totals, &group.exceptions];
        for name in names.into_iter().flatten() {
            let path = format!("{}/{}", self.config.remote_dir.trim_end_matches('/'), name);
            match self.sftp.delete(&self.config.server_name, &path).await {
                Ok(()) => metrics.increment("filesCleaned"),
                Err(e) => warn!(file = %name, error = %e, "Cleanup failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ApplyError, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSftp {
        downloads: AtomicUsize,
    }

    #[async_trait]
    impl SftpClient for CountingSftp {
        async fn list_files(
            &self,
            _server: &str,
            _remote_dir: &str,
        ) -> Result<Vec<String>, TransportError> {
            Ok(Vec::new())
        }

        async fn download(
            &self,
            _server: &str,
            _remote_path: &str,
        ) -> Result<Vec<u8>, TransportError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(b"payload".to_vec())
        }

        async fn upload(
            &self,
            _server: &str,
            _remote_path: &str,
            _content: &[u8],
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn delete(&self, _server: &str, _remote_path: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct NullBlob;

    #[async_trait]
    impl BlobStorage for NullBlob {
        async fn put_object(&self, _path: &str, _data: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn get_object(&self, _path: &str) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::BlobFailed("empty".to_string()))
        }

        async fn delete_object(&self, _path: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct PassthroughDecryptor;

    #[async_trait]
    impl FileDecryptor for PassthroughDecryptor {
        async fn decrypt_file(
            &self,
            _file_name: &str,
            content: &[u8],
        ) -> Result<Vec<u8>, CryptoError> {
            Ok(content.to_vec())
        }
    }

    struct NullApplier;

    #[async_trait]
    impl StatusApplier for NullApplier {
        async fn apply(&self, _record: &ValidatedRecord) -> Result<ApplyOutcome, ApplyError> {
            Ok(ApplyOutcome::Updated)
        }

        async fn apply_exception(
            &self,
            _exception: &ExceptionRecord,
        ) -> Result<ApplyOutcome, ApplyError> {
            Ok(ApplyOutcome::Updated)
        }
    }

    fn test_config() -> DownloadConfig {
        DownloadConfig {
            server_name: "agency".to_string(),
            remote_dir: "/outbound".to_string(),
            blob_folder: "agency-responses".to_string(),
            response_prefix: "NRO2URA".to_string(),
            report_prefix: "REPORT".to_string(),
            run_interval_seconds: 3600,
        }
    }

    #[tokio::test]
    async fn test_fetched_files_are_cached_for_the_run() {
        let sftp = Arc::new(CountingSftp {
            downloads: AtomicUsize::new(0),
        });
        let orchestrator = DownloadOrchestrator::new(
            sftp.clone(),
            Arc::new(NullBlob),
            Arc::new(PassthroughDecryptor),
            Arc::new(NullApplier),
            test_config(),
        );

        let mut cache = HashMap::new();
        let mut metrics = RunMetrics::default();
        let first = orchestrator
            .fetch_file("NRO2URA_20250101120000", &mut cache, &mut metrics)
            .await
            .unwrap();
        let second = orchestrator
            .fetch_file("NRO2URA_20250101120000", &mut cache, &mut metrics)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(sftp.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.get("filesDownloaded"), 1);
        assert_eq!(metrics.get("filesDecrypted"), 1);
    }

    #[test]
    fn test_grouping_by_timestamp() {
        let names = vec![
            "NRO2URA_20250101120000".to_string(),
            "REPORT_20250101120000.TOT".to_string(),
            "REPORT_20250101120000.EXP".to_string(),
            "NRO2URA_20250202130000".to_string(),
            "README.txt".to_string(),
        ];
        let groups = group_files(&names, "NRO2URA", "REPORT");

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].timestamp, "20250101120000");
        assert_eq!(groups[0].main.as_deref(), Some("NRO2URA_20250101120000"));
        assert_eq!(
            groups[0].totals.as_deref(),
            Some("REPORT_20250101120000.TOT")
        );
        assert_eq!(
            groups[0].exceptions.as_deref(),
            Some("REPORT_20250101120000.EXP")
        );
        assert_eq!(groups[1].timestamp, "20250202130000");
        assert!(groups[1].totals.is_none());
    }

    #[test]
    fn test_grouping_rejects_near_misses() {
        let names = vec![
            "NRO2URA_2025010112000".to_string(),   // 13 digits
            "NRO2URA_20250101120000X".to_string(), // trailing junk
            "REPORT_20250101120000.LOG".to_string(),
            "nro2ura_20250101120000".to_string(), // wrong case
        ];
        let groups = group_files(&names, "NRO2URA", "REPORT");
        assert!(groups.is_empty());
    }

    #[test]
    fn test_groups_ordered_oldest_first() {
        let names = vec![
            "NRO2URA_20250301000000".to_string(),
            "NRO2URA_20240101000000".to_string(),
            "NRO2URA_20250101000000".to_string(),
        ];
        let groups = group_files(&names, "NRO2URA", "REPORT");
        let order: Vec<&str> = groups.iter().map(|g| g.timestamp.as_str()).collect();
        assert_eq!(
            order,
            vec!["20240101000000", "20250101000000", "20250301000000"]
        );
    }
}
