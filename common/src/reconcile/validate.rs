// Validation and deduplication pipeline for agency response records
//
// Records missing primary fields are rejected outright. Every other
// problem is a soft flag: the record still flows downstream, carrying
// the first triggering reason as its flag and the complete reason list
// for the audit trail.

use crate::reconcile::parse::ResponseRecord;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, info, instrument};

pub const REASON_MISSING_CRITICAL: &str = "Missing critical fields";
pub const REASON_INVALID_FORMAT: &str = "Invalid field format";
pub const REASON_SYMBOLS: &str = "Critical fields contain symbols";
pub const REASON_INVALID_ADDRESS: &str = "Invalid address";
pub const REASON_LIFE_STATUS: &str = "Inconsistent life status and date of death";

const ADDRESS_TYPES: &[&str] = &["A", "B", "X", "C", "D", "E", "F", "Q", "I"];
const LIFE_STATUSES: &[&str] = &["A", "D"];
const INVALID_ADDRESS_TAGS: &[&str] = &["D", "M", "F", "G", "I", "N", "P", "S"];
const PLACEHOLDER_STREETS: &[&str] = &["NA", "N.A.", "N.A", "NA."];

/// A record that passed the hard checks, with its soft-flag verdict
#[derive(Debug, Clone)]
pub struct ValidatedRecord {
    pub record: ResponseRecord,
    /// First triggering reason, if any check flagged the record
    pub flag: Option<&'static str>,
    /// Every reason that applied, in check order
    pub reasons: Vec<&'static str>,
    /// Response file the record came from
    pub file_name: String,
}

/// Outcome of running the pipeline over a parsed file
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub records: Vec<ValidatedRecord>,
    /// Count of records rejected for missing primary fields
    pub rejected: usize,
    /// Count of records dropped as superseded duplicates
    pub duplicates_removed: usize,
}

fn uin_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[STFGM]\d{7}[A-Z]$").unwrap_or_else(|_| unreachable!()))
}

fn symbol_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9\s-]").unwrap_or_else(|_| unreachable!()))
}

/// Parse the date formats the agency actually sends
pub fn parse_flexible_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for format in ["%Y%m%d", "%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    None
}

fn is_yyyymmdd(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y%m%d").is_ok()
}

fn check_missing_critical(record: &ResponseRecord) -> bool {
    record.name.is_empty()
        || record.date_of_birth.is_empty()
        || record.address_type.is_empty()
        || record.life_status.is_empty()
}

fn check_invalid_format(record: &ResponseRecord, today: NaiveDate) -> bool {
    if !uin_pattern().is_match(&record.uin) {
        return true;
    }
    if !record.date_of_birth.is_empty() {
        match NaiveDate::parse_from_str(&record.date_of_birth, "%Y%m%d") {
            Ok(dob) if dob < today => {}
            _ => return true,
        }
    }
    if !record.address_type.is_empty() && !ADDRESS_TYPES.contains(&record.address_type.as_str()) {
        return true;
    }
    if !record.life_status.is_empty() && !LIFE_STATUSES.contains(&record.life_status.as_str()) {
        return true;
    }
    if !record.invalid_address_tag.is_empty()
        && !INVALID_ADDRESS_TAGS.contains(&record.invalid_address_tag.as_str())
    {
        return true;
    }
    if !record.date_of_death.is_empty() && !is_yyyymmdd(&record.date_of_death) {
        return true;
    }
    false
}

fn check_symbols(record: &ResponseRecord) -> bool {
    [&record.name, &record.block_house_no, &record.street_name]
        .iter()
        .any(|f| symbol_pattern().is_match(f))
}

fn check_invalid_address(record: &ResponseRecord, today: NaiveDate) -> bool {
    if !record.invalid_address_tag.is_empty() {
        return true;
    }
    if PLACEHOLDER_STREETS.contains(&record.street_name.to_uppercase().as_str()) {
        return true;
    }
    if record.postal_code == "000000" {
        return true;
    }
    if let Some(changed) = parse_flexible_date(&record.date_address_change) {
        if changed > today {
            return true;
        }
    }
    false
}

fn check_life_status(record: &ResponseRecord) -> bool {
    match record.life_status.as_str() {
        // Deceased must carry a date of death, alive must not
        "D" => record.date_of_death.is_empty(),
        "A" => !record.date_of_death.is_empty(),
        _ => false,
    }
}

fn validate_record(record: ResponseRecord, file_name: &str, today: NaiveDate) -> ValidatedRecord {
    let mut reasons = Vec::new();

    if check_missing_critical(&record) {
        reasons.push(REASON_MISSING_CRITICAL);
    }
    if check_invalid_format(&record, today) {
        reasons.push(REASON_INVALID_FORMAT);
    }
    if check_symbols(&record) {
        reasons.push(REASON_SYMBOLS);
    }
    if check_invalid_address(&record, today) {
        reasons.push(REASON_INVALID_ADDRESS);
    }
    if check_life_status(&record) {
        reasons.push(REASON_LIFE_STATUS);
    }

    ValidatedRecord {
        flag: reasons.first().copied(),
        reasons,
        record,
        file_name: file_name.to_string(),
    }
}

/// Run validation then deduplication over parsed records.
///
/// Deduplication keeps one record per UIN: the one with the latest
/// parseable address-change date. A parseable date always beats an
/// unparseable one; with no parseable dates the first-seen record wins.
#[instrument(skip(records), fields(input = records.len(), file_name = %file_name))]
pub fn run_pipeline(records: Vec<ResponseRecord>, file_name: &str) -> PipelineOutcome {
    run_pipeline_at(records, file_name, Utc::now().date_naive())
}

fn run_pipeline_at(
    records: Vec<ResponseRecord>,
    file_name: &str,
    today: NaiveDate,
) -> PipelineOutcome {
    let mut outcome = PipelineOutcome::default();

    let mut by_uin: HashMap<String, ValidatedRecord> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for record in records {
        // Primary fields are the join keys downstream; without them the
        // record cannot be applied to anything
        if record.uin.is_empty() || record.ura_reference_no.is_empty() {
            outcome.rejected += 1;
            debug!(uin = %record.uin, "Record rejected: missing primary fields");
            continue;
        }

        let validated = validate_record(record, file_name, today);
        let uin = validated.record.uin.clone();

        match by_uin.get(&uin) {
            None => {
                order.push(uin.clone());
                by_uin.insert(uin, validated);
            }
            Some(existing) => {
                let existing_date = parse_flexible_date(&existing.record.date_address_change);
                let candidate_date = parse_flexible_date(&validated.record.date_address_change);
                // Option ordering: None < Some, later date wins, ties keep first
                if candidate_date > existing_date {
                    by_uin.insert(uin, validated);
                }
                outcome.duplicates_removed += 1;
            }
        }
    }

    outcome.records = order
        .into_iter()
        .filter_map(|uin| by_uin.remove(&uin))
        .collect();

    info!(
        kept = outcome.records.len(),
        rejected = outcome.rejected,
        duplicates_removed = outcome.duplicates_removed,
        "Validation pipeline finished"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_record(uin: &str) -> ResponseRecord {
        ResponseRecord {
            uin: uin.to_string(),
            name: "TAN AH KOW".to_string(),
            date_of_birth: "19800101".to_string(),
            address_type: "A".to_string(),
            block_house_no: "12".to_string(),
            street_name: "ORCHARD ROAD".to_string(),
            life_status: "A".to_string(),
            ura_reference_no: "URA0000001".to_string(),
            date_address_change: "20250101".to_string(),
            ..Default::default()
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn pipeline(records: Vec<ResponseRecord>) -> PipelineOutcome {
        run_pipeline_at(records, "NRO2URA_20250101120000", today())
    }

    #[test]
    fn test_clean_record_has_no_flag() {
        let outcome = pipeline(vec![base_record("S1234567A")]);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].flag.is_none());
        assert!(outcome.records[0].reasons.is_empty());
    }

    #[test]
    fn test_records_carry_source_file_name() {
        let outcome = pipeline(vec![base_record("S1234567A")]);
        assert_eq!(outcome.records[0].file_name, "NRO2URA_20250101120000");
    }

    #[test]
    fn test_missing_primary_fields_rejects_record() {
        let mut no_uin = base_record("");
        no_uin.uin = String::new();
        let mut no_ref = base_record("S1234567A");
        no_ref.ura_reference_no = String::new();

        let outcome = pipeline(vec![no_uin, no_ref]);
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.rejected, 2);
    }

    #[test]
    fn test_flag_holds_first_reason_only() {
        let mut record = base_record("S1234567A");
        record.name = String::new(); // missing critical
        record.street_name = "ORCHARD R@AD".to_string(); // symbols

        let outcome = pipeline(vec![record]);
        let validated = &outcome.records[0];
        assert_eq!(validated.flag, Some(REASON_MISSING_CRITICAL));
        assert_eq!(
            validated.reasons,
            vec![REASON_MISSING_CRITICAL, REASON_SYMBOLS]
        );
    }

    #[test]
    fn test_invalid_uin_format_flagged() {
        let mut record = base_record("Z1234567A");
        record.uin = "Z1234567A".to_string();

        let outcome = pipeline(vec![record]);
        assert_eq!(outcome.records[0].flag, Some(REASON_INVALID_FORMAT));
    }

    #[test]
    fn test_future_date_of_birth_flagged() {
        let mut record = base_record("S1234567A");
        record.date_of_birth = "20991231".to_string();

        let outcome = pipeline(vec![record]);
        assert_eq!(outcome.records[0].flag, Some(REASON_INVALID_FORMAT));
    }

    #[test]
    fn test_placeholder_street_flagged_as_invalid_address() {
        for street in ["NA", "N.A.", "N.A", "NA."] {
            let mut record = base_record("S1234567A");
            record.street_name = street.to_string();

            let outcome = pipeline(vec![record]);
            // Dots in the street also trip the symbol check first
            assert!(outcome.records[0]
                .reasons
                .contains(&REASON_INVALID_ADDRESS));
        }
    }

    #[test]
    fn test_zero_postal_code_flagged() {
        let mut record = base_record("S1234567A");
        record.postal_code = "000000".to_string();

        let outcome = pipeline(vec![record]);
        assert_eq!(outcome.records[0].flag, Some(REASON_INVALID_ADDRESS));
    }

    #[test]
    fn test_future_address_change_flagged() {
        let mut record = base_record("S1234567A");
        record.date_address_change = "20991231".to_string();

        let outcome = pipeline(vec![record]);
        assert_eq!(outcome.records[0].flag, Some(REASON_INVALID_ADDRESS));
    }

    #[test]
    fn test_deceased_without_death_date_flagged() {
        let mut record = base_record("S1234567A");
        record.life_status = "D".to_string();

        let outcome = pipeline(vec![record]);
        assert_eq!(outcome.records[0].flag, Some(REASON_LIFE_STATUS));
    }

    #[test]
    fn test_alive_with_death_date_flagged() {
        let mut record = base_record("S1234567A");
        record.date_of_death = "20200101".to_string();

        let outcome = pipeline(vec![record]);
        assert_eq!(outcome.records[0].flag, Some(REASON_LIFE_STATUS));
    }

    #[test]
    fn test_dedup_keeps_latest_address_change() {
        let mut older = base_record("S1234567A");
        older.date_address_change = "20240101".to_string();
        older.name = "OLDER".to_string();
        let mut newer = base_record("S1234567A");
        newer.date_address_change = "20250101".to_string();
        newer.name = "NEWER".to_string();

        let outcome = pipeline(vec![older, newer]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].record.name, "NEWER");
        assert_eq!(outcome.duplicates_removed, 1);
    }

    #[test]
    fn test_dedup_parseable_date_beats_unparseable() {
        let mut garbled = base_record("S1234567A");
        garbled.date_address_change = "not-a-date".to_string();
        garbled.name = "GARBLED".to_string();
        let mut dated = base_record("S1234567A");
        dated.date_address_change = "2024-06-01".to_string();
        dated.name = "DATED".to_string();

        let outcome = pipeline(vec![garbled, dated]);
        assert_eq!(outcome.records[0].record.name, "DATED");
    }

    #[test]
    fn test_dedup_tie_keeps_first_seen() {
        let mut first = base_record("S1234567A");
        first.name = "FIRST".to_string();
        let mut second = base_record("S1234567A");
        second.name = "SECOND".to_string();

        let outcome = pipeline(vec![first, second]);
        assert_eq!(outcome.records[0].record.name, "FIRST");
    }

    #[test]
    fn test_dedup_all_unparseable_keeps_first_seen() {
        let mut first = base_record("S1234567A");
        first.date_address_change = "??".to_string();
        first.name = "FIRST".to_string();
        let mut second = base_record("S1234567A");
        second.date_address_change = String::new();
        second.name = "SECOND".to_string();

        let outcome = pipeline(vec![first, second]);
        assert_eq!(outcome.records[0].record.name, "FIRST");
    }

    #[test]
    fn test_flexible_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(parse_flexible_date("20250115"), Some(expected));
        assert_eq!(parse_flexible_date("2025-01-15"), Some(expected));
        assert_eq!(parse_flexible_date("15/01/2025"), Some(expected));
        assert_eq!(parse_flexible_date("Jan 15 2025"), None);
        assert_eq!(parse_flexible_date(""), None);
    }

    #[test]
    fn test_order_preserved_across_dedup() {
        let a = base_record("S1234567A");
        let b = base_record("T7654321B");
        let mut a_dup = base_record("S1234567A");
        a_dup.date_address_change = "20250301".to_string();

        let outcome = pipeline(vec![a, b, a_dup]);
        let uins: Vec<&str> = outcome
            .records
            .iter()
            .map(|r| r.record.uin.as_str())
            .collect();
        assert_eq!(uins, vec!["S1234567A", "T7654321B"]);
    }
}
