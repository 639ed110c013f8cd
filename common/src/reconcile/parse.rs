// Parsers for agency response files
//
// Three file kinds arrive per batch, tied together by a 14-digit
// timestamp: the fixed-width response file (NRO2URA_<ts>), the control
// totals report (REPORT_<ts>.TOT) and the exception report
// (REPORT_<ts>.EXP).

use crate::errors::ParseError;
use crate::models::ExceptionRecord;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Minimum length of a fixed-width response line
pub const RECORD_LINE_LEN: usize = 238;

const END_OF_REPORT: &str = "****  E N D  O F  R E P O R T  ****";

/// One fixed-width record from the agency response file, fields trimmed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseRecord {
    pub uin: String,
    pub name: String,
    pub date_of_birth: String,
    pub address_type: String,
    pub block_house_no: String,
    pub street_name: String,
    pub floor_no: String,
    pub unit_no: String,
    pub building_name: String,
    pub postal_code: String,
    pub date_of_death: String,
    pub life_status: String,
    pub invalid_address_tag: String,
    pub ura_reference_no: String,
    pub batch_date_time: String,
    pub date_address_change: String,
    pub timestamp: String,
}

/// Header of the response file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub date_of_run: String,
    pub time_of_run: String,
    pub record_count: usize,
}

/// Parsed response file: header plus records
#[derive(Debug, Clone)]
pub struct ResponseFile {
    pub header: Option<ResponseHeader>,
    pub records: Vec<ResponseRecord>,
}

// 1-based inclusive column positions, per the agency file layout
fn field(line: &str, start: usize, end: usize) -> String {
    line.get(start - 1..end).unwrap_or("").trim().to_string()
}

fn parse_record(line: &str) -> ResponseRecord {
    ResponseRecord {
        uin: field(line, 1, 9),
        name: field(line, 10, 75),
        date_of_birth: field(line, 76, 83),
        address_type: field(line, 84, 84),
        block_house_no: field(line, 85, 94),
        street_name: field(line, 95, 126),
        floor_no: field(line, 127, 128),
        unit_no: field(line, 129, 133),
        building_name: field(line, 134, 163),
        // columns 164-167 are filler
        postal_code: field(line, 168, 173),
        date_of_death: field(line, 174, 181),
        life_status: field(line, 182, 182),
        invalid_address_tag: field(line, 183, 183),
        ura_reference_no: field(line, 184, 193),
        batch_date_time: field(line, 194, 207),
        date_address_change: field(line, 208, 215),
        timestamp: field(line, 216, 238),
    }
}

fn parse_header(line: &str) -> Option<ResponseHeader> {
    let date_of_run = line.get(9..17)?.trim().to_string();
    let time_of_run = line.get(17..23)?.trim().to_string();
    let record_count = line.get(23..29)?.trim().parse::<usize>().ok()?;
    Some(ResponseHeader {
        date_of_run,
        time_of_run,
        record_count,
    })
}

/// Parse the fixed-width response file.
///
/// The first line is a header carrying the run date, run time, and the
/// number of records the agency wrote. Every later line of record
/// length becomes a record; a count mismatch against the header is
/// logged but does not fail the parse.
pub fn parse_response_file(content: &[u8]) -> Result<ResponseFile, ParseError> {
    let text = std::str::from_utf8(content)
        .map_err(|e| ParseError::InvalidEncoding(e.to_string()))?;

    let mut lines = text.lines();
    let header = lines.next().and_then(parse_header);
    if header.is_none() {
        warn!("Response file has no parseable header line");
    }

    let records: Vec<ResponseRecord> = lines
        .filter(|line| line.len() >= RECORD_LINE_LEN)
        .map(parse_record)
        .collect();

    if let Some(header) = &header {
        if header.record_count != records.len() {
            warn!(
                declared = header.record_count,
                parsed = records.len(),
                "Record count differs from header"
            );
        }
    }

    debug!(records = records.len(), "Response file parsed");
    Ok(ResponseFile { header, records })
}

fn tot_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Z])\)\s+([^=]+)\s+=\s+(\d+)").unwrap_or_else(|_| unreachable!())
    })
}

fn normalize_total_key(label: &str) -> String {
    let upper = label.trim().to_uppercase();
    if upper.contains("RECORDS") && upper.contains("READ") {
        return "TOTAL_RECORDS_READ".to_string();
    }
    if upper.contains("MATCHED") && !upper.contains("UNMATCHED") {
        return "RECORDS_MATCHED".to_string();
    }
    if upper.contains("INVALID") && upper.contains("UIN") {
        return "INVALID_UIN_FIN".to_string();
    }
    if upper.contains("UNMATCHED") {
        return "VALID_UIN_FIN_UNMATCHED".to_string();
    }
    // Unknown labels keep their text, upper-snake-cased
    upper
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace(['/', '.'], "_")
}

/// Parse the control totals report into normalized keys
pub fn parse_control_totals(content: &[u8]) -> Result<HashMap<String, u64>, ParseError> {
    let text = std::str::from_utf8(content)
        .map_err(|e| ParseError::InvalidEncoding(e.to_string()))?;

    let mut totals = HashMap::new();
    for line in text.lines() {
        if let Some(caps) = tot_line_pattern().captures(line) {
            let label = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let value = caps
                .get(3)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0);
            totals.insert(normalize_total_key(label), value);
        }
    }

    debug!(entries = totals.len(), "Control totals parsed");
    Ok(totals)
}

fn exp_row_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+(\d+)\s+(.{9})\s+(.+)").unwrap_or_else(|_| unreachable!()))
}

/// Parse the exception report.
///
/// The data section starts after the column header line and ends at the
/// end-of-report marker. Anything outside that window is layout noise.
pub fn parse_exception_report(content: &[u8]) -> Result<Vec<ExceptionRecord>, ParseError> {
    let text = std::str::from_utf8(content)
        .map_err(|e| ParseError::InvalidEncoding(e.to_string()))?;

    let mut records = Vec::new();
    let mut in_data_section = false;

    for line in text.lines() {
        if !in_data_section {
            if line.contains("SERIAL NO")
                && line.contains("ID NUMBER")
                && line.contains("EXCEPTION STATUS")
            {
                in_data_section = true;
            }
            continue;
        }
        if line.contains(END_OF_REPORT) {
            break;
        }
        if let Some(caps) = exp_row_pattern().captures(line) {
            records.push(ExceptionRecord {
                serial_no: caps.get(1).map(|m| m.as_str().trim()).unwrap_or("").to_string(),
                id_number: caps.get(2).map(|m| m.as_str().trim()).unwrap_or("").to_string(),
                exception_status: caps.get(3).map(|m| m.as_str().trim()).unwrap_or("").to_string(),
            });
        }
    }

    debug!(records = records.len(), "Exception report parsed");
    Ok(records)
}
