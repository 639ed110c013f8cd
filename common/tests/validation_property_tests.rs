// Property-based tests for response parsing, validation, and deduplication

use common::reconcile::parse::{parse_response_file, ResponseRecord, RECORD_LINE_LEN};
use common::reconcile::run_pipeline;
use proptest::prelude::*;

// ============================================================================
// Generators
// ============================================================================

fn arb_uin() -> impl Strategy<Value = String> {
    "[STFGM][0-9]{7}[A-Z]"
}

fn arb_name() -> impl Strategy<Value = String> {
    "[A-Z][A-Z ]{0,20}[A-Z]"
}

fn arb_date() -> impl Strategy<Value = String> {
    (1990u32..=2024, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| format!("{:04}{:02}{:02}", y, m, d))
}

fn record_with(uin: &str, name: &str, address_change: &str) -> ResponseRecord {
    ResponseRecord {
        uin: uin.to_string(),
        name: name.to_string(),
        date_of_birth: "19800101".to_string(),
        address_type: "A".to_string(),
        street_name: "ORCHARD ROAD".to_string(),
        life_status: "A".to_string(),
        ura_reference_no: "URA0000001".to_string(),
        date_address_change: address_change.to_string(),
        ..Default::default()
    }
}

fn fixed_width_line(uin: &str, name: &str, ura_ref: &str) -> String {
    let mut line = vec![b' '; RECORD_LINE_LEN];
    line[..uin.len()].copy_from_slice(uin.as_bytes());
    line[9..9 + name.len()].copy_from_slice(name.as_bytes());
    line[183..183 + ura_ref.len()].copy_from_slice(ura_ref.as_bytes());
    String::from_utf8(line).unwrap_or_default()
}

fn header_line(count: usize) -> String {
    let mut line = vec![b' '; RECORD_LINE_LEN];
    line[9..17].copy_from_slice(b"20250101");
    line[17..23].copy_from_slice(b"120000");
    let count_str = format!("{:<6}", count);
    line[23..29].copy_from_slice(count_str.as_bytes());
    String::from_utf8(line).unwrap_or_default()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Every kept record has a unique UIN, and nothing without primary
    /// fields survives the pipeline
    #[test]
    fn prop_output_uins_unique_and_complete(
        uins in proptest::collection::vec(arb_uin(), 1..20),
        dates in proptest::collection::vec(arb_date(), 1..20),
    ) {
        let records: Vec<ResponseRecord> = uins
            .iter()
            .zip(dates.iter().cycle())
            .map(|(uin, date)| record_with(uin, "TAN AH KOW", date))
            .collect();
        let input_len = records.len();

        let outcome = run_pipeline(records, "NRO2URA_20250101120000");

        let mut seen = std::collections::HashSet::new();
        for validated in &outcome.records {
            prop_assert!(seen.insert(validated.record.uin.clone()));
            prop_assert!(!validated.record.uin.is_empty());
            prop_assert!(!validated.record.ura_reference_no.is_empty());
        }
        prop_assert_eq!(
            outcome.records.len() + outcome.duplicates_removed + outcome.rejected,
            input_len
        );
    }

    /// For one UIN, the kept record carries the maximum parseable
    /// address-change date regardless of arrival order
    #[test]
    fn prop_dedup_keeps_latest_date(mut dates in proptest::collection::vec(arb_date(), 2..10)) {
        let records: Vec<ResponseRecord> = dates
            .iter()
            .map(|date| record_with("S1234567A", &format!("NAME {}", date), date))
            .collect();

        let outcome = run_pipeline(records, "NRO2URA_20250101120000");
        prop_assert_eq!(outcome.records.len(), 1);

        dates.sort();
        let latest = dates.last().cloned().unwrap_or_default();
        prop_assert_eq!(&outcome.records[0].record.date_address_change, &latest);
    }

    /// Records missing a primary field are rejected, not flagged
    #[test]
    fn prop_missing_primary_fields_always_rejected(
        uin in arb_uin(),
        drop_uin in any::<bool>(),
    ) {
        let mut record = record_with(&uin, "TAN AH KOW", "20240101");
        if drop_uin {
            record.uin = String::new();
        } else {
            record.ura_reference_no = String::new();
        }

        let outcome = run_pipeline(vec![record], "NRO2URA_20250101120000");
        prop_assert!(outcome.records.is_empty());
        prop_assert_eq!(outcome.rejected, 1);
    }

    /// A well-formed UIN never triggers the format flag on its own
    #[test]
    fn prop_valid_uin_not_format_flagged(uin in arb_uin(), date in arb_date()) {
        let outcome = run_pipeline(vec![record_with(&uin, "TAN AH KOW", &date)], "NRO2URA_20250101120000");
        prop_assert_eq!(outcome.records.len(), 1);
        prop_assert!(!outcome.records[0]
            .reasons
            .contains(&"Invalid field format"));
    }

    /// Fixed-width parsing recovers trimmed field values
    #[test]
    fn prop_fixed_width_fields_round_trip(
        uin in arb_uin(),
        name in arb_name(),
    ) {
        let content = format!(
            "{}\n{}",
            header_line(1),
            fixed_width_line(&uin, &name, "URA0000001")
        );
        let file = parse_response_file(content.as_bytes()).unwrap();

        prop_assert_eq!(file.records.len(), 1);
        prop_assert_eq!(&file.records[0].uin, &uin);
        prop_assert_eq!(&file.records[0].name, name.trim());
        prop_assert_eq!(&file.records[0].ura_reference_no, "URA0000001");
    }
}
