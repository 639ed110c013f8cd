// Run metrics rendered as, and recovered from, log lines
//
// Each processing run emits a single `Metrics:` line. Operators can
// sum lines over any window to get totals without a metrics stack.

use std::collections::BTreeMap;
use std::fmt;

const MARKER: &str = "Metrics:";

/// Counters collected over one processing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetrics {
    counters: BTreeMap<String, u64>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &str, value: u64) {
        *self.counters.entry(key.to_string()).or_insert(0) += value;
    }

    pub fn increment(&mut self, key: &str) {
        self.add(key, 1);
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Fold another run's counters into this one
    pub fn merge(&mut self, other: &RunMetrics) {
        for (key, value) in &other.counters {
            self.add(key, *value);
        }
    }

    /// Parse a `Metrics:` line. Returns `None` for lines without the
    /// marker; malformed pairs after the marker are skipped.
    pub fn parse_line(line: &str) -> Option<RunMetrics> {
        let start = line.find(MARKER)?;
        let rest = &line[start + MARKER.len()..];

        let mut metrics = RunMetrics::new();
        for pair in rest.split(',') {
            let mut parts = pair.splitn(2, ':');
            let key = parts.next().map(str::trim).unwrap_or("");
            let value = parts.next().and_then(|v| v.trim().parse::<u64>().ok());
            if let (false, Some(value)) = (key.is_empty(), value) {
                metrics.add(key, value);
            }
        }
        Some(metrics)
    }

    /// Sum all `Metrics:` lines found in a log excerpt
    pub fn aggregate_lines<'a>(lines: impl Iterator<Item = &'a str>) -> RunMetrics {
        let mut total = RunMetrics::new();
        for line in lines {
            if let Some(metrics) = Self::parse_line(line) {
                total.merge(&metrics);
            }
        }
        total
    }
}

impl fmt::Display for RunMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", MARKER)?;
        let mut first = true;
        for (key, value) in &self.counters {
            if first {
                write!(f, " {}: {}", key, value)?;
                first = false;
            } else {
                write!(f, ", {}: {}", key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_format() {
        let mut metrics = RunMetrics::new();
        metrics.add("filesDownloaded", 3);
        metrics.add("recordsParsed", 150);

        assert_eq!(
            metrics.to_string(),
            "Metrics: filesDownloaded: 3, recordsParsed: 150"
        );
    }

    #[test]
    fn test_parse_round_trip() {
        let mut metrics = RunMetrics::new();
        metrics.add("recordsApplied", 120);
        metrics.add("recordsFlagged", 8);

        let parsed = RunMetrics::parse_line(&metrics.to_string()).unwrap();
        assert_eq!(parsed, metrics);
    }

    #[test]
    fn test_parse_ignores_lines_without_marker() {
        assert!(RunMetrics::parse_line("recordsApplied: 120").is_none());
    }

    #[test]
    fn test_parse_skips_malformed_pairs() {
        let parsed =
            RunMetrics::parse_line("Metrics: good: 5, bad pair, worse: x, alsoGood: 2").unwrap();
        assert_eq!(parsed.get("good"), 5);
        assert_eq!(parsed.get("alsoGood"), 2);
        assert_eq!(parsed.get("bad pair"), 0);
    }

    #[test]
    fn test_marker_mid_line() {
        let line = "2025-01-01T12:00:00Z INFO reconcile: Metrics: filesDownloaded: 2";
        let parsed = RunMetrics::parse_line(line).unwrap();
        assert_eq!(parsed.get("filesDownloaded"), 2);
    }

    #[test]
    fn test_aggregation_sums_per_key() {
        let lines = [
            "Metrics: filesDownloaded: 2, recordsParsed: 100",
            "unrelated log line",
            "Metrics: filesDownloaded: 1, recordsApplied: 80",
        ];
        let total = RunMetrics::aggregate_lines(lines.iter().copied());

        assert_eq!(total.get("filesDownloaded"), 3);
        assert_eq!(total.get("recordsParsed"), 100);
        assert_eq!(total.get("recordsApplied"), 80);
    }
}
