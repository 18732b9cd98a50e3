//! Request aggregation and profile reporting
//!
//! Every outbound request reports a `(method, url, status)` triple. The
//! tally normalizes URLs so that per-node and per-blob requests collapse
//! into one statistical bucket, then counts frequencies for the final
//! profile table.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One observed request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestRecord {
    /// HTTP method
    pub method: String,
    /// Resolved request URL
    pub url: String,
    /// Response status code (999 when no response was received)
    pub status_code: u16,
}

/// Frequency counts of normalized requests.
pub struct RequestTally {
    counts: HashMap<RequestRecord, u64>,
    blob_paths: Regex,
    node_counters: Regex,
}

impl RequestTally {
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
            blob_paths: Regex::new("/blobstore/.*").expect("invalid blob path pattern"),
            node_counters: Regex::new(r"(/nodes/.*-)\d+(/.*)?")
                .expect("invalid node counter pattern"),
        }
    }

    /// Normalize the record's URL and count it.
    ///
    /// Normalization order matters: blob paths collapse first, then node
    /// name counters.
    pub fn record(&mut self, mut record: RequestRecord) {
        record.url = self
            .blob_paths
            .replace_all(&record.url, "/blobstore/<...>")
            .into_owned();
        record.url = self
            .node_counters
            .replace_all(&record.url, "${1}<N>${2}")
            .into_owned();
        *self.counts.entry(record).or_insert(0) += 1;
    }

    /// Total number of recorded requests.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Snapshot the tally as a sorted, percentage-annotated profile.
    pub fn profile(&self) -> RequestProfile {
        let total = self.total();
        let max_count = self.counts.values().copied().max().unwrap_or(0);

        let mut rows: Vec<ProfileRow> = self
            .counts
            .iter()
            .map(|(record, &count)| ProfileRow {
                record: record.clone(),
                count,
                percent: if total == 0 {
                    0.0
                } else {
                    count as f64 / total as f64 * 100.0
                },
            })
            .collect();

        rows.sort_by(|a, b| {
            (&a.record.url, &a.record.method, a.record.status_code).cmp(&(
                &b.record.url,
                &b.record.method,
                b.record.status_code,
            ))
        });

        RequestProfile {
            total,
            max_count,
            rows,
        }
    }
}

impl Default for RequestTally {
    fn default() -> Self {
        Self::new()
    }
}

/// One profile bucket.
#[derive(Debug, Clone)]
pub struct ProfileRow {
    /// The normalized request
    pub record: RequestRecord,
    /// Requests in this bucket
    pub count: u64,
    /// Share of the total, in percent
    pub percent: f64,
}

/// Sorted request profile, ready for rendering.
#[derive(Debug, Clone)]
pub struct RequestProfile {
    /// Total requests across all buckets
    pub total: u64,
    /// Largest single bucket, used to size the subtotal column
    pub max_count: u64,
    /// Buckets sorted by (url, method, status) ascending
    pub rows: Vec<ProfileRow>,
}

impl fmt::Display for RequestProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = "Subtotal";
        let width = header.len().max(self.max_count.to_string().len());

        writeln!(f, "Total API Requests: {}", self.total)?;
        writeln!(f, "% of Total | {header:<width$} | Status | Method | URL")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<10.2}   {:<width$}   {:<6}   {:<6}   {}",
                row.percent, row.count, row.record.status_code, row.record.method, row.record.url,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str, status_code: u16) -> RequestRecord {
        RequestRecord {
            method: "GET".to_string(),
            url: url.to_string(),
            status_code,
        }
    }

    #[test]
    fn node_counters_collapse_into_one_bucket() {
        let mut tally = RequestTally::new();
        tally.record(get("https://server.example/nodes/stampede-17/runs/99", 200));
        tally.record(get("https://server.example/nodes/stampede-42/runs/99", 200));

        let profile = tally.profile();
        assert_eq!(profile.rows.len(), 1);
        assert_eq!(profile.rows[0].count, 2);
        assert_eq!(
            profile.rows[0].record.url,
            "https://server.example/nodes/stampede-<N>/runs/99"
        );
    }

    #[test]
    fn blob_paths_collapse_before_node_counters() {
        let mut tally = RequestTally::new();
        tally.record(get("https://server.example/blobstore/abc123/recipes/0", 200));
        tally.record(get("https://server.example/blobstore/def456/files/9", 200));

        let profile = tally.profile();
        assert_eq!(profile.rows.len(), 1);
        assert_eq!(
            profile.rows[0].record.url,
            "https://server.example/blobstore/<...>"
        );
    }

    #[test]
    fn distinct_statuses_stay_in_distinct_buckets() {
        let mut tally = RequestTally::new();
        tally.record(get("https://server.example/nodes/stampede-1", 200));
        tally.record(get("https://server.example/nodes/stampede-1", 404));

        assert_eq!(tally.profile().rows.len(), 2);
    }

    #[test]
    fn profile_rows_sort_by_url_then_method_then_status() {
        let mut tally = RequestTally::new();
        tally.record(RequestRecord {
            method: "PUT".to_string(),
            url: "https://server.example/a".to_string(),
            status_code: 200,
        });
        tally.record(RequestRecord {
            method: "GET".to_string(),
            url: "https://server.example/a".to_string(),
            status_code: 200,
        });
        tally.record(get("https://server.example/b", 200));

        let profile = tally.profile();
        let order: Vec<(&str, &str)> = profile
            .rows
            .iter()
            .map(|row| (row.record.url.as_str(), row.record.method.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("https://server.example/a", "GET"),
                ("https://server.example/a", "PUT"),
                ("https://server.example/b", "GET"),
            ]
        );
    }

    #[test]
    fn percentages_sum_to_one_hundred() {
        let mut tally = RequestTally::new();
        for _ in 0..3 {
            tally.record(get("https://server.example/a", 200));
        }
        tally.record(get("https://server.example/b", 200));

        let profile = tally.profile();
        let sum: f64 = profile.rows.iter().map(|row| row.percent).sum();
        assert!((sum - 100.0).abs() < 1e-9);
        assert_eq!(profile.total, 4);
    }

    #[test]
    fn rendered_table_sizes_subtotal_column_to_widest_count() {
        let mut tally = RequestTally::new();
        for _ in 0..890 {
            tally.record(get("https://server.example/a", 200));
        }
        let rendered = tally.profile().to_string();
        // "Subtotal" is wider than the 3-digit count, so it sets the column
        assert!(rendered.contains("% of Total | Subtotal | Status | Method | URL"));
        assert!(rendered.starts_with("Total API Requests: 890"));
    }
}
