use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{DecisionCounts, RollingWindowPoint, TimelinePoint};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

/// Anything the dashboard can download as a table
pub trait Tabular {
    fn header() -> &'static [&'static str];
    fn row(&self) -> Vec<String>;
}

impl Tabular for RollingWindowPoint {
    fn header() -> &'static [&'static str] {
        &["index", "rollingAccuracy", "rollingAvgDuration"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.index.to_string(),
            format!("{:.2}", self.rolling_accuracy),
            format!("{:.2}", self.rolling_avg_duration),
        ]
    }
}

impl Tabular for TimelinePoint {
    fn header() -> &'static [&'static str] {
        &["bucket", "total", "correct", "accuracy"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.bucket.clone(),
            self.total.to_string(),
            self.correct.to_string(),
            format!("{:.2}", self.accuracy),
        ]
    }
}

/// Decision chart row: bucket key plus its counts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRow {
    pub bucket: String,
    pub accepted_count: usize,
    pub rejected_count: usize,
}

impl Tabular for DecisionRow {
    fn header() -> &'static [&'static str] {
        &["bucket", "acceptedCount", "rejectedCount"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.bucket.clone(),
            self.accepted_count.to_string(),
            self.rejected_count.to_string(),
        ]
    }
}

pub fn decision_rows(counts: &BTreeMap<String, DecisionCounts>) -> Vec<DecisionRow> {
    counts
        .iter()
        .map(|(bucket, c)| DecisionRow {
            bucket: bucket.clone(),
            accepted_count: c.accepted_count,
            rejected_count: c.rejected_count,
        })
        .collect()
}

pub fn render<T: Tabular + Serialize>(records: &[T], format: ExportFormat) -> serde_json::Result<String> {
    match format {
        ExportFormat::Csv => Ok(to_csv(records)),
        ExportFormat::Json => serde_json::to_string_pretty(records),
    }
}

/// Header row plus one line per record; an empty slice still yields the header
pub fn to_csv<T: Tabular>(records: &[T]) -> String {
    let mut out = csv_line(T::header().iter().copied());
    for record in records {
        let row = record.row();
        out.push_str(&csv_line(row.iter().map(String::as_str)));
    }
    out
}

fn csv_line<'a>(fields: impl Iterator<Item = &'a str>) -> String {
    let mut line = fields.map(escape_field).collect::<Vec<_>>().join(",");
    line.push_str("\r\n");
    line
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_export_keeps_header() {
        let csv = to_csv::<RollingWindowPoint>(&[]);
        assert_eq!(csv, "index,rollingAccuracy,rollingAvgDuration\r\n");

        let json = render::<TimelinePoint>(&[], ExportFormat::Json).unwrap();
        assert_eq!(json, "[]");
    }

    #[test]
    fn test_rolling_csv_rows() {
        let points = vec![
            RollingWindowPoint { index: 1, rolling_accuracy: 100.0, rolling_avg_duration: 250.0 },
            RollingWindowPoint { index: 2, rolling_accuracy: 50.0, rolling_avg_duration: 1000.0 / 3.0 },
        ];
        let csv = to_csv(&points);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1,100.00,250.00");
        assert_eq!(lines[2], "2,50.00,333.33");
    }

    #[test]
    fn test_fields_are_quoted_when_needed() {
        assert_eq!(escape_field("2024-03-06"), "2024-03-06");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_decision_rows_follow_bucket_order() {
        let mut counts = BTreeMap::new();
        counts.insert("2024-03-06T10:01".to_string(), DecisionCounts { accepted_count: 2, rejected_count: 0 });
        counts.insert("2024-03-06T10:00".to_string(), DecisionCounts { accepted_count: 1, rejected_count: 3 });

        let rows = decision_rows(&counts);
        assert_eq!(rows[0].bucket, "2024-03-06T10:00");

        let json: serde_json::Value =
            serde_json::from_str(&render(&rows, ExportFormat::Json).unwrap()).unwrap();
        assert_eq!(json[0]["rejectedCount"], 3);
        assert_eq!(json[1]["acceptedCount"], 2);
    }
}
