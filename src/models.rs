use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event kinds that count as accepting a suggestion
pub const ACCEPT_KINDS: &[&str] = &["accept", "tab_accept", "line_accept", "block_accept"];

/// Event kinds that count as rejecting a suggestion
pub const REJECT_KINDS: &[&str] = &["reject", "line_reject", "block_reject", "escape_reject"];

/// Semantic group of a decision event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionGroup {
    Accept,
    Reject,
}

impl DecisionGroup {
    /// Classify a raw event type. Unknown kinds yield `None`.
    pub fn classify(event_type: &str) -> Option<Self> {
        let normalized = normalize_kind(event_type);
        if ACCEPT_KINDS.contains(&normalized.as_str()) {
            Some(Self::Accept)
        } else if REJECT_KINDS.contains(&normalized.as_str()) {
            Some(Self::Reject)
        } else {
            None
        }
    }
}

pub fn normalize_kind(event_type: &str) -> String {
    event_type.trim().to_lowercase().replace('-', "_")
}

/// Decision event as stored in the activity log
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub event_type: String,
    pub created_at: String,
    #[serde(default)]
    pub has_bug: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl ActivityEvent {
    pub fn group(&self) -> Option<DecisionGroup> {
        DecisionGroup::classify(&self.event_type)
    }

    pub fn is_accept(&self) -> bool {
        self.group() == Some(DecisionGroup::Accept)
    }

    pub fn is_reject(&self) -> bool {
        self.group() == Some(DecisionGroup::Reject)
    }

    /// Accepting a clean suggestion or rejecting a buggy one
    pub fn is_correct(&self) -> bool {
        (self.is_accept() && !self.has_bug) || (self.is_reject() && self.has_bug)
    }

    /// Response latency, 0 when absent or not a usable number
    pub fn duration(&self) -> f64 {
        match self.duration_ms {
            Some(ms) if ms.is_finite() && ms > 0.0 => ms,
            _ => 0.0,
        }
    }

    /// Parsed `created_at`. Naive timestamps are read as UTC.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Event input from API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    #[serde(default)]
    pub user_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub has_bug: bool,
    #[serde(default)]
    pub duration_ms: Option<f64>,
}

/// API Response
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Which decision group a view covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionFilter {
    #[default]
    Total,
    Accept,
    Reject,
}

impl DecisionFilter {
    pub fn matches(self, event: &ActivityEvent) -> bool {
        match (self, event.group()) {
            (_, None) => false,
            (Self::Total, Some(_)) => true,
            (Self::Accept, Some(group)) => group == DecisionGroup::Accept,
            (Self::Reject, Some(group)) => group == DecisionGroup::Reject,
        }
    }
}

/// Truncation unit for grouping events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

/// Counters for one time bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
    pub total: usize,
    pub correct: usize,
}

impl BucketCounts {
    pub fn accuracy(&self) -> f64 {
        percentage(self.correct, self.total)
    }
}

/// Accepted vs rejected counts for the decision chart
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCounts {
    pub accepted_count: usize,
    pub rejected_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingWindowPoint {
    pub index: usize,
    pub rolling_accuracy: f64,
    pub rolling_avg_duration: f64,
}

/// One labelled bucket of the accuracy timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePoint {
    pub bucket: String,
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
}

/// Accepted suggestions and how many of them were clean
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub total_accepted: usize,
    pub correct_suggestions: usize,
    pub percentage_correct: f64,
}

pub(crate) fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}
