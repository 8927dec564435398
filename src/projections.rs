use std::collections::BTreeMap;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, Months, NaiveDate, NaiveDateTime, Utc,
};

use crate::models::{
    ActivityEvent, BucketCounts, DecisionCounts, DecisionFilter, DecisionGroup, Granularity,
    ProgressSummary, RollingWindowPoint, TimelinePoint,
};


/// Calendar used to cut timestamps into buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Local,
    Fixed(FixedOffset),
}

impl Zone {
    /// Wall-clock reading of `ts` in this zone
    pub fn localize(&self, ts: &DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Local => ts.with_timezone(&Local).naive_local(),
            Zone::Fixed(offset) => ts.with_timezone(offset).naive_local(),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.localize(&Utc::now())
    }
}

/// Keep events of the requested decision group; unknown kinds are dropped
pub fn filter_events(events: &[ActivityEvent], filter: DecisionFilter) -> Vec<ActivityEvent> {
    events
        .iter()
        .filter(|e| filter.matches(e))
        .cloned()
        .collect()
}

pub fn scope_to_user(events: &[ActivityEvent], user_id: Option<&str>) -> Vec<ActivityEvent> {
    match user_id {
        Some(user) => events
            .iter()
            .filter(|e| e.user_id.as_deref() == Some(user))
            .cloned()
            .collect(),
        None => events.to_vec(),
    }
}

pub fn bucket_key(ts: &DateTime<Utc>, granularity: Granularity, zone: Zone) -> String {
    format_bucket(zone.localize(ts), granularity)
}

fn format_bucket(local: NaiveDateTime, granularity: Granularity) -> String {
    match granularity {
        Granularity::Minute => local.format("%Y-%m-%dT%H:%M").to_string(),
        Granularity::Hour => local.format("%Y-%m-%dT%H:00").to_string(),
        Granularity::Day => local.format("%Y-%m-%d").to_string(),
        Granularity::Week => week_start(local.date()).format("%Y-%m-%d").to_string(),
        Granularity::Month => local.format("%Y-%m").to_string(),
    }
}

/// Sunday that opens the week containing `date`
fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

/// Count events and correct decisions per bucket.
/// Expects an already filtered list; events without a usable timestamp are skipped.
pub fn group_by_bucket(
    events: &[ActivityEvent],
    granularity: Granularity,
    zone: Zone,
) -> BTreeMap<String, BucketCounts> {
    let mut buckets: BTreeMap<String, BucketCounts> = BTreeMap::new();

    for event in events {
        let Some(ts) = event.timestamp() else {
            tracing::trace!(created_at = %event.created_at, "skipping unparseable timestamp");
            continue;
        };
        let counts = buckets.entry(bucket_key(&ts, granularity, zone)).or_default();
        counts.total += 1;
        if event.is_correct() {
            counts.correct += 1;
        }
    }

    buckets
}

/// Accepted and rejected counts per bucket, for the decision chart
pub fn decision_counts(
    events: &[ActivityEvent],
    granularity: Granularity,
    zone: Zone,
) -> BTreeMap<String, DecisionCounts> {
    let mut buckets: BTreeMap<String, DecisionCounts> = BTreeMap::new();

    for event in events {
        let Some(group) = event.group() else { continue };
        let Some(ts) = event.timestamp() else { continue };
        let counts = buckets.entry(bucket_key(&ts, granularity, zone)).or_default();
        match group {
            DecisionGroup::Accept => counts.accepted_count += 1,
            DecisionGroup::Reject => counts.rejected_count += 1,
        }
    }

    buckets
}

/// Trailing-window accuracy and mean latency, one point per event.
/// `events` must already be in chronological order.
pub fn rolling_window(events: &[ActivityEvent], window: usize) -> Vec<RollingWindowPoint> {
    let window = window.max(1);
    let mut points = Vec::with_capacity(events.len());
    let mut correct = 0usize;

    for (i, event) in events.iter().enumerate() {
        if event.is_correct() {
            correct += 1;
        }
        if i >= window && events[i - window].is_correct() {
            correct -= 1;
        }

        let start = (i + 1).saturating_sub(window);
        let slice = &events[start..=i];
        let len = slice.len();
        let duration: f64 = slice.iter().map(ActivityEvent::duration).sum();

        points.push(RollingWindowPoint {
            index: i + 1,
            rolling_accuracy: correct as f64 * 100.0 / len as f64,
            rolling_avg_duration: duration / len as f64,
        });
    }

    points
}

/// Filter, order by time, then window. Events without a usable timestamp are dropped.
pub fn rolling_series(
    events: &[ActivityEvent],
    filter: DecisionFilter,
    window: usize,
) -> Vec<RollingWindowPoint> {
    rolling_window(&chronological(events, filter), window)
}

fn chronological(events: &[ActivityEvent], filter: DecisionFilter) -> Vec<ActivityEvent> {
    let mut stamped: Vec<(DateTime<Utc>, &ActivityEvent)> = events
        .iter()
        .filter(|e| filter.matches(e))
        .filter_map(|e| e.timestamp().map(|ts| (ts, e)))
        .collect();
    stamped.sort_by_key(|(ts, _)| *ts);
    stamped.into_iter().map(|(_, e)| e.clone()).collect()
}

/// Progress over accepted suggestions only
pub fn calculate_progress(events: &[ActivityEvent]) -> ProgressSummary {
    let accepted: Vec<&ActivityEvent> = events.iter().filter(|e| e.is_accept()).collect();
    let total_accepted = accepted.len();
    let correct_suggestions = accepted.iter().filter(|e| !e.has_bug).count();

    let percentage_correct = if total_accepted > 0 {
        let raw = (correct_suggestions as f64 / total_accepted as f64) * 100.0;
        (raw * 100.0).round() / 100.0
    } else {
        0.0
    };

    ProgressSummary {
        total_accepted,
        correct_suggestions,
        percentage_correct,
    }
}

/// The `periods` most recent bucket keys ending at the bucket holding `now`, oldest first
pub fn label_range(granularity: Granularity, periods: usize, now: NaiveDateTime) -> Vec<String> {
    let mut labels: Vec<String> = (0..periods)
        .filter_map(|back| step_back(now, granularity, back as u32))
        .map(|local| format_bucket(local, granularity))
        .collect();
    labels.reverse();
    labels
}

fn step_back(now: NaiveDateTime, granularity: Granularity, back: u32) -> Option<NaiveDateTime> {
    match granularity {
        Granularity::Minute => now.checked_sub_signed(Duration::minutes(back as i64)),
        Granularity::Hour => now.checked_sub_signed(Duration::hours(back as i64)),
        Granularity::Day => now.checked_sub_signed(Duration::days(back as i64)),
        Granularity::Week => now.checked_sub_signed(Duration::weeks(back as i64)),
        Granularity::Month => now
            .date()
            .with_day(1)
            .and_then(|first| first.checked_sub_months(Months::new(back)))
            .map(|date| date.and_time(now.time())),
    }
}

/// Accuracy per bucket. With labels the series is zero-filled over exactly those
/// buckets; without, it covers every bucket that holds data.
pub fn timeline(
    events: &[ActivityEvent],
    granularity: Granularity,
    zone: Zone,
    labels: Option<&[String]>,
) -> Vec<TimelinePoint> {
    let buckets = group_by_bucket(events, granularity, zone);

    let point = |bucket: &str, counts: BucketCounts| TimelinePoint {
        bucket: bucket.to_string(),
        total: counts.total,
        correct: counts.correct,
        accuracy: counts.accuracy(),
    };

    match labels {
        Some(labels) => labels
            .iter()
            .map(|label| point(label, buckets.get(label).copied().unwrap_or_default()))
            .collect(),
        None => buckets
            .iter()
            .map(|(bucket, counts)| point(bucket, *counts))
            .collect(),
    }
}
