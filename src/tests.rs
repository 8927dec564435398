use super::*;
use axum::body::Body;
use axum::http::Request;
use chrono::FixedOffset;
use http_body_util::BodyExt;
use std::io::Write;
use tempfile::NamedTempFile;
use tower::ServiceExt;

fn test_state(log: &NamedTempFile) -> AppState {
    AppState {
        log_path: log.path().to_path_buf(),
        rolling_window: 2,
        default_periods: 7,
        zone: Zone::Fixed(FixedOffset::east_opt(0).unwrap()),
    }
}

fn write_events(log: &mut NamedTempFile, events: &[serde_json::Value]) {
    for event in events {
        writeln!(log, "{}", event).unwrap();
    }
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

async fn post_event(app: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

fn sample_log() -> NamedTempFile {
    let mut log = NamedTempFile::new().unwrap();
    write_events(
        &mut log,
        &[
            serde_json::json!({"eventType": "accept", "createdAt": "2024-03-06T10:00:03Z", "hasBug": true, "userId": "s1"}),
            serde_json::json!({"eventType": "accept", "createdAt": "2024-03-06T10:00:01Z", "hasBug": false, "durationMs": 400.0, "userId": "s1"}),
            serde_json::json!({"eventType": "reject", "createdAt": "2024-03-06T10:00:02Z", "hasBug": true, "durationMs": 200.0, "userId": "s2"}),
        ],
    );
    log
}

#[test]
fn test_append_to_log() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    append_to_log(&path, "{\"eventType\":\"accept\",\"createdAt\":\"2024-03-06T10:00:00Z\"}\n").unwrap();

    let events = read_log(&path).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "accept");
    assert!(!events[0].has_bug);
}

#[test]
fn test_read_log_skips_blank_and_malformed_lines() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{{\"eventType\":\"accept\",\"createdAt\":\"2024-03-06T10:00:00Z\"}}").unwrap();
    writeln!(temp_file).unwrap();
    writeln!(temp_file, "not an event").unwrap();
    writeln!(temp_file, "{{\"eventType\":\"reject\",\"createdAt\":\"2024-03-06T10:01:00Z\",\"hasBug\":true}}").unwrap();

    let events = read_log(temp_file.path()).unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, "reject");
}

#[test]
fn test_missing_log_reads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let events = read_log(&dir.path().join("absent.log")).unwrap();
    assert!(events.is_empty());
}

#[test]
fn test_log_append_only() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    append_to_log(&path, "{\"eventType\":\"accept\",\"createdAt\":\"2024-03-06T10:00:00Z\"}\n").unwrap();
    append_to_log(&path, "{\"eventType\":\"reject\",\"createdAt\":\"2024-03-06T09:00:00Z\"}\n").unwrap();

    // Both lines exist, order preserved even when timestamps are not
    let events = read_log(&path).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "accept");
    assert_eq!(events[1].event_type, "reject");
}

#[test]
fn test_closest_kind() {
    assert_eq!(closest_kind("tab-acept"), Some("tab_accept"));
    assert_eq!(closest_kind("open_file"), None);
}

#[tokio::test]
async fn test_post_event_assigns_id_and_timestamp() {
    let log = NamedTempFile::new().unwrap();
    let app = router(test_state(&log));

    let (status, body) = post_event(
        app,
        serde_json::json!({"eventType": "reject", "hasBug": true, "durationMs": 900.0}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["correct"], true);
    assert_eq!(body["data"]["group"], "reject");
    assert!(body["data"]["warning"].is_null());

    let events = read_log(log.path()).unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].id.is_some());
    assert!(events[0].timestamp().is_some());
}

#[tokio::test]
async fn test_post_unknown_kind_is_kept_with_warning() {
    let log = NamedTempFile::new().unwrap();
    let app = router(test_state(&log));

    let (status, body) = post_event(
        app.clone(),
        serde_json::json!({"eventType": "line-acept", "createdAt": "2024-03-06T10:00:00Z"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let warning = body["data"]["warning"].as_str().unwrap();
    assert!(warning.contains("line_accept"));

    // Recorded, but never counted
    assert_eq!(read_log(log.path()).unwrap().len(), 1);
    let (_, progress) = get_json(app, "/analytics/progress").await;
    assert_eq!(progress["totalAccepted"], 0);
}

#[tokio::test]
async fn test_post_rejects_bad_input() {
    let log = NamedTempFile::new().unwrap();
    let app = router(test_state(&log));

    let (status, body) = post_event(
        app.clone(),
        serde_json::json!({"eventType": "accept", "createdAt": "yesterday"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("createdAt"));

    let (status, _) = post_event(
        app,
        serde_json::json!({"eventType": "accept", "durationMs": -5.0}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(read_log(log.path()).unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_log_gives_empty_views() {
    let log = NamedTempFile::new().unwrap();
    let app = router(test_state(&log));

    let (status, progress) = get_json(app.clone(), "/analytics/progress").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["percentageCorrect"], 0.0);

    let (_, rolling) = get_json(app.clone(), "/analytics/rolling").await;
    assert_eq!(rolling, serde_json::json!([]));

    let (_, buckets) = get_json(app, "/analytics/buckets?granularity=week").await;
    assert_eq!(buckets, serde_json::json!({}));
}

#[tokio::test]
async fn test_rolling_sorts_log_order() {
    let log = sample_log();
    let app = router(test_state(&log));

    let (status, body) = get_json(app, "/analytics/rolling").await;
    assert_eq!(status, StatusCode::OK);

    let accuracy: Vec<f64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["rollingAccuracy"].as_f64().unwrap())
        .collect();
    assert_eq!(accuracy, vec![100.0, 100.0, 50.0]);
    assert_eq!(body[1]["rollingAvgDuration"], 300.0);
}

#[tokio::test]
async fn test_rolling_rejects_zero_window() {
    let log = sample_log();
    let app = router(test_state(&log));

    let (status, _) = get_json(app, "/analytics/rolling?window=0").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_progress_scoped_to_user() {
    let log = sample_log();
    let app = router(test_state(&log));

    let (_, body) = get_json(app, "/analytics/progress?userId=s1").await;
    assert_eq!(body["totalAccepted"], 2);
    assert_eq!(body["correctSuggestions"], 1);
    assert_eq!(body["percentageCorrect"], 50.0);
}

#[tokio::test]
async fn test_buckets_and_decisions() {
    let log = sample_log();
    let app = router(test_state(&log));

    let (_, buckets) = get_json(app.clone(), "/analytics/buckets?granularity=day&filter=accept").await;
    assert_eq!(buckets["2024-03-06"]["total"], 2);
    assert_eq!(buckets["2024-03-06"]["correct"], 1);

    let (_, decisions) = get_json(app, "/analytics/decisions").await;
    assert_eq!(decisions["2024-03-06T10:00"]["acceptedCount"], 2);
    assert_eq!(decisions["2024-03-06T10:00"]["rejectedCount"], 1);
}

#[tokio::test]
async fn test_timeline_without_periods_covers_data() {
    let log = sample_log();
    let app = router(test_state(&log));

    let (_, body) = get_json(app.clone(), "/analytics/timeline?granularity=month&periods=0").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["bucket"], "2024-03");
    assert_eq!(body[0]["total"], 3);

    // Default range is the last seven days, zero-filled
    let (_, body) = get_json(app, "/analytics/timeline").await;
    assert_eq!(body.as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn test_export_csv() {
    let log = sample_log();
    let app = router(test_state(&log));

    let req = Request::builder()
        .uri("/analytics/export?view=decisions&format=csv")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(resp.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("decisions-"));

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines, vec!["bucket,acceptedCount,rejectedCount", "2024-03-06T10:00,2,1"]);
}

#[tokio::test]
async fn test_unknown_query_value_is_rejected() {
    let log = sample_log();
    let app = router(test_state(&log));

    let (status, body) = get_json(app.clone(), "/analytics/buckets?granularity=fortnight").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("fortnight"));

    let (status, body) = get_json(app, "/analytics/rolling?window=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
