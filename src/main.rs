use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod error;
mod export;
mod models;
mod projections;

#[cfg(test)]
mod tests;

use config::Config;
use error::{ApiError, ApiQuery};
use export::ExportFormat;
use models::{
    normalize_kind, ActivityEvent, ApiResponse, BucketCounts, DecisionCounts, DecisionFilter,
    EventInput, Granularity, ProgressSummary, RollingWindowPoint, TimelinePoint,
    ACCEPT_KINDS, REJECT_KINDS,
};
use projections::Zone;

/// Event-driven analytics API
/// Decisions are only ever appended to the activity log
/// Every view is derived from the log on request
#[derive(Clone)]
struct AppState {
    log_path: PathBuf,
    rolling_window: usize,
    default_periods: usize,
    zone: Zone,
}

impl AppState {
    fn from_config(cfg: &Config) -> Self {
        Self {
            log_path: cfg.log_path.clone(),
            rolling_window: cfg.rolling_window,
            default_periods: cfg.default_periods,
            zone: cfg.zone,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::from_env()?;
    if let Some(dir) = cfg.log_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    tracing::info!(
        log_path = %cfg.log_path.display(),
        window = cfg.rolling_window,
        zone = ?cfg.zone,
        "suggestion_analytics_starting"
    );

    let app = router(AppState::from_config(&cfg));

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/events", get(list_events).post(create_event))
        .route("/analytics/progress", get(get_progress))
        .route("/analytics/buckets", get(get_buckets))
        .route("/analytics/decisions", get(get_decisions))
        .route("/analytics/rolling", get(get_rolling))
        .route("/analytics/timeline", get(get_timeline))
        .route("/analytics/export", get(export_view))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> &'static str {
    "Suggestion Analytics API v0.1.0"
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Record a decision
/// Appends to the activity log (append-only, never edit)
async fn create_event(
    State(state): State<AppState>,
    Json(input): Json<EventInput>,
) -> Result<Json<ApiResponse>, ApiError> {
    let event = validate_event(input)?;
    let line = serde_json::to_string(&event).map_err(|e| ApiError::Internal(e.to_string()))?;

    append_to_log(&state.log_path, &format!("{line}\n"))?;

    let warning = match event.group() {
        Some(_) => None,
        None => {
            let hint = closest_kind(&event.event_type);
            tracing::warn!(event_type = %event.event_type, ?hint, "unrecognized event type recorded");
            Some(match hint {
                Some(kind) => format!(
                    "unrecognized event type {:?}, excluded from analytics (did you mean {kind:?}?)",
                    event.event_type
                ),
                None => format!(
                    "unrecognized event type {:?}, excluded from analytics",
                    event.event_type
                ),
            })
        }
    };
    tracing::debug!(id = ?event.id, event_type = %event.event_type, "event appended");

    Ok(Json(ApiResponse {
        status: "success".to_string(),
        message: format!("Event logged: {}", event.event_type),
        data: Some(serde_json::json!({
            "event": event,
            "group": event.group(),
            "correct": event.is_correct(),
            "warning": warning,
        })),
    }))
}

fn validate_event(input: EventInput) -> Result<ActivityEvent, ApiError> {
    if input.event_type.trim().is_empty() {
        return Err(ApiError::Validation("eventType must not be empty".into()));
    }
    if let Some(ms) = input.duration_ms {
        if !ms.is_finite() || ms < 0.0 {
            return Err(ApiError::Validation(
                "durationMs must be a non-negative number".into(),
            ));
        }
    }
    let created_at = match input.created_at {
        Some(raw) => {
            if models::parse_timestamp(&raw).is_none() {
                return Err(ApiError::Validation(format!("createdAt {raw:?} is not a timestamp")));
            }
            raw
        }
        None => Utc::now().to_rfc3339(),
    };

    Ok(ActivityEvent {
        id: Some(Uuid::new_v4()),
        user_id: input.user_id,
        event_type: input.event_type.trim().to_string(),
        created_at,
        has_bug: input.has_bug,
        duration_ms: input.duration_ms,
    })
}

/// Nearest known kind for a mistyped event type
fn closest_kind(event_type: &str) -> Option<&'static str> {
    let normalized = normalize_kind(event_type);
    ACCEPT_KINDS
        .iter()
        .chain(REJECT_KINDS)
        .map(|kind| (*kind, strsim::jaro_winkler(&normalized, kind)))
        .filter(|(_, score)| *score >= 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(kind, _)| kind)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScopeQuery {
    #[serde(default)]
    user_id: Option<String>,
}

/// List recorded events (read-only)
async fn list_events(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ScopeQuery>,
) -> Result<Json<Vec<ActivityEvent>>, ApiError> {
    Ok(Json(load_scoped(&state, q.user_id.as_deref())?))
}

async fn get_progress(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ScopeQuery>,
) -> Result<Json<ProgressSummary>, ApiError> {
    let events = load_scoped(&state, q.user_id.as_deref())?;
    Ok(Json(projections::calculate_progress(&events)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    granularity: Granularity,
    #[serde(default)]
    filter: DecisionFilter,
}

async fn get_buckets(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<BucketQuery>,
) -> Result<Json<BTreeMap<String, BucketCounts>>, ApiError> {
    let events = load_scoped(&state, q.user_id.as_deref())?;
    let filtered = projections::filter_events(&events, q.filter);
    Ok(Json(projections::group_by_bucket(
        &filtered,
        q.granularity,
        state.zone,
    )))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecisionQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default = "default_decision_granularity")]
    granularity: Granularity,
}

fn default_decision_granularity() -> Granularity {
    Granularity::Minute
}

async fn get_decisions(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<DecisionQuery>,
) -> Result<Json<BTreeMap<String, DecisionCounts>>, ApiError> {
    let events = load_scoped(&state, q.user_id.as_deref())?;
    Ok(Json(decisions(&events, &q, state.zone)))
}

fn decisions(
    events: &[ActivityEvent],
    q: &DecisionQuery,
    zone: Zone,
) -> BTreeMap<String, DecisionCounts> {
    projections::decision_counts(events, q.granularity, zone)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RollingQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    filter: DecisionFilter,
    #[serde(default)]
    window: Option<usize>,
}

async fn get_rolling(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<RollingQuery>,
) -> Result<Json<Vec<RollingWindowPoint>>, ApiError> {
    let events = load_scoped(&state, q.user_id.as_deref())?;
    Ok(Json(rolling(&state, &events, &q)?))
}

fn rolling(
    state: &AppState,
    events: &[ActivityEvent],
    q: &RollingQuery,
) -> Result<Vec<RollingWindowPoint>, ApiError> {
    let window = q.window.unwrap_or(state.rolling_window);
    if window == 0 {
        return Err(ApiError::Validation("window must be at least 1".into()));
    }
    Ok(projections::rolling_series(events, q.filter, window))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimelineQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    granularity: Granularity,
    #[serde(default)]
    filter: DecisionFilter,
    #[serde(default)]
    periods: Option<usize>,
}

const MAX_PERIODS: usize = 1000;

async fn get_timeline(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<TimelineQuery>,
) -> Result<Json<Vec<TimelinePoint>>, ApiError> {
    let events = load_scoped(&state, q.user_id.as_deref())?;
    Ok(Json(timeline(&state, &events, &q)?))
}

fn timeline(
    state: &AppState,
    events: &[ActivityEvent],
    q: &TimelineQuery,
) -> Result<Vec<TimelinePoint>, ApiError> {
    let periods = q.periods.unwrap_or(state.default_periods);
    if periods > MAX_PERIODS {
        return Err(ApiError::Validation(format!(
            "periods must be at most {MAX_PERIODS}"
        )));
    }
    let filtered = projections::filter_events(events, q.filter);
    // Zero periods means "every bucket that has data"
    let labels = (periods > 0)
        .then(|| projections::label_range(q.granularity, periods, state.zone.now()));
    Ok(projections::timeline(
        &filtered,
        q.granularity,
        state.zone,
        labels.as_deref(),
    ))
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ExportView {
    #[default]
    Rolling,
    Timeline,
    Decisions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    view: ExportView,
    #[serde(default)]
    format: ExportFormat,
    #[serde(default)]
    granularity: Option<Granularity>,
    #[serde(default)]
    filter: DecisionFilter,
    #[serde(default)]
    window: Option<usize>,
    #[serde(default)]
    periods: Option<usize>,
}

/// Download a view as CSV or JSON
async fn export_view(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ExportQuery>,
) -> Result<Response, ApiError> {
    let events = load_scoped(&state, q.user_id.as_deref())?;

    let rendered = match q.view {
        ExportView::Rolling => {
            let rq = RollingQuery {
                user_id: None,
                filter: q.filter,
                window: q.window,
            };
            export::render(&rolling(&state, &events, &rq)?, q.format)
        }
        ExportView::Timeline => {
            let tq = TimelineQuery {
                user_id: None,
                granularity: q.granularity.unwrap_or_default(),
                filter: q.filter,
                periods: q.periods,
            };
            export::render(&timeline(&state, &events, &tq)?, q.format)
        }
        ExportView::Decisions => {
            let dq = DecisionQuery {
                user_id: None,
                granularity: q.granularity.unwrap_or_else(default_decision_granularity),
            };
            let rows = export::decision_rows(&decisions(&events, &dq, state.zone));
            export::render(&rows, q.format)
        }
    }
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let view = match q.view {
        ExportView::Rolling => "rolling",
        ExportView::Timeline => "timeline",
        ExportView::Decisions => "decisions",
    };
    let disposition = format!(
        "attachment; filename=\"{view}-{}.{}\"",
        Utc::now().format("%Y%m%d"),
        q.format.extension()
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, q.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        rendered,
    )
        .into_response())
}

// Helper functions

fn load_scoped(state: &AppState, user_id: Option<&str>) -> Result<Vec<ActivityEvent>, ApiError> {
    let events = read_log(&state.log_path)?;
    Ok(projections::scope_to_user(&events, user_id))
}

fn append_to_log(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Parse every event in the log. A missing log is an empty one;
/// lines that are not valid events are skipped.
fn read_log(path: &Path) -> std::io::Result<Vec<ActivityEvent>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let reader = std::io::BufReader::new(file);

    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ActivityEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => tracing::warn!(line = idx + 1, error = %e, "skipping malformed log line"),
        }
    }

    Ok(events)
}

