//! Bridgeline Server
//!
//! HTTP API for the caller memory and live session system.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bridgeline::{
    config::Config,
    error::Error,
    llm::LlmClient,
    model::{ExtractedMemories, RiskLevel, SessionRecord},
    session::{Orchestrator, StartedSession},
    storage::{create_store, CallerStore},
    timeline::Timeline,
};

/// Application state shared across handlers
struct AppState {
    orchestrator: Orchestrator,
    store: Arc<dyn CallerStore>,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    tracing::info!("Starting Bridgeline Server on port {}", config.server_port);
    tracing::info!("Data directory: {:?}", config.data_dir);

    // Initialize components
    let store = create_store(&config)?;
    let llm = Arc::new(LlmClient::new(&config)?);
    let orchestrator = Orchestrator::new(Arc::clone(&store), llm);

    let state = Arc::new(AppState {
        orchestrator,
        store,
    });

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(health))
        // Live sessions
        .route("/api/sessions/start", post(start_session))
        .route("/api/sessions/end", post(end_session))
        .route("/api/messages/stream", get(stream_message))
        // Caller memory
        .route("/api/callers", get(list_callers))
        .route("/api/callers/summary", get(callers_summary))
        .route("/api/callers/:caller_id/timeline", get(get_timeline))
        .route(
            "/api/callers/:caller_id/sessions/:session_number",
            get(get_session_detail),
        )
        .route("/api/callers/:caller_id/analytics", get(get_analytics))
        .route("/api/callers/:caller_id", delete(purge_caller))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    let port = config.server_port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Error responses carry the message as the body so callers can tell a
/// missing caller from a storage failure.
type ApiError = (StatusCode, String);

fn error_response(e: &Error) -> ApiError {
    let status = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn not_found(detail: &str) -> ApiError {
    (StatusCode::NOT_FOUND, detail.to_string())
}

// === Handlers ===

async fn health() -> &'static str {
    "ok"
}

// --- Session handlers ---

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    caller_id: String,
    volunteer_name: String,
    #[serde(default = "default_language")]
    language: String,
}

async fn start_session(
    State(state): State<SharedState>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<StartedSession>, ApiError> {
    let started = state
        .orchestrator
        .start(&req.caller_id, &req.volunteer_name, &req.language)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(started))
}

#[derive(Debug, Deserialize)]
struct StreamMessageQuery {
    session_id: String,
    message: String,
}

async fn stream_message(
    State(state): State<SharedState>,
    Query(query): Query<StreamMessageQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state
        .orchestrator
        .send_turn(&query.session_id, query.message)
        .await
        .map_err(|e| error_response(&e))?;

    let stream = ReceiverStream::new(rx).map(|event| {
        let event = Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}"));
        Ok(event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct EndSessionRequest {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct EndSessionResponse {
    status: &'static str,
    extracted_memories: ExtractedMemories,
}

async fn end_session(
    State(state): State<SharedState>,
    Json(req): Json<EndSessionRequest>,
) -> Result<Json<EndSessionResponse>, ApiError> {
    let extracted = state
        .orchestrator
        .end(&req.session_id)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(EndSessionResponse {
        status: "ok",
        extracted_memories: extracted,
    }))
}

// --- Caller handlers ---

#[derive(Debug, Serialize)]
struct ListCallersResponse {
    callers: Vec<String>,
}

async fn list_callers(
    State(state): State<SharedState>,
) -> Result<Json<ListCallersResponse>, ApiError> {
    let callers = state
        .store
        .list_callers()
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(ListCallersResponse { callers }))
}

/// One row of the supervisor dashboard
#[derive(Debug, Serialize)]
struct CallerSummary {
    caller_id: String,
    total_sessions: usize,
    risk_level: RiskLevel,
    last_volunteer: String,
    last_date: String,
    last_summary: String,
    escalations: bool,
}

#[derive(Debug, Serialize)]
struct CallersSummaryResponse {
    callers: Vec<CallerSummary>,
}

async fn callers_summary(
    State(state): State<SharedState>,
) -> Result<Json<CallersSummaryResponse>, ApiError> {
    let caller_ids = state
        .store
        .list_callers()
        .await
        .map_err(|e| error_response(&e))?;

    let mut summaries = Vec::new();
    for caller_id in caller_ids {
        let Some(timeline) = state
            .store
            .timeline(&caller_id)
            .await
            .map_err(|e| error_response(&e))?
        else {
            continue;
        };
        let Some(latest) = timeline.sessions.last() else {
            continue;
        };
        summaries.push(CallerSummary {
            caller_id,
            total_sessions: timeline.sessions.len(),
            risk_level: latest.risk_level,
            last_volunteer: latest.volunteer.clone(),
            last_date: latest.date.to_rfc3339(),
            last_summary: latest.summary.clone(),
            escalations: timeline.sessions.iter().any(|s| !s.escalations.is_empty()),
        });
    }

    Ok(Json(CallersSummaryResponse { callers: summaries }))
}

async fn get_timeline(
    State(state): State<SharedState>,
    Path(caller_id): Path<String>,
) -> Result<Json<Timeline>, ApiError> {
    let timeline = state
        .store
        .timeline(&caller_id)
        .await
        .map_err(|e| error_response(&e))?
        .ok_or_else(|| not_found("No timeline data for this caller"))?;
    Ok(Json(timeline))
}

async fn get_session_detail(
    State(state): State<SharedState>,
    Path((caller_id, session_number)): Path<(String, u32)>,
) -> Result<Json<SessionRecord>, ApiError> {
    let memory = state
        .store
        .get(&caller_id)
        .await
        .map_err(|e| error_response(&e))?
        .ok_or_else(|| not_found("Caller not found"))?;

    let session = memory
        .sessions
        .into_iter()
        .find(|s| s.session_number == session_number)
        .ok_or_else(|| not_found("Session not found"))?;

    Ok(Json(session))
}

// --- Analytics handlers ---

#[derive(Debug, Serialize)]
struct RiskTrendPoint {
    session: u32,
    risk: RiskLevel,
    risk_value: i8,
}

#[derive(Debug, Serialize)]
struct TriggerCountPoint {
    session: u32,
    count: usize,
}

#[derive(Debug, Serialize)]
struct SessionDatePoint {
    session: u32,
    date: String,
}

#[derive(Debug, Serialize)]
struct AnalyticsResponse {
    caller_id: String,
    risk_trend: Vec<RiskTrendPoint>,
    trigger_counts: Vec<TriggerCountPoint>,
    session_dates: Vec<SessionDatePoint>,
}

async fn get_analytics(
    State(state): State<SharedState>,
    Path(caller_id): Path<String>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let timeline = state
        .store
        .timeline(&caller_id)
        .await
        .map_err(|e| error_response(&e))?
        .ok_or_else(|| not_found("No session data for this caller"))?;

    let response = AnalyticsResponse {
        caller_id,
        risk_trend: timeline
            .sessions
            .iter()
            .map(|s| RiskTrendPoint {
                session: s.session_number,
                risk: s.risk_level,
                // Charts plot unknown as 0 and low/moderate/high as 1..3
                risk_value: s.risk_level.ordinal() + 1,
            })
            .collect(),
        trigger_counts: timeline
            .sessions
            .iter()
            .map(|s| TriggerCountPoint {
                session: s.session_number,
                count: s.new_info.len(),
            })
            .collect(),
        session_dates: timeline
            .sessions
            .iter()
            .map(|s| SessionDatePoint {
                session: s.session_number,
                date: s.date.to_rfc3339(),
            })
            .collect(),
    };

    Ok(Json(response))
}

async fn purge_caller(
    State(state): State<SharedState>,
    Path(caller_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .purge(&caller_id)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(StatusCode::NO_CONTENT)
}
