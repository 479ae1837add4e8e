//! Web server implementation
//!
//! JSON surface over the replay engine. Every cascade endpoint accepts
//! either a `session` id (server-side cached state) or an inline `tokens`
//! bundle, and every response returns both, so stateless and session
//! clients can interleave freely.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use mvlookup_common::{DropdownOption, Error, PageState, StepOutcome};
use mvlookup_replay::{ProxyConfig, ReplayEngine, SessionStore};

/// Web server state
pub struct AppState {
    engine: ReplayEngine,
    sessions: SessionStore,
}

impl AppState {
    pub fn new(cfg: &ProxyConfig) -> anyhow::Result<Self> {
        Ok(Self {
            engine: ReplayEngine::new(cfg)?,
            sessions: SessionStore::new(&cfg.session),
        })
    }
}

// ============================================================================
// Request / response DTOs
// ============================================================================

/// How a request identifies the page state to replay against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateCarrier {
    /// Server-side session id from a previous response.
    #[serde(default)]
    session: Option<Uuid>,
    /// Inline token bundle from a previous response.
    #[serde(default)]
    tokens: Option<PageState>,
}

#[derive(Debug, Deserialize)]
struct ModelsRequest {
    make: String,
    #[serde(flatten)]
    carrier: StateCarrier,
}

#[derive(Debug, Deserialize)]
struct YearsRequest {
    make: String,
    model: String,
    #[serde(flatten)]
    carrier: StateCarrier,
}

#[derive(Debug, Deserialize)]
struct CountriesRequest {
    make: String,
    model: String,
    year: String,
    #[serde(flatten)]
    carrier: StateCarrier,
}

#[derive(Debug, Deserialize)]
struct FuelTypesRequest {
    make: String,
    model: String,
    year: String,
    country: String,
    #[serde(flatten)]
    carrier: StateCarrier,
}

#[derive(Debug, Deserialize)]
struct EnginesRequest {
    make: String,
    model: String,
    year: String,
    country: String,
    fuel: String,
    #[serde(flatten)]
    carrier: StateCarrier,
}

/// Every cascade endpoint answers with this shape.
#[derive(Debug, Serialize)]
struct OptionsResponse {
    options: Vec<DropdownOption>,
    session: Uuid,
    tokens: PageState,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    sessions: usize,
}

// ============================================================================
// Error mapping
// ============================================================================

/// JSON error envelope with a status derived from the error domain.
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let (status, code) = match &e {
            Error::MissingSelection(_)
            | Error::SelectionConflict { .. }
            | Error::InvalidConfig(_)
            | Error::Serialization(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            Error::StateExpired | Error::PageRedirect(_) => {
                (StatusCode::CONFLICT, "state_expired")
            }
            Error::EmptyOptions { .. } => (StatusCode::BAD_GATEWAY, "empty_options"),
            Error::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
            Error::Upstream(_)
            | Error::UpstreamStatus { .. }
            | Error::UpstreamError(_)
            | Error::Delta(_)
            | Error::Scrape(_)
            | Error::MissingField(_) => (StatusCode::BAD_GATEWAY, "upstream_failure"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            error!(code, "request failed: {e}");
        }
        Self {
            status,
            code,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "code": self.code,
            "error": self.message,
        }));
        (self.status, body).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Resolve the page state a request wants to replay against.
fn resolve_state(
    state: &AppState,
    carrier: &StateCarrier,
) -> Result<(PageState, Option<Uuid>), ApiError> {
    if let Some(id) = carrier.session {
        let page = state.sessions.get(&id)?;
        return Ok((page, Some(id)));
    }
    if let Some(tokens) = &carrier.tokens {
        return Ok((tokens.clone(), None));
    }
    Err(ApiError::bad_request(
        "request must carry either 'session' or 'tokens'",
    ))
}

/// Persist the refreshed state and build the response envelope.
fn respond(
    state: &AppState,
    existing: Option<Uuid>,
    outcome: StepOutcome,
) -> Json<OptionsResponse> {
    let session = match existing {
        Some(id) => {
            state.sessions.update(&id, outcome.state.clone());
            id
        }
        None => state.sessions.insert(outcome.state.clone()),
    };
    Json(OptionsResponse {
        options: outcome.options,
        session,
        tokens: outcome.state,
    })
}

async fn init(State(state): State<Arc<AppState>>) -> Result<Json<OptionsResponse>, ApiError> {
    let outcome = state.engine.init().await?;
    Ok(respond(&state, None, outcome))
}

async fn models(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModelsRequest>,
) -> Result<Json<OptionsResponse>, ApiError> {
    let (page, id) = resolve_state(&state, &req.carrier)?;
    let outcome = state.engine.models(page, &req.make).await?;
    Ok(respond(&state, id, outcome))
}

async fn years(
    State(state): State<Arc<AppState>>,
    Json(req): Json<YearsRequest>,
) -> Result<Json<OptionsResponse>, ApiError> {
    let (page, id) = resolve_state(&state, &req.carrier)?;
    let outcome = state.engine.years(page, &req.make, &req.model).await?;
    Ok(respond(&state, id, outcome))
}

async fn countries(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CountriesRequest>,
) -> Result<Json<OptionsResponse>, ApiError> {
    let (page, id) = resolve_state(&state, &req.carrier)?;
    let outcome = state
        .engine
        .countries(page, &req.make, &req.model, &req.year)
        .await?;
    Ok(respond(&state, id, outcome))
}

async fn fuel_types(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FuelTypesRequest>,
) -> Result<Json<OptionsResponse>, ApiError> {
    let (page, id) = resolve_state(&state, &req.carrier)?;
    let outcome = state
        .engine
        .fuel_types(page, &req.make, &req.model, &req.year, &req.country)
        .await?;
    Ok(respond(&state, id, outcome))
}

async fn engines(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnginesRequest>,
) -> Result<Json<OptionsResponse>, ApiError> {
    let (page, id) = resolve_state(&state, &req.carrier)?;
    let outcome = state
        .engine
        .engines(
            page, &req.make, &req.model, &req.year, &req.country, &req.fuel,
        )
        .await?;
    Ok(respond(&state, id, outcome))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: mvlookup_common::VERSION,
        sessions: state.sessions.len(),
    })
}

// ============================================================================
// Router / serve
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/init", get(init))
        .route("/api/models", post(models))
        .route("/api/years", post(years))
        .route("/api/countries", post(countries))
        .route("/api/fuel-types", post(fuel_types))
        .route("/api/engines", post(engines))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, cfg: ProxyConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(&cfg)?);
    state.sessions.spawn_sweeper(cfg.session.sweep_interval());

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("mvlookup API listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
