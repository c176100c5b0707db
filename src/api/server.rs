//! HTTP API server

use super::rate_limit::RateLimiters;
use crate::cohort::{
    aggregate_records, default_catalog, percentiles, stats_root, CohortReport, PercentileResult,
};
use crate::config::ServerConfig;
use crate::error::{UnlockError, WrapError};
use crate::privacy::{apply_hydration, Sanitizer, UnlockCode, UnlockGate};
use crate::services::LlmService;
use crate::storage::StatsStorage;
use crate::tree::StatTree;
use crate::types::{
    Comparison, HydrationPayload, NewRecord, RecordId, RecordMetadata, StatisticsRecord,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tokio::sync::{broadcast, Mutex};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

static YEAR_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{4})$").expect("Valid year pair regex"));

/// Error body returned by every handler
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<WrapError> for ApiError {
    fn from(err: WrapError) -> Self {
        match err {
            WrapError::Validation(message) => Self::bad_request(message),
            WrapError::NotFound(_) | WrapError::Unlock(UnlockError::NotFound) => {
                Self::not_found("Wrapped not found")
            }
            WrapError::Unlock(UnlockError::NoSecretConfigured) => {
                Self::not_found("No contact data available for this wrapped")
            }
            WrapError::Unlock(UnlockError::Mismatch) => {
                Self::new(StatusCode::FORBIDDEN, "Invalid unlock code")
            }
            WrapError::RateLimited(message) => Self::new(StatusCode::TOO_MANY_REQUESTS, message),
            other => {
                error!("Request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StatsStorage>,
    pub config: Arc<ServerConfig>,
    pub sanitizer: Arc<Sanitizer>,
    pub limiters: Arc<Mutex<RateLimiters>>,
    pub llm: Option<Arc<LlmService>>,
}

impl AppState {
    /// Build state; the LLM client is only created when an API key is set
    pub fn new(config: ServerConfig, storage: Arc<dyn StatsStorage>) -> Self {
        let llm = if config.llm.api_key.is_empty() {
            warn!("OPENAI_API_KEY not set; /api/llm/enhance will be unavailable");
            None
        } else {
            match LlmService::new(config.llm.clone(), storage.clone()) {
                Ok(service) => Some(Arc::new(service)),
                Err(e) => {
                    warn!("LLM service disabled: {}", e);
                    None
                }
            }
        };

        Self {
            limiters: Arc::new(Mutex::new(RateLimiters::new(
                config.upload_limit,
                config.enhance_limit,
            ))),
            sanitizer: Arc::new(Sanitizer::default()),
            config: Arc::new(config),
            storage,
            llm,
        }
    }
}

/// Build the router over `state`
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Records
        .route("/api/upload", post(upload_handler))
        .route("/api/wrapped/:year/:id", get(wrapped_handler))
        .route("/api/unlock/:year/:id", post(unlock_handler))
        .route("/api/percentiles/:year/:id", get(percentiles_handler))
        // Comparisons
        .route("/api/compare", post(create_comparison_handler))
        .route("/api/compare/:years/:id", get(comparison_handler))
        // Admin
        .route("/api/admin/wraps", get(admin_wraps_handler))
        // Commentary
        .route("/api/llm/enhance", post(enhance_handler))
        // Health check
        .route("/health", get(health_handler))
        .with_state(state)
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: AppState,
    /// Shutdown signal for background tasks
    shutdown_tx: broadcast::Sender<()>,
    /// Sweep task handle for cleanup
    sweep_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, storage: Arc<dyn StatsStorage>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            state: AppState::new(config, storage),
            shutdown_tx,
            sweep_handle: None,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until ctrl-c
    pub async fn serve(mut self) -> anyhow::Result<()> {
        let router = build_router(self.state.clone());
        let addr = self.state.config.addr;

        // Expire closed rate-limit windows in the background
        let limiters = self.state.limiters.clone();
        let interval = self.state.config.sweep_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.sweep_handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiters.lock().await.sweep(Instant::now());
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Sweep task received shutdown signal");
                        break;
                    }
                }
            }
        }));

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("yearwrap listening on http://{}", addr);

        let shutdown_tx = self.shutdown_tx.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for ctrl-c: {}", e);
                }
                info!("Shutdown requested");
                let _ = shutdown_tx.send(());
            })
            .await?;

        Ok(())
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.sweep_handle.take() {
            handle.abort();
            debug!("ApiServer dropped - sweep task aborted");
        }
    }
}

/// Client address for throttling
fn client_key(headers: &HeaderMap) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    header_value("x-forwarded-for")
        .or_else(|| header_value("fly-client-ip"))
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_record_id(raw: &str) -> Result<RecordId, ApiError> {
    RecordId::parse(raw).ok_or_else(|| ApiError::not_found("Wrapped not found"))
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    year: Option<i32>,
    #[serde(default)]
    statistics: Option<StatTree>,
    user_name: Option<String>,
    #[serde(default)]
    metadata: Option<RecordMetadata>,
    hydrated_data: Option<HydrationPayload>,
    unlock_code: Option<String>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    id: RecordId,
    url: String,
    year: i32,
}

async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UploadRequest>,
) -> ApiResult<UploadResponse> {
    let key = client_key(&headers);
    let decision = state.limiters.lock().await.upload.check_at(&key, Instant::now());
    if !decision.allowed {
        debug!("Upload throttled");
        return Err(WrapError::RateLimited(
            "Rate limit exceeded. Try again in an hour.".to_string(),
        )
        .into());
    }

    let (Some(year), Some(statistics)) = (request.year, request.statistics) else {
        return Err(ApiError::bad_request("Missing year or statistics"));
    };
    if statistics.is_null() {
        return Err(ApiError::bad_request("Missing year or statistics"));
    }
    if !state.config.accepts_year(year) {
        return Err(ApiError::bad_request("Invalid year"));
    }

    let unlock_code = request
        .unlock_code
        .map(|raw| {
            UnlockCode::parse(&raw).ok_or_else(|| ApiError::bad_request("Invalid unlock code"))
        })
        .transpose()?;

    let mut record = NewRecord::new(year, state.sanitizer.sanitize(&statistics));
    record.user_name = request.user_name;
    record.metadata = request.metadata.unwrap_or_default();
    record.unlock_code = unlock_code;
    record.hydration = request.hydrated_data.filter(|payload| !payload.is_empty());

    let id = state.storage.create_record(&record).await?;
    info!("Uploaded record {} for {}", id, year);

    Ok(Json(UploadResponse {
        url: state.config.share_url(year, id.as_str()),
        id,
        year,
    }))
}

/// Public view of a stored record
#[derive(Debug, Serialize)]
struct WrappedResponse {
    id: RecordId,
    year: i32,
    statistics: StatTree,
    user_name: Option<String>,
    created_at: DateTime<Utc>,
    views: u64,
    unlockable: bool,
}

impl From<StatisticsRecord> for WrappedResponse {
    fn from(record: StatisticsRecord) -> Self {
        let unlockable = record.unlockable();
        Self {
            id: record.id,
            year: record.year,
            statistics: record.statistics.into_inner(),
            user_name: record.user_name,
            created_at: record.created_at,
            views: record.views,
            unlockable,
        }
    }
}

async fn wrapped_handler(
    State(state): State<AppState>,
    Path((year, id)): Path<(i32, String)>,
) -> ApiResult<WrappedResponse> {
    let id = parse_record_id(&id)?;
    let record = state
        .storage
        .view_record(year, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Wrapped not found"))?;

    Ok(Json(record.into()))
}

#[derive(Debug, Deserialize)]
struct UnlockRequest {
    #[serde(alias = "unlockCode")]
    unlock_code: Option<String>,
}

#[derive(Debug, Serialize)]
struct UnlockResponse {
    success: bool,
    hydrated_data: HydrationPayload,
    statistics: StatTree,
}

async fn unlock_handler(
    State(state): State<AppState>,
    Path((year, id)): Path<(i32, String)>,
    Json(request): Json<UnlockRequest>,
) -> ApiResult<UnlockResponse> {
    let id = parse_record_id(&id)?;
    let presented = request
        .unlock_code
        .ok_or_else(|| ApiError::bad_request("Missing unlock code"))?;

    let gate = UnlockGate::new(state.storage.clone());
    let payload = gate.reveal_in_year(year, &id, &presented).await?;

    let record = state
        .storage
        .get_record(year, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Wrapped not found"))?;
    let statistics = apply_hydration(&record.statistics, &payload);

    Ok(Json(UnlockResponse {
        success: true,
        hydrated_data: payload,
        statistics,
    }))
}

#[derive(Debug, Serialize)]
struct PercentilesResponse {
    percentiles: PercentileResult,
    cohort_size: usize,
}

async fn percentiles_handler(
    State(state): State<AppState>,
    Path((year, id)): Path<(i32, String)>,
) -> ApiResult<PercentilesResponse> {
    let id = parse_record_id(&id)?;
    let cohort = state.storage.list_records(Some(year)).await?;
    if cohort.is_empty() {
        return Ok(Json(PercentilesResponse {
            percentiles: PercentileResult::new(),
            cohort_size: 0,
        }));
    }

    let target = cohort
        .iter()
        .find(|record| record.id == id)
        .ok_or_else(|| ApiError::not_found("Wrapped not found"))?;

    let result = percentiles(
        target.statistics.as_tree(),
        cohort.iter().map(|record| record.statistics.as_tree()),
        &default_catalog(),
    );
    debug!(
        "Ranked {}/{} against {} records on {} metrics",
        year,
        id,
        cohort.len(),
        result.len()
    );

    Ok(Json(PercentilesResponse {
        percentiles: result,
        cohort_size: cohort.len(),
    }))
}

#[derive(Debug, Deserialize)]
struct CompareRequest {
    #[serde(alias = "year1Id")]
    year1_id: Option<String>,
    #[serde(alias = "year2Id")]
    year2_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CompareResponse {
    id: RecordId,
    url: String,
    year1: i32,
    year2: i32,
}

async fn create_comparison_handler(
    State(state): State<AppState>,
    Json(request): Json<CompareRequest>,
) -> ApiResult<CompareResponse> {
    let (Some(first), Some(second)) = (request.year1_id, request.year2_id) else {
        return Err(ApiError::bad_request("Missing year1_id or year2_id"));
    };
    let first = parse_record_id(&first)?;
    let second = parse_record_id(&second)?;

    let comparison = state.storage.create_comparison(&first, &second).await?;
    let years = format!("{}-{}", comparison.year1, comparison.year2);

    Ok(Json(CompareResponse {
        url: format!(
            "{}/compare/{}/{}",
            state.config.base_url.trim_end_matches('/'),
            years,
            comparison.id
        ),
        id: comparison.id,
        year1: comparison.year1,
        year2: comparison.year2,
    }))
}

/// Parse `YYYY-YYYY`, earlier year first
fn parse_year_pair(raw: &str) -> Result<(i32, i32), ApiError> {
    let invalid = || ApiError::bad_request("Invalid year format. Expected format: YYYY-YYYY");
    let captures = YEAR_PAIR.captures(raw).ok_or_else(invalid)?;
    let first: i32 = captures[1].parse().map_err(|_| invalid())?;
    let second: i32 = captures[2].parse().map_err(|_| invalid())?;

    if first == second {
        return Err(ApiError::bad_request("Cannot compare the same year"));
    }
    Ok((first.min(second), first.max(second)))
}

async fn comparison_handler(
    State(state): State<AppState>,
    Path((years, id)): Path<(String, String)>,
) -> ApiResult<Comparison> {
    let (year1, year2) = parse_year_pair(&years)?;
    let id = RecordId::parse(&id).ok_or_else(|| ApiError::not_found("Comparison not found"))?;

    let comparison = state
        .storage
        .view_comparison(year1, year2, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Comparison not found"))?;

    Ok(Json(comparison))
}

#[derive(Debug, Deserialize)]
struct AdminQuery {
    year: Option<i32>,
}

/// One row of the admin listing
#[derive(Debug, Serialize)]
struct WrapSummary {
    id: RecordId,
    year: i32,
    created_at: DateTime<Utc>,
    views: u64,
    total_sent: Option<f64>,
    total_received: Option<f64>,
    total_messages: Option<f64>,
    user_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct AdminResponse {
    wraps: Vec<WrapSummary>,
    #[serde(flatten)]
    report: CohortReport,
}

fn authorized(config: &ServerConfig, headers: &HeaderMap) -> bool {
    let Some(expected) = config.admin_key.as_deref() else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

async fn admin_wraps_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
) -> ApiResult<AdminResponse> {
    if !authorized(&state.config, &headers) {
        warn!("Rejected admin request with missing or wrong key");
        return Err(ApiError::unauthorized());
    }

    let records = state.storage.list_records(query.year).await?;
    let report = aggregate_records(&records);
    if !report.skipped.is_empty() {
        warn!("{} records skipped during aggregation", report.skipped.len());
    }

    let wraps = records
        .into_iter()
        .rev()
        .map(|record| {
            let stats = stats_root(record.statistics.as_tree());
            WrapSummary {
                total_sent: stats.number_at("volume.total_sent"),
                total_received: stats.number_at("volume.total_received"),
                total_messages: stats.number_at("volume.total_messages"),
                id: record.id,
                year: record.year,
                created_at: record.created_at,
                views: record.views,
                user_name: record.user_name,
            }
        })
        .collect();

    Ok(Json(AdminResponse { wraps, report }))
}

#[derive(Debug, Deserialize)]
struct EnhanceRequest {
    prompt: Option<String>,
    #[serde(alias = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct EnhanceResponse {
    enhancement: String,
    cached: bool,
    remaining: u32,
}

async fn enhance_handler(
    State(state): State<AppState>,
    Json(request): Json<EnhanceRequest>,
) -> ApiResult<EnhanceResponse> {
    let prompt = request.prompt.filter(|p| !p.trim().is_empty());
    let session = request.session_id.filter(|s| !s.is_empty());
    let (Some(prompt), Some(session)) = (prompt, session) else {
        return Err(ApiError::bad_request("Missing prompt or sessionId"));
    };

    let decision = state
        .limiters
        .lock()
        .await
        .enhance
        .check_at(&session, Instant::now());
    if !decision.allowed {
        return Err(WrapError::RateLimited(
            "Too many enhancement requests for this session".to_string(),
        )
        .into());
    }

    let llm = state
        .llm
        .as_ref()
        .ok_or_else(|| WrapError::Config("LLM service not configured".to_string()))?;
    let completion = llm.complete(&prompt).await?;

    Ok(Json(EnhanceResponse {
        enhancement: completion.completion,
        cached: completion.cached,
        remaining: decision.remaining,
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
