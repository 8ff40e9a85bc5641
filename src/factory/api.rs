use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{error, info};

use super::db::DbHandle;
use super::export::{ExportDocument, export_file_name};
use super::llm::TextGenerator;
use super::models::{
    AppIdea, ArtifactStatus, BuildRule, Configuration, ConfigurationView, GeneratedArtifact,
    JobStatus,
};
use super::scheduler::{RetryPolicy, validate_interval};
use super::orchestrator::{Orchestrator, PassReport};
use super::stages::{DEFAULT_IDEA_COUNT, LlmPipeline};
use crate::config::AppConfig;
use crate::errors::{FactoryError, StageFailure};
use crate::preview::{PreviewOptions, assemble_preview, no_code_preview};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub pipeline: Arc<LlmPipeline>,
    pub orchestrator: Orchestrator,
    pub preview: PreviewOptions,
    /// Bearer token for the scheduled trigger; unset rejects every call
    pub cron_secret: Option<String>,
}

impl AppState {
    pub fn new(db: DbHandle, generator: Arc<dyn TextGenerator>, config: &AppConfig) -> Self {
        let pipeline = Arc::new(LlmPipeline::new(
            generator,
            db.clone(),
            config.generation.idea_count,
        ));
        let orchestrator = Orchestrator::new(db.clone(), pipeline.clone())
            .with_policy(RetryPolicy::with_backoff_minutes(
                config.scheduler.failure_backoff_minutes,
            ))
            .with_lease_seconds(config.scheduler.lease_seconds);
        Self {
            db,
            pipeline,
            orchestrator,
            preview: config.preview.to_options(),
            cron_secret: config.scheduler.cron_secret.clone(),
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ConfigRequest {
    pub api_key: Option<String>,
    pub provider: Option<String>,
    pub interval_minutes: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
}

#[derive(Deserialize)]
pub struct DeleteRuleRequest {
    pub rule_id: i64,
}

#[derive(Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Deserialize, Default)]
pub struct GenerateIdeasRequest {
    pub config_id: Option<i64>,
    pub count: Option<usize>,
}

#[derive(Deserialize)]
pub struct EvaluateIdeasRequest {
    pub config_id: Option<i64>,
    #[serde(default)]
    pub ideas: Vec<AppIdea>,
}

#[derive(Deserialize)]
pub struct GenerateAppRequest {
    pub config_id: Option<i64>,
    pub app_idea: String,
}

#[derive(Deserialize)]
pub struct FixCodeRequest {
    pub app_id: i64,
    #[serde(default)]
    pub error: String,
}

#[derive(Deserialize)]
pub struct JobStatusRequest {
    pub status: JobStatus,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    #[serde(flatten)]
    pub config: ConfigurationView,
    pub rules: Vec<BuildRule>,
}

#[derive(Serialize)]
pub struct CronResponse {
    pub success: bool,
    pub message: String,
    pub processed: usize,
    pub report: PassReport,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<FactoryError> for ApiError {
    fn from(err: FactoryError) -> Self {
        match err {
            FactoryError::ConfigNotFound
            | FactoryError::ArtifactNotFound { .. }
            | FactoryError::JobNotFound { .. } => ApiError::NotFound(err.to_string()),
            FactoryError::BadRequest(msg) => ApiError::BadRequest(msg),
            FactoryError::Unauthorized => ApiError::Unauthorized,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StageFailure> for ApiError {
    fn from(failure: StageFailure) -> Self {
        error!("{}", failure);
        ApiError::Internal(failure.to_string())
    }
}

fn db_error(e: anyhow::Error) -> ApiError {
    FactoryError::Database(e).into()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/config", get(get_config).post(save_config))
        .route(
            "/api/rules",
            get(list_rules).post(create_rule).delete(delete_rule),
        )
        .route("/api/apps", get(list_apps).post(create_app))
        .route("/api/apps/{id}", get(get_app).delete(delete_app))
        .route("/api/apps/{id}/export", get(export_app))
        .route("/api/preview/{id}", get(preview_app))
        .route("/api/generate-ideas", post(generate_ideas))
        .route("/api/evaluate-ideas", post(evaluate_ideas))
        .route("/api/generate-app", post(generate_app))
        .route("/api/fix-code", post(fix_code))
        .route("/api/cron", get(scheduled_trigger).post(scheduled_trigger))
        .route("/api/cron/trigger", post(manual_trigger))
        .route("/api/cron/status", get(cron_status))
        .route("/api/cron/{id}", get(get_job).patch(set_job_status))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// The configuration named by `config_id`, or the active one.
async fn resolve_config(state: &SharedState, config_id: Option<i64>) -> Result<Configuration, ApiError> {
    let config = state
        .db
        .call(move |db| match config_id {
            Some(id) => db.get_configuration(id),
            None => db.get_active_configuration(),
        })
        .await
        .map_err(db_error)?;
    config.ok_or_else(|| FactoryError::ConfigNotFound.into())
}

async fn config_response(state: &SharedState, config: Configuration) -> Result<ConfigResponse, ApiError> {
    let config_id = config.id;
    let rules = state
        .db
        .call(move |db| db.list_rules(config_id))
        .await
        .map_err(db_error)?;
    Ok(ConfigResponse {
        config: ConfigurationView::from(&config),
        rules,
    })
}

async fn initialize_jobs(state: &SharedState) -> Result<usize, ApiError> {
    let now = Utc::now();
    state
        .db
        .call(move |db| db.initialize_jobs(now))
        .await
        .map_err(db_error)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Compare in constant time; an empty secret never matches.
fn secret_matches(secret: &str, token: &str) -> bool {
    !secret.is_empty() && bool::from(secret.as_bytes().ct_eq(token.as_bytes()))
}

async fn run_pass(state: &SharedState, verb: &str) -> Result<Json<CronResponse>, ApiError> {
    let report = state
        .orchestrator
        .run_pass(Utc::now())
        .await
        .map_err(FactoryError::Other)?;
    let processed = report.processed();
    Ok(Json(CronResponse {
        success: true,
        message: format!("{} {} cron jobs", verb, processed),
        processed,
        report,
    }))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_config(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let config = resolve_config(&state, None).await?;
    if config.usable_api_key().is_some() {
        initialize_jobs(&state).await?;
    }
    Ok(Json(config_response(&state, config).await?))
}

async fn save_config(
    State(state): State<SharedState>,
    Json(req): Json<ConfigRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let interval = validate_interval(req.interval_minutes.unwrap_or(60))?;
    let provider = req.provider.unwrap_or_else(|| "google".to_string());
    let api_key = req.api_key;
    let config = state
        .db
        .call(move |db| db.upsert_configuration(api_key.as_deref(), &provider, interval))
        .await
        .map_err(db_error)?;
    let created = initialize_jobs(&state).await?;
    info!(config_id = config.id, jobs_created = created, "Configuration saved");
    Ok(Json(config_response(&state, config).await?))
}

async fn list_rules(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let rules = state
        .db
        .call(|db| match db.get_active_configuration()? {
            Some(config) => db.list_rules(config.id),
            None => Ok(Vec::new()),
        })
        .await
        .map_err(db_error)?;
    Ok(Json(json!({ "rules": rules })))
}

async fn create_rule(
    State(state): State<SharedState>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Rule name is required".into()));
    }
    let config = resolve_config(&state, None).await?;
    let category = req.category.unwrap_or_else(|| "general".to_string());
    let rule = state
        .db
        .call(move |db| db.create_rule(config.id, req.name.trim(), &req.description, &category))
        .await
        .map_err(db_error)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn delete_rule(
    State(state): State<SharedState>,
    Json(req): Json<DeleteRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let rule_id = req.rule_id;
    let deleted = state
        .db
        .call(move |db| db.delete_rule(rule_id))
        .await
        .map_err(db_error)?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Rule {} not found", rule_id)));
    }
    Ok(Json(json!({ "success": true })))
}

async fn list_apps(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let apps = state
        .db
        .call(|db| db.list_artifacts())
        .await
        .map_err(db_error)?;
    Ok(Json(apps))
}

async fn create_app(
    State(state): State<SharedState>,
    Json(req): Json<CreateAppRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("App name is required".into()));
    }
    let app = state
        .db
        .call(move |db| {
            let config_id = db.get_active_configuration()?.map(|c| c.id);
            db.create_artifact(
                config_id,
                req.name.trim(),
                &req.description,
                &req.prompt,
                ArtifactStatus::Pending,
            )
        })
        .await
        .map_err(db_error)?;
    Ok((StatusCode::CREATED, Json(app)))
}

async fn load_app(
    state: &SharedState,
    id: i64,
) -> Result<GeneratedArtifact, ApiError> {
    state
        .db
        .call(move |db| db.get_artifact(id))
        .await
        .map_err(db_error)?
        .ok_or_else(|| FactoryError::ArtifactNotFound { id }.into())
}

async fn get_app(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_app(&state, id).await?))
}

async fn delete_app(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .db
        .call(move |db| db.delete_artifact(id))
        .await
        .map_err(db_error)?;
    if !deleted {
        return Err(FactoryError::ArtifactNotFound { id }.into());
    }
    Ok(Json(json!({ "success": true })))
}

async fn export_app(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let app = load_app(&state, id).await?;
    let doc = ExportDocument::from_artifact(&app)
        .ok_or_else(|| FactoryError::BadRequest(format!("App {} has no code to export", id)))?;
    let body = doc.to_json_pretty().map_err(FactoryError::Other)?;
    let disposition = format!("attachment; filename=\"{}\"", export_file_name(&app.name));
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// Previews run in an opaque origin: scripts may run for the runtime
/// bundler but cannot reach this server's cookies or storage.
const PREVIEW_CSP: &str = "sandbox allow-scripts allow-popups";

async fn preview_app(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let app = load_app(&state, id).await?;
    let html = match app.raw_code.as_deref() {
        Some(code) if !code.trim().is_empty() => {
            assemble_preview(code, &app.name, &state.preview).html
        }
        _ => no_code_preview(&app.name),
    };
    Ok(([(header::CONTENT_SECURITY_POLICY, PREVIEW_CSP)], Html(html)))
}

async fn generate_ideas(
    State(state): State<SharedState>,
    body: Option<Json<GenerateIdeasRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let count = req.count.unwrap_or(DEFAULT_IDEA_COUNT);
    if count == 0 {
        return Err(ApiError::BadRequest("count must be at least 1".into()));
    }
    let config = resolve_config(&state, req.config_id).await?;
    let ideas = state.pipeline.ideas(config.usable_api_key(), count).await?;
    Ok(Json(json!({ "ideas": ideas })))
}

async fn evaluate_ideas(
    State(state): State<SharedState>,
    Json(req): Json<EvaluateIdeasRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.ideas.is_empty() {
        return Err(ApiError::BadRequest("No ideas provided".into()));
    }
    let config = resolve_config(&state, req.config_id).await?;
    let evaluated = state
        .pipeline
        .evaluate(config.usable_api_key(), &req.ideas)
        .await?;
    Ok(Json(json!({ "evaluatedIdeas": evaluated })))
}

async fn generate_app(
    State(state): State<SharedState>,
    Json(req): Json<GenerateAppRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.app_idea.trim().is_empty() {
        return Err(ApiError::BadRequest("app_idea is required".into()));
    }
    let config = resolve_config(&state, req.config_id).await?;
    let id = state
        .pipeline
        .build_app(config.id, config.usable_api_key(), &req.app_idea)
        .await?;
    let app = load_app(&state, id).await?;
    Ok(Json(json!({ "id": id, "success": true, "code": app.raw_code })))
}

async fn fix_code(
    State(state): State<SharedState>,
    Json(req): Json<FixCodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.error.trim().is_empty() {
        return Err(ApiError::BadRequest("error is required".into()));
    }
    let app = load_app(&state, req.app_id).await?;
    if app.raw_code.as_deref().is_none_or(|c| c.trim().is_empty()) {
        return Err(ApiError::BadRequest(format!("App {} has no code to fix", app.id)));
    }
    let api_key = resolve_config(&state, app.config_id)
        .await
        .ok()
        .and_then(|c| c.usable_api_key().map(str::to_string));
    let fixed = state
        .pipeline
        .fix_code(api_key.as_deref(), &app, &req.error)
        .await?;
    Ok(Json(json!({
        "success": true,
        "fixedCode": fixed,
        "message": "Code fixed successfully",
    })))
}

async fn scheduled_trigger(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let authorized = match (state.cron_secret.as_deref(), bearer_token(&headers)) {
        (Some(secret), Some(token)) => secret_matches(secret, token),
        _ => false,
    };
    if !authorized {
        return Err(FactoryError::Unauthorized.into());
    }
    run_pass(&state, "Processed").await
}

async fn manual_trigger(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    run_pass(&state, "Manually triggered").await
}

async fn cron_status(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let crons = state
        .db
        .call(|db| db.list_jobs())
        .await
        .map_err(db_error)?;
    Ok(Json(json!({ "crons": crons })))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .db
        .call(move |db| db.get_job(id))
        .await
        .map_err(db_error)?
        .ok_or(FactoryError::JobNotFound { id })?;
    Ok(Json(job))
}

/// Enable or disable a job. Disabled jobs are never due.
async fn set_job_status(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<JobStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status = req.status;
    let job = state
        .db
        .call(move |db| {
            if !db.set_job_status(id, status)? {
                return Ok(None);
            }
            db.get_job(id)
        })
        .await
        .map_err(db_error)?
        .ok_or(FactoryError::JobNotFound { id })?;
    info!(job_id = id, status = status.as_str(), "Job status changed");
    Ok(Json(job))
}

// ── Tests ─────────────────────────────────────────────────────────────
