//! JSON HTTP API in front of the interaction log, the prompt store and the
//! optimization driver.

use agentlern_collector::{forward_reward, forward_step, CollectorError, InteractionLog};
use agentlern_core::{clock, Config, ContextMap, EventSink, TrainingSample, TASK_TYPES};
use agentlern_optimizer::{OptimizationDriver, OptimizerError, PromptStore};
use agentlern_reward::RewardScorer;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

const SERVICE_NAME: &str = "agentlern";
const DEFAULT_ITERATIONS: usize = 100;

/// Everything the handlers share. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub log: Arc<Mutex<InteractionLog>>,
    pub prompts: Arc<Mutex<PromptStore>>,
    pub driver: Arc<OptimizationDriver>,
    pub sink: Arc<dyn EventSink>,
}

impl AppState {
    pub fn open(cfg: &Config, sink: Arc<dyn EventSink>) -> Result<Self> {
        let log = InteractionLog::open(&cfg.data_dir)
            .with_context(|| format!("Failed to open interaction log in {:?}", cfg.data_dir))?;
        let prompts = PromptStore::in_dir(&cfg.data_dir).context("Failed to load prompts")?;
        let scorer = RewardScorer::from_config(cfg).context("Invalid reward bounds")?;
        let driver =
            OptimizationDriver::new(&cfg.data_dir, scorer).with_model_name(cfg.model_name.clone());
        Ok(Self {
            log: Arc::new(Mutex::new(log)),
            prompts: Arc::new(Mutex::new(prompts)),
            driver: Arc::new(driver),
            sink,
        })
    }
}

/// Error answer: `{"error": message}` with the given status.
#[derive(Debug, Serialize)]
pub struct ApiError {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
    #[serde(skip)]
    status: StatusCode,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            suggestion: None,
            status,
        }
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    fn missing(field: &str) -> Self {
        Self::bad_request(format!("Missing required field: {field}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.error, "request failed");
        }
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl From<CollectorError> for ApiError {
    fn from(e: CollectorError) -> Self {
        let status = match e {
            CollectorError::NotFound(_) => StatusCode::NOT_FOUND,
            CollectorError::InvalidReward(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<OptimizerError> for ApiError {
    fn from(e: OptimizerError) -> Self {
        Self::internal(e.to_string())
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct RecordRequest {
    user_id: Option<String>,
    task_type: Option<String>,
    user_message: Option<String>,
    bot_response: Option<String>,
    context: Option<ContextMap>,
    reward: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RewardRequest {
    interaction_id: Option<String>,
    reward: Option<f64>,
    feedback: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OptimizeRequest {
    num_iterations: Option<usize>,
    min_reward: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeRequest {
    user_message: Option<String>,
    bot_response: Option<String>,
    task_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptQuery {
    task_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptUpdate {
    task_type: Option<String>,
    prompt: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/record", post(record))
        .route("/api/reward", post(set_reward))
        .route("/api/stats", get(stats))
        .route("/api/prompt", get(get_prompt).post(update_prompt))
        .route("/api/optimize", post(optimize))
        .route("/api/export", get(export))
        .route("/api/history", get(history))
        .route("/api/task-types", get(task_types))
        .route("/api/analyze", post(analyze))
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let local = listener.local_addr()?;
    info!(%local, "agentlern API listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server failed")?;
    info!("agentlern API shutting down");
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": clock::iso8601_now(),
    }))
}

async fn record(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let req: RecordRequest = parse_body(&body)?;
    let user_id = req.user_id.ok_or_else(|| ApiError::missing("user_id"))?;
    let task_type = req.task_type.ok_or_else(|| ApiError::missing("task_type"))?;
    let user_message = req
        .user_message
        .ok_or_else(|| ApiError::missing("user_message"))?;
    let bot_response = req
        .bot_response
        .ok_or_else(|| ApiError::missing("bot_response"))?;

    let id = blocking(move || {
        let (id, step) = lock(&state.log)?.append(
            &user_id,
            &task_type,
            &user_message,
            &bot_response,
            req.context,
            req.reward,
        )?;
        forward_step(state.sink.as_ref(), &id, &step);
        Ok(id)
    })
    .await?;

    Ok(Json(json!({ "success": true, "interaction_id": id })))
}

async fn set_reward(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let req: RewardRequest = parse_body(&body)?;
    let (Some(id), Some(reward)) = (req.interaction_id, req.reward) else {
        return Err(ApiError::bad_request("Missing interaction_id or reward"));
    };

    blocking(move || {
        let event = lock(&state.log)?.amend(&id, reward, req.feedback)?;
        forward_reward(state.sink.as_ref(), &id, &event);
        Ok(())
    })
    .await?;

    Ok(Json(json!({ "success": true })))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = blocking(move || {
        let stats = lock(&state.log)?.statistics();
        Ok(stats)
    })
    .await?;
    Ok(Json(to_json(&stats)?))
}

async fn get_prompt(
    State(state): State<AppState>,
    Query(query): Query<PromptQuery>,
) -> ApiResult<Json<Value>> {
    let view = blocking(move || {
        let view = lock(&state.prompts)?.view(query.task_type.as_deref());
        Ok(view)
    })
    .await?;
    Ok(Json(to_json(&view)?))
}

async fn update_prompt(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let req: PromptUpdate = parse_body(&body)?;
    let task_type = req.task_type.ok_or_else(|| ApiError::missing("task_type"))?;
    let prompt = req.prompt.ok_or_else(|| ApiError::missing("prompt"))?;

    blocking(move || {
        let mut prompts = lock(&state.prompts)?;
        Ok(prompts.update(&task_type, &prompt)?)
    })
    .await?;

    Ok(Json(json!({ "success": true })))
}

async fn optimize(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let req: OptimizeRequest = parse_body(&body)?;
    let iterations = req.num_iterations.unwrap_or(DEFAULT_ITERATIONS);

    let result = blocking(move || {
        let samples: Vec<TrainingSample> =
            lock(&state.log)?.training_data(req.min_reward).collect();
        if samples.is_empty() {
            let mut err = ApiError::bad_request("No training data available");
            err.suggestion = Some("Record some interactions first using /api/record".into());
            return Err(err);
        }
        let prompts = lock(&state.prompts)?.clone();
        Ok(state.driver.run(&samples, iterations, &prompts, state.sink.as_ref())?)
    })
    .await?;

    Ok(Json(json!({
        "success": true,
        "results": {
            "num_samples": result.num_samples,
            "best_reward": result.best_reward,
            "avg_final_reward": result.avg_final_reward,
            "start_time": result.start_time,
            "end_time": result.end_time,
        },
    })))
}

async fn export(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let (path, num_samples, statistics) = blocking(move || {
        let log = lock(&state.log)?;
        let path = log.export(None)?;
        Ok((path, log.len(), log.statistics()))
    })
    .await?;

    Ok(Json(json!({
        "success": true,
        "output_path": path.display().to_string(),
        "num_samples": num_samples,
        "statistics": to_json(&statistics)?,
    })))
}

async fn history(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let history = blocking(move || Ok(state.driver.history()?)).await?;
    Ok(Json(json!({
        "total_runs": history.len(),
        "history": to_json(&history)?,
    })))
}

async fn task_types() -> Json<Value> {
    let table: Map<String, Value> = TASK_TYPES
        .iter()
        .map(|(name, label)| ((*name).to_string(), Value::from(*label)))
        .collect();
    Json(json!({ "task_types": table }))
}

async fn analyze(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let req: AnalyzeRequest = parse_body(&body)?;
    let (Some(user_message), Some(bot_response)) = (req.user_message, req.bot_response) else {
        return Err(ApiError::bad_request("Missing user_message or bot_response"));
    };

    let task_type = req.task_type.as_deref();
    let analysis = state.driver.scorer().analyze(&user_message, &bot_response, task_type);
    Ok(Json(to_json(&analysis)?))
}

/// An empty body parses as `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))
}

fn lock<T>(mutex: &Mutex<T>) -> ApiResult<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| ApiError::internal("State lock poisoned"))
}

fn to_json<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(|e| ApiError::internal(e.to_string()))
}

/// Runs file and trainer I/O off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("Worker task failed: {e}")))?
}
