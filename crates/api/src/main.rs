use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use escalation::{
    DecisionEngine, DocumentResult, JsonlAuditSink, Metrics, MetricsSnapshot, ModelsConfig, Pipeline,
    PipelineConfig, ReportEmitter, RetryPolicy, RunSummary, TokenTracker, UsageSummary, UsageTotals,
    ollama_invoker,
};
use eval::ModeConfig;
use extract::Document;

#[derive(Clone)]
struct AppState {
    engine: Arc<DecisionEngine>,
    max_concurrent: usize,
    models: ModelsConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    run_id: Uuid,
    mode: String,
    ollama: String,
}

#[derive(Deserialize)]
struct BatchRequest {
    documents: Vec<Document>,
}

#[derive(Serialize)]
struct BatchResponse {
    summary: RunSummary,
    results: Vec<DocumentResult>,
}

#[derive(Serialize)]
struct MetricsResponse {
    decisions: MetricsSnapshot,
    usage: UsageTotals,
}

#[derive(Serialize)]
struct ConfigResponse {
    run_id: Uuid,
    mode: ModeConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("ESCALATION_LOG_JSON").is_ok() {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mode = match std::env::var("ESCALATION_MODE_CONFIG") {
        Ok(path) => ModeConfig::from_file(&PathBuf::from(path))?,
        Err(_) => ModeConfig::production(),
    };
    let mut config = match std::env::var("ESCALATION_PIPELINE_CONFIG") {
        Ok(path) => PipelineConfig::from_file(&PathBuf::from(path))?,
        Err(_) => PipelineConfig::default(),
    };
    config.apply_env_overrides()?;

    // One audit file per server process.
    let run_id = Uuid::new_v4();
    let sink = JsonlAuditSink::open(&config.audit.dir, run_id).await?;
    info!(run_id = %run_id, audit = %sink.path().display(), mode = mode.mode.name(), "Audit trail opened");

    let engine = DecisionEngine::new(ollama_invoker(&config), mode, ReportEmitter::new(run_id, Arc::new(sink)))
        .with_retry(RetryPolicy::from_config(&config.retry))
        .with_tracker(Arc::new(
            TokenTracker::new(config.costs).with_max_documents(config.usage.max_tracked_documents),
        ))
        .with_metrics(Arc::new(Metrics::new()));

    let state = AppState {
        engine: Arc::new(engine),
        max_concurrent: config.concurrency.max_concurrent_documents,
        models: config.models.clone(),
        http: reqwest::Client::new(),
    };

    let bind = std::env::var("ESCALATION_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    info!("Server listening on http://{}", bind);

    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/evaluate", post(evaluate_document))
        .route("/evaluate/batch", post(evaluate_batch))
        .route("/usage/:document_id", get(get_usage))
        .route("/metrics", get(get_metrics))
        .route("/config", get(get_config))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let url = format!("{}/api/tags", state.models.base_url);
    let ollama = match state.http.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => "ok".to_string(),
        Ok(resp) => format!("error: status {}", resp.status()),
        Err(e) => format!("error: {}", e),
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        run_id: state.engine.run_id(),
        mode: state.engine.config().mode.name().to_string(),
        ollama,
    })
}

async fn evaluate_document(
    State(state): State<AppState>,
    Json(document): Json<Document>,
) -> Result<Json<DocumentResult>, StatusCode> {
    if document.document_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let result = state.engine.process(&document).await.map_err(|e| {
        error!(document_id = %document.document_id, error = %e, "Evaluation failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(result))
}

async fn evaluate_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, StatusCode> {
    if req.documents.iter().any(|d| d.document_id.trim().is_empty()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let pipeline = Pipeline::new(Arc::clone(&state.engine), state.max_concurrent);
    let results = pipeline.run(req.documents).await.map_err(|e| {
        error!(error = %e, "Batch evaluation failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(BatchResponse {
        summary: pipeline.summarize(&results),
        results,
    }))
}

async fn get_usage(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<UsageSummary>, StatusCode> {
    state
        .engine
        .tracker()
        .summary_for_document(&document_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        decisions: state.engine.metrics().snapshot(),
        usage: state.engine.tracker().totals(),
    })
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        run_id: state.engine.run_id(),
        mode: state.engine.config().clone(),
    })
}
