//! Query HTTP server.
//!
//! Read-only JSON API over the measurement store, spoken by the consuming
//! reporting system.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/v1/compatibility` | Provider descriptor `{uid, version}` |
//! | `POST` | `/v1/measurements` | Measurements for `exam.studyUid` |
//! | `GET`  | `/v1/GetStructuredDataCompatibility` | Alias of `/v1/compatibility` |
//! | `POST` | `/v1/GetStructuredData` | Alias of `/v1/measurements` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no measurements for study" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! Messages are generic; failure detail only goes to the log.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::error::QueryError;
use crate::ingest::Pipeline;
use crate::migrate;
use crate::query::{self, CompatibilityInfo};
use crate::store::MeasurementStore;
use crate::watcher::{self, Watcher};

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    compatibility: Arc<CompatibilityInfo>,
    store: Arc<MeasurementStore>,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<MeasurementStore>) -> Self {
        Self {
            compatibility: Arc::new(query::compatibility(config)),
            store,
        }
    }
}

/// Builds the router with every route and the CORS layer applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/compatibility", get(handle_compatibility))
        .route("/v1/measurements", post(handle_measurements))
        .route("/v1/GetStructuredDataCompatibility", get(handle_compatibility))
        .route("/v1/GetStructuredData", post(handle_measurements))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Entry point for `srwatch serve`: serves until Ctrl+C.
pub async fn run_server(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = Arc::new(MeasurementStore::new(pool.clone()));

    serve(config, store, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    pool.close().await;
    Ok(())
}

/// Entry point for `srwatch run`: watcher and query server in one process,
/// sharing a store. Ctrl+C stops both; the watcher drains first.
pub async fn run_with_watcher(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    watcher::ensure_directories(config)?;
    let store = Arc::new(MeasurementStore::new(pool.clone()));

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    // Resolves on the stop signal, or when the sender is gone.
    let stopped = |mut rx: tokio::sync::watch::Receiver<bool>| async move {
        let _ = rx.changed().await;
    };

    let pipeline = Arc::new(Pipeline::from_config(config, store.clone()));
    let watcher = Watcher::new(pipeline, config);
    let watch_task = tokio::spawn(watcher.run(stopped(stop_rx.clone())));

    let server = serve(config, store, stopped(stop_rx));
    tokio::pin!(server);
    let served = tokio::select! {
        res = &mut server => res,
        _ = tokio::signal::ctrl_c() => {
            let _ = stop_tx.send(true);
            server.await
        }
    };
    let _ = stop_tx.send(true);

    let stats = watch_task.await??;
    served?;

    println!("run stopped");
    println!("  archived: {}", stats.archived);
    println!("  rejected: {}", stats.rejected);
    println!("  deferred: {}", stats.deferred);
    println!("  purged: {}", stats.purged);

    pool.close().await;
    Ok(())
}

/// Binds `[server].bind` and serves until `shutdown` resolves.
pub async fn serve<F>(config: &Config, store: Arc<MeasurementStore>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(AppState::new(config, store));
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;

    println!("Query server listening on http://{}", listener.local_addr()?);
    tracing::info!(bind = %config.server.bind, "query server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal() -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: "internal error".to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /v1/compatibility ============

async fn handle_compatibility(State(state): State<AppState>) -> Json<CompatibilityInfo> {
    Json(state.compatibility.as_ref().clone())
}

// ============ POST /v1/measurements ============

/// Request body. Only `exam.studyUid` is required; the rest identifies the
/// caller and is logged.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeasurementsRequest {
    #[serde(default)]
    user: Option<UserInfo>,
    #[serde(default)]
    patient: Option<PatientInfo>,
    #[serde(default)]
    exam: Option<ExamInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    login: Option<String>,
    domain: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatientInfo {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExamInfo {
    exam_no: Option<String>,
    acc_no: Option<String>,
    study_uid: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeasurementsResponse {
    compatibility: CompatibilityInfo,
    prop_values: BTreeMap<String, Number>,
}

async fn handle_measurements(
    State(state): State<AppState>,
    body: Result<Json<MeasurementsRequest>, JsonRejection>,
) -> Result<Json<MeasurementsResponse>, AppError> {
    let Json(request) = body.map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "unreadable request body");
        bad_request("malformed request body")
    })?;

    let exam = request.exam.unwrap_or_default();
    let study_uid = exam
        .study_uid
        .as_deref()
        .map(str::trim)
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| bad_request("exam.studyUid is required"))?;

    let user = request.user.unwrap_or_default();
    let patient_ids = request.patient.map(|p| p.ids).unwrap_or_default();
    tracing::debug!(
        study_uid,
        login = user.login.as_deref().unwrap_or(""),
        domain = user.domain.as_deref().unwrap_or(""),
        user_name = user.name.as_deref().unwrap_or(""),
        patient_ids = ?patient_ids,
        exam_no = exam.exam_no.as_deref().unwrap_or(""),
        acc_no = exam.acc_no.as_deref().unwrap_or(""),
        exam_date = exam.date.as_deref().unwrap_or(""),
        "measurement lookup"
    );

    let prop_values = query::get_measurements(&state.store, study_uid)
        .await
        .map_err(|e| match e {
            QueryError::NotFound(_) => not_found("no measurements for study"),
            QueryError::Store(err) => {
                tracing::error!(study_uid, error = %err, "measurement lookup failed");
                internal()
            }
        })?;

    Ok(Json(MeasurementsResponse {
        compatibility: state.compatibility.as_ref().clone(),
        prop_values,
    }))
}
