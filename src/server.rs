//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Welcome text |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST`/`GET` | `/download` | Start a bulk download for `{user}` |
//! | `GET`  | `/download/status` | Current download status map |
//! | `POST` | `/train` | Start (re)training `{user, repo}` in the background |
//! | `POST` | `/is_trained` | `{index}` → `{index, trained}` |
//! | `POST` | `/search` | Ranked snippets for `{user, repo, query, language?, limit?}` |
//! | `GET`  | `/langs` | Supported languages |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "index alice/demo not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `already_trained`
//! (409), `training_in_progress` (409), `download_failed` (502),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use snippet_search_core::error::EngineError;
use snippet_search_core::language::Language;
use snippet_search_core::models::{check_component, RepoKey, ResultRecord};
use snippet_search_core::search::SearchRequest;

use crate::config::Config;
use crate::download::DownloadSnapshot;
use crate::service::Services;

/// Shared state handed to every handler.
#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

/// Start the server on `[server].bind` and run until Ctrl-C or SIGTERM.
///
/// Known indexes are warm-loaded in the background. The manifest is
/// persisted once the server has drained.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Arc::new(Services::build(config.clone()).await?);

    let warm = services.clone();
    tokio::spawn(async move {
        match warm.warm_up().await {
            Ok(trained) => tracing::info!(trained, "warm-up finished"),
            Err(e) => tracing::error!(error = %e, "warm-up failed"),
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    println!("snips listening on http://{}", config.server.bind);

    axum::serve(listener, router(services.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, persisting manifest");
    services.registry.persist().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Build the router over an already-constructed service set.
pub fn router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_home))
        .route("/health", get(handle_health))
        .route("/download", post(handle_download).get(handle_download))
        .route("/download/status", get(handle_download_status))
        .route("/train", post(handle_train))
        .route("/is_trained", post(handle_is_trained))
        .route("/search", post(handle_search))
        .route("/langs", get(handle_langs))
        .layer(cors)
        .with_state(AppState { services })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
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
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AlreadyTrained(_) | EngineError::TrainingInProgress(_) => {
                StatusCode::CONFLICT
            }
            EngineError::Download(_) => StatusCode::BAD_GATEWAY,
            EngineError::Extraction(_) | EngineError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        // Only client errors echo their message; upstream and internal
        // failures are logged here and stay opaque to the caller.
        let message = if err.is_client_error() {
            err.to_string()
        } else {
            tracing::error!(error = %err, status = status.as_u16(), "request failed");
            match status {
                StatusCode::BAD_GATEWAY => "upstream download failed".to_string(),
                _ => "internal error".to_string(),
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Unwrap a JSON body, turning extractor rejections into `bad_request`.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload.map(|Json(v)| v).map_err(AppError::from)
}

// ============ GET / and GET /health ============

async fn handle_home() -> &'static str {
    "Welcome to snippet search. POST /search to query a trained repository."
}

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

// ============ /download ============

#[derive(Deserialize)]
struct DownloadRequest {
    user: Option<String>,
}

async fn handle_download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<DownloadSnapshot>, AppError> {
    let req = body(payload)?;
    let user = req
        .user
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| bad_request("user is required"))?;
    check_component("user", &user)?;
    tracing::info!(user = %user, "download requested");
    Ok(Json(state.services.downloads.start(&user)))
}

async fn handle_download_status(State(state): State<AppState>) -> Json<DownloadSnapshot> {
    Json(state.services.downloads.snapshot())
}

// ============ POST /train ============

#[derive(Deserialize)]
struct TrainRequest {
    user: Option<String>,
    repo: Option<String>,
}

#[derive(Serialize)]
struct TrainResponse {
    message: String,
    index: String,
}

fn required_key(user: Option<String>, repo: Option<String>) -> Result<RepoKey, AppError> {
    match (user, repo) {
        (Some(u), Some(r)) if !u.is_empty() && !r.is_empty() => Ok(RepoKey::parse(&u, &r)?),
        (u, r) => Err(not_found(format!(
            "user/repo must both be given, found {}/{}",
            u.unwrap_or_default(),
            r.unwrap_or_default()
        ))),
    }
}

async fn handle_train(
    State(state): State<AppState>,
    payload: Result<Json<TrainRequest>, JsonRejection>,
) -> Result<Json<TrainResponse>, AppError> {
    let req = body(payload)?;
    let key = required_key(req.user, req.repo)?;
    state.services.coordinator.spawn_retrain(key.clone()).await?;

    let index = key.token();
    Ok(Json(TrainResponse {
        message: format!(
            "Training started for {}. Poll POST /is_trained with {{\"index\": \"{}\"}} \
             until \"trained\" is true; training time grows with repository size.",
            index, index
        ),
        index,
    }))
}

// ============ POST /is_trained ============

#[derive(Deserialize)]
struct IsTrainedRequest {
    index: Option<String>,
}

#[derive(Serialize)]
struct IsTrainedResponse {
    index: String,
    trained: bool,
}

async fn handle_is_trained(
    State(state): State<AppState>,
    payload: Result<Json<IsTrainedRequest>, JsonRejection>,
) -> Result<Json<IsTrainedResponse>, AppError> {
    let req = body(payload)?;
    let index = req.index.ok_or_else(|| not_found("index not given"))?;
    let trained = state.services.is_trained(&index).await?;
    Ok(Json(IsTrainedResponse { index, trained }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchBody {
    user: Option<String>,
    repo: Option<String>,
    query: Option<String>,
    language: Option<String>,
    limit: Option<i64>,
}

async fn handle_search(
    State(state): State<AppState>,
    payload: Result<Json<SearchBody>, JsonRejection>,
) -> Result<Json<Vec<ResultRecord>>, AppError> {
    let req = body(payload)?;
    let key = required_key(req.user, req.repo)?;
    let query = req
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| bad_request("query must not be empty"))?;

    let request = SearchRequest {
        query: &query,
        language: req.language.as_deref(),
        limit: req.limit,
    };
    let records = state.services.search(&key, &request).await?;
    Ok(Json(records))
}

// ============ GET /langs ============

#[derive(Serialize)]
struct LangInfo {
    name: &'static str,
    description: &'static str,
}

async fn handle_langs() -> Json<Vec<LangInfo>> {
    Json(
        Language::ALL
            .iter()
            .map(|l| LangInfo {
                name: l.name(),
                description: l.description(),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_keep_their_message() {
        let err = AppError::from(EngineError::AlreadyTrained(RepoKey::new("alice", "demo")));
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "already_trained");
        assert!(err.message.contains("alice/demo"));

        let err = AppError::from(EngineError::InvalidRequest("invalid user: \"..\"".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("invalid user"));
    }

    #[test]
    fn test_server_errors_are_opaque() {
        let err = AppError::from(EngineError::Store(anyhow::anyhow!("disk I/O error at /var/db")));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "internal");
        assert_eq!(err.message, "internal error");

        let err = AppError::from(EngineError::Download("token ghp_secret rejected".into()));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(!err.message.contains("ghp_secret"));
    }

    #[test]
    fn test_required_key_rejects_traversal() {
        let err = required_key(Some("..".into()), Some("demo".into())).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = required_key(Some("/etc".into()), Some("demo".into())).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = required_key(None, Some("demo".into())).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(required_key(Some("alice".into()), Some("demo".into())).is_ok());
    }
}
