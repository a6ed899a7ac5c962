//! Triage HTTP API.
//!
//! Exposes the core's triage surface as a thin JSON API consumed by an
//! external review UI. Rendering and authentication live outside this
//! crate.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/review?limit&page` | paged fragments awaiting review |
//! | `GET`  | `/api/fragments/{id}/info` | owning report's search item |
//! | `POST` | `/api/fragments/{id}/mark/{false\|valid}` | apply a manual dispositive |
//! | `GET`  | `/api/rules` | list rejection rules |
//! | `POST` | `/api/rules` | add a rule (self-tested), then reconcile |
//! | `DELETE` | `/api/rules/{id}` | remove a rule, then reconcile |
//! | `GET`  | `/health` | version |
//!
//! # Error Contract
//!
//! All error responses carry:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown mark 'x'" } }
//! ```

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::models::{ReportStatus, DISPOSITIVE_MANUAL_REJECT, DISPOSITIVE_MANUAL_VERIFY};
use crate::rules::reconcile;
use crate::store::Store;
use crate::triage;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    store: Store,
}

/// Start the triage API server on the configured bind address. Runs until
/// the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let state = AppState {
        store: Store::new(pool),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state).layer(cors);

    println!("Triage API listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/review", get(handle_review))
        .route("/api/fragments/{id}/info", get(handle_fragment_info))
        .route("/api/fragments/{id}/mark/{verdict}", post(handle_mark))
        .route("/api/rules", get(handle_list_rules).post(handle_add_rule))
        .route("/api/rules/{id}", delete(handle_remove_rule))
        .route("/health", get(handle_health))
        .with_state(Arc::new(state))
}

#[derive(Deserialize)]
struct ReviewParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    page: i64,
}

fn default_limit() -> i64 {
    50
}

async fn handle_review(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReviewParams>,
) -> Result<Json<triage::ReviewPage>, AppError> {
    if params.limit < 1 || params.page < 0 {
        return Err(bad_request("limit must be >= 1 and page >= 0"));
    }

    let page = triage::review_page(
        &state.store,
        ReportStatus::Fragmented,
        params.limit,
        params.page,
    )
    .await
    .map_err(internal)?;

    Ok(Json(page))
}

async fn handle_fragment_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let report = triage::fragment_info(&state.store, id)
        .await
        .map_err(|e| not_found(e.to_string()))?;
    Ok(Json(serde_json::json!(report.search_item)))
}

async fn handle_mark(
    State(state): State<Arc<AppState>>,
    Path((id, verdict)): Path<(i64, String)>,
) -> Result<&'static str, AppError> {
    let dispositive = match verdict.as_str() {
        "false" => DISPOSITIVE_MANUAL_REJECT,
        "valid" => DISPOSITIVE_MANUAL_VERIFY,
        other => return Err(bad_request(format!("unknown mark '{}'", other))),
    };

    triage::mark_fragment(&state.store, id, dispositive)
        .await
        .map_err(|e| not_found(e.to_string()))?;

    Ok("OK")
}

#[derive(Serialize)]
struct RuleBody {
    id: i64,
    expr: String,
}

async fn handle_list_rules(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RuleBody>>, AppError> {
    let rules = state.store.rules().await.map_err(internal)?;
    Ok(Json(
        rules
            .into_iter()
            .map(|r| RuleBody {
                id: r.id,
                expr: r.rule.as_str().to_string(),
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
struct AddRuleBody {
    expr: String,
    /// A sample string the expression must match, guarding against rules
    /// that would never fire.
    test: String,
}

async fn handle_add_rule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddRuleBody>,
) -> Result<Json<RuleBody>, AppError> {
    let compiled = regex::Regex::new(&body.expr)
        .map_err(|e| bad_request(format!("invalid expression: {}", e)))?;
    if !compiled.is_match(&body.test) {
        return Err(bad_request("expression does not match its test sample"));
    }

    let id = state.store.insert_rule(&body.expr).await.map_err(internal)?;

    // Rule-set changes re-evaluate already-extracted fragments.
    reconcile(&state.store).await.map_err(internal)?;

    Ok(Json(RuleBody {
        id,
        expr: body.expr,
    }))
}

async fn handle_remove_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<&'static str, AppError> {
    state.store.remove_rule(id).await.map_err(internal)?;
    reconcile(&state.store).await.map_err(internal)?;
    Ok("OK")
}

#[derive(Serialize)]
struct HealthBody {
    version: &'static str,
}

async fn handle_health() -> Json<HealthBody> {
    Json(HealthBody {
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
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

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}
