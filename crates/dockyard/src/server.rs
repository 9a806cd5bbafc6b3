// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::code_types::CodeType;
use crate::error::Error;
use crate::functions::FunctionView;
use crate::model::{FunctionRequest, RunRecord, RunRecordFilter, RunStatus};
use crate::run_logs::LogFilter;
use crate::runtime::Services;

type ApiResult<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            Error::BadInput(_) | Error::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
            Error::FunctionAlreadyExists(_)
            | Error::FunctionAlreadyDeployed(_)
            | Error::BuildInProgress(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(status = %status, error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(services: Arc<Services>) -> Router {
    Router::new()
        .route(
            "/functions",
            get(list_functions)
                .post(create_function)
                .put(update_function)
                .delete(delete_all_functions),
        )
        .route("/functions/{name}", get(get_function).delete(delete_function))
        .route("/functions/{name}/trigger", post(trigger_function))
        .route("/functions/{name}/deploy", post(deploy_function))
        .route("/code-types", get(list_code_types))
        .route("/code-types/{name}", get(get_code_type))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/logs", get(list_logs))
        .route("/logs/{container_name}", get(get_logs))
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

/// Serve until `shutdown` is cancelled, letting in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn list_functions(State(app): State<Arc<Services>>) -> ApiResult<Json<Vec<FunctionView>>> {
    Ok(Json(app.functions.list().await?))
}

async fn create_function(
    State(app): State<Arc<Services>>,
    Json(request): Json<FunctionRequest>,
) -> ApiResult<Json<FunctionView>> {
    Ok(Json(app.functions.create(request).await?))
}

async fn update_function(
    State(app): State<Arc<Services>>,
    Json(request): Json<FunctionRequest>,
) -> ApiResult<Json<FunctionView>> {
    Ok(Json(app.functions.update(request).await?))
}

async fn delete_all_functions(State(app): State<Arc<Services>>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(app.functions.delete_all().await?))
}

async fn get_function(
    State(app): State<Arc<Services>>,
    Path(name): Path<String>,
) -> ApiResult<Json<FunctionView>> {
    Ok(Json(app.functions.get(&name).await?))
}

async fn delete_function(
    State(app): State<Arc<Services>>,
    Path(name): Path<String>,
) -> ApiResult<Json<String>> {
    Ok(Json(app.functions.delete(&name).await?))
}

async fn trigger_function(
    State(app): State<Arc<Services>>,
    Path(name): Path<String>,
) -> ApiResult<Json<RunRecord>> {
    Ok(Json(app.functions.trigger(&name).await?))
}

async fn deploy_function(
    State(app): State<Arc<Services>>,
    Path(name): Path<String>,
) -> ApiResult<Json<FunctionView>> {
    Ok(Json(app.functions.deploy(&name).await?))
}

async fn list_code_types(State(app): State<Arc<Services>>) -> Json<Vec<CodeType>> {
    Json(app.catalog.all())
}

async fn get_code_type(
    State(app): State<Arc<Services>>,
    Path(name): Path<String>,
) -> ApiResult<Json<CodeType>> {
    Ok(Json(app.catalog.get(&name)?.clone()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunsQuery {
    function_names: Option<String>,
    statuses: Option<String>,
    exit_codes: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn list_runs(
    State(app): State<Arc<Services>>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<RunRecord>>> {
    let filter = RunRecordFilter {
        function_names: split(query.function_names.as_deref()),
        statuses: parse_list::<RunStatus>("statuses", query.statuses.as_deref())?,
        exit_codes: parse_list::<i64>("exitCodes", query.exit_codes.as_deref())?,
        from: query.from,
        to: query.to,
    };
    Ok(Json(app.runs.list(&filter).await?))
}

async fn get_run(
    State(app): State<Arc<Services>>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunRecord>> {
    Ok(Json(app.runs.get(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogsQuery {
    function_names: Option<String>,
    container_names: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn list_logs(
    State(app): State<Arc<Services>>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<String> {
    let filter = LogFilter {
        function_names: split(query.function_names.as_deref()),
        container_names: split(query.container_names.as_deref()),
        from: query.from,
        to: query.to,
    };
    app.logs.list(&filter).await
}

async fn get_logs(
    State(app): State<Arc<Services>>,
    Path(container_name): Path<String>,
) -> ApiResult<String> {
    app.logs.get(&container_name).await
}

/// Comma-separated query value; blanks are dropped.
fn split(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_list<T: FromStr>(field: &str, value: Option<&str>) -> ApiResult<Vec<T>> {
    split(value)
        .iter()
        .map(|s| s.parse().map_err(|_| Error::BadInput(field.to_string())))
        .collect()
}
