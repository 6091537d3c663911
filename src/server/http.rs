//! HTTP ingestion and lookup endpoints.
//!
//! Handlers decode the request, call storage, and render the result. The
//! single addition site for counters is storage; handlers never pre-add.

use super::middleware::{check_trusted_subnet, decode_body};
use super::AppState;
use crate::core::{Metric, MetricKind, MetricsError};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::{debug, error};

const CONTENT_TYPE_JSON: &str = "application/json";

/// Build the router with all endpoints and middleware.
///
/// Layers, outermost first: request tracing, response compression, the
/// trusted subnet check, then request body decoding.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_metrics))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/updates/", post(update_many_json))
        .route("/update/:kind/:name/:value", post(update_path))
        .route("/value/", post(value_json))
        .route("/value/:kind/:name", get(value_path))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(from_fn_with_state(state.clone(), check_trusted_subnet))
                .layer(from_fn_with_state(state.clone(), decode_body)),
        )
        .with_state(state)
}

fn require_json(headers: &HeaderMap) -> Result<(), HttpError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with(CONTENT_TYPE_JSON) {
        Ok(())
    } else {
        Err(HttpError::BadRequest(format!("wrong content type: '{}'", content_type)))
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, HttpError> {
    serde_json::from_slice(body).map_err(|e| HttpError::BadRequest(format!("invalid JSON: {}", e)))
}

/// POST /update/ - save one metric, echo it back
async fn update_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Metric>, HttpError> {
    require_json(&headers)?;
    let metric: Metric = parse(&body)?;
    debug!("POST JSON {} {}", metric.kind, metric.id);

    state.storage.save_metric(metric.clone(), &state.key).await?;
    Ok(Json(metric))
}

/// POST /updates/ - save a batch in order, echo it back
async fn update_many_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Vec<Metric>>, HttpError> {
    require_json(&headers)?;
    let metrics: Vec<Metric> = parse(&body)?;
    debug!("POST batch of {} metrics", metrics.len());

    state.storage.save_many_metrics(metrics.clone(), &state.key).await?;
    Ok(Json(metrics))
}

/// POST /update/{type}/{name}/{value}
async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, HttpError> {
    let metric = match MetricKind::from(kind) {
        MetricKind::Gauge => Metric::gauge(
            name,
            value
                .parse()
                .map_err(|_| HttpError::BadRequest(format!("invalid gauge value '{}'", value)))?,
        ),
        MetricKind::Counter => Metric::counter(
            name,
            value
                .parse()
                .map_err(|_| HttpError::BadRequest(format!("invalid counter delta '{}'", value)))?,
        ),
        unknown => Metric::query(name, unknown),
    };

    state.storage.save_metric(metric, &state.key).await?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")]))
}

/// GET /value/{type}/{name} - current value as plain text
async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, HttpError> {
    let metric = state.storage.get_metric(Metric::query(name, kind), &state.key).await?;
    let text = metric
        .value_text()
        .ok_or_else(|| HttpError::Internal(format!("metric '{}' has no value", metric.id)))?;
    Ok(([(header::CONTENT_TYPE, "text/plain")], text))
}

/// POST /value/ - look up the metric named by the body
async fn value_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Metric>, HttpError> {
    require_json(&headers)?;
    let query: Metric = parse(&body)?;
    let metric = state.storage.get_metric(Metric::query(query.id, query.kind), &state.key).await?;
    Ok(Json(metric))
}

/// GET / - every metric as `id: value`, sorted by id
async fn list_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, HttpError> {
    let mut metrics = state.storage.get_all_metrics().await?;
    metrics.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.kind.as_str().cmp(b.kind.as_str())));

    let mut page = String::with_capacity(metrics.len() * 32);
    for metric in &metrics {
        page.push_str(&metric.to_string());
        page.push('\n');
    }
    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], page))
}

/// GET /ping - storage health
async fn ping(State(state): State<AppState>) -> Result<StatusCode, HttpError> {
    state.storage.check().await?;
    Ok(StatusCode::OK)
}

/// HTTP error type.
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    NotImplemented(String),
    Internal(String),
}

impl From<MetricsError> for HttpError {
    fn from(err: MetricsError) -> Self {
        match err {
            MetricsError::BadRequest(_) => HttpError::BadRequest(err.to_string()),
            MetricsError::NotFound(_) => HttpError::NotFound(err.to_string()),
            MetricsError::NotImplemented(_) => HttpError::NotImplemented(err.to_string()),
            other => {
                error!("Request failed ({}): {}", other.category(), other);
                HttpError::Internal(other.to_string())
            },
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            HttpError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            HttpError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            HttpError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            HttpError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            HttpError::NotImplemented(msg) => write!(f, "Not Implemented: {}", msg),
            HttpError::Internal(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl std::error::Error for HttpError {}
