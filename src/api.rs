// src/api.rs
use std::sync::Arc;

use serde_json::{json, Value};
use shuttle_axum::axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::ingest::types::{Query, SearchFilters, ValidationError};
use crate::orchestrator::{Orchestrator, PipelineError};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/market-analysis", post(market_analysis))
        .route("/api/sources", get(list_sources))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Pipeline(PipelineError),
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Validation(e)
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(e) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
            }
            ApiError::Pipeline(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "market analysis failed",
                    "message": e.to_string(),
                })),
            )
                .into_response(),
        }
    }
}

/// Validate a request body into a `Query`. Keywords are checked before location.
pub fn parse_request(body: &Value) -> Result<Query, ValidationError> {
    let obj = body
        .as_object()
        .ok_or_else(|| ValidationError::MalformedBody("expected a JSON object".to_string()))?;

    let keywords = match obj.get("keywords") {
        None | Some(Value::Null) => return Err(ValidationError::MissingKeywords),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| v.as_str().ok_or(ValidationError::InvalidKeyword(i)))
            .collect::<Result<Vec<&str>, _>>()?,
        Some(_) => return Err(ValidationError::KeywordsNotArray),
    };
    if keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(ValidationError::EmptyKeywords);
    }

    let location = match obj.get("location") {
        None | Some(Value::Null) => return Err(ValidationError::MissingLocation),
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err(ValidationError::EmptyLocation),
    };

    let filters = match obj.get("filters") {
        None | Some(Value::Null) => SearchFilters::default(),
        Some(v) => serde_json::from_value::<SearchFilters>(v.clone())
            .map_err(|e| ValidationError::InvalidFilters(e.to_string()))?,
    };

    Ok(Query::new(keywords, location)?.with_filters(filters))
}

async fn market_analysis(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| ValidationError::MalformedBody(e.body_text()))?;
    let query = parse_request(&body).inspect_err(|e| {
        tracing::info!(target: "api", error = %e, "rejected market-analysis request");
    })?;
    let analysis = state.orchestrator.run(&query).await?;
    Ok(Json(json!({ "success": true, "data": analysis })))
}

async fn list_sources(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "sources": state.orchestrator.source_ids() }))
}
