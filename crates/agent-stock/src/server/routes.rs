//! HTTP routes

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument};

use super::{ApiError, AppState, mcp, ndjson};
use crate::error::StockError;
use crate::service::{ScanQuery, StockQuery};

type ApiResult<T> = Result<T, ApiError>;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stock_price", get(stock_price))
        .route("/stock_technical_analysis", get(stock_technical_analysis))
        .route("/stock_score", get(stock_score))
        .route("/stock_ai_analysis", get(stock_ai_analysis))
        .route("/stock_analyzer", get(stock_analyzer))
        .route("/stock_scan", post(stock_scan))
        .route("/tools", get(list_tools))
        .route("/tools/:name", post(call_tool))
        .route("/mcp", post(mcp::handle))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn query<T>(extracted: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    extracted
        .map(|Query(q)| q)
        .map_err(|e| StockError::InvalidInput(e.body_text()).into())
}

fn body<T>(extracted: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    extracted
        .map(|Json(b)| b)
        .map_err(|e| StockError::InvalidInput(e.body_text()).into())
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn stock_price(
    State(state): State<AppState>,
    q: Result<Query<StockQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let quote = state.service.price(&query(q)?).await?;
    Ok(Json(quote).into_response())
}

async fn stock_technical_analysis(
    State(state): State<AppState>,
    q: Result<Query<StockQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let summary = state.service.technical(&query(q)?).await?;
    Ok(Json(summary).into_response())
}

async fn stock_score(
    State(state): State<AppState>,
    q: Result<Query<StockQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let score = state.service.score(&query(q)?).await?;
    Ok(Json(score).into_response())
}

async fn stock_ai_analysis(
    State(state): State<AppState>,
    q: Result<Query<StockQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let analysis = state.service.ai_analysis(&query(q)?).await?;
    Ok(Json(analysis).into_response())
}

/// Flat query form; `serde(flatten)` does not mix with url-encoded booleans
#[derive(Debug, Deserialize)]
struct AnalyzerQuery {
    stock_code: String,
    market_type: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    #[serde(default = "default_true")]
    stream: bool,
    #[serde(default = "default_true")]
    with_ai: bool,
}

fn default_true() -> bool {
    true
}

impl AnalyzerQuery {
    fn stock_query(&self) -> StockQuery {
        StockQuery {
            stock_code: self.stock_code.clone(),
            market_type: self.market_type.clone(),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
        }
    }
}

#[instrument(skip_all, fields(code = tracing::field::Empty))]
async fn stock_analyzer(
    State(state): State<AppState>,
    q: Result<Query<AnalyzerQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let params = query(q)?;
    tracing::Span::current().record("code", params.stock_code.as_str());
    let stock = params.stock_query();

    if params.stream {
        let events = state.service.analyze_stream(&stock, params.with_ai)?;
        Ok(ndjson(events))
    } else {
        let result = state.service.analyze(&stock, params.with_ai).await?;
        Ok(Json(result).into_response())
    }
}

async fn stock_scan(
    State(state): State<AppState>,
    b: Result<Json<ScanQuery>, JsonRejection>,
) -> ApiResult<Response> {
    let scan = body(b)?;
    debug!(count = scan.stock_codes.len(), min_score = scan.min_score, "Scan requested");

    if scan.stream {
        Ok(ndjson(state.service.scan_stream(scan)?))
    } else {
        let report = state.service.scan(scan).await?;
        Ok(Json(report).into_response())
    }
}

async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "tools": state.tools.descriptors() }))
}

async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    b: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let params = body(b)?;
    let output = state.tools.invoke(&name, params).await?;
    Ok(Json(output).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::service;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> Router {
        build_router(AppState::from_shared(service()))
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let response = test_app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_stock_price() {
        let (status, body) = get_json("/stock_price?stock_code=600519&market_type=A").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], 24.5);
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let (status, body) = get_json("/stock_score?stock_code=000001").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
        assert_eq!(body["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn test_missing_code_is_bad_request() {
        let (status, body) = get_json("/stock_price?market_type=A").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_input");
    }

    #[tokio::test]
    async fn test_analyzer_single_json() {
        let (status, body) = get_json("/stock_analyzer?stock_code=600519&stream=false&with_ai=false").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "complete");
    }
}
