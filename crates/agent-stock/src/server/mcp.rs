//! Model Context Protocol over plain HTTP
//!
//! Only the request/response subset agents need to discover and call
//! tools: `initialize`, `tools/list`, `tools/call`. Notifications are
//! acknowledged with `202 Accepted` and no body.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::AppState;

pub(crate) const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

pub(crate) async fn handle(State(state): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Response {
    let Ok(Json(raw)) = body else {
        return Json(RpcResponse::err(Value::Null, PARSE_ERROR, "parse error")).into_response();
    };
    let request: RpcRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => return Json(RpcResponse::err(Value::Null, INVALID_REQUEST, e.to_string())).into_response(),
    };
    if request.jsonrpc != "2.0" {
        let id = request.id.unwrap_or(Value::Null);
        return Json(RpcResponse::err(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"")).into_response();
    }

    let Some(id) = request.id else {
        debug!(method = %request.method, "MCP notification");
        return StatusCode::ACCEPTED.into_response();
    };

    debug!(method = %request.method, "MCP request");
    let response = match request.method.as_str() {
        "initialize" => RpcResponse::ok(id, initialize_result()),
        "ping" => RpcResponse::ok(id, json!({})),
        "tools/list" => RpcResponse::ok(id, json!({ "tools": tool_list(&state) })),
        "tools/call" => call_tool(&state, id, request.params).await,
        other => RpcResponse::err(id, METHOD_NOT_FOUND, format!("method not found: {other}")),
    };
    Json(response).into_response()
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn tool_list(state: &AppState) -> Vec<Value> {
    state
        .tools
        .descriptors()
        .into_iter()
        .map(|d| {
            json!({
                "name": d.name,
                "description": d.description,
                "inputSchema": d.input_schema
            })
        })
        .collect()
}

/// Tool failures are results with `isError`, not protocol errors
async fn call_tool(state: &AppState, id: Value, params: Value) -> RpcResponse {
    let params: CallParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::err(id, INVALID_PARAMS, e.to_string()),
    };
    if state.tools.get(&params.name).is_none() {
        return RpcResponse::err(id, INVALID_PARAMS, format!("unknown tool: {}", params.name));
    }

    let arguments = params.arguments.unwrap_or_else(|| json!({}));
    let result = match state.tools.invoke(&params.name, arguments).await {
        Ok(output) => json!({
            "content": [{ "type": "text", "text": output.to_string() }],
            "structuredContent": output,
            "isError": false
        }),
        Err(e) => {
            warn!(tool = %params.name, kind = e.kind(), "Tool call failed: {e}");
            json!({
                "content": [{ "type": "text", "text": e.to_string() }],
                "isError": true
            })
        }
    };
    RpcResponse::ok(id, result)
}
