//! JSON-RPC request handlers, split by concern.

mod domains;
mod session;

use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use sysvisor_core::SupervisorError;
use tracing::{debug, error, warn};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

// ============================================================================
// Parameter extraction helpers
// ============================================================================

/// Extract an optional string parameter, supporting both snake_case and camelCase.
pub(crate) fn get_str_param<'a>(params: &'a Value, snake: &str, camel: &str) -> Option<&'a str> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_str())
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> sysvisor_core::Result<String> {
    get_str_param(params, snake, camel)
        .map(String::from)
        .ok_or_else(|| SupervisorError::InvalidParams {
            message: format!("Missing required parameter: {}", snake),
        })
}

/// Extract an optional bool parameter, supporting both snake_case and camelCase.
pub(crate) fn get_bool_param(params: &Value, snake: &str, camel: &str) -> Option<bool> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_bool())
}

/// Extract a required bool parameter or return an error.
pub(crate) fn require_bool_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> sysvisor_core::Result<bool> {
    get_bool_param(params, snake, camel).ok_or_else(|| SupervisorError::InvalidParams {
        message: format!("Missing required parameter: {}", snake),
    })
}

/// Extract an optional list of strings.
///
/// A single string is split on whitespace, like the `Arguments` field of the
/// config file.
pub(crate) fn get_str_list_param(
    params: &Value,
    snake: &str,
    camel: &str,
) -> sysvisor_core::Result<Option<Vec<String>>> {
    let Some(value) = params.get(snake).or_else(|| params.get(camel)) else {
        return Ok(None);
    };

    match value {
        Value::Null => Ok(None),
        Value::String(line) => Ok(Some(line.split_whitespace().map(String::from).collect())),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| SupervisorError::InvalidParams {
                        message: format!("{} must contain only strings", snake),
                    })
            })
            .collect::<sysvisor_core::Result<Vec<_>>>()
            .map(Some),
        _ => Err(SupervisorError::InvalidParams {
            message: format!("{} must be a list of strings", snake),
        }),
    }
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = &request.method;
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id;

    debug!("RPC call: {}({:?})", method, params);

    if method == "health_check" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, json!({"status": "ok"}))),
        );
    }

    match dispatch_method(&state, method, &params).await {
        Ok(value) => (StatusCode::OK, Json(JsonRpcResponse::success(id, value))),
        Err(e) => {
            if e.is_benign() {
                warn!("RPC {} rejected: {}", method, e);
            } else {
                error!("RPC error for {}: {}", method, e);
            }
            let code = e.to_rpc_error_code();
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, code, e.to_string())),
            )
        }
    }
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the appropriate handler.
async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: &Value,
) -> sysvisor_core::Result<Value> {
    match method {
        // Domain lifecycle
        "start" => domains::start(state, params).await,
        "stop" => domains::stop(state, params).await,
        "restart" => domains::restart(state, params).await,
        "suspend" => domains::suspend(state, params).await,
        "resume" => domains::resume(state, params).await,

        // Queries
        "process_status" => domains::process_status(state, params).await,
        "list_processes" => domains::list_processes(state, params).await,
        "hidden_processes" => domains::hidden_processes(state, params).await,

        // Domain registry
        "register_domain" => domains::register_domain(state, params).await,
        "remove_domain" => domains::remove_domain(state, params).await,
        "set_persistent" => domains::set_persistent(state, params).await,

        // Session
        "gracefully_terminate_all" => session::gracefully_terminate_all(state, params).await,
        "log_out_and_power_off" => session::log_out_and_power_off(state, params).await,
        "boot" => session::boot(state, params).await,

        _ => {
            warn!("Unknown method: {}", method);
            Err(SupervisorError::Other(format!("Method not found: {}", method)))
        }
    }
}
