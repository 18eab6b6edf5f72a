//! Boot, termination and log-out handlers.

use super::{get_str_param, require_bool_param};
use crate::server::AppState;
use serde_json::Value;
use sysvisor_core::SupervisorDefaults;
use tracing::info;

pub async fn boot(state: &AppState, _params: &Value) -> sysvisor_core::Result<Value> {
    let report = state.supervisor.boot().await;
    Ok(serde_json::to_value(report)?)
}

pub async fn gracefully_terminate_all(
    state: &AppState,
    params: &Value,
) -> sysvisor_core::Result<Value> {
    let operation = get_str_param(params, "operation", "operation")
        .unwrap_or(SupervisorDefaults::SHUTDOWN_OPERATION);
    let report = state.supervisor.gracefully_terminate_all(operation).await;
    Ok(serde_json::to_value(report)?)
}

/// One-way: the termination runs after the response has been sent.
pub async fn log_out_and_power_off(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let power_off = require_bool_param(params, "power_off", "powerOff")?;
    info!("Log-out requested (power off: {})", power_off);
    state.supervisor.log_out_and_power_off(power_off);
    Ok(Value::Null)
}
