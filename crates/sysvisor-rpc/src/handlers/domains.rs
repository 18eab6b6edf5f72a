//! Domain lifecycle, query and registry handlers.

use super::{get_bool_param, get_str_list_param, get_str_param, require_bool_param, require_str_param};
use crate::server::AppState;
use serde_json::{json, Value};
use sysvisor_core::ProcessDescriptor;

pub async fn start(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let domain = require_str_param(params, "domain", "domain")?;
    let outcome = state.supervisor.start(&domain).await?;
    Ok(serde_json::to_value(outcome)?)
}

pub async fn stop(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let domain = require_str_param(params, "domain", "domain")?;
    let outcome = state.supervisor.stop(&domain).await?;
    Ok(serde_json::to_value(outcome)?)
}

pub async fn restart(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let domain = require_str_param(params, "domain", "domain")?;
    let outcome = state.supervisor.restart(&domain).await?;
    Ok(serde_json::to_value(outcome)?)
}

pub async fn suspend(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let domain = require_str_param(params, "domain", "domain")?;
    state.supervisor.suspend(&domain).await?;
    Ok(json!({ "success": true }))
}

pub async fn resume(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let domain = require_str_param(params, "domain", "domain")?;
    state.supervisor.resume(&domain).await?;
    Ok(json!({ "success": true }))
}

pub async fn process_status(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let domain = require_str_param(params, "domain", "domain")?;
    Ok(serde_json::to_value(state.supervisor.status(&domain)?)?)
}

pub async fn list_processes(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let include_hidden = get_bool_param(params, "include_hidden", "includeHidden").unwrap_or(false);
    let processes = if include_hidden {
        state.supervisor.all_processes()
    } else {
        state.supervisor.processes()
    };
    Ok(serde_json::to_value(processes)?)
}

pub async fn hidden_processes(state: &AppState, _params: &Value) -> sysvisor_core::Result<Value> {
    Ok(serde_json::to_value(state.supervisor.hidden_processes())?)
}

pub async fn register_domain(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let domain = require_str_param(params, "domain", "domain")?;
    let launch_path = require_str_param(params, "launch_path", "launchPath")?;

    let mut descriptor = ProcessDescriptor::new(domain, launch_path)
        .on_demand(get_bool_param(params, "on_demand", "onDemand").unwrap_or(false))
        .persistent(get_bool_param(params, "persistent", "persistent").unwrap_or(false))
        .hidden(get_bool_param(params, "hidden", "hidden").unwrap_or(false));
    if let Some(arguments) = get_str_list_param(params, "arguments", "arguments")? {
        descriptor = descriptor.with_arguments(arguments);
    }
    if let Some(identity) = get_str_param(params, "identity", "userName") {
        descriptor = descriptor.with_identity(identity);
    }

    let added = state.supervisor.register_domain(descriptor)?;
    Ok(json!({ "success": true, "added": added }))
}

pub async fn remove_domain(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let domain = require_str_param(params, "domain", "domain")?;
    state.supervisor.remove_domain(&domain).await?;
    Ok(json!({ "success": true }))
}

pub async fn set_persistent(state: &AppState, params: &Value) -> sysvisor_core::Result<Value> {
    let domain = require_str_param(params, "domain", "domain")?;
    let persistent = require_bool_param(params, "persistent", "persistent")?;
    state.supervisor.set_persistent(&domain, persistent)?;
    Ok(json!({ "success": true }))
}
