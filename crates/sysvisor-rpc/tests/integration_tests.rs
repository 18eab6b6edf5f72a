//! Integration tests for the sysvisor-rpc JSON-RPC server.
//!
//! These tests spawn the real binary against a temporary config file whose
//! domains run `/bin/sleep`, and drive it over HTTP.
#![cfg(unix)]

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

/// Create a temporary directory holding a domain config file.
fn create_test_env() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let config = json!({
        "eager": {"LaunchPath": "/bin/sleep", "Arguments": ["30"]},
        "sleeper": {"LaunchPath": "/bin/sleep", "Arguments": "30", "OnDemand": true},
        "helper": {
            "LaunchPath": "/bin/sleep",
            "Arguments": ["30"],
            "OnDemand": 1,
            "Hidden": true
        }
    });
    std::fs::write(
        temp_dir.path().join("domains.json"),
        serde_json::to_string_pretty(&config).unwrap(),
    )
    .unwrap();

    temp_dir
}

/// Make an RPC call to the server.
async fn rpc_call(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let json = rpc_call_raw(port, method, params).await?;
    if let Some(error) = json.get("error") {
        return Err(error.to_string());
    }
    Ok(json.get("result").cloned().unwrap_or(Value::Null))
}

/// Make an RPC call and return the full JSON-RPC payload.
async fn rpc_call_raw(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/rpc", port))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    response.json::<Value>().await.map_err(|e| e.to_string())
}

/// Error code of a failed call.
async fn rpc_error_code(port: u16, method: &str, params: Value) -> Option<i64> {
    let json = rpc_call_raw(port, method, params).await.ok()?;
    json.get("error")?.get("code")?.as_i64()
}

/// Check health endpoint.
async fn check_health(port: u16) -> bool {
    let client = reqwest::Client::new();
    if let Ok(response) = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        if let Ok(json) = response.json::<Value>().await {
            return json.get("status").and_then(|v| v.as_str()) == Some("ok");
        }
    }
    false
}

/// Wait for server to be ready.
async fn wait_for_server(port: u16, timeout_secs: u64) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(timeout_secs) {
        if check_health(port).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

/// Poll `process_status` until the domain reaches `state`.
async fn wait_for_state(port: u16, domain: &str, state: &str) -> bool {
    for _ in 0..100 {
        if let Ok(status) = rpc_call(port, "process_status", json!({"domain": domain})).await {
            if status["state"] == state {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

struct RpcServerHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    async fn stop(mut self) {
        // Leave no sleepers behind
        let _ = rpc_call(
            self.port,
            "gracefully_terminate_all",
            json!({"operation": "test"}),
        )
        .await;
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

fn binary_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_sysvisor-rpc") {
        return Ok(PathBuf::from(path));
    }

    let current_exe = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
    let target_debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

    let fallback = target_debug_dir.join("sysvisor-rpc");
    if !fallback.exists() {
        return Err(format!(
            "CARGO_BIN_EXE_sysvisor-rpc not set and fallback binary not found at {}",
            fallback.display()
        ));
    }
    Ok(fallback)
}

/// Start the RPC binary and wait until `/health` is ready.
async fn start_rpc_server(root: &Path) -> Result<RpcServerHandle, String> {
    let binary = binary_path()?;

    let mut child = tokio::process::Command::new(&binary)
        .arg("--config")
        .arg(root.join("domains.json"))
        .arg("--catalog-db")
        .arg(root.join("catalog.db"))
        .arg("--log-dir")
        .arg(root.join("logs"))
        .args(["--host", "127.0.0.1", "--port", "0"])
        .args(["--poll-interval-ms", "100", "--stop-timeout-ms", "2000"])
        .args(["--power-off-command", "/bin/true"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn sysvisor-rpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("RPC_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid RPC_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read sysvisor-rpc stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port =
        discovered_port.ok_or_else(|| "RPC_PORT line not emitted by sysvisor-rpc".to_string())?;
    if !wait_for_server(port, 15).await {
        return Err(format!("sysvisor-rpc failed health check on port {port}"));
    }

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(RpcServerHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_boot_and_listings() {
    let env = create_test_env();
    let server = start_rpc_server(env.path()).await.unwrap();
    let port = server.port;

    let health = rpc_call(port, "health_check", json!({})).await.unwrap();
    assert_eq!(health["status"], "ok");

    // Only the eager domain is part of the boot set
    assert!(wait_for_state(port, "eager", "running").await);
    assert!(wait_for_state(port, "sleeper", "stopped").await);

    let listed = rpc_call(port, "list_processes", json!({})).await.unwrap();
    let names: Vec<_> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["domain"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["eager", "sleeper"]);

    let hidden = rpc_call(port, "hidden_processes", json!({})).await.unwrap();
    assert_eq!(hidden.as_array().unwrap().len(), 1);
    assert_eq!(hidden[0]["domain"], "helper");

    let everything = rpc_call(port, "list_processes", json!({"includeHidden": true}))
        .await
        .unwrap();
    assert_eq!(everything.as_array().unwrap().len(), 3);

    let status = rpc_call(port, "process_status", json!({"domain": "eager"}))
        .await
        .unwrap();
    assert_eq!(status["catalog_name"], "sysvisor/eager");
    assert!(status["pid"].as_u64().is_some());

    server.stop().await;
}

#[tokio::test]
async fn test_start_stop_restart_suspend() {
    let env = create_test_env();
    let server = start_rpc_server(env.path()).await.unwrap();
    let port = server.port;

    let started = rpc_call(port, "start", json!({"domain": "sleeper"}))
        .await
        .unwrap();
    assert_eq!(started["outcome"], "started");
    let first_pid = started["pid"].as_u64().unwrap();

    let again = rpc_call(port, "start", json!({"domain": "sleeper"}))
        .await
        .unwrap();
    assert_eq!(again["outcome"], "already_running");

    rpc_call(port, "suspend", json!({"domain": "sleeper"}))
        .await
        .unwrap();
    assert!(wait_for_state(port, "sleeper", "suspended").await);
    rpc_call(port, "resume", json!({"domain": "sleeper"}))
        .await
        .unwrap();
    assert!(wait_for_state(port, "sleeper", "running").await);

    let restarted = rpc_call(port, "restart", json!({"domain": "sleeper"}))
        .await
        .unwrap();
    assert_eq!(restarted["outcome"], "started");
    assert_ne!(restarted["pid"].as_u64().unwrap(), first_pid);

    let stopped = rpc_call(port, "stop", json!({"domain": "sleeper"}))
        .await
        .unwrap();
    assert_eq!(stopped["outcome"], "stopping");
    assert!(wait_for_state(port, "sleeper", "stopped").await);

    let not_running = rpc_call(port, "stop", json!({"domain": "sleeper"}))
        .await
        .unwrap();
    assert_eq!(not_running["outcome"], "not_running");

    // Resuming a stopped domain is a benign state error
    assert_eq!(
        rpc_error_code(port, "resume", json!({"domain": "sleeper"})).await,
        Some(-32002)
    );

    server.stop().await;
}

#[tokio::test]
async fn test_error_codes() {
    let env = create_test_env();
    let server = start_rpc_server(env.path()).await.unwrap();
    let port = server.port;

    assert_eq!(
        rpc_error_code(port, "start", json!({"domain": "ghost"})).await,
        Some(-32001)
    );
    assert_eq!(rpc_error_code(port, "start", json!({})).await, Some(-32602));
    assert_eq!(
        rpc_error_code(port, "log_out_and_power_off", json!({})).await,
        Some(-32602)
    );
    assert_eq!(
        rpc_error_code(port, "no_such_method", json!({})).await,
        Some(-32603)
    );

    // The id is echoed back on errors too
    let raw = rpc_call_raw(port, "start", json!({"domain": "ghost"}))
        .await
        .unwrap();
    assert_eq!(raw["jsonrpc"], "2.0");
    assert_eq!(raw["id"], 1);

    server.stop().await;
}

#[tokio::test]
async fn test_register_domain_is_saved() {
    let env = create_test_env();
    let server = start_rpc_server(env.path()).await.unwrap();
    let port = server.port;

    let registered = rpc_call(
        port,
        "register_domain",
        json!({
            "domain": "added",
            "launchPath": "/bin/sleep",
            "arguments": ["30"],
            "onDemand": true,
            "persistent": true
        }),
    )
    .await
    .unwrap();
    assert_eq!(registered["added"], true);

    let config_path = env.path().join("domains.json");
    let mut saved = false;
    for _ in 0..50 {
        let contents = std::fs::read_to_string(&config_path).unwrap_or_default();
        if let Ok(json) = serde_json::from_str::<Value>(&contents) {
            if json["added"]["Persistent"] == true {
                saved = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(saved);

    rpc_call(port, "set_persistent", json!({"domain": "added", "persistent": false}))
        .await
        .unwrap();
    let status = rpc_call(port, "process_status", json!({"domain": "added"}))
        .await
        .unwrap();
    assert_eq!(status["persistent"], false);

    rpc_call(port, "remove_domain", json!({"domain": "added"}))
        .await
        .unwrap();
    assert_eq!(
        rpc_error_code(port, "process_status", json!({"domain": "added"})).await,
        Some(-32001)
    );

    server.stop().await;
}

#[tokio::test]
async fn test_log_out_ends_the_server() {
    let env = create_test_env();
    let mut server = start_rpc_server(env.path()).await.unwrap();
    let port = server.port;

    assert!(wait_for_state(port, "eager", "running").await);
    rpc_call(port, "start", json!({"domain": "sleeper"}))
        .await
        .unwrap();

    let result = rpc_call(port, "log_out_and_power_off", json!({"powerOff": false}))
        .await
        .unwrap();
    assert!(result.is_null());

    let status = tokio::time::timeout(Duration::from_secs(15), server.child.wait())
        .await
        .expect("sysvisor-rpc did not exit after log-out")
        .unwrap();
    assert!(status.success());
}
