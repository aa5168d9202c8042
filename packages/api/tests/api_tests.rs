//! Integration tests for the orchestrator HTTP API.
//!
//! External programs are replaced by `echo` (always succeeds, prints its
//! arguments) and `false` (always fails).

#![allow(clippy::disallowed_methods)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use api::{ApiSettings, AppState, create_router};
use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use jobs::{JobId, JobKind, JobStatus, Metadata, Orchestrator, RuntimeConfig};
use serde_json::{Value, json};
use tempfile::TempDir;

// ============================================================================
// Test helpers
// ============================================================================

struct Fixture {
    server: TestServer,
    state: Arc<AppState>,
    _dir: TempDir,
}

fn write_fix_files(root: &Path) {
    let ft1 = root.join("AllFts").join("FT-1");
    let ft2 = root.join("AllFts").join("FT-2");
    std::fs::create_dir_all(&ft1).unwrap();
    std::fs::create_dir_all(&ft2).unwrap();
    std::fs::write(ft1.join("app.conf"), "key=value\n").unwrap();
    std::fs::write(ft1.join("fix.sql"), "select 1;\n").unwrap();
    std::fs::write(ft2.join("readme.txt"), "notes\n").unwrap();
}

async fn fixture_with(
    configure: impl FnOnce(&mut ApiSettings),
    runtime: impl FnOnce(RuntimeConfig) -> RuntimeConfig,
) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    write_fix_files(&dir.path().join("fixfiles"));

    let mut settings = ApiSettings {
        fix_files_dir: dir.path().join("fixfiles"),
        inventory_file: dir.path().join("inventory").join("inventory.json"),
        ansible_playbook_bin: "echo".to_string(),
        psql_bin: "echo".to_string(),
        ssh_bin: "echo".to_string(),
        playbook_dir: Some(dir.path().join("scratch")),
        templates_dir: dir.path().join("templates"),
        ..ApiSettings::default()
    };
    configure(&mut settings);

    let config = RuntimeConfig::with_snapshot_dir(dir.path().join("snapshots"))
        .with_synchronous(true)
        .with_poll_interval(Duration::from_millis(5));
    let orchestrator = Arc::new(Orchestrator::start(runtime(config)).await.unwrap());
    let state = Arc::new(AppState::load(orchestrator, settings).await);
    let server = TestServer::new(create_router(state.clone())).expect("test server");

    Fixture {
        server,
        state,
        _dir: dir,
    }
}

async fn fixture() -> Fixture {
    fixture_with(|_| {}, |c| c).await
}

fn file_request() -> Value {
    json!({
        "ft": "FT-1",
        "file": "app.conf",
        "user": "infadm",
        "targetPath": "/opt/app",
        "vms": ["batch1"],
        "sudo": true,
    })
}

async fn submit(fx: &Fixture, path: &str, body: &Value) -> String {
    let response = fx.server.post(path).json(body).await;
    response.assert_status_ok();
    let body: Value = response.json();
    body["deploymentId"].as_str().unwrap().to_string()
}

async fn logs(fx: &Fixture, id: &str) -> (Vec<String>, String) {
    let response = fx.server.get(&format!("/api/deploy/{id}/logs")).await;
    response.assert_status_ok();
    let body: Value = response.json();
    let lines = body["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l.as_str().unwrap().to_string())
        .collect();
    (lines, body["status"].as_str().unwrap().to_string())
}

// ============================================================================
// Inventory and fix files
// ============================================================================

#[tokio::test]
async fn test_inventory_endpoints_serve_defaults() {
    let fx = fixture().await;

    let vms: Value = fx.server.get("/api/vms").await.json();
    assert_eq!(vms[0], json!({"name": "batch1", "type": "batch", "ip": "192.168.1.10"}));

    let users: Value = fx.server.get("/api/db/users").await.json();
    assert_eq!(users, json!(["postgres", "dbadmin"]));

    let services: Value = fx.server.get("/api/systemd/services").await.json();
    assert!(services.as_array().unwrap().contains(&json!("kafka")));

    assert!(fx.state.settings.inventory_file.exists());
}

#[tokio::test]
async fn test_fix_tickets_and_files() {
    let fx = fixture().await;

    let all: Value = fx.server.get("/api/fts").await.json();
    assert_eq!(all, json!(["FT-1", "FT-2"]));

    let sql: Value = fx.server.get("/api/fts").add_query_param("type", "sql").await.json();
    assert_eq!(sql, json!(["FT-1"]));

    let files: Value = fx.server.get("/api/fts/FT-1/files").await.json();
    assert_eq!(files, json!(["app.conf", "fix.sql"]));

    let sql_files: Value = fx
        .server
        .get("/api/fts/FT-1/files")
        .add_query_param("type", "sql")
        .await
        .json();
    assert_eq!(sql_files, json!(["fix.sql"]));

    let missing: Value = fx.server.get("/api/fts/FT-9/files").await.json();
    assert_eq!(missing, json!([]));

    fx.server
        .get("/api/fts/..%2F..%2Fetc/files")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// ============================================================================
// Deployments
// ============================================================================

#[tokio::test]
async fn test_file_deployment_succeeds() {
    let fx = fixture().await;
    let id = submit(&fx, "/api/deploy/file", &file_request()).await;

    let (lines, status) = logs(&fx, &id).await;
    assert_eq!(status, "success");
    assert_eq!(lines[0], "Starting file deployment for app.conf to 1 VMs");
    assert!(lines.iter().any(|l| l.starts_with("Executing: echo -i ")));
    assert_eq!(
        lines.last().unwrap(),
        "SUCCESS: File deployment completed successfully"
    );

    // Playbook and inventory are removed once the job ends.
    let scratch = fx.state.settings.scratch_dir();
    assert_eq!(std::fs::read_dir(scratch).unwrap().count(), 0);
}

#[tokio::test]
async fn test_missing_parameters_are_rejected() {
    let fx = fixture().await;
    let response = fx
        .server
        .post("/api/deploy/file")
        .json(&json!({"ft": "FT-1", "file": "app.conf"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let body: Value = response.json();
    assert_eq!(body["error"], "bad_request");
    assert!(fx.state.orchestrator.list_jobs().is_empty());
}

#[tokio::test]
async fn test_failed_playbook_marks_deployment_failed() {
    let fx = fixture_with(|s| s.ansible_playbook_bin = "false".to_string(), |c| c).await;
    let id = submit(&fx, "/api/command/shell", &json!({"command": "uptime", "vms": ["imdg1"]})).await;

    let (lines, status) = logs(&fx, &id).await;
    assert_eq!(status, "failed");
    assert!(lines.contains(&"ERROR: Shell command execution failed".to_string()));
    assert_eq!(
        lines.last().unwrap(),
        "ERROR: exit_status: false exited with code 1"
    );
}

#[tokio::test]
async fn test_missing_source_file_fails_the_job() {
    let fx = fixture().await;
    let mut body = file_request();
    body["file"] = json!("nope.conf");
    let id = submit(&fx, "/api/deploy/file", &body).await;

    let (lines, status) = logs(&fx, &id).await;
    assert_eq!(status, "failed");
    assert!(lines.last().unwrap().contains("Source file not found"));
}

#[tokio::test]
async fn test_sql_deployment_keeps_password_out_of_history() {
    let fx = fixture().await;
    let id = submit(
        &fx,
        "/api/deploy/sql",
        &json!({"ft": "FT-1", "file": "fix.sql", "dbUser": "postgres", "dbPassword": "s3cret"}),
    )
    .await;

    let (lines, status) = logs(&fx, &id).await;
    assert_eq!(status, "success");
    assert!(lines.iter().any(|l| l.starts_with("-U postgres -h localhost -f ")));
    assert!(lines.iter().all(|l| !l.contains("s3cret")));

    let history: Value = fx.server.get("/api/deployments/history").await.json();
    let row = &history[0];
    assert_eq!(row["type"], "sql");
    assert_eq!(row["dbUser"], "postgres");
    assert!(row.get("dbPassword").is_none());
    assert!(row.get("logs").is_none());
}

#[tokio::test]
async fn test_systemd_operation_validation_and_run() {
    let fx = fixture().await;

    fx.server
        .post("/api/systemd/operation")
        .json(&json!({"service": "kafka", "operation": "reload", "vms": ["batch1"]}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let id = submit(
        &fx,
        "/api/systemd/operation",
        &json!({"service": "kafka", "operation": "restart", "vms": ["batch1", "ghost"]}),
    )
    .await;
    let (lines, status) = logs(&fx, &id).await;
    assert_eq!(status, "success");
    assert!(lines.contains(&"WARNING: VM ghost not found in inventory, skipping".to_string()));
    assert_eq!(
        lines.last().unwrap(),
        "SUCCESS: Systemd restart operation completed successfully"
    );
}

#[tokio::test]
async fn test_validate_file_deployment() {
    let fx = fixture().await;
    let mut body = file_request();
    body["vms"] = json!(["batch1", "ghost"]);
    let id = submit(&fx, "/api/deploy/file", &body).await;

    let response = fx.server.post(&format!("/api/deploy/{id}/validate")).await;
    response.assert_status_ok();
    let results: Value = response.json();
    assert_eq!(
        results["results"],
        json!([
            {"vm": "batch1", "status": "SUCCESS", "output": "infadm@192.168.1.10 cksum /opt/app/app.conf"},
            {"vm": "ghost", "status": "ERROR: VM not found"},
        ])
    );

    // Appended after the terminal status; the status itself is unchanged.
    let (lines, status) = logs(&fx, &id).await;
    assert_eq!(status, "success");
    assert!(lines.contains(&"Running cksum on batch1".to_string()));

    let shell = submit(&fx, "/api/command/shell", &json!({"command": "id", "vms": ["batch1"]})).await;
    fx.server
        .post(&format!("/api/deploy/{shell}/validate"))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    fx.server
        .post("/api/deploy/unknown/validate")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_validate_quotes_the_remote_path() {
    let fx = fixture().await;
    let mut body = file_request();
    body["targetPath"] = json!("/opt/my app;");
    let id = submit(&fx, "/api/deploy/file", &body).await;

    let results: Value = fx
        .server
        .post(&format!("/api/deploy/{id}/validate"))
        .await
        .json();
    assert_eq!(
        results["results"][0]["output"],
        json!("infadm@192.168.1.10 cksum '/opt/my app;/app.conf'")
    );
}

// ============================================================================
// Templates
// ============================================================================

fn nightly_template() -> Value {
    json!({
        "metadata": {"ft_number": "FT-1"},
        "steps": [
            {"order": 3, "type": "service_restart", "service": "kafka", "targetVMs": ["batch1"]},
            {"order": 1, "type": "file_deployment", "description": "Copy config",
             "files": ["app.conf"], "targetPath": "/opt/app", "targetUser": "infadm",
             "targetVMs": ["batch1"]},
            {"order": 2, "type": "sql_deployment", "files": ["fix.sql"], "dbUser": "postgres",
             "dbPassword": "s3cret"}
        ]
    })
}

#[tokio::test]
async fn test_template_crud() {
    let fx = fixture().await;

    let saved: Value = fx
        .server
        .post("/api/templates/save")
        .json(&json!({"name": "nightly", "template": nightly_template()}))
        .await
        .json();
    assert_eq!(saved["message"], "Template saved successfully");
    assert_eq!(saved["name"], "nightly");
    assert!(saved["path"].as_str().unwrap().ends_with("nightly.json"));

    let names: Value = fx.server.get("/api/templates/list").await.json();
    assert_eq!(names, json!(["nightly"]));

    let template: Value = fx.server.get("/api/templates/nightly").await.json();
    assert_eq!(template["steps"].as_array().unwrap().len(), 3);
    assert!(template["steps"][2].get("dbPassword").is_none());

    fx.server
        .post("/api/templates/save")
        .json(&json!({"name": "empty"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let deleted: Value = fx.server.delete("/api/templates/nightly").await.json();
    assert_eq!(deleted["message"], "Template deleted successfully");
    fx.server
        .get("/api/templates/nightly")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    fx.server
        .delete("/api/templates/nightly")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_template_deployment_runs_steps_in_order() {
    let fx = fixture().await;
    let id = submit(
        &fx,
        "/api/deploy/template",
        &json!({"ft_number": "FT-1", "templateName": "nightly", "template": nightly_template(),
                "dbPassword": "s3cret"}),
    )
    .await;

    let (lines, status) = logs(&fx, &id).await;
    assert_eq!(status, "success");
    assert_eq!(lines[0], "Starting template deployment nightly for FT-1 (3 steps)");
    let headers: Vec<&str> = lines
        .iter()
        .map(String::as_str)
        .filter(|l| l.starts_with("=== STEP"))
        .collect();
    assert_eq!(
        headers,
        [
            "=== STEP 1: Copy config ===",
            "=== STEP 2: sql deployment ===",
            "=== STEP 3: service restart ===",
        ]
    );
    assert!(lines.contains(&"SUCCESS: SQL deployment completed successfully".to_string()));
    assert_eq!(
        lines.last().unwrap(),
        "SUCCESS: Template deployment completed (3/3 steps)"
    );
    assert!(lines.iter().all(|l| !l.contains("s3cret")));

    // The same log under the template route.
    fx.server
        .get(&format!("/api/deploy/template/{id}/logs"))
        .await
        .assert_status_ok();

    let history: Value = fx.server.get("/api/deployments/history").await.json();
    assert_eq!(history[0]["type"], "template");
    assert_eq!(history[0]["ftNumber"], "FT-1");
    assert_eq!(history[0]["stepsCount"], 3);
    assert!(!history.to_string().contains("s3cret"));
}

#[tokio::test]
async fn test_template_deployment_stops_at_first_failure() {
    let fx = fixture_with(|s| s.ansible_playbook_bin = "false".to_string(), |c| c).await;
    let id = submit(
        &fx,
        "/api/deploy/template",
        &json!({"ftNumber": "FT-1", "template": nightly_template(), "dbPassword": "pw"}),
    )
    .await;

    let (lines, status) = logs(&fx, &id).await;
    assert_eq!(status, "failed");
    assert!(lines.contains(&"ERROR: File deployment failed".to_string()));
    assert!(lines.contains(&"Steps completed: 0/3".to_string()));
    assert!(lines.iter().all(|l| !l.starts_with("=== STEP 2")));
}

#[tokio::test]
async fn test_template_deployment_by_saved_name() {
    let fx = fixture().await;

    fx.server
        .post("/api/deploy/template")
        .json(&json!({"ftNumber": "FT-1", "templateName": "missing"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    fx.server
        .post("/api/deploy/template")
        .json(&json!({"ftNumber": "FT-1"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    fx.server
        .post("/api/templates/save")
        .json(&json!({"name": "restart", "template": {"steps": [
            {"type": "service_restart", "service": "kafka", "operation": "status", "targetVMs": ["batch1"]}
        ]}}))
        .await
        .assert_status_ok();
    let id = submit(
        &fx,
        "/api/deploy/template",
        &json!({"ftNumber": "FT-2", "templateName": "restart"}),
    )
    .await;

    let (lines, status) = logs(&fx, &id).await;
    assert_eq!(status, "success");
    assert!(lines.contains(&"Starting systemd status for kafka on 1 VMs".to_string()));
}

// ============================================================================
// Logs
// ============================================================================

#[tokio::test]
async fn test_unknown_deployment_logs_return_404() {
    let fx = fixture().await;
    let response = fx.server.get("/api/deploy/unknown/logs").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_logs_as_event_stream() {
    let fx = fixture().await;
    let id = submit(&fx, "/api/command/shell", &json!({"command": "uptime", "vms": ["batch2"]})).await;

    let response = fx
        .server
        .get(&format!("/api/deploy/{id}/logs"))
        .add_header(header::ACCEPT, HeaderValue::from_static("text/event-stream"))
        .await;
    response.assert_status_ok();

    let text = response.text();
    let events: Vec<Value> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(events[0], json!({"message": "Running command on 1 VMs: uptime"}));
    assert_eq!(
        events.last().unwrap(),
        &json!({"status": "success", "message": "Deployment success."})
    );
}

// ============================================================================
// Admission, history and system
// ============================================================================

#[tokio::test]
async fn test_busy_pool_returns_503() {
    let fx = fixture_with(|_| {}, |c| c.with_synchronous(false).with_max_workers(1)).await;

    let (release, wait) = tokio::sync::oneshot::channel::<()>();
    let accepted = fx
        .state
        .orchestrator
        .submit_job(JobId::from("blocker"), JobKind::Command, Metadata::new(), |_| async move {
            let _ = wait.await;
            Ok(())
        })
        .await
        .unwrap();
    assert!(accepted);

    let response = fx
        .server
        .post("/api/command/shell")
        .json(&json!({"command": "uptime", "vms": ["batch1"]}))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"], "busy");

    let threads: Value = fx.server.get("/api/system/threads").await.json();
    assert_eq!(threads["maxWorkers"], 1);
    assert_eq!(threads["inFlight"], 1);
    assert_eq!(threads["activeJobs"], json!(["blocker"]));

    release.send(()).unwrap();
}

#[tokio::test]
async fn test_history_purge_and_clear() {
    let fx = fixture().await;
    let first = submit(&fx, "/api/command/shell", &json!({"command": "a", "vms": ["batch1"]})).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = submit(&fx, "/api/deploy/file", &file_request()).await;

    let history: Value = fx.server.get("/api/deployments/history").await.json();
    let ids: Vec<_> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec![second.clone(), first]);
    assert_eq!(history[0]["type"], "file");
    assert_eq!(history[0]["targetPath"], "/opt/app");

    let purged: Value = fx
        .server
        .post("/api/deployments/purge")
        .json(&json!({"olderThanHours": 24}))
        .await
        .json();
    assert_eq!(purged["removed"], 0);

    let cleared: Value = fx.server.delete("/api/deployments").await.json();
    assert_eq!(cleared["removed"], 2);
    assert_eq!(
        fx.state.orchestrator.get_job(&JobId::from(second)).map(|r| r.status),
        None::<JobStatus>
    );
}

#[tokio::test]
async fn test_health_reports_threading() {
    let fx = fixture().await;
    let response = fx.server.get("/api/system/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["jobs"], 0);
    assert_eq!(body["threading"]["synchronous"], true);
    assert!(body["threading"]["pid"].as_u64().is_some());
}
