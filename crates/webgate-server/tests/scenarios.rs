//! End-to-end tool flows over the dispatcher, backed by the scriptable
//! engine.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use webgate_driver::mock::MockDriver;
use webgate_driver::PageEvent;
use webgate_server::dispatch::dispatch;
use webgate_server::{AppState, Gateway, GatewayConfig, JsonRpcRequest};

struct Harness {
    state: Arc<AppState>,
    driver: Arc<MockDriver>,
    _gateway: Gateway,
}

async fn harness(mutate: impl FnOnce(&mut GatewayConfig)) -> Harness {
    let mut config = GatewayConfig::default();
    config.enable_socket = false;
    config.enable_stdio = false;
    config.cleanup_interval_ms = 0;
    config.permission_soft_deny_ms = 20;
    config.temp_dir = Some(std::env::temp_dir().join("webgate-server-tests"));
    mutate(&mut config);

    let driver = Arc::new(MockDriver::new());
    let gateway = Gateway::new(config, driver.clone()).await.unwrap();
    Harness {
        state: gateway.state(),
        driver,
        _gateway: gateway,
    }
}

/// Invoke a tool through the dispatcher and return the parsed JSON body of
/// its envelope.
async fn call(harness: &Harness, client: &str, method: &str, params: Value) -> Value {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".into(),
        id: Some(json!(1)),
        method: method.to_string(),
        params: Some(params),
    };
    let response = dispatch(&harness.state, request, client)
        .await
        .expect("request with id gets a response");
    let result = response.result.expect("tool calls produce results");
    let text = result["content"][0]["text"]
        .as_str()
        .expect("first content entry is JSON text");
    serde_json::from_str(text).unwrap()
}

async fn new_session(harness: &Harness, client: &str, params: Value) -> String {
    let body = call(harness, client, "browser.newContext", params).await;
    assert_eq!(body["success"], true, "newContext failed: {body}");
    body["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn context_navigate_screenshot() {
    let h = harness(|c| c.allowed_domains = vec!["example.com".into()]).await;

    let session_id = new_session(
        &h,
        "c1",
        json!({"viewport": {"width": 1024, "height": 768}}),
    )
    .await;

    let body = call(
        &h,
        "c1",
        "browser.goto",
        json!({"sessionId": session_id, "url": "https://example.com", "waitUntil": "domcontentloaded"}),
    )
    .await;
    assert_eq!(body["success"], true);
    assert!(body["finalUrl"]
        .as_str()
        .unwrap()
        .starts_with("https://example.com"));
    assert!(body["status"].is_i64() || body["status"].is_u64());

    let body = call(
        &h,
        "c1",
        "browser.screenshot",
        json!({"sessionId": session_id, "format": "png"}),
    )
    .await;
    assert_eq!(body["success"], true);
    assert_eq!(body["width"], 1024);
    assert_eq!(body["height"], 768);
    let data = body["data"].as_str().unwrap();
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .unwrap();
    assert_eq!(&bytes[1..4], b"PNG");
}

#[tokio::test]
async fn disallowed_domain_is_refused() {
    let h = harness(|c| c.auto_approve_localhost = false).await;
    let session_id = new_session(&h, "c1", json!({"allowedDomains": ["example.com"]})).await;

    let body = call(
        &h,
        "c1",
        "browser.goto",
        json!({"sessionId": session_id, "url": "https://example.com"}),
    )
    .await;
    assert_eq!(body["success"], true);

    let body = call(
        &h,
        "c1",
        "browser.goto",
        json!({"sessionId": session_id, "url": "https://google.com"}),
    )
    .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["category"], "security");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not in the allowed domains list"));
}

#[tokio::test]
async fn localhost_auto_approval() {
    let h = harness(|_| {}).await;
    let session_id = new_session(&h, "c1", json!({})).await;
    let body = call(
        &h,
        "c1",
        "browser.goto",
        json!({"sessionId": session_id, "url": "http://localhost:8080/app"}),
    )
    .await;
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn form_flow() {
    let h = harness(|_| {}).await;
    let session_id = new_session(&h, "c1", json!({})).await;

    let page_url = "data:text/html,<input id='name'><button id='go'>go</button>";
    let body = call(
        &h,
        "c1",
        "browser.goto",
        json!({"sessionId": session_id, "url": page_url}),
    )
    .await;
    assert_eq!(body["success"], true);

    let body = call(
        &h,
        "c1",
        "browser.type",
        json!({"sessionId": session_id, "selector": "#name", "text": "Jane"}),
    )
    .await;
    assert_eq!(body["success"], true);

    let body = call(
        &h,
        "c1",
        "browser.click",
        json!({"sessionId": session_id, "selector": "#go"}),
    )
    .await;
    assert_eq!(body["success"], true);

    let page = h.driver.last_page().unwrap();
    page.script_eval("document.getElementById('name').value", json!("Jane"));
    let body = call(
        &h,
        "c1",
        "browser.eval",
        json!({"sessionId": session_id, "code": "document.getElementById('name').value"}),
    )
    .await;
    assert_eq!(body["success"], true);
    assert_eq!(body["result"], "Jane");
}

#[tokio::test]
async fn captured_network_records_are_redacted() {
    let h = harness(|_| {}).await;
    let session_id = new_session(&h, "c1", json!({})).await;

    let page = h.driver.last_page().unwrap();
    page.emit(PageEvent::Request {
        request_id: "r1".into(),
        method: "GET".into(),
        url: "https://api.example.com/user".into(),
        headers: std::collections::HashMap::from([
            ("Authorization".to_string(), "Bearer abc".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]),
        body: None,
    });
    page.emit(PageEvent::Response {
        request_id: "r1".into(),
        status: 200,
        headers: std::collections::HashMap::new(),
        body: Some(json!({"token": "secret-token", "name": "jane"}).to_string()),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let body = call(
        &h,
        "c1",
        "browser.network.getRecent",
        json!({"sessionId": session_id}),
    )
    .await;
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 1);
    let record = &body["records"][0];
    assert_eq!(record["request_headers"]["Authorization"], "[REDACTED]");
    assert_eq!(record["request_headers"]["Content-Type"], "application/json");
    let response_body: Value =
        serde_json::from_str(record["response_body"].as_str().unwrap()).unwrap();
    assert_eq!(response_body["token"], "[REDACTED]");
    assert_eq!(response_body["name"], "jane");
}

#[tokio::test]
async fn rate_limit_rejects_third_call() {
    let h = harness(|c| c.rate_limits.requests_per_minute = 2).await;

    let body = call(&h, "limited", "browser.macro.list", json!({})).await;
    assert_eq!(body["success"], true);
    let body = call(&h, "limited", "browser.macro.list", json!({})).await;
    assert_eq!(body["success"], true);
    let body = call(&h, "limited", "browser.macro.list", json!({})).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["category"], "security");
    assert_eq!(body["error"]["isSecurityError"], true);

    // A different client is unaffected.
    let body = call(&h, "other", "browser.macro.list", json!({})).await;
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn macro_roundtrip_across_sessions() {
    let h = harness(|c| c.allowed_domains = vec!["example.com".into()]).await;
    let recording_session = new_session(&h, "c1", json!({})).await;

    let body = call(
        &h,
        "c1",
        "browser.macro.startRecording",
        json!({"sessionId": recording_session, "name": "t1"}),
    )
    .await;
    assert_eq!(body["success"], true);
    let macro_id = body["macroId"].as_str().unwrap().to_string();

    let recorder_page = h.driver.last_page().unwrap();
    recorder_page.script_eval("document.title", json!("Example Domain"));

    call(
        &h,
        "c1",
        "browser.goto",
        json!({"sessionId": recording_session, "url": "https://example.com"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    call(
        &h,
        "c1",
        "browser.click",
        json!({"sessionId": recording_session, "selector": "h1"}),
    )
    .await;
    call(
        &h,
        "c1",
        "browser.eval",
        json!({"sessionId": recording_session, "code": "document.title"}),
    )
    .await;

    let body = call(
        &h,
        "c1",
        "browser.macro.stopRecording",
        json!({"sessionId": recording_session}),
    )
    .await;
    assert_eq!(body["success"], true);
    assert!(body["totalActions"].as_u64().unwrap() >= 3);

    let playback_session = new_session(&h, "c1", json!({})).await;
    let playback_page = h.driver.last_page().unwrap();
    playback_page.script_eval("document.title", json!("Example Domain"));

    let body = call(
        &h,
        "c1",
        "browser.macro.play",
        json!({"sessionId": playback_session, "macroId": macro_id}),
    )
    .await;
    assert_eq!(body["success"], true);
    assert_eq!(body["completed"], true);
    assert_eq!(body["executedActions"], body["totalActions"]);

    let body = call(
        &h,
        "c1",
        "browser.eval",
        json!({"sessionId": playback_session, "code": "document.title"}),
    )
    .await;
    assert_eq!(body["result"], "Example Domain");

    let body = call(&h, "c1", "browser.macro.list", json!({})).await;
    assert_eq!(body["count"], 1);
    let body = call(
        &h,
        "c1",
        "browser.macro.delete",
        json!({"macroId": macro_id}),
    )
    .await;
    assert_eq!(body["deleted"], true);
}

#[tokio::test]
async fn unknown_method_is_reported() {
    let h = harness(|_| {}).await;
    let request = JsonRpcRequest {
        jsonrpc: "2.0".into(),
        id: Some(json!(5)),
        method: "browser.doesNotExist".into(),
        params: None,
    };
    let response = dispatch(&h.state, request, "c1").await.unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("browser.doesNotExist"));
}

#[tokio::test]
async fn tools_list_and_direct_invocation_share_the_registry() {
    let h = harness(|_| {}).await;
    let request = JsonRpcRequest {
        jsonrpc: "2.0".into(),
        id: Some(json!(1)),
        method: "tools.list".into(),
        params: None,
    };
    let response = dispatch(&h.state, request, "c1").await.unwrap();
    let tools = response.result.unwrap()["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    for expected in [
        "browser.newContext",
        "browser.goto",
        "browser.click",
        "browser.type",
        "browser.select",
        "browser.eval",
        "browser.screenshot",
        "browser.domSnapshot",
        "browser.network.getRecent",
        "browser.console.getRecent",
        "browser.trace.start",
        "browser.trace.stop",
        "browser.harExport",
        "browser.macro.startRecording",
        "browser.macro.stopRecording",
        "browser.macro.list",
        "browser.macro.play",
        "browser.macro.delete",
        "browser.report.generate",
        "browser.report.templates",
        "browser.report.cleanup",
    ] {
        assert!(tools.contains(&expected.to_string()), "missing {expected}");
    }

    // tools.call and the direct dotted method hit the same handler.
    let direct = call(&h, "c1", "browser.report.templates", json!({})).await;
    let via_call = call(
        &h,
        "c1",
        "tools.call",
        json!({"name": "browser.report.templates", "arguments": {}}),
    )
    .await;
    assert_eq!(direct, via_call);
}

#[tokio::test]
async fn invalid_arguments_are_system_errors() {
    let h = harness(|_| {}).await;
    let session_id = new_session(&h, "c1", json!({})).await;

    let body = call(
        &h,
        "c1",
        "browser.goto",
        json!({"sessionId": session_id, "url": 42}),
    )
    .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["category"], "system");

    let body = call(
        &h,
        "c1",
        "browser.goto",
        json!({"sessionId": "sess-999-0", "url": "https://example.com"}),
    )
    .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["category"], "system");
}

#[tokio::test]
async fn eval_policy_refuses_host_patterns() {
    let h = harness(|_| {}).await;
    let session_id = new_session(&h, "c1", json!({})).await;
    let body = call(
        &h,
        "c1",
        "browser.eval",
        json!({"sessionId": session_id, "code": "require('fs').readFileSync('/etc/passwd')"}),
    )
    .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["category"], "security");
}

#[tokio::test]
async fn trace_lifecycle_and_har_export() {
    let h = harness(|c| {
        c.trace_dir = Some(std::env::temp_dir().join("webgate-test-traces"));
    })
    .await;
    let session_id = new_session(&h, "c1", json!({})).await;

    let body = call(
        &h,
        "c1",
        "browser.trace.start",
        json!({"sessionId": session_id, "screenshots": true}),
    )
    .await;
    assert_eq!(body["success"], true);

    // A second start on the same session must be refused.
    let body = call(
        &h,
        "c1",
        "browser.trace.start",
        json!({"sessionId": session_id}),
    )
    .await;
    assert_eq!(body["success"], false);

    let body = call(
        &h,
        "c1",
        "browser.trace.stop",
        json!({"sessionId": session_id}),
    )
    .await;
    assert_eq!(body["success"], true);
    assert!(body["outputPath"].as_str().unwrap().contains("trace-"));

    let page = h.driver.last_page().unwrap();
    page.emit(PageEvent::Request {
        request_id: "r1".into(),
        method: "GET".into(),
        url: "https://example.com/".into(),
        headers: std::collections::HashMap::new(),
        body: None,
    });
    page.emit(PageEvent::Response {
        request_id: "r1".into(),
        status: 200,
        headers: std::collections::HashMap::new(),
        body: None,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let body = call(&h, "c1", "browser.harExport", json!({"sessionId": session_id})).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["har"]["log"]["version"], "1.2");
    assert_eq!(body["har"]["log"]["entries"][0]["response"]["status"], 200);
}

#[tokio::test]
async fn report_generation_and_cleanup() {
    let dir = std::env::temp_dir().join(format!("webgate-test-reports-{}", std::process::id()));
    let h = harness(|c| c.report_dir = Some(dir.clone())).await;
    let session_id = new_session(&h, "c1", json!({})).await;

    let body = call(
        &h,
        "c1",
        "browser.report.templates",
        json!({}),
    )
    .await;
    assert_eq!(body["success"], true);
    assert!(body["templates"].as_array().unwrap().len() >= 3);

    let body = call(
        &h,
        "c1",
        "browser.report.generate",
        json!({"sessionId": session_id, "template": "summary", "format": "json"}),
    )
    .await;
    assert_eq!(body["success"], true);
    let path = body["path"].as_str().unwrap().to_string();
    assert!(tokio::fs::try_exists(&path).await.unwrap());

    let body = call(
        &h,
        "c1",
        "browser.report.cleanup",
        json!({"olderThanMs": 0}),
    )
    .await;
    assert_eq!(body["success"], true);
    assert!(body["removed"].as_u64().unwrap() >= 1);
    assert!(!tokio::fs::try_exists(&path).await.unwrap());
}

#[tokio::test]
async fn dom_snapshot_reports_metadata() {
    let h = harness(|_| {}).await;
    let session_id = new_session(&h, "c1", json!({})).await;

    // The mock engine answers evaluate from a scripted table; stand in for
    // the walker result.
    let page = h.driver.last_page().unwrap();
    let ops_before = page.ops().len();
    let body = call(
        &h,
        "c1",
        "browser.domSnapshot",
        json!({"sessionId": session_id, "maxNodes": 100}),
    )
    .await;
    assert_eq!(body["success"], true);
    // The walker script was evaluated exactly once.
    assert_eq!(page.ops().len(), ops_before + 1);

    let body = call(
        &h,
        "c1",
        "browser.domSnapshot",
        json!({"sessionId": session_id, "maxNodes": 100_000}),
    )
    .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["category"], "system");
}
