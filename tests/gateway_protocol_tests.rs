use std::sync::Arc;

use agentic_app::config::{AppConfig, StaticConfigSource};
use agentic_app::gateway::Gateway;
use agentic_app::gateway::handlers::{dispatch, handle_line};
use agentic_app::gateway::protocol::{ErrorCode, RequestFrame, ResponseFrame};
use agentic_app::gateway::serve::serve;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

// ─── Helpers ──────────────────────────────────────────────────────────

fn test_gateway(cap: usize) -> Gateway {
    let mut config = AppConfig::default();
    config.app.subagents.max_active_runs = cap;
    Gateway::builder(Arc::new(StaticConfigSource::new(config))).build()
}

async fn call(gateway: &Gateway, method: &str, params: Value) -> ResponseFrame {
    dispatch(
        gateway,
        RequestFrame {
            id: json!(method),
            method: method.to_string(),
            params,
        },
    )
    .await
}

async fn ok_payload(gateway: &Gateway, method: &str, params: Value) -> Value {
    let resp = call(gateway, method, params).await;
    assert!(resp.ok, "{method} failed: {:?}", resp.error);
    resp.payload.unwrap_or(Value::Null)
}

fn error_code(resp: &ResponseFrame) -> ErrorCode {
    resp.error.as_ref().expect("expected an error frame").code
}

// ============================================================
// app.* methods
// ============================================================

#[tokio::test]
async fn test_protocol_end_to_end_scenario() {
    let gateway = test_gateway(3);
    let run = ok_payload(&gateway, "app.create", json!({ "runId": "r1" })).await;
    assert_eq!(run["sessionKey"], "agent:main");
    assert_eq!(run["state"], "created");

    let started = ok_payload(&gateway, "app.start", json!({ "runId": "r1" })).await;
    assert_eq!(started["state"], "running");

    for i in 0..3 {
        let spawned = ok_payload(
            &gateway,
            "app.spawn",
            json!({ "runId": "r1", "task": format!("task {i}") }),
        )
        .await;
        assert_eq!(spawned["status"], "accepted");
    }

    let rejected = call(&gateway, "app.spawn", json!({ "runId": "r1", "task": "one more" })).await;
    assert_eq!(error_code(&rejected), ErrorCode::Forbidden);
    assert_eq!(
        rejected.error.unwrap().details,
        Some(json!({ "active": 3, "cap": 3 }))
    );

    let stopped = ok_payload(&gateway, "app.stop", json!({ "runId": "r1", "reason": "done" })).await;
    assert_eq!(stopped["state"], "stopped");
    assert_eq!(stopped["activeSubagents"], 0);

    let subagents = ok_payload(&gateway, "app.subagents", json!({ "runId": "r1" })).await;
    let runs = subagents["runs"].as_array().unwrap();
    assert_eq!(runs.len(), 3);
    for run in runs {
        assert_eq!(run["outcome"], json!({ "status": "terminated", "error": "done" }));
    }

    let graph = ok_payload(&gateway, "subagents.graph", Value::Null).await;
    assert_eq!(graph["rootSessionKey"], "agent:main");
    let nodes = graph["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 3);
    assert!(nodes.iter().all(|n| n["state"] == "failed"));
    assert!(graph["ts"].is_i64());
}

#[tokio::test]
async fn test_status_filters_and_unknown_runs() {
    let gateway = test_gateway(3);
    ok_payload(&gateway, "app.create", json!({ "runId": "a" })).await;
    ok_payload(&gateway, "app.create", json!({ "runId": "b" })).await;

    let all = ok_payload(&gateway, "app.status", json!({})).await;
    assert_eq!(all["runs"].as_array().unwrap().len(), 2);

    let one = ok_payload(&gateway, "app.status", json!({ "runId": "b" })).await;
    assert_eq!(one["runs"][0]["runId"], "b");

    let none = ok_payload(&gateway, "app.status", json!({ "runId": "zzz" })).await;
    assert_eq!(none["runs"], json!([]));

    let subagents = ok_payload(&gateway, "app.subagents", json!({ "runId": "zzz" })).await;
    assert_eq!(subagents["runs"], json!([]));

    let stop = call(&gateway, "app.stop", json!({ "runId": "zzz" })).await;
    assert_eq!(error_code(&stop), ErrorCode::NotFound);

    let spawn = call(&gateway, "app.spawn", json!({ "runId": "zzz", "task": "x" })).await;
    assert_eq!(error_code(&spawn), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_unknown_params_are_rejected() {
    let gateway = test_gateway(3);
    let resp = call(&gateway, "app.create", json!({ "runId": "a", "colour": "red" })).await;
    assert_eq!(error_code(&resp), ErrorCode::InvalidRequest);

    let missing = call(&gateway, "app.spawn", json!({ "runId": "a" })).await;
    assert_eq!(error_code(&missing), ErrorCode::InvalidRequest);
}

// ============================================================
// subagents.action
// ============================================================

#[tokio::test]
async fn test_action_validation() {
    let gateway = test_gateway(3);
    let cases = [
        json!({ "action": "pause", "target": "all" }),
        json!({ "action": "kill" }),
        json!({ "action": "steer", "target": "all" }),
        json!({ "action": "message", "target": "agent:ops", "message": "  " }),
    ];
    for params in cases {
        let resp = call(&gateway, "subagents.action", params.clone()).await;
        assert_eq!(error_code(&resp), ErrorCode::InvalidRequest, "{params}");
    }
}

#[tokio::test]
async fn test_kill_all_through_protocol() {
    let gateway = test_gateway(3);
    ok_payload(&gateway, "app.create", json!({ "runId": "r1" })).await;
    ok_payload(&gateway, "app.spawn", json!({ "runId": "r1", "task": "a" })).await;
    ok_payload(&gateway, "app.spawn", json!({ "runId": "r1", "task": "b" })).await;

    let result = ok_payload(
        &gateway,
        "subagents.action",
        json!({ "sessionKey": "main", "action": "kill", "target": "all" }),
    )
    .await;
    assert_eq!(result["ok"], true);
    assert_eq!(result["action"], "kill");
    assert_eq!(result["result"]["killed"], 2);

    let status = ok_payload(&gateway, "app.status", json!({ "runId": "r1" })).await;
    assert_eq!(status["runs"][0]["activeSubagents"], 0);
}

// ============================================================
// secrets.* methods
// ============================================================

#[tokio::test]
async fn test_secret_methods() {
    let gateway = test_gateway(3);
    ok_payload(
        &gateway,
        "secrets.set",
        json!({ "scope": "app", "key": "TOKEN", "value": "abc", "targets": ["sandbox"] }),
    )
    .await;

    let listed = ok_payload(&gateway, "secrets.list", json!({})).await;
    assert_eq!(listed["secrets"][0]["key"], "TOKEN");
    assert_eq!(listed["secrets"][0]["hasValue"], true);
    assert!(listed["secrets"][0].get("value").is_none());

    let host_env = ok_payload(
        &gateway,
        "secrets.env",
        json!({ "target": "exec", "host": "gateway" }),
    )
    .await;
    assert_eq!(host_env["env"], json!({}));

    ok_payload(
        &gateway,
        "secrets.assign",
        json!({ "key": "TOKEN", "target": "exec" }),
    )
    .await;
    let sandbox_env = ok_payload(
        &gateway,
        "secrets.env",
        json!({ "target": "exec", "host": "sandbox" }),
    )
    .await;
    assert_eq!(sandbox_env["env"], json!({ "TOKEN": "abc" }));
    assert_eq!(sandbox_env["scopes"], json!(["app"]));

    let bad = call(
        &gateway,
        "secrets.set",
        json!({ "scope": "agent", "key": "K", "value": "v" }),
    )
    .await;
    assert_eq!(error_code(&bad), ErrorCode::InvalidRequest);

    let deleted = ok_payload(&gateway, "secrets.delete", json!({ "key": "TOKEN" })).await;
    assert_eq!(deleted["removed"], true);
}

// ============================================================
// Line server
// ============================================================

#[tokio::test]
async fn test_serve_round_trip() {
    let gateway = test_gateway(3);
    let input = [
        r#"{"id":"c","method":"app.create","params":{"runId":"r9"}}"#,
        "garbage",
        r#"{"id":"s","method":"app.spawn","params":{"runId":"r9","task":"scan"}}"#,
    ]
    .join("\n");

    let mut output = Vec::new();
    serve(&gateway, input.as_bytes(), &mut output, CancellationToken::new())
        .await
        .unwrap();

    let frames: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0]["ok"], true);
    assert_eq!(frames[1]["id"], Value::Null);
    assert_eq!(frames[1]["error"]["code"], "INVALID_REQUEST");
    assert_eq!(frames[2]["id"], "s");
    assert_eq!(frames[2]["payload"]["status"], "accepted");
}

#[tokio::test]
async fn test_handle_line_matches_dispatch() {
    let gateway = test_gateway(3);
    let resp = handle_line(&gateway, r#"{"id":5,"method":"app.status"}"#).await;
    assert_eq!(resp.id, json!(5));
    assert_eq!(resp.payload, Some(json!({ "runs": [] })));
}
