// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use serde_json::json;

mod common;
use common::*;

#[tokio::test]
async fn unknown_method_is_32601() {
    let harness = spawn_server(HAPPY_STUB).await;
    let mut client = ws_connect(&harness).await;

    send_frame(&mut client, json!({"jsonrpc": "2.0", "id": 2, "method": "nonsense"})).await;
    let (response, _) = recv_response(&mut client, 2).await;

    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["error"]["message"], "Method not found: nonsense");
}

#[tokio::test]
async fn malformed_json_is_32700_with_null_id() {
    let harness = spawn_server(HAPPY_STUB).await;
    let mut client = ws_connect(&harness).await;

    use futures::SinkExt;
    client
        .send(tokio_tungstenite::tungstenite::Message::Text("{nope".into()))
        .await
        .unwrap();

    let frame = recv_frame(&mut client).await;
    assert!(frame["id"].is_null());
    assert_eq!(frame["error"]["code"], -32700);
}

#[tokio::test]
async fn plugin_and_agent_listings() {
    let harness = spawn_server(HAPPY_STUB).await;
    let mut client = ws_connect(&harness).await;

    send_frame(&mut client, json!({"jsonrpc": "2.0", "id": 1, "method": "plugin.list"})).await;
    let (response, _) = recv_response(&mut client, 1).await;
    let plugins = response["result"]["plugins"].as_array().unwrap();
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0]["name"], "claude_cli");
    assert_eq!(plugins[0]["type"], "llm");
    assert_eq!(plugins[0]["source"], "cli");
    assert_eq!(plugins[0]["agents"].as_array().unwrap().len(), 2);

    send_frame(&mut client, json!({"jsonrpc": "2.0", "id": 2, "method": "agent.list"})).await;
    let (response, _) = recv_response(&mut client, 2).await;
    let agents = response["result"]["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 2);
    assert!(agents.iter().all(|a| a["plugin"] == "claude_cli"));
}

#[tokio::test]
async fn notifications_produce_no_response() {
    let harness = spawn_server(HAPPY_STUB).await;
    let mut client = ws_connect(&harness).await;

    // No id: a notification. The next frame on the wire must answer the
    // id-carrying request that follows, not this one.
    send_frame(&mut client, json!({"jsonrpc": "2.0", "method": "session.list"})).await;
    send_frame(&mut client, json!({"jsonrpc": "2.0", "id": 9, "method": "session.list"})).await;

    let frame = recv_frame(&mut client).await;
    assert_eq!(frame["id"], 9);
    assert!(frame["result"]["sessions"].is_array());
}

#[tokio::test]
async fn invalid_params_is_32602() {
    let harness = spawn_server(HAPPY_STUB).await;
    let mut client = ws_connect(&harness).await;

    send_frame(
        &mut client,
        json!({"jsonrpc": "2.0", "id": 4, "method": "session.get", "params": {"wrong": true}}),
    )
    .await;
    let (response, _) = recv_response(&mut client, 4).await;
    assert_eq!(response["error"]["code"], -32602);
}

#[tokio::test]
async fn session_get_unknown_is_32003() {
    let harness = spawn_server(HAPPY_STUB).await;
    let mut client = ws_connect(&harness).await;

    send_frame(
        &mut client,
        json!({"jsonrpc": "2.0", "id": 5, "method": "session.get", "params": {"sessionId": "sess-0"}}),
    )
    .await;
    let (response, _) = recv_response(&mut client, 5).await;
    assert_eq!(response["error"]["code"], -32003);
}

#[tokio::test]
async fn home_directory_is_reported() {
    let harness = spawn_server(HAPPY_STUB).await;
    let mut client = ws_connect(&harness).await;

    send_frame(&mut client, json!({"jsonrpc": "2.0", "id": 6, "method": "system.homeDirectory"})).await;
    let (response, _) = recv_response(&mut client, 6).await;
    let home = response["result"]["home_directory"].as_str().unwrap();
    assert!(home.starts_with('/'));
}

#[tokio::test]
async fn health_and_plugins_http_surface() {
    let harness = spawn_server(HAPPY_STUB).await;

    let (status, body) = http_get(harness.addr, "/health").await;
    assert!(status.contains("200"), "status line: {status}");
    assert!(body.contains("\"status\":\"ok\""));
    assert!(body.contains("\"plugins\":1"));

    let (status, body) = http_get(harness.addr, "/plugins").await;
    assert!(status.contains("200"));
    assert!(body.contains("claude_cli"));

    // Any other path answers with the banner.
    let (status, body) = http_get(harness.addr, "/not-a-route").await;
    assert!(status.contains("200"));
    assert!(body.contains("Nova"));
}
