// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use nova_core::{ConfigLoader, PluginLoader, PluginRegistry, ProjectsService};
use nova_server::{AppState, Server};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stub that speaks the single-prompt line protocol and exits cleanly.
pub const HAPPY_STUB: &str = r#"printf '{"type":"system","subtype":"init","session_id":"U-1"}\n'
printf '{"type":"result","subtype":"success","session_id":"U-1"}\n'"#;

/// Stub that initializes then hangs until signalled.
pub const SLOW_STUB: &str = r#"printf '{"type":"system","subtype":"init","session_id":"U-slow"}\n'
exec sleep 60"#;

pub struct TestHarness {
    pub addr: SocketAddr,
    pub base: TempDir,
    pub project_dir: TempDir,
    pub transcript_root: TempDir,
    pub registry: Arc<PluginRegistry>,
    server_task: JoinHandle<()>,
}

impl TestHarness {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/nova", self.addr)
    }

    pub fn project_path(&self) -> String {
        self.project_dir.path().display().to_string()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

/// Boot a full server against a stub CLI, an empty transcript root and an
/// ephemeral port.
pub async fn spawn_server(stub_body: &str) -> TestHarness {
    spawn_server_with(stub_body, |_| {}).await
}

pub async fn spawn_server_with(
    stub_body: &str,
    mutate_config: impl FnOnce(&mut Value),
) -> TestHarness {
    let base = TempDir::new().expect("base dir");
    let project_dir = TempDir::new().expect("project dir");
    let transcript_root = TempDir::new().expect("transcript root");

    let stub = write_stub(base.path(), stub_body);

    let plugin_dir = base.path().join("plugins").join("claude");
    std::fs::create_dir_all(&plugin_dir).expect("plugin dir");
    std::fs::write(
        plugin_dir.join("plugin.json"),
        json!({
            "name": "claude_cli",
            "version": "1.0.0",
            "type": "llm",
            "source": "cli",
            "capabilities": ["chat", "tools", "code"],
            "entry": "claude-cli",
            "agents": [
                {"id": "sonnet", "name": "Claude Sonnet"},
                {"id": "opus", "name": "Claude Opus"}
            ]
        })
        .to_string(),
    )
    .expect("manifest");

    let mut config = json!({
        "plugins": {
            "claude_cli": { "options": { "binary": stub.display().to_string() } }
        }
    });
    mutate_config(&mut config);
    std::fs::write(base.path().join("nova.config.json"), config.to_string()).expect("config");

    let config_loader = Arc::new(ConfigLoader::new(base.path()));
    let registry = Arc::new(PluginRegistry::new());
    let loader = PluginLoader::new(base.path(), config_loader, Arc::clone(&registry));
    assert_eq!(loader.discover().await, 1, "plugin discovery");

    let projects = Arc::new(ProjectsService::with_root(transcript_root.path()));
    let state = AppState::new(Arc::clone(&registry), projects);
    let server = Server::bind("127.0.0.1:0".parse().unwrap(), state).await.expect("bind");
    let addr = server.addr();

    let server_task = tokio::spawn(async move {
        let _ = server.run(futures::future::pending()).await;
    });

    TestHarness {
        addr,
        base,
        project_dir,
        transcript_root,
        registry,
        server_task,
    }
}

fn write_stub(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("claude-stub");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("stub");
    let mut perms = std::fs::metadata(&path).expect("stub meta").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("stub perms");
    path
}

pub async fn ws_connect(harness: &TestHarness) -> WsClient {
    let (client, _) = tokio_tungstenite::connect_async(harness.ws_url())
        .await
        .expect("ws connect");
    client
}

pub async fn send_frame(client: &mut WsClient, frame: Value) {
    client
        .send(Message::Text(frame.to_string()))
        .await
        .expect("ws send");
}

/// Next JSON text frame, with a generous timeout.
pub async fn recv_frame(client: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(15), client.next())
            .await
            .expect("ws receive timed out")
            .expect("ws closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame is json");
        }
    }
}

/// Receive frames until the response with `id` appears; notifications seen
/// on the way are returned too.
pub async fn recv_response(client: &mut WsClient, id: i64) -> (Value, Vec<Value>) {
    let mut notifications = Vec::new();
    loop {
        let frame = recv_frame(client).await;
        if frame.get("id").and_then(|v| v.as_i64()) == Some(id) {
            return (frame, notifications);
        }
        notifications.push(frame);
    }
}

/// Collect `session.event` notifications until a terminal `complete`.
pub async fn recv_events_until_complete(client: &mut WsClient) -> Vec<Value> {
    let mut events = Vec::new();
    loop {
        let frame = recv_frame(client).await;
        assert_eq!(frame.get("method").and_then(|v| v.as_str()), Some("session.event"));
        let done = frame["params"]["type"] == "complete";
        events.push(frame["params"].clone());
        if done {
            return events;
        }
    }
}

/// Plain HTTP GET against the sidecar, returning (status line, body).
pub async fn http_get(addr: SocketAddr, path: &str) -> (String, String) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = TcpStream::connect(addr).await.expect("tcp connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("http write");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("http read");
    let text = String::from_utf8_lossy(&raw).to_string();

    let status = text.lines().next().unwrap_or_default().to_string();
    let body = text.split("\r\n\r\n").nth(1).unwrap_or_default().to_string();
    (status, body)
}
