// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! WebSocket connection handling
//!
//! Per connection: one read loop, one writer task fed by a bounded queue,
//! and one forward task per subscribed session draining that session's
//! broadcast receiver into the queue. Responses and notifications share the
//! queue, so an invoke reply always precedes the session's events on the
//! same socket.

use crate::rpc::{dispatch, Dispatch};
use crate::state::AppState;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use nova_api_contract::rpc::{codes, RpcNotification, RpcRequest, RpcResponse};
use nova_api_contract::SessionEvent;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outbound frames queued per socket; the writer serializes delivery.
const OUTBOUND_QUEUE: usize = 256;

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    state.connection_opened();
    debug!(connections = state.connection_count(), "WebSocket connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    let writer: JoinHandle<()> = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();
    let mut shutdown = state.shutdown_signal();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_frame(&state, &out_tx, &mut subscriptions, &text).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
        }
    }

    // Disconnect cancels only this connection's subscriptions; sessions
    // keep running.
    for (_, handle) in subscriptions.drain() {
        handle.abort();
    }
    drop(out_tx);
    let _ = writer.await;

    state.connection_closed();
    debug!(connections = state.connection_count(), "WebSocket disconnected");
}

async fn handle_frame(
    state: &AppState,
    out_tx: &mpsc::Sender<String>,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
    text: &str,
) {
    let request: RpcRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(_) => {
            // Unparseable frame; respond with a null id per JSON-RPC.
            let response = RpcResponse::err(Value::Null, codes::PARSE_ERROR, "Parse error");
            let _ = send_json(out_tx, &response).await;
            return;
        }
    };

    let is_notification = request.is_notification();
    match dispatch(state, request).await {
        Dispatch::Reply(response) => {
            if !is_notification {
                let _ = send_json(out_tx, &response).await;
            }
        }
        Dispatch::ReplyThenSubscribe { response, session_id, events } => {
            if !is_notification {
                let _ = send_json(out_tx, &response).await;
            }
            // One subscription per session per connection; a duplicate
            // subscribe must not double events.
            subscriptions
                .entry(session_id.clone())
                .or_insert_with(|| spawn_forward(session_id, events, out_tx.clone()));
        }
        Dispatch::ReplyThenUnsubscribe { response, session_id } => {
            if !is_notification {
                let _ = send_json(out_tx, &response).await;
            }
            if let Some(handle) = subscriptions.remove(&session_id) {
                handle.abort();
            }
        }
    }
}

/// Forward one session's events to this socket until the stream ends.
fn spawn_forward(
    session_id: String,
    mut events: broadcast::Receiver<SessionEvent>,
    out_tx: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    match serde_json::to_value(&event) {
                        Ok(params) => {
                            let note = RpcNotification::session_event(params);
                            if send_json(&out_tx, &note).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(session_id = %session_id, error = %e, "Failed to encode event"),
                    }
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(session_id = %session_id, skipped, "Subscriber lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn send_json<T: serde::Serialize>(
    out_tx: &mpsc::Sender<String>,
    payload: &T,
) -> Result<(), ()> {
    let text = serde_json::to_string(payload).map_err(|_| ())?;
    out_tx.send(text).await.map_err(|_| ())
}
