// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! JSON-RPC method dispatch
//!
//! Each frame is routed by `method` to the registry or the projects
//! service. Blocking transcript I/O runs on the blocking pool so the
//! connection loop never stalls.

use crate::error::rpc_error_code;
use crate::state::AppState;
use nova_api_contract::rpc::{codes, RpcRequest, RpcResponse};
use nova_api_contract::{InvokeOptions, SessionEvent};
use nova_core::InvokeOutcome;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

/// What the connection loop should do with a dispatched frame.
pub enum Dispatch {
    Reply(RpcResponse),
    /// Queue the reply, then attach a forward task for the session's
    /// events. The reply is enqueued first so it precedes every
    /// notification on the socket.
    ReplyThenSubscribe {
        response: RpcResponse,
        session_id: String,
        events: broadcast::Receiver<SessionEvent>,
    },
    /// Queue the reply, then drop this connection's subscription.
    ReplyThenUnsubscribe {
        response: RpcResponse,
        session_id: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeParams {
    plugin: String,
    agent: String,
    #[serde(flatten)]
    options: InvokeOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResumeParams {
    plugin: String,
    agent: String,
    upstream_session_id: String,
    #[serde(flatten)]
    options: InvokeOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageParams {
    session_id: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectParams {
    project_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    project_id: String,
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkDeleteParams {
    project_id: String,
    session_ids: Vec<String>,
}

pub async fn dispatch(state: &AppState, request: RpcRequest) -> Dispatch {
    let id = request.id.clone().unwrap_or(Value::Null);

    match request.method.as_str() {
        "plugin.list" => reply_ok(id, json!({ "plugins": state.registry.plugin_infos() })),
        "agent.list" => reply_ok(id, json!({ "agents": state.registry.agents() })),

        "agent.invoke" => match parse::<InvokeParams>(request.params) {
            Ok(params) => invoke(state, id, &params.plugin, &params.agent, params.options).await,
            Err(e) => invalid_params(id, e),
        },
        "agent.resume" => match parse::<ResumeParams>(request.params) {
            Ok(params) => {
                let mut options = params.options;
                options.resume_session_id = Some(params.upstream_session_id);
                invoke(state, id, &params.plugin, &params.agent, options).await
            }
            Err(e) => invalid_params(id, e),
        },

        "session.message" => match parse::<MessageParams>(request.params) {
            Ok(params) => {
                let outcome = state.registry.message(&params.session_id, &params.message).await;
                reply_ok(id, json!(outcome))
            }
            Err(e) => invalid_params(id, e),
        },
        "session.stop" => match parse::<SessionParams>(request.params) {
            Ok(params) => match state.registry.stop(&params.session_id).await {
                Ok(()) => reply_ok(id, json!({ "success": true })),
                Err(e) => reply_err(id, rpc_error_code(&e), e.to_string()),
            },
            Err(e) => invalid_params(id, e),
        },
        "session.list" => reply_ok(id, json!({ "sessions": state.registry.sessions() })),
        "session.get" => match parse::<SessionParams>(request.params) {
            Ok(params) => match state.registry.session(&params.session_id) {
                Some(session) => reply_ok(id, json!({ "session": session })),
                None => reply_err(
                    id,
                    codes::SESSION_NOT_FOUND,
                    format!("Session not found: {}", params.session_id),
                ),
            },
            Err(e) => invalid_params(id, e),
        },

        "session.subscribe" => match parse::<SessionParams>(request.params) {
            Ok(params) => match state.registry.stream(&params.session_id) {
                Some(events) => Dispatch::ReplyThenSubscribe {
                    response: RpcResponse::ok(
                        id,
                        json!({ "subscribed": true, "session_id": params.session_id }),
                    ),
                    session_id: params.session_id,
                    events,
                },
                None => reply_err(
                    id,
                    codes::SESSION_NOT_FOUND,
                    format!("Session not found: {}", params.session_id),
                ),
            },
            Err(e) => invalid_params(id, e),
        },
        "session.unsubscribe" => match parse::<SessionParams>(request.params) {
            Ok(params) => Dispatch::ReplyThenUnsubscribe {
                response: RpcResponse::ok(
                    id,
                    json!({ "unsubscribed": true, "session_id": params.session_id }),
                ),
                session_id: params.session_id,
            },
            Err(e) => invalid_params(id, e),
        },

        "project.list" => {
            let projects = Arc::clone(&state.projects);
            blocking(id, move || {
                projects.list_projects().map(|list| json!({ "projects": list }))
            })
            .await
        }
        "project.sessions" => match parse::<ProjectParams>(request.params) {
            Ok(params) => {
                let projects = Arc::clone(&state.projects);
                blocking(id, move || {
                    projects
                        .project_sessions(&params.project_id)
                        .map(|list| json!({ "sessions": list }))
                })
                .await
            }
            Err(e) => invalid_params(id, e),
        },
        "session.history" => match parse::<HistoryParams>(request.params) {
            Ok(params) => {
                let projects = Arc::clone(&state.projects);
                blocking(id, move || {
                    projects
                        .load_history(&params.project_id, &params.session_id)
                        .map(|records| json!({ "history": records }))
                })
                .await
            }
            Err(e) => invalid_params(id, e),
        },
        "session.delete" => match parse::<HistoryParams>(request.params) {
            Ok(params) => {
                let projects = Arc::clone(&state.projects);
                blocking(id, move || {
                    projects
                        .delete_session(&params.project_id, &params.session_id)
                        .map(|()| json!({ "success": true }))
                })
                .await
            }
            Err(e) => invalid_params(id, e),
        },
        "session.deleteBulk" => match parse::<BulkDeleteParams>(request.params) {
            Ok(params) => {
                let projects = Arc::clone(&state.projects);
                blocking(id, move || {
                    Ok(json!(
                        projects.delete_sessions_bulk(&params.project_id, &params.session_ids)
                    ))
                })
                .await
            }
            Err(e) => invalid_params(id, e),
        },
        "system.homeDirectory" => {
            reply_ok(id, json!({ "home_directory": state.projects.home_directory() }))
        }

        other => reply_err(
            id,
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    }
}

async fn invoke(
    state: &AppState,
    id: Value,
    plugin: &str,
    agent: &str,
    options: InvokeOptions,
) -> Dispatch {
    match state.registry.invoke(plugin, agent, options).await {
        Ok(InvokeOutcome { session, events }) => {
            let response = RpcResponse::ok(
                id,
                json!({
                    "session_id": session.id,
                    "upstream_session_id": session.upstream_session_id,
                    "status": session.status,
                    "agent_id": session.agent_id,
                    "plugin_id": session.plugin_id,
                }),
            );
            Dispatch::ReplyThenSubscribe {
                response,
                session_id: session.id,
                events,
            }
        }
        Err(e) => reply_err(id, rpc_error_code(&e), e.to_string()),
    }
}

/// Run blocking transcript I/O off the connection loop.
async fn blocking<F>(id: Value, work: F) -> Dispatch
where
    F: FnOnce() -> nova_core::Result<Value> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(result)) => reply_ok(id, result),
        Ok(Err(e)) => reply_err(id, rpc_error_code(&e), e.to_string()),
        Err(e) => reply_err(id, codes::INTERNAL_ERROR, format!("task failed: {e}")),
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(params)
}

fn reply_ok(id: Value, result: Value) -> Dispatch {
    Dispatch::Reply(RpcResponse::ok(id, result))
}

fn reply_err(id: Value, code: i64, message: impl Into<String>) -> Dispatch {
    Dispatch::Reply(RpcResponse::err(id, code, message))
}

fn invalid_params(id: Value, error: serde_json::Error) -> Dispatch {
    reply_err(id, codes::INVALID_PARAMS, format!("Invalid params: {error}"))
}
