// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Listener and HTTP surface
//!
//! One TCP listener serves the `/nova` WebSocket upgrade, the small HTTP
//! sidecar (`/health`, `/plugins`), permissive CORS, and a plain-text
//! banner on every other path.

use crate::state::AppState;
use crate::ws::ws_handler;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct Server {
    addr: SocketAddr,
    listener: tokio::net::TcpListener,
    app: Router,
    state: AppState,
}

impl Server {
    /// Bind the listener; `addr` may carry port 0 for an ephemeral port.
    pub async fn bind(addr: SocketAddr, state: AppState) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let app = build_app(state.clone());
        Ok(Self { addr, listener, app, state })
    }

    /// The actually-bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `shutdown` resolves, then drain connections and return.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(addr = %self.addr, "Nova server listening");
        let state = self.state;
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutdown requested, draining connections");
                state.begin_shutdown();
            })
            .await?;
        Ok(())
    }
}

fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route(crate::config::WS_PATH, get(ws_handler))
        .route("/health", get(health))
        .route("/plugins", get(plugins))
        .fallback(banner)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    plugins: usize,
    sessions: usize,
    connections: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        plugins: state.registry.plugin_count(),
        sessions: state.registry.session_count(),
        connections: state.connection_count(),
    })
}

async fn plugins(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "plugins": state.registry.plugin_infos() }))
}

async fn banner() -> &'static str {
    "Nova agent orchestration server\n"
}
