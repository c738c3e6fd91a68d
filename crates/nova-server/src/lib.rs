// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! JSON-RPC/WebSocket transport for Nova
//!
//! Accepts WebSocket upgrades on `/nova`, dispatches JSON-RPC 2.0 frames to
//! the core registry and projects service, and fans per-session event
//! streams back to subscribed sockets as `session.event` notifications. A
//! small HTTP surface (`/health`, `/plugins`) shares the listener.

pub mod config;
pub mod error;
pub mod rpc;
pub mod server;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use server::Server;
pub use state::AppState;
