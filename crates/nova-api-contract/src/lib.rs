// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Wire contract types for the Nova orchestration server.
//!
//! These types are shared between the WebSocket transport, the plugin layer
//! and client implementations: session views and events, interactive
//! prompts, project/transcript records, invoke options, and the JSON-RPC 2.0
//! framing used on the `/nova` endpoint.

pub mod rpc;
pub mod types;

pub use rpc::*;
pub use types::*;
