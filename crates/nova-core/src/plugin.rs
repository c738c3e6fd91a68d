// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The plugin capability set
//!
//! Registry and transport code depend on [`AgentPlugin`] only; the concrete
//! variant (cli, api, grpc, ...) is an implementation detail behind the
//! trait object. The manifest's `entry` string selects a factory from the
//! built-in table, which is this system's rendition of "load the entry
//! module and obtain a factory callable".

use crate::config::ConfigLoader;
use crate::manifest::PluginManifest;
use crate::Result;
use async_trait::async_trait;
use nova_api_contract::{Agent, InvokeOptions, MessageOutcome, SessionEvent, SessionView};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Result of a successful invoke: the public session view plus an event
/// receiver that was subscribed *before* the subprocess started, so the
/// caller observes `init` onward.
#[derive(Debug)]
pub struct InvokeOutcome {
    pub session: SessionView,
    pub events: broadcast::Receiver<SessionEvent>,
}

/// Capability set implemented by every plugin.
#[async_trait]
pub trait AgentPlugin: Send + Sync {
    fn manifest(&self) -> &PluginManifest;

    fn name(&self) -> &str {
        &self.manifest().name
    }

    /// Called once after construction, before the plugin is registered.
    async fn initialize(&self) -> Result<()>;

    /// Stop all sessions and release resources. Must be safe to call twice.
    async fn shutdown(&self) -> Result<()>;

    /// Agents resolved against configuration; disabled agents included with
    /// `enabled: false` so callers can filter or display them.
    fn agents(&self) -> Vec<Agent>;

    fn agent(&self, id: &str) -> Option<Agent>;

    /// Start a new session for `agent_id`.
    async fn invoke(&self, agent_id: &str, options: InvokeOptions) -> Result<InvokeOutcome>;

    /// Deliver a follow-up or prompt response to a live session.
    async fn message(&self, session_id: &str, text: &str) -> MessageOutcome;

    /// Subscribe to a session's event stream; `None` if the session is
    /// unknown. Dropping the receiver cancels the subscription.
    fn subscribe(&self, session_id: &str) -> Option<broadcast::Receiver<SessionEvent>>;

    /// Terminate a session; bounded by the two-phase kill.
    async fn stop(&self, session_id: &str) -> Result<()>;

    fn session(&self, session_id: &str) -> Option<SessionView>;

    fn sessions(&self) -> Vec<SessionView>;
}

/// Constructor signature looked up from the factory table.
pub type PluginFactory = fn(PluginManifest, Arc<ConfigLoader>) -> Arc<dyn AgentPlugin>;

/// Resolve a manifest entry to one of the built-in implementations.
pub fn resolve_factory(entry: &str) -> Option<PluginFactory> {
    match entry {
        "claude-cli" => Some(crate::claude::ClaudeCliPlugin::factory),
        _ => None,
    }
}
