// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Plugin registry
//!
//! The central broker between the transport and plugins. The session→plugin
//! map kept here is the single source of truth for routing; it must agree
//! with the plugins' own session maps at every externally-observable point.
//! Locks guard plain maps only and are never held across an await.

use crate::error::Error;
use crate::plugin::{AgentPlugin, InvokeOutcome};
use crate::Result;
use nova_api_contract::{
    AgentListItem, InvokeOptions, MessageOutcome, PluginAgentInfo, PluginInfo, SessionEvent,
    SessionView,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Lifecycle notifications; losing them is harmless.
#[derive(Clone, Debug)]
pub enum RegistryEvent {
    PluginRegistered(String),
    PluginUnregistered(String),
    SessionCreated { session_id: String, plugin: String },
    SessionEnded { session_id: String },
}

pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn AgentPlugin>>>,
    session_owners: RwLock<HashMap<String, String>>,
    lifecycle: broadcast::Sender<RegistryEvent>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        let (lifecycle, _) = broadcast::channel(64);
        Self {
            plugins: RwLock::new(HashMap::new()),
            session_owners: RwLock::new(HashMap::new()),
            lifecycle,
        }
    }

    pub fn lifecycle_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.lifecycle.subscribe()
    }

    /// Register a plugin; a duplicate name replaces the old entry.
    pub fn register(&self, plugin: Arc<dyn AgentPlugin>) {
        let name = plugin.name().to_string();
        let replaced = self.plugins.write().unwrap().insert(name.clone(), plugin);
        if replaced.is_some() {
            warn!(plugin = %name, "Replacing already-registered plugin");
        }
        info!(plugin = %name, "Plugin registered");
        let _ = self.lifecycle.send(RegistryEvent::PluginRegistered(name));
    }

    /// Shut the plugin down and drop it along with its session routes.
    /// Shutdown errors are logged, not propagated.
    pub async fn unregister(&self, name: &str) {
        let plugin = self.plugins.write().unwrap().remove(name);
        let Some(plugin) = plugin else {
            warn!(plugin = name, "Unregister of unknown plugin");
            return;
        };

        if let Err(e) = plugin.shutdown().await {
            warn!(plugin = name, error = %e, "Plugin shutdown failed");
        }

        self.session_owners.write().unwrap().retain(|_, owner| owner != name);
        info!(plugin = name, "Plugin unregistered");
        let _ = self
            .lifecycle
            .send(RegistryEvent::PluginUnregistered(name.to_string()));
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<dyn AgentPlugin>> {
        self.plugins.read().unwrap().get(name).cloned()
    }

    pub fn plugin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.read().unwrap().len()
    }

    /// Snapshot of the loaded plugins in wire form.
    pub fn plugin_infos(&self) -> Vec<PluginInfo> {
        let plugins: Vec<Arc<dyn AgentPlugin>> =
            self.plugins.read().unwrap().values().cloned().collect();
        let mut infos: Vec<PluginInfo> = plugins
            .iter()
            .map(|plugin| {
                let manifest = plugin.manifest();
                PluginInfo {
                    name: manifest.name.clone(),
                    plugin_type: manifest.plugin_type.as_str().to_string(),
                    source: manifest.source,
                    supports: manifest.capabilities.clone(),
                    agents: plugin
                        .agents()
                        .into_iter()
                        .filter(|a| a.enabled)
                        .map(|a| PluginAgentInfo {
                            id: a.id,
                            name: a.name,
                            capabilities: a.capabilities,
                        })
                        .collect(),
                }
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Flattened agent list across plugins, disabled agents filtered out.
    pub fn agents(&self) -> Vec<AgentListItem> {
        let plugins: Vec<Arc<dyn AgentPlugin>> =
            self.plugins.read().unwrap().values().cloned().collect();
        let mut items: Vec<AgentListItem> = plugins
            .iter()
            .flat_map(|plugin| {
                let plugin_name = plugin.name().to_string();
                plugin
                    .agents()
                    .into_iter()
                    .filter(|a| a.enabled)
                    .map(move |a| AgentListItem {
                        plugin: plugin_name.clone(),
                        id: a.id,
                        name: a.name,
                        capabilities: a.capabilities,
                    })
            })
            .collect();
        items.sort_by(|a, b| (&a.plugin, &a.id).cmp(&(&b.plugin, &b.id)));
        items
    }

    /// Start a session on `plugin`/`agent` and record the route.
    pub async fn invoke(
        &self,
        plugin_name: &str,
        agent_id: &str,
        options: InvokeOptions,
    ) -> Result<InvokeOutcome> {
        let plugin = self
            .plugin(plugin_name)
            .ok_or_else(|| Error::PluginNotFound(plugin_name.to_string()))?;

        let agent = plugin
            .agent(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
        if !agent.enabled {
            return Err(Error::AgentDisabled(agent_id.to_string()));
        }

        let outcome = plugin.invoke(agent_id, options).await?;

        let session_id = outcome.session.id.clone();
        self.session_owners
            .write()
            .unwrap()
            .insert(session_id.clone(), plugin_name.to_string());
        debug!(session_id = %session_id, plugin = plugin_name, "Session routed");
        let _ = self.lifecycle.send(RegistryEvent::SessionCreated {
            session_id,
            plugin: plugin_name.to_string(),
        });

        Ok(outcome)
    }

    /// Deliver a message to whichever plugin owns the session.
    pub async fn message(&self, session_id: &str, text: &str) -> MessageOutcome {
        let plugin = self.owner_of(session_id);
        match plugin {
            Some(plugin) => plugin.message(session_id, text).await,
            None => MessageOutcome::fail(format!("Unknown session: {session_id}")),
        }
    }

    /// Subscribe to a session's event stream; `None` for unknown sessions.
    /// Dropping the receiver cancels the subscription; multiple subscribers
    /// are fine.
    pub fn stream(&self, session_id: &str) -> Option<broadcast::Receiver<SessionEvent>> {
        self.owner_of(session_id)?.subscribe(session_id)
    }

    /// Stop a session and drop its route. An absent session is only a
    /// warning.
    pub async fn stop(&self, session_id: &str) -> Result<()> {
        let Some(plugin) = self.owner_of(session_id) else {
            warn!(session_id, "Stop requested for unknown session");
            return Ok(());
        };

        let result = plugin.stop(session_id).await;
        self.session_owners.write().unwrap().remove(session_id);
        let _ = self.lifecycle.send(RegistryEvent::SessionEnded {
            session_id: session_id.to_string(),
        });
        result
    }

    pub fn session(&self, session_id: &str) -> Option<SessionView> {
        self.owner_of(session_id)?.session(session_id)
    }

    /// All sessions across all plugins.
    pub fn sessions(&self) -> Vec<SessionView> {
        let plugins: Vec<Arc<dyn AgentPlugin>> =
            self.plugins.read().unwrap().values().cloned().collect();
        let mut sessions: Vec<SessionView> =
            plugins.iter().flat_map(|p| p.sessions()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn session_count(&self) -> usize {
        self.session_owners.read().unwrap().len()
    }

    /// Shut down every plugin concurrently; state is cleared regardless of
    /// per-plugin failures.
    pub async fn shutdown(&self) {
        let plugins: Vec<Arc<dyn AgentPlugin>> =
            self.plugins.write().unwrap().drain().map(|(_, p)| p).collect();
        self.session_owners.write().unwrap().clear();

        let shutdowns = plugins.iter().map(|plugin| {
            let plugin = Arc::clone(plugin);
            async move {
                if let Err(e) = plugin.shutdown().await {
                    warn!(plugin = plugin.name(), error = %e, "Plugin shutdown failed");
                }
            }
        });
        futures::future::join_all(shutdowns).await;
        info!("Registry shut down");
    }

    fn owner_of(&self, session_id: &str) -> Option<Arc<dyn AgentPlugin>> {
        let owner = self.session_owners.read().unwrap().get(session_id).cloned()?;
        self.plugin(&owner)
    }
}
