// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Declarative server configuration (`nova.config.json`)
//!
//! The config file answers enablement questions for plugins and agents and
//! carries the server bind settings. A missing or malformed file is never
//! fatal: the loader logs and serves built-in defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "nova.config.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NovaConfig {
    #[serde(default)]
    pub plugins: HashMap<String, PluginToggle>,
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginToggle {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-agent overrides; an unlisted agent inherits the plugin's state.
    #[serde(default)]
    pub agents: HashMap<String, bool>,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DefaultsSection {
    /// Default agent of the form `"plugin:agent"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { port: default_port(), host: default_host() }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Loads and caches `nova.config.json`, re-reading only on [`reload`].
///
/// [`reload`]: ConfigLoader::reload
pub struct ConfigLoader {
    path: PathBuf,
    cached: RwLock<Option<Arc<NovaConfig>>>,
}

impl ConfigLoader {
    /// Create a loader for `<base>/nova.config.json`.
    pub fn new(base_path: &Path) -> Self {
        Self {
            path: base_path.join(CONFIG_FILE_NAME),
            cached: RwLock::new(None),
        }
    }

    /// The parsed configuration; defaults when the file is absent or bad.
    pub fn config(&self) -> Arc<NovaConfig> {
        if let Some(config) = self.cached.read().unwrap().as_ref() {
            return Arc::clone(config);
        }
        let loaded = Arc::new(self.read_from_disk());
        *self.cached.write().unwrap() = Some(Arc::clone(&loaded));
        loaded
    }

    /// Drop the cached document; the next query re-reads the file. Sessions
    /// already running are unaffected.
    pub fn reload(&self) {
        *self.cached.write().unwrap() = None;
    }

    pub fn is_plugin_enabled(&self, name: &str) -> bool {
        self.config().plugins.get(name).map(|p| p.enabled).unwrap_or(true)
    }

    pub fn is_agent_enabled(&self, plugin: &str, agent: &str) -> bool {
        let config = self.config();
        match config.plugins.get(plugin) {
            Some(toggle) if !toggle.enabled => false,
            Some(toggle) => toggle.agents.get(agent).copied().unwrap_or(true),
            None => true,
        }
    }

    pub fn plugin_options(&self, name: &str) -> HashMap<String, Value> {
        self.config()
            .plugins
            .get(name)
            .map(|p| p.options.clone())
            .unwrap_or_default()
    }

    pub fn default_agent(&self) -> Option<String> {
        self.config().defaults.agent.clone()
    }

    pub fn server_section(&self) -> ServerSection {
        self.config().server.clone()
    }

    fn read_from_disk(&self) -> NovaConfig {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %self.path.display(), "Loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "Malformed config file, using defaults");
                    NovaConfig::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No config file, using defaults");
                NovaConfig::default()
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Failed to read config file, using defaults");
                NovaConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn loader_with(contents: &str) -> (tempfile::TempDir, ConfigLoader) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), contents).unwrap();
        let loader = ConfigLoader::new(dir.path());
        (dir, loader)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());
        assert!(loader.is_plugin_enabled("anything"));
        assert!(loader.is_agent_enabled("anything", "whatever"));
        assert_eq!(loader.server_section().port, 8080);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let (_dir, loader) = loader_with("{not json");
        assert!(loader.is_plugin_enabled("claude_cli"));
    }

    #[test]
    fn enablement_matrix() {
        let (_dir, loader) = loader_with(
            r#"{
                "plugins": {
                    "claude_cli": {
                        "enabled": true,
                        "agents": { "opus": false }
                    },
                    "dead_plugin": { "enabled": false }
                }
            }"#,
        );

        assert!(loader.is_plugin_enabled("claude_cli"));
        assert!(!loader.is_plugin_enabled("dead_plugin"));
        assert!(loader.is_plugin_enabled("unlisted"));

        assert!(loader.is_agent_enabled("claude_cli", "sonnet"));
        assert!(!loader.is_agent_enabled("claude_cli", "opus"));
        // Plugin disabled wins over agent defaults.
        assert!(!loader.is_agent_enabled("dead_plugin", "anything"));
        assert!(loader.is_agent_enabled("unlisted", "anything"));
    }

    #[test]
    fn reload_picks_up_changes() {
        let (dir, loader) = loader_with(r#"{"plugins": {"p": {"enabled": true}}}"#);
        assert!(loader.is_plugin_enabled("p"));

        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"plugins": {"p": {"enabled": false}}}"#,
        )
        .unwrap();
        // Cached until reload.
        assert!(loader.is_plugin_enabled("p"));
        loader.reload();
        assert!(!loader.is_plugin_enabled("p"));
    }

    #[test]
    fn default_agent_is_optional() {
        let (_dir, loader) = loader_with(r#"{"defaults": {"agent": "claude_cli:sonnet"}}"#);
        assert_eq!(loader.default_agent().as_deref(), Some("claude_cli:sonnet"));

        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());
        assert!(loader.default_agent().is_none());
    }

    #[test]
    fn plugin_options_default_empty() {
        let (_dir, loader) = loader_with(
            r#"{"plugins": {"p": {"options": {"binary": "/usr/bin/fake"}}}}"#,
        );
        let options = loader.plugin_options("p");
        assert_eq!(options.get("binary").and_then(|v| v.as_str()), Some("/usr/bin/fake"));
        assert!(loader.plugin_options("q").is_empty());
    }
}
