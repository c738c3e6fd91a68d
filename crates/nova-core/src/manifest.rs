// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Plugin manifest schema (`plugin.json`)

use crate::error::Error;
use nova_api_contract::{Capability, PluginSource};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const MANIFEST_FILE_NAME: &str = "plugin.json";

/// Declarative description of one plugin directory.
///
/// Unknown `source` and `capabilities` values are rejected at parse time by
/// the closed enum sets; structural invariants are checked by [`validate`].
///
/// [`validate`]: PluginManifest::validate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub source: PluginSource,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Entry-point reference resolved against the built-in factory table.
    pub entry: String,
    pub agents: Vec<AgentDecl>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Llm,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Llm => "llm",
        }
    }
}

/// One agent declared by the manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentDecl {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PluginManifest {
    /// Parse and validate the manifest in `dir`.
    pub fn load(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(MANIFEST_FILE_NAME);
        let contents = std::fs::read_to_string(&path)?;
        let manifest: PluginManifest = serde_json::from_str(&contents)
            .map_err(|e| Error::ManifestInvalid(format!("{}: {}", path.display(), e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::ManifestInvalid("plugin name must not be empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(Error::ManifestInvalid(format!(
                "plugin {}: version must not be empty",
                self.name
            )));
        }
        if self.entry.trim().is_empty() {
            return Err(Error::ManifestInvalid(format!(
                "plugin {}: entry must not be empty",
                self.name
            )));
        }
        if self.agents.is_empty() {
            return Err(Error::ManifestInvalid(format!(
                "plugin {}: at least one agent is required",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(Error::ManifestInvalid(format!(
                    "plugin {}: agent id must not be empty",
                    self.name
                )));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(Error::ManifestInvalid(format!(
                    "plugin {}: duplicate agent id {}",
                    self.name, agent.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_json() -> serde_json::Value {
        serde_json::json!({
            "name": "claude_cli",
            "version": "1.0.0",
            "type": "llm",
            "source": "cli",
            "capabilities": ["chat", "tools", "code"],
            "entry": "claude-cli",
            "agents": [
                {"id": "sonnet", "name": "Claude Sonnet", "capabilities": ["chat", "code"]},
                {"id": "opus", "name": "Claude Opus"}
            ]
        })
    }

    #[test]
    fn valid_manifest_parses() {
        let manifest: PluginManifest = serde_json::from_value(manifest_json()).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.agents.len(), 2);
        assert_eq!(manifest.source, PluginSource::Cli);
    }

    #[test]
    fn unknown_source_is_rejected() {
        let mut value = manifest_json();
        value["source"] = "quantum".into();
        assert!(serde_json::from_value::<PluginManifest>(value).is_err());
    }

    #[test]
    fn unknown_capability_is_rejected() {
        let mut value = manifest_json();
        value["capabilities"] = serde_json::json!(["chat", "clairvoyance"]);
        assert!(serde_json::from_value::<PluginManifest>(value).is_err());
    }

    #[test]
    fn duplicate_agent_id_fails_validation() {
        let mut value = manifest_json();
        value["agents"][1]["id"] = "sonnet".into();
        let manifest: PluginManifest = serde_json::from_value(value).unwrap();
        assert!(matches!(manifest.validate(), Err(Error::ManifestInvalid(_))));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut value = manifest_json();
        value.as_object_mut().unwrap().remove("entry");
        assert!(serde_json::from_value::<PluginManifest>(value).is_err());
    }

    #[test]
    fn empty_agent_list_fails_validation() {
        let mut value = manifest_json();
        value["agents"] = serde_json::json!([]);
        let manifest: PluginManifest = serde_json::from_value(value).unwrap();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn load_reads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE_NAME),
            serde_json::to_string_pretty(&manifest_json()).unwrap(),
        )
        .unwrap();
        let manifest = PluginManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.name, "claude_cli");
    }
}
