// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Plugin discovery
//!
//! Scans `<base>/plugins/*` for directories carrying a `plugin.json`,
//! validates each manifest, checks enablement, resolves the entry factory
//! and registers the instantiated plugin. One bad plugin never aborts the
//! others.

use crate::config::ConfigLoader;
use crate::manifest::{PluginManifest, MANIFEST_FILE_NAME};
use crate::plugin::resolve_factory;
use crate::registry::PluginRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct PluginLoader {
    plugins_dir: PathBuf,
    config: Arc<ConfigLoader>,
    registry: Arc<PluginRegistry>,
}

impl PluginLoader {
    pub fn new(base_path: &Path, config: Arc<ConfigLoader>, registry: Arc<PluginRegistry>) -> Self {
        Self {
            plugins_dir: base_path.join("plugins"),
            config,
            registry,
        }
    }

    /// Run discovery once; returns how many plugins were registered.
    pub async fn discover(&self) -> usize {
        let entries = match std::fs::read_dir(&self.plugins_dir) {
            Ok(entries) => entries,
            Err(e) => {
                info!(
                    dir = %self.plugins_dir.display(),
                    error = %e,
                    "No plugins directory, skipping discovery"
                );
                return 0;
            }
        };

        let mut registered = 0;
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() || !dir.join(MANIFEST_FILE_NAME).is_file() {
                continue;
            }
            if self.load_one(&dir).await {
                registered += 1;
            }
        }

        info!(count = registered, "Plugin discovery complete");
        registered
    }

    /// Shut down everything currently registered, drop cached config, and
    /// re-run discovery.
    pub async fn reload(&self) -> usize {
        self.registry.shutdown().await;
        self.config.reload();
        self.discover().await
    }

    async fn load_one(&self, dir: &Path) -> bool {
        let manifest = match PluginManifest::load(dir) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping plugin with invalid manifest");
                return false;
            }
        };

        if !self.config.is_plugin_enabled(&manifest.name) {
            info!(plugin = %manifest.name, "Plugin disabled by configuration");
            return false;
        }

        let Some(factory) = resolve_factory(&manifest.entry) else {
            warn!(
                plugin = %manifest.name,
                entry = %manifest.entry,
                "Skipping plugin with unknown entry"
            );
            return false;
        };

        let plugin = factory(manifest.clone(), Arc::clone(&self.config));
        if let Err(e) = plugin.initialize().await {
            warn!(plugin = %manifest.name, error = %e, "Plugin initialization failed, skipping");
            return false;
        }

        self.registry.register(plugin);
        true
    }
}
