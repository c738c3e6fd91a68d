// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server configuration
//!
//! Bind settings resolve in order: CLI flag, `NOVA_PORT`/`NOVA_BASE_PATH`
//! environment, the `server` section of `nova.config.json`, built-in
//! defaults.

use nova_core::ConfigLoader;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const ENV_PORT: &str = "NOVA_PORT";
pub const ENV_BASE_PATH: &str = "NOVA_BASE_PATH";

/// The WebSocket upgrade path.
pub const WS_PATH: &str = "/nova";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Root for config and plugin discovery.
    pub base_path: PathBuf,
    /// Override for the transcript root; `None` means `~/.claude/projects`.
    pub transcript_root: Option<PathBuf>,
}

impl ServerConfig {
    /// Resolve the final configuration from optional CLI overrides, the
    /// environment, and the config file.
    pub fn resolve(
        cli_host: Option<String>,
        cli_port: Option<u16>,
        cli_base_path: Option<PathBuf>,
        config: &ConfigLoader,
    ) -> Self {
        let base_path = cli_base_path
            .or_else(|| std::env::var(ENV_BASE_PATH).ok().map(PathBuf::from))
            .unwrap_or_else(default_base_path);

        let server = config.server_section();
        let port = cli_port
            .or_else(|| std::env::var(ENV_PORT).ok().and_then(|v| v.parse().ok()))
            .unwrap_or(server.port);
        let host = cli_host.unwrap_or(server.host);

        Self { host, port, base_path, transcript_root: None }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {}:{}: {}", self.host, self.port, e))
    }
}

/// Parent of the current working directory, matching how the server is
/// deployed next to its plugins directory.
pub fn default_base_path() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    cwd.parent().map(|p| p.to_path_buf()).unwrap_or(cwd)
}
