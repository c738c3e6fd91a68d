// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Nova server binary

use clap::Parser;
use nova_core::{ConfigLoader, PluginLoader, PluginRegistry, ProjectsService};
use nova_logging::{Level, LogFormat};
use nova_server::{AppState, Server, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Plugin-based agent orchestration server", long_about = None)]
struct Args {
    /// Port to listen on (falls back to NOVA_PORT, then the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind
    #[arg(long)]
    host: Option<String>,

    /// Base path holding nova.config.json and the plugins directory
    /// (falls back to NOVA_BASE_PATH, then the parent of the cwd)
    #[arg(short, long)]
    base_path: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log format: plaintext or json
    #[arg(long, default_value = "plaintext")]
    log_format: LogFormat,

    /// Write logs to this file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level: Level = args.log_level.parse().unwrap_or(Level::INFO);
    match &args.log_file {
        Some(path) => nova_logging::init_to_file("nova-server", level, args.log_format, path)?,
        None => nova_logging::init("nova-server", level, args.log_format)?,
    }

    // Boot order: config, registry, loader, transport, then discovery and
    // the listener.
    let probe_base = args
        .base_path
        .clone()
        .or_else(|| std::env::var(nova_server::config::ENV_BASE_PATH).ok().map(PathBuf::from))
        .unwrap_or_else(nova_server::config::default_base_path);
    let config_loader = Arc::new(ConfigLoader::new(&probe_base));
    let config = ServerConfig::resolve(args.host, args.port, args.base_path, &config_loader);

    tracing::info!(base_path = %config.base_path.display(), "Starting Nova server");

    let registry = Arc::new(PluginRegistry::new());
    let projects = Arc::new(match &config.transcript_root {
        Some(root) => ProjectsService::with_root(root),
        None => ProjectsService::new(),
    });
    let loader = PluginLoader::new(&config.base_path, Arc::clone(&config_loader), Arc::clone(&registry));

    loader.discover().await;

    let state = AppState::new(Arc::clone(&registry), projects);
    let server = Server::bind(config.bind_addr()?, state).await?;

    server.run(shutdown_signal()).await?;

    // Connections are drained; now tear down every plugin and session.
    registry.shutdown().await;
    tracing::info!("Nova server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
