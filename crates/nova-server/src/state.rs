//! Shared server state

use nova_core::{PluginRegistry, ProjectsService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// State injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PluginRegistry>,
    pub projects: Arc<ProjectsService>,
    /// Live WebSocket connection count, reported by `/health`.
    connections: Arc<AtomicUsize>,
    /// Flipped on graceful shutdown; sockets drain and close.
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(registry: Arc<PluginRegistry>, projects: Arc<ProjectsService>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            projects,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask every connection handler to wind down.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
