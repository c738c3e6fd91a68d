// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core error types

use thiserror::Error;

/// Errors produced by the core orchestration layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent is disabled: {0}")]
    AgentDisabled(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid plugin manifest: {0}")]
    ManifestInvalid(String),

    #[error("Failed to load plugin {name}: {reason}")]
    PluginLoad { name: String, reason: String },

    #[error("Agent binary not found; tried {tried}")]
    BinaryNotFound { tried: String },

    #[error("Project path does not exist: {0}")]
    ProjectPathMissing(String),

    #[error("Failed to spawn subprocess: {0}")]
    Spawn(String),

    #[error("Subprocess did not emit an init message within {0} seconds")]
    UpstreamInitTimeout(u64),

    #[error("Transcript not found: {0}")]
    TranscriptNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the failure is scoped to a single session rather than the
    /// server as a whole.
    pub fn is_session_scoped(&self) -> bool {
        matches!(
            self,
            Error::SessionNotFound(_)
                | Error::BinaryNotFound { .. }
                | Error::ProjectPathMissing(_)
                | Error::Spawn(_)
                | Error::UpstreamInitTimeout(_)
        )
    }
}
