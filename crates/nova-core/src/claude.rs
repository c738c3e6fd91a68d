// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Claude CLI plugin
//!
//! Thin adapter over [`CliSession`] for the `claude` binary: locates the
//! executable, translates [`InvokeOptions`] into CLI arguments, and owns the
//! map of live sessions.

use crate::config::ConfigLoader;
use crate::error::Error;
use crate::manifest::PluginManifest;
use crate::plugin::{AgentPlugin, InvokeOutcome};
use crate::pty::PtyCommand;
use crate::session::CliSession;
use crate::Result;
use async_trait::async_trait;
use nova_api_contract::{Agent, InvokeOptions, MessageOutcome, SessionEvent, SessionView};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Fixed locations probed before falling back to a PATH lookup.
fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".claude/local/claude"));
    }
    candidates.push(PathBuf::from("/usr/local/bin/claude"));
    candidates.push(PathBuf::from("/opt/homebrew/bin/claude"));
    candidates
}

pub struct ClaudeCliPlugin {
    manifest: PluginManifest,
    config: Arc<ConfigLoader>,
    sessions: RwLock<HashMap<String, CliSession>>,
    seq: AtomicU64,
}

impl ClaudeCliPlugin {
    pub fn new(manifest: PluginManifest, config: Arc<ConfigLoader>) -> Self {
        Self {
            manifest,
            config,
            sessions: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(1),
        }
    }

    /// Factory registered under the `claude-cli` manifest entry.
    pub fn factory(manifest: PluginManifest, config: Arc<ConfigLoader>) -> Arc<dyn AgentPlugin> {
        Arc::new(Self::new(manifest, config))
    }

    /// Server-scoped session id: monotonic sequence plus a random fragment.
    fn next_session_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let rand = uuid::Uuid::new_v4().simple().to_string();
        format!("sess-{}-{}", seq, &rand[..8])
    }

    /// Locate the CLI binary: explicit config option, fixed candidates,
    /// then PATH.
    fn resolve_binary(&self) -> Result<PathBuf> {
        let options = self.config.plugin_options(self.name());
        if let Some(binary) = options.get("binary").and_then(|v| v.as_str()) {
            let path = PathBuf::from(binary);
            if path.is_file() {
                return Ok(path);
            }
            warn!(binary, "Configured binary does not exist, falling back to discovery");
        }

        for candidate in candidate_paths() {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        which::which("claude").map_err(|_| {
            let mut tried: Vec<String> = candidate_paths()
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            tried.push("PATH".to_string());
            Error::BinaryNotFound { tried: tried.join(", ") }
        })
    }

    /// Resolve the working directory, honoring the opt-in underscore
    /// fallback for paths whose last separator was flattened on encode.
    fn resolve_project_path(&self, project_path: &str) -> Result<PathBuf> {
        let path = PathBuf::from(project_path);
        if path.is_dir() {
            return Ok(path);
        }

        let options = self.config.plugin_options(self.name());
        let fallback_enabled = options
            .get("underscore_path_fallback")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if fallback_enabled {
            if let Some(candidate) = underscore_fallback(&path) {
                if candidate.is_dir() {
                    info!(
                        requested = project_path,
                        resolved = %candidate.display(),
                        "Project path resolved via underscore fallback"
                    );
                    return Ok(candidate);
                }
            }
        }

        Err(Error::ProjectPathMissing(project_path.to_string()))
    }
}

/// Join the last two path components with `_` instead of the separator:
/// `/my/projects` becomes `/my_projects`.
fn underscore_fallback(path: &Path) -> Option<PathBuf> {
    let last = path.file_name()?.to_str()?;
    let parent = path.parent()?;
    let prev = parent.file_name()?.to_str()?;
    let grandparent = parent.parent()?;
    Some(grandparent.join(format!("{}_{}", prev, last)))
}

/// Translate invoke options into the CLI argument vector.
pub fn build_cli_args(agent_id: &str, options: &InvokeOptions) -> Vec<String> {
    let mut args = vec![
        "--print".to_string(),
        options.prompt.clone(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
        "--include-partial-messages".to_string(),
        "--model".to_string(),
        agent_id.to_string(),
        "--permission-mode".to_string(),
        options.effective_permission_mode().as_flag_value().to_string(),
    ];

    if let Some(resume) = &options.resume_session_id {
        args.push("--resume".to_string());
        args.push(resume.clone());
        if options.fork_session {
            args.push("--fork-session".to_string());
        }
    }

    if let Some(allowed) = &options.allowed_tools {
        if !allowed.is_empty() {
            args.push("--allowed-tools".to_string());
            args.push(allowed.join(","));
        }
    }
    if let Some(disallowed) = &options.disallowed_tools {
        if !disallowed.is_empty() {
            args.push("--disallowed-tools".to_string());
            args.push(disallowed.join(","));
        }
    }

    args
}

#[async_trait]
impl AgentPlugin for ClaudeCliPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn initialize(&self) -> Result<()> {
        match self.resolve_binary() {
            Ok(path) => info!(plugin = self.name(), binary = %path.display(), "Claude CLI located"),
            Err(_) => warn!(
                plugin = self.name(),
                "Claude CLI not found yet; sessions will fail until it is installed"
            ),
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let sessions: Vec<CliSession> =
            self.sessions.write().unwrap().drain().map(|(_, s)| s).collect();
        if sessions.is_empty() {
            return Ok(());
        }
        info!(plugin = self.name(), count = sessions.len(), "Stopping all sessions");
        let stops = sessions.iter().map(|session| session.stop());
        for result in futures::future::join_all(stops).await {
            if let Err(e) = result {
                warn!(plugin = self.name(), error = %e, "Session stop failed during shutdown");
            }
        }
        Ok(())
    }

    fn agents(&self) -> Vec<Agent> {
        self.manifest
            .agents
            .iter()
            .map(|decl| Agent {
                id: decl.id.clone(),
                name: decl.name.clone(),
                capabilities: decl.capabilities.clone(),
                enabled: self.config.is_agent_enabled(self.name(), &decl.id),
                description: decl.description.clone(),
            })
            .collect()
    }

    fn agent(&self, id: &str) -> Option<Agent> {
        self.agents().into_iter().find(|a| a.id == id)
    }

    async fn invoke(&self, agent_id: &str, options: InvokeOptions) -> Result<InvokeOutcome> {
        if self.agent(agent_id).is_none() {
            return Err(Error::AgentNotFound(agent_id.to_string()));
        }

        let binary = self.resolve_binary()?;
        let project_path = self.resolve_project_path(&options.project_path)?;

        let session_id = self.next_session_id();
        let session = CliSession::new(
            session_id.clone(),
            agent_id,
            self.name(),
            &project_path,
            options.resume_session_id.clone(),
        );

        // Registered before start so concurrent lookups see it; the event
        // receiver likewise predates the subprocess.
        let events = session.subscribe();
        self.sessions.write().unwrap().insert(session_id.clone(), session.clone());

        let mut command = PtyCommand::new(binary.display().to_string(), &project_path);
        command.args = build_cli_args(agent_id, &options);

        debug!(
            session_id = %session_id,
            agent = agent_id,
            cwd = %project_path.display(),
            "Invoking Claude CLI"
        );

        if let Err(e) = session.start(command).await {
            self.sessions.write().unwrap().remove(&session_id);
            return Err(e);
        }

        Ok(InvokeOutcome { session: session.view(), events })
    }

    async fn message(&self, session_id: &str, text: &str) -> MessageOutcome {
        let session = {
            let sessions = self.sessions.read().unwrap();
            sessions.get(session_id).cloned()
        };
        match session {
            Some(session) => session.message(text).await,
            None => MessageOutcome::fail(format!("Unknown session: {session_id}")),
        }
    }

    fn subscribe(&self, session_id: &str) -> Option<broadcast::Receiver<SessionEvent>> {
        self.sessions.read().unwrap().get(session_id).map(|s| s.subscribe())
    }

    async fn stop(&self, session_id: &str) -> Result<()> {
        let session = {
            let sessions = self.sessions.read().unwrap();
            sessions.get(session_id).cloned()
        };
        let Some(session) = session else {
            return Err(Error::SessionNotFound(session_id.to_string()));
        };
        session.stop().await?;
        // Removed only after the session's own stop completed.
        self.sessions.write().unwrap().remove(session_id);
        Ok(())
    }

    fn session(&self, session_id: &str) -> Option<SessionView> {
        self.sessions.read().unwrap().get(session_id).map(|s| s.view())
    }

    fn sessions(&self) -> Vec<SessionView> {
        self.sessions.read().unwrap().values().map(|s| s.view()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nova_api_contract::{PermissionMode, SessionEventPayload};
    use std::os::unix::fs::PermissionsExt;

    fn test_manifest() -> PluginManifest {
        serde_json::from_value(serde_json::json!({
            "name": "claude_cli",
            "version": "1.0.0",
            "type": "llm",
            "source": "cli",
            "capabilities": ["chat", "tools", "code"],
            "entry": "claude-cli",
            "agents": [
                {"id": "sonnet", "name": "Claude Sonnet"},
                {"id": "opus", "name": "Claude Opus"}
            ]
        }))
        .unwrap()
    }

    /// Write an executable stub that emits the line protocol and exits.
    fn write_stub(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("claude-stub");
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn plugin_with_stub(base: &Path, stub: &Path) -> ClaudeCliPlugin {
        std::fs::write(
            base.join(crate::config::CONFIG_FILE_NAME),
            serde_json::json!({
                "plugins": {
                    "claude_cli": { "options": { "binary": stub.display().to_string() } }
                }
            })
            .to_string(),
        )
        .unwrap();
        ClaudeCliPlugin::new(test_manifest(), Arc::new(ConfigLoader::new(base)))
    }

    #[test]
    fn args_cover_the_launch_protocol() {
        let options = InvokeOptions {
            prompt: "hello".into(),
            project_path: "/tmp/x".into(),
            ..Default::default()
        };
        let args = build_cli_args("sonnet", &options);
        assert_eq!(args[0], "--print");
        assert_eq!(args[1], "hello");
        assert!(args.windows(2).any(|w| w == ["--output-format", "stream-json"]));
        assert!(args.windows(2).any(|w| w == ["--model", "sonnet"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["--permission-mode", "bypassPermissions"]));
        assert!(!args.contains(&"--resume".to_string()));
    }

    #[test]
    fn resume_and_fork_flags() {
        let options = InvokeOptions {
            prompt: "again".into(),
            project_path: "/tmp/x".into(),
            resume_session_id: Some("U-9".into()),
            fork_session: true,
            permission_mode: Some(PermissionMode::Plan),
            allowed_tools: Some(vec!["Bash".into(), "Read".into()]),
            ..Default::default()
        };
        let args = build_cli_args("opus", &options);
        assert!(args.windows(2).any(|w| w == ["--resume", "U-9"]));
        assert!(args.contains(&"--fork-session".to_string()));
        assert!(args.windows(2).any(|w| w == ["--permission-mode", "plan"]));
        assert!(args.windows(2).any(|w| w == ["--allowed-tools", "Bash,Read"]));
    }

    #[test]
    fn legacy_bypass_false_selects_default_mode() {
        let options = InvokeOptions {
            prompt: "x".into(),
            project_path: "/tmp/x".into(),
            bypass_mode: Some(false),
            ..Default::default()
        };
        let args = build_cli_args("sonnet", &options);
        assert!(args.windows(2).any(|w| w == ["--permission-mode", "default"]));
    }

    #[test]
    fn underscore_fallback_joins_last_segments() {
        assert_eq!(
            underscore_fallback(Path::new("/my/projects")),
            Some(PathBuf::from("/my_projects"))
        );
        assert_eq!(
            underscore_fallback(Path::new("/Users/u/my/projects")),
            Some(PathBuf::from("/Users/u/my_projects"))
        );
    }

    #[tokio::test]
    async fn invoke_runs_the_stub_to_completion() {
        let base = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        let stub = write_stub(
            base.path(),
            r#"printf '{"type":"system","subtype":"init","session_id":"U-1"}\n'
printf '{"type":"result","subtype":"success","session_id":"U-1"}\n'"#,
        );
        let plugin = plugin_with_stub(base.path(), &stub);

        let options = InvokeOptions {
            prompt: "hello".into(),
            project_path: project.path().display().to_string(),
            ..Default::default()
        };
        let outcome = plugin.invoke("sonnet", options).await.unwrap();
        assert_eq!(outcome.session.upstream_session_id.as_deref(), Some("U-1"));
        assert_eq!(outcome.session.agent_id, "sonnet");

        let mut events = outcome.events;
        let first = events.recv().await.unwrap();
        assert!(matches!(first.payload, SessionEventPayload::Init { .. }));
        loop {
            let event = events.recv().await.unwrap();
            if event.is_terminal() {
                break;
            }
        }

        // Messaging after completion points at resume.
        let outcome = plugin.message(&plugin.sessions()[0].id, "more").await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn invoke_unknown_agent_fails() {
        let base = tempfile::tempdir().unwrap();
        let stub = write_stub(base.path(), "exit 0");
        let plugin = plugin_with_stub(base.path(), &stub);
        let options = InvokeOptions {
            prompt: "x".into(),
            project_path: "/tmp".into(),
            ..Default::default()
        };
        let err = plugin.invoke("haiku-9000", options).await.unwrap_err();
        assert!(matches!(err, Error::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn invoke_missing_project_path_fails_without_spawn() {
        let base = tempfile::tempdir().unwrap();
        let stub = write_stub(base.path(), "exit 0");
        let plugin = plugin_with_stub(base.path(), &stub);
        let options = InvokeOptions {
            prompt: "x".into(),
            project_path: "/definitely/not/a/path".into(),
            ..Default::default()
        };
        let err = plugin.invoke("sonnet", options).await.unwrap_err();
        assert!(matches!(err, Error::ProjectPathMissing(_)));
        assert!(plugin.sessions().is_empty());
    }

    #[test]
    fn agents_reflect_config_enablement() {
        let base = tempfile::tempdir().unwrap();
        std::fs::write(
            base.path().join(crate::config::CONFIG_FILE_NAME),
            r#"{"plugins": {"claude_cli": {"agents": {"opus": false}}}}"#,
        )
        .unwrap();
        let plugin =
            ClaudeCliPlugin::new(test_manifest(), Arc::new(ConfigLoader::new(base.path())));
        let agents = plugin.agents();
        assert!(agents.iter().find(|a| a.id == "sonnet").unwrap().enabled);
        assert!(!agents.iter().find(|a| a.id == "opus").unwrap().enabled);
    }
}
