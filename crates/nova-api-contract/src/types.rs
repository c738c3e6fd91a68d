// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Domain types shared across the server, plugins and clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Public session status exposed to clients.
///
/// This is a coarsening of the internal session state machine; the mapping
/// is owned by the session implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Starting,
    Running,
    WaitingForInput,
    Completed,
    Error,
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::WaitingForInput => "waiting-for-input",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
            SessionStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Where a plugin's agents actually run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginSource {
    Cli,
    Api,
    Adk,
    Local,
    Grpc,
}

/// Capabilities a plugin or agent may advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Chat,
    Tools,
    Plan,
    Code,
    Realtime,
    Vision,
}

/// An agent exposed by a plugin, resolved against configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Client-facing view of one live session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub id: String,
    pub agent_id: String,
    pub plugin_id: String,
    pub project_path: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub message_count: u64,
}

/// One event on a session's stream.
///
/// Serialized as `{session_id, type, data, timestamp}`; the `type`/`data`
/// pair comes from [`SessionEventPayload`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub payload: SessionEventPayload,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum SessionEventPayload {
    /// A structured record forwarded from the subprocess, or `{raw: line}`
    /// for output that did not parse as JSON.
    Output(Value),
    Error {
        message: String,
    },
    /// Terminal event; emitted exactly once per session.
    Complete {
        exit_code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        upstream_session_id: Option<String>,
    },
    Status {
        status: SessionStatus,
    },
    Init {
        upstream_session_id: String,
    },
    InteractivePrompt(InteractivePrompt),
}

impl SessionEvent {
    pub fn output(session_id: impl Into<String>, record: Value) -> Self {
        Self::new(session_id, SessionEventPayload::Output(record))
    }

    pub fn error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            session_id,
            SessionEventPayload::Error { message: message.into() },
        )
    }

    pub fn complete(
        session_id: impl Into<String>,
        exit_code: Option<i32>,
        upstream_session_id: Option<String>,
    ) -> Self {
        Self::new(
            session_id,
            SessionEventPayload::Complete { exit_code, upstream_session_id },
        )
    }

    pub fn status(session_id: impl Into<String>, status: SessionStatus) -> Self {
        Self::new(session_id, SessionEventPayload::Status { status })
    }

    pub fn init(session_id: impl Into<String>, upstream_session_id: impl Into<String>) -> Self {
        Self::new(
            session_id,
            SessionEventPayload::Init { upstream_session_id: upstream_session_id.into() },
        )
    }

    pub fn interactive_prompt(session_id: impl Into<String>, prompt: InteractivePrompt) -> Self {
        Self::new(session_id, SessionEventPayload::InteractivePrompt(prompt))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, SessionEventPayload::Complete { .. })
    }

    fn new(session_id: impl Into<String>, payload: SessionEventPayload) -> Self {
        Self {
            session_id: session_id.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Kind of interactive confirmation requested by the subprocess.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptKind {
    BypassConfirm,
    ToolApproval,
    FileEdit,
    Selection,
}

/// One selectable answer to an interactive prompt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptOption {
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_default: bool,
}

/// A confirmation screen surfaced by the subprocess; exactly one response
/// (the chosen option key, sent via `session.message`) is expected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InteractivePrompt {
    pub kind: PromptKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub options: Vec<PromptOption>,
}

/// Permission mode forwarded to the wrapped CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    BypassPermissions,
    DontAsk,
    Plan,
}

impl Default for PermissionMode {
    fn default() -> Self {
        PermissionMode::BypassPermissions
    }
}

impl PermissionMode {
    /// The value passed to the CLI's permission-mode flag.
    pub fn as_flag_value(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::DontAsk => "dontAsk",
            PermissionMode::Plan => "plan",
        }
    }
}

/// Options accepted by `agent.invoke`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeOptions {
    pub prompt: String,
    pub project_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    #[serde(default)]
    pub fork_session: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    /// Legacy toggle; `false` maps to [`PermissionMode::Default`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disallowed_tools: Option<Vec<String>>,
}

impl InvokeOptions {
    /// Resolve the effective permission mode, honoring the legacy
    /// `bypass_mode` boolean when no explicit mode was given.
    pub fn effective_permission_mode(&self) -> PermissionMode {
        if let Some(mode) = self.permission_mode {
            return mode;
        }
        match self.bypass_mode {
            Some(false) => PermissionMode::Default,
            _ => PermissionMode::default(),
        }
    }
}

/// Outcome of `session.message`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageOutcome {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

/// A project directory under the transcript root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    /// The encoded on-disk directory name.
    pub id: String,
    pub name: String,
    /// Decoded absolute filesystem path.
    pub path: String,
    pub last_modified: DateTime<Utc>,
    pub session_count: usize,
}

/// Summary of one on-disk transcript session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscriptSummary {
    pub id: String,
    /// Display name derived from the first record, truncated.
    pub summary: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Result of a bulk transcript delete; never aborts on one failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BulkDeleteResult {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Trimmed plugin view for `plugin.list` and `GET /plugins`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub source: PluginSource,
    pub supports: Vec<Capability>,
    pub agents: Vec<PluginAgentInfo>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginAgentInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// Flattened agent view for `agent.list`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentListItem {
    pub plugin: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_event_wire_shape() {
        let event = SessionEvent::init("sess-1", "U-1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["session_id"], "sess-1");
        assert_eq!(value["type"], "init");
        assert_eq!(value["data"]["upstream_session_id"], "U-1");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn complete_event_round_trips() {
        let event = SessionEvent::complete("sess-2", Some(0), Some("U-2".into()));
        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert!(back.is_terminal());
        match back.payload {
            SessionEventPayload::Complete { exit_code, upstream_session_id } => {
                assert_eq!(exit_code, Some(0));
                assert_eq!(upstream_session_id.as_deref(), Some("U-2"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn interactive_prompt_uses_kebab_case() {
        let event = SessionEvent::interactive_prompt(
            "sess-3",
            InteractivePrompt {
                kind: PromptKind::ToolApproval,
                title: "Allow Bash?".into(),
                description: None,
                options: vec![PromptOption {
                    key: "1".into(),
                    label: "Yes".into(),
                    is_default: true,
                }],
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "interactive-prompt");
        assert_eq!(value["data"]["kind"], "tool-approval");
    }

    #[test]
    fn legacy_bypass_mode_maps_to_default() {
        let opts: InvokeOptions = serde_json::from_value(serde_json::json!({
            "prompt": "hi",
            "projectPath": "/tmp/x",
            "bypassMode": false,
        }))
        .unwrap();
        assert_eq!(opts.effective_permission_mode(), PermissionMode::Default);

        let opts: InvokeOptions = serde_json::from_value(serde_json::json!({
            "prompt": "hi",
            "projectPath": "/tmp/x",
        }))
        .unwrap();
        assert_eq!(
            opts.effective_permission_mode(),
            PermissionMode::BypassPermissions
        );
    }

    #[test]
    fn unknown_capability_is_rejected() {
        let result: Result<Capability, _> = serde_json::from_str("\"telepathy\"");
        assert!(result.is_err());
    }
}
