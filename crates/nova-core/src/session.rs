// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! CLI session supervision
//!
//! One [`CliSession`] owns one subprocess under a PTY, parses its
//! line-delimited JSON output, and publishes typed [`SessionEvent`]s on a
//! bounded broadcast bus. Termination is two-phase: SIGTERM, then SIGKILL
//! after a grace window.

use crate::error::Error;
use crate::prompts;
use crate::pty::{PtyCommand, PtyEvent, PtyProcess};
use crate::Result;
use chrono::{DateTime, Utc};
use nova_api_contract::{SessionEvent, SessionStatus, SessionView};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// Per-session event bus capacity; a lagged subscriber loses oldest events
/// with a logged warning on the receiving side.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Upper bound on buffered partial output. Overflow drops the buffer.
const MAX_LINE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Window of recent raw (non-JSON) output scanned for interactive prompts.
const RAW_WINDOW_BYTES: usize = 8 * 1024;

const INIT_TIMEOUT: Duration = Duration::from_secs(10);
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Internal state machine; the public [`SessionStatus`] is a coarsening.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InternalState {
    Initializing,
    Ready,
    Processing,
    Idle,
    Error,
    Stopped,
}

/// Outcome of waiting for the subprocess's init record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StartSignal {
    Pending,
    Ready,
    Exited,
}

struct SessionState {
    internal: InternalState,
    upstream_session_id: Option<String>,
    exit_code: Option<i32>,
    last_activity: DateTime<Utc>,
    message_count: u64,
    line_buffer: String,
    raw_window: String,
    stopped_explicitly: bool,
    complete_emitted: bool,
}

struct SessionShared {
    id: String,
    agent_id: String,
    plugin_id: String,
    project_path: PathBuf,
    resume_session_id: Option<String>,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    process: Mutex<Option<Arc<PtyProcess>>>,
    start_signal: watch::Sender<StartSignal>,
    exited: watch::Sender<bool>,
}

/// One live subprocess session.
#[derive(Clone)]
pub struct CliSession {
    shared: Arc<SessionShared>,
}

impl CliSession {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        plugin_id: impl Into<String>,
        project_path: impl Into<PathBuf>,
        resume_session_id: Option<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (start_signal, _) = watch::channel(StartSignal::Pending);
        let (exited, _) = watch::channel(false);
        let now = Utc::now();
        Self {
            shared: Arc::new(SessionShared {
                id: id.into(),
                agent_id: agent_id.into(),
                plugin_id: plugin_id.into(),
                project_path: project_path.into(),
                resume_session_id,
                created_at: now,
                state: Mutex::new(SessionState {
                    internal: InternalState::Initializing,
                    upstream_session_id: None,
                    exit_code: None,
                    last_activity: now,
                    message_count: 0,
                    line_buffer: String::new(),
                    raw_window: String::new(),
                    stopped_explicitly: false,
                    complete_emitted: false,
                }),
                events,
                process: Mutex::new(None),
                start_signal,
                exited,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Subscribe to this session's event stream. Events are delivered FIFO;
    /// dropping the receiver cancels the subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn upstream_session_id(&self) -> Option<String> {
        self.shared.state.lock().unwrap().upstream_session_id.clone()
    }

    pub fn view(&self) -> SessionView {
        let state = self.shared.state.lock().unwrap();
        SessionView {
            id: self.shared.id.clone(),
            agent_id: self.shared.agent_id.clone(),
            plugin_id: self.shared.plugin_id.clone(),
            project_path: self.shared.project_path.display().to_string(),
            status: coarse(&state),
            upstream_session_id: state.upstream_session_id.clone(),
            resume_session_id: self.shared.resume_session_id.clone(),
            created_at: self.shared.created_at,
            last_activity: state.last_activity,
            exit_code: state.exit_code,
            message_count: state.message_count,
        }
    }

    pub fn is_terminal(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        matches!(state.internal, InternalState::Error | InternalState::Stopped)
    }

    /// Spawn the subprocess and wait for its init record.
    ///
    /// Returns once the upstream session id has been captured, or fails if
    /// the subprocess could not be spawned, exited before init, or stayed
    /// silent past the init window (in which case it is killed).
    pub async fn start(&self, command: PtyCommand) -> Result<()> {
        let (process, rx) = match PtyProcess::spawn(command) {
            Ok(pair) => pair,
            Err(e) => {
                let message = format!("Failed to start subprocess: {e:#}");
                self.fail(&message);
                return Err(Error::Spawn(message));
            }
        };
        let process = Arc::new(process);
        *self.shared.process.lock().unwrap() = Some(Arc::clone(&process));

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            pump_events(shared, rx).await;
        });

        let mut signal = self.shared.start_signal.subscribe();
        let wait = async {
            loop {
                match *signal.borrow_and_update() {
                    StartSignal::Pending => {}
                    other => return other,
                }
                if signal.changed().await.is_err() {
                    return StartSignal::Exited;
                }
            }
        };

        match tokio::time::timeout(INIT_TIMEOUT, wait).await {
            Ok(StartSignal::Ready) => Ok(()),
            Ok(StartSignal::Exited) | Ok(StartSignal::Pending) => {
                let message = "subprocess exited before emitting init".to_string();
                self.fail(&message);
                Err(Error::Spawn(message))
            }
            Err(_) => {
                warn!(session_id = %self.shared.id, "No init within window, terminating subprocess");
                self.fail("subprocess did not initialize in time");
                self.stop().await?;
                Err(Error::UpstreamInitTimeout(INIT_TIMEOUT.as_secs()))
            }
        }
    }

    /// Deliver text to the live subprocess terminal. A completed session
    /// refuses; follow-ups there are a new session resuming the upstream id.
    pub async fn message(&self, text: &str) -> nova_api_contract::MessageOutcome {
        use nova_api_contract::MessageOutcome;

        if self.is_terminal() {
            return MessageOutcome::fail(
                "Session already completed - create a new session with resume",
            );
        }
        let process = {
            let guard = self.shared.process.lock().unwrap();
            guard.clone()
        };
        let Some(process) = process else {
            return MessageOutcome::fail("Session has no running subprocess");
        };

        let payload = format!("{}\n", text.trim_end_matches('\n'));
        match process.write_input(payload.as_bytes()) {
            Ok(()) => {
                let mut state = self.shared.state.lock().unwrap();
                state.message_count += 1;
                state.last_activity = Utc::now();
                MessageOutcome::ok()
            }
            Err(e) => MessageOutcome::fail(format!("Failed to write to session: {e:#}")),
        }
    }

    /// Two-phase termination: SIGTERM, a grace window, then SIGKILL.
    /// Returns once the process has exited or SIGKILL was delivered.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.complete_emitted {
                return Ok(());
            }
            state.stopped_explicitly = true;
        }

        let process = {
            let guard = self.shared.process.lock().unwrap();
            guard.clone()
        };

        let Some(process) = process else {
            // Never spawned; force the terminal state ourselves.
            let events = {
                let mut state = self.shared.state.lock().unwrap();
                transition(&mut state, &self.shared.id, InternalState::Stopped)
                    .into_iter()
                    .chain(complete_events(&mut state, &self.shared.id))
                    .collect::<Vec<_>>()
            };
            self.emit_all(events);
            return Ok(());
        };

        if *self.shared.exited.subscribe().borrow() {
            return Ok(());
        }

        debug!(session_id = %self.shared.id, "Stopping session (SIGTERM)");
        process.terminate();

        let mut exited = self.shared.exited.subscribe();
        let wait = async {
            while !*exited.borrow_and_update() {
                if exited.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(KILL_GRACE, wait).await.is_err() {
            warn!(session_id = %self.shared.id, "Grace window elapsed, sending SIGKILL");
            process.kill();
        }

        Ok(())
    }

    fn fail(&self, message: &str) {
        let events = {
            let mut state = self.shared.state.lock().unwrap();
            if state.complete_emitted {
                // The stream already closed with `complete`; nothing may
                // follow it.
                warn!(session_id = %self.shared.id, message, "Failure after session completion");
                return;
            }
            let mut events = transition(&mut state, &self.shared.id, InternalState::Error);
            events.push(SessionEvent::error(self.shared.id.clone(), message));
            events
        };
        self.emit_all(events);
    }

    fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in events {
            let _ = self.shared.events.send(event);
        }
    }
}

/// Drive the PTY event stream until the subprocess exits.
async fn pump_events(
    shared: Arc<SessionShared>,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<PtyEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            PtyEvent::Data(bytes) => {
                let events = {
                    let mut state = shared.state.lock().unwrap();
                    feed_bytes(&mut state, &shared, &bytes)
                };
                send_all(&shared, events);
            }
            PtyEvent::Error(message) => {
                let _ = shared
                    .events
                    .send(SessionEvent::error(shared.id.clone(), message));
            }
            PtyEvent::Exit { code } => {
                let events = {
                    let mut state = shared.state.lock().unwrap();
                    handle_exit(&mut state, &shared, code)
                };
                send_all(&shared, events);
                let _ = shared.exited.send(true);
                // Exit only resolves the start wait when init never came;
                // a captured init stays captured.
                shared.start_signal.send_if_modified(|signal| {
                    if *signal == StartSignal::Pending {
                        *signal = StartSignal::Exited;
                        true
                    } else {
                        false
                    }
                });
                break;
            }
        }
    }
}

fn send_all(shared: &SessionShared, events: Vec<SessionEvent>) {
    for event in events {
        let _ = shared.events.send(event);
    }
}

/// Append PTY output to the line buffer and dispatch complete lines.
fn feed_bytes(state: &mut SessionState, shared: &SessionShared, bytes: &[u8]) -> Vec<SessionEvent> {
    state.line_buffer.push_str(&String::from_utf8_lossy(bytes));
    if state.line_buffer.len() > MAX_LINE_BUFFER_BYTES {
        warn!(
            session_id = %shared.id,
            bytes = state.line_buffer.len(),
            "Line buffer exceeded cap, dropping buffered output"
        );
        state.line_buffer.clear();
        return Vec::new();
    }

    let mut events = Vec::new();
    while let Some(newline) = state.line_buffer.find('\n') {
        let line: String = state.line_buffer.drain(..=newline).collect();
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }
        handle_line(state, shared, line, &mut events);
    }
    events
}

fn handle_line(
    state: &mut SessionState,
    shared: &SessionShared,
    line: &str,
    events: &mut Vec<SessionEvent>,
) {
    state.last_activity = Utc::now();

    match serde_json::from_str::<Value>(line) {
        Ok(record) => {
            state.raw_window.clear();
            handle_record(state, shared, record, events);
        }
        Err(_) => {
            // Raw terminal output; forward as-is and watch for prompts.
            events.push(SessionEvent::output(
                shared.id.clone(),
                serde_json::json!({ "raw": line }),
            ));
            state.raw_window.push_str(line);
            state.raw_window.push('\n');
            if state.raw_window.len() > RAW_WINDOW_BYTES {
                let excess = state.raw_window.len() - RAW_WINDOW_BYTES;
                state.raw_window.drain(..excess);
            }
            if let Some(prompt) = prompts::detect_prompt(&state.raw_window) {
                state.raw_window.clear();
                events.push(SessionEvent::interactive_prompt(shared.id.clone(), prompt));
            }
        }
    }
}

fn handle_record(
    state: &mut SessionState,
    shared: &SessionShared,
    record: Value,
    events: &mut Vec<SessionEvent>,
) {
    let record_type = record.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let subtype = record.get("subtype").and_then(|v| v.as_str()).unwrap_or("");

    match (record_type, subtype) {
        ("system", "init") => {
            if state.upstream_session_id.is_none() {
                if let Some(upstream) = record.get("session_id").and_then(|v| v.as_str()) {
                    state.upstream_session_id = Some(upstream.to_string());
                    // `init` leads the stream; the status change follows it.
                    events.push(SessionEvent::init(shared.id.clone(), upstream));
                    events.extend(transition(state, &shared.id, InternalState::Ready));
                    let _ = shared.start_signal.send(StartSignal::Ready);
                }
            }
            events.push(SessionEvent::output(shared.id.clone(), record));
        }
        ("assistant", _) => {
            state.message_count += 1;
            events.extend(transition(state, &shared.id, InternalState::Processing));
            events.push(SessionEvent::output(shared.id.clone(), record));
        }
        ("result", _) => {
            if state.upstream_session_id.is_none() {
                if let Some(upstream) = record.get("session_id").and_then(|v| v.as_str()) {
                    state.upstream_session_id = Some(upstream.to_string());
                }
            }
            events.extend(transition(state, &shared.id, InternalState::Idle));
            events.push(SessionEvent::output(shared.id.clone(), record));
        }
        _ => {
            // `user` records and any partial-message types pass through.
            events.push(SessionEvent::output(shared.id.clone(), record));
        }
    }
}

fn handle_exit(
    state: &mut SessionState,
    shared: &SessionShared,
    code: Option<u32>,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();

    // Any buffered partial line is surfaced raw rather than dropped.
    if !state.line_buffer.trim().is_empty() {
        let residue = std::mem::take(&mut state.line_buffer);
        events.push(SessionEvent::output(
            shared.id.clone(),
            serde_json::json!({ "raw": residue.trim_end() }),
        ));
    } else {
        state.line_buffer.clear();
    }

    let exit_code = code.map(|c| c as i32);
    state.exit_code = exit_code;

    let next = if state.stopped_explicitly || exit_code == Some(0) {
        InternalState::Stopped
    } else {
        InternalState::Error
    };
    events.extend(transition(state, &shared.id, next));
    events.extend(complete_events(state, &shared.id));
    events
}

/// Apply a state transition; terminal states are sticky. Returns a status
/// event when the public status changed.
fn transition(
    state: &mut SessionState,
    session_id: &str,
    next: InternalState,
) -> Vec<SessionEvent> {
    if matches!(state.internal, InternalState::Error | InternalState::Stopped) {
        return Vec::new();
    }
    let before = coarse(state);
    state.internal = next;
    let after = coarse(state);
    if before != after {
        vec![SessionEvent::status(session_id.to_string(), after)]
    } else {
        Vec::new()
    }
}

/// The terminal `complete` event; emitted exactly once.
fn complete_events(state: &mut SessionState, session_id: &str) -> Vec<SessionEvent> {
    if state.complete_emitted {
        return Vec::new();
    }
    state.complete_emitted = true;
    vec![SessionEvent::complete(
        session_id.to_string(),
        state.exit_code,
        state.upstream_session_id.clone(),
    )]
}

fn coarse(state: &SessionState) -> SessionStatus {
    match state.internal {
        InternalState::Initializing => SessionStatus::Starting,
        InternalState::Ready | InternalState::Processing => SessionStatus::Running,
        InternalState::Idle => SessionStatus::WaitingForInput,
        InternalState::Error => SessionStatus::Error,
        InternalState::Stopped => {
            if state.stopped_explicitly {
                SessionStatus::Stopped
            } else {
                SessionStatus::Completed
            }
        }
    }
}
