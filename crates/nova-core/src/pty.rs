// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! PTY process management
//!
//! Thin layer over portable-pty: spawn a subprocess under a fresh PTY and
//! hand its raw output to the session layer through a tokio channel. A
//! dedicated OS thread owns the blocking read side and the final `wait()`;
//! parsing and lifecycle live in the session.

use anyhow::{Context, Result};
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 8192;

/// Backoff between polls when the PTY has nothing to read.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a subprocess should be launched under the PTY.
#[derive(Debug, Clone)]
pub struct PtyCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

impl PtyCommand {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: vec![
                ("TERM".into(), "xterm-256color".into()),
                ("NO_COLOR".into(), "1".into()),
                ("FORCE_COLOR".into(), "0".into()),
            ],
            cols: 200,
            rows: 50,
        }
    }
}

/// Events emitted by the PTY reader thread.
#[derive(Debug, Clone)]
pub enum PtyEvent {
    /// Output bytes from the subprocess.
    Data(Vec<u8>),
    /// The subprocess exited.
    Exit { code: Option<u32> },
    /// Read-side failure; the subprocess may still be running.
    Error(String),
}

/// Handle to a subprocess running under a PTY.
///
/// The child itself is owned by the reader thread (it must `wait()` there);
/// this handle retains what the supervisor needs: a killer, the pid, the
/// write side, and the master to keep the PTY open.
pub struct PtyProcess {
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
    writer: Mutex<Box<dyn Write + Send>>,
    _master: Mutex<Box<dyn MasterPty + Send>>,
}

impl PtyProcess {
    /// Spawn `command` under a fresh PTY.
    ///
    /// Returns the process handle and the event receiver. The reader thread
    /// sends [`PtyEvent::Exit`] exactly once, after EOF and `wait()`.
    pub fn spawn(command: PtyCommand) -> Result<(Self, mpsc::UnboundedReceiver<PtyEvent>)> {
        let pty_system = portable_pty::native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: command.rows,
                cols: command.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("could not open a PTY pair")?;

        let mut builder = CommandBuilder::new(&command.program);
        builder.args(&command.args);
        builder.cwd(&command.cwd);
        for (key, value) in &command.env {
            builder.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .context("could not spawn the subprocess under the PTY")?;

        debug!(
            program = %command.program,
            args = ?command.args,
            cwd = %command.cwd.display(),
            "Subprocess launched under a PTY"
        );

        let killer = child.clone_killer();
        let pid = child.process_id();
        let writer = pair.master.take_writer().context("no write side on the PTY master")?;
        let mut reader = pair.master.try_clone_reader().context("no read side on the PTY master")?;

        let (tx, rx) = mpsc::unbounded_channel();

        thread::spawn(move || {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            // Drain output until the slave side closes, the session lets go
            // of the receiver, or the read side breaks.
            let abandoned = loop {
                let n = match reader.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(READ_POLL_INTERVAL);
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Lost the PTY read side");
                        let _ = tx.send(PtyEvent::Error(format!("reading from PTY failed: {e}")));
                        break false;
                    }
                };
                if n == 0 {
                    break false;
                }
                if tx.send(PtyEvent::Data(buf[..n].to_vec())).is_err() {
                    break true;
                }
            };
            if abandoned {
                debug!("Session abandoned the stream, reaping the child anyway");
            }

            // The child must still be reaped, and its status reported.
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code()),
                Err(e) => {
                    warn!(error = %e, "Could not collect the child's exit status");
                    None
                }
            };
            debug!(exit_code = ?code, "Subprocess finished");
            let _ = tx.send(PtyEvent::Exit { code });
        });

        Ok((
            Self {
                killer: Mutex::new(killer),
                pid,
                writer: Mutex::new(writer),
                _master: Mutex::new(pair.master),
            },
            rx,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Deliver SIGTERM to the subprocess; tolerates an already-dead child.
    pub fn terminate(&self) {
        if let Some(pid) = self.pid {
            // Safety: plain kill(2) on a pid we spawned.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                debug!(pid, "SIGTERM delivery failed (process likely gone)");
            }
        }
    }

    /// Force-kill the subprocess; tolerates an already-dead child.
    pub fn kill(&self) {
        if let Err(e) = self.killer.lock().unwrap().kill() {
            debug!(error = %e, "Kill failed (process likely gone)");
        }
    }

    /// Write input (e.g. a prompt response) to the subprocess terminal.
    pub fn write_input(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(data).context("writing to the subprocess terminal failed")?;
        writer.flush().context("flushing the subprocess terminal failed")?;
        Ok(())
    }
}
