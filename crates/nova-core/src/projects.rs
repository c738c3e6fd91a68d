// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Transcript history service
//!
//! Read-only plus delete access to the CLI's transcript tree
//! (`~/.claude/projects/<encoded-id>/<session>.jsonl`). The encoded id is
//! the absolute project path with `/` mapped to `-`, which is lossy: a `-`
//! in the id may be a path separator, a literal dash, or a flattened `_`.
//! Decoding therefore walks the real filesystem greedily, preferring the
//! entry that consumes the most id parts at each level.
//!
//! Everything here is blocking I/O; callers dispatch through
//! `spawn_blocking`.

use crate::error::Error;
use crate::Result;
use chrono::{DateTime, Utc};
use nova_api_contract::{BulkDeleteResult, Project, TranscriptSummary};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Hard cap on decode descents; guarantees termination on hostile ids.
const MAX_DECODE_DEPTH: usize = 64;

const SUMMARY_MAX_CHARS: usize = 50;

pub struct ProjectsService {
    root: PathBuf,
}

impl ProjectsService {
    /// Service over the default transcript root, `~/.claude/projects`.
    pub fn new() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/"))
            .join(".claude")
            .join("projects");
        Self { root }
    }

    /// Service over an explicit root (tests, configuration overrides).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn home_directory(&self) -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/"))
            .display()
            .to_string()
    }

    /// Enumerate project directories, newest first.
    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut projects = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            let decoded = decode_project_id(&id);
            let session_count = count_transcripts(&dir);
            let last_modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let name = Path::new(&decoded)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| decoded.clone());

            projects.push(Project {
                id,
                name,
                path: decoded,
                last_modified,
                session_count,
            });
        }

        projects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(projects)
    }

    /// Summaries of every transcript in one project, newest first.
    pub fn project_sessions(&self, project_id: &str) -> Result<Vec<TranscriptSummary>> {
        let dir = self.project_dir(project_id)?;
        let entries = std::fs::read_dir(&dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::TranscriptNotFound(project_id.to_string()),
            _ => Error::Io(e),
        })?;

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();

            let contents = match std::fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable transcript");
                    continue;
                }
            };
            let message_count = contents.lines().filter(|l| !l.trim().is_empty()).count();
            let summary = contents
                .lines()
                .find(|l| !l.trim().is_empty())
                .map(display_name_from_record)
                .unwrap_or_else(|| id.clone());

            let metadata = entry.metadata().ok();
            let modified_at = metadata
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            let created_at = metadata
                .as_ref()
                .and_then(|m| m.created().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or(modified_at);

            sessions.push(TranscriptSummary {
                id,
                summary,
                message_count,
                created_at,
                modified_at,
            });
        }

        sessions.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(sessions)
    }

    /// Load one transcript verbatim; unparseable lines are skipped with a
    /// log, never surfaced as errors.
    pub fn load_history(&self, project_id: &str, session_id: &str) -> Result<Vec<Value>> {
        let path = self.transcript_path(project_id, session_id)?;
        let contents = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::TranscriptNotFound(session_id.to_string()),
            _ => Error::Io(e),
        })?;

        let mut records = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    debug!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unparseable transcript line"
                    );
                }
            }
        }
        Ok(records)
    }

    pub fn delete_session(&self, project_id: &str, session_id: &str) -> Result<()> {
        let path = self.transcript_path(project_id, session_id)?;
        std::fs::remove_file(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::TranscriptNotFound(session_id.to_string()),
            _ => Error::Io(e),
        })
    }

    /// Delete a batch; one failure never aborts the rest.
    pub fn delete_sessions_bulk(&self, project_id: &str, session_ids: &[String]) -> BulkDeleteResult {
        let mut result = BulkDeleteResult::default();
        for session_id in session_ids {
            match self.delete_session(project_id, session_id) {
                Ok(()) => result.deleted.push(session_id.clone()),
                Err(e) => {
                    debug!(session_id = %session_id, error = %e, "Bulk delete entry failed");
                    result.failed.push(session_id.clone());
                }
            }
        }
        result
    }

    fn project_dir(&self, project_id: &str) -> Result<PathBuf> {
        if project_id.contains('/') || project_id.contains("..") {
            return Err(Error::TranscriptNotFound(project_id.to_string()));
        }
        Ok(self.root.join(project_id))
    }

    fn transcript_path(&self, project_id: &str, session_id: &str) -> Result<PathBuf> {
        if session_id.contains('/') || session_id.contains("..") {
            return Err(Error::TranscriptNotFound(session_id.to_string()));
        }
        Ok(self.project_dir(project_id)?.join(format!("{session_id}.jsonl")))
    }
}

impl Default for ProjectsService {
    fn default() -> Self {
        Self::new()
    }
}

fn count_transcripts(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    e.path().extension().and_then(|x| x.to_str()) == Some("jsonl")
                })
                .count()
        })
        .unwrap_or(0)
}

/// Derive a display name from the first transcript record: its summary or
/// message content, newlines collapsed, truncated.
fn display_name_from_record(line: &str) -> String {
    let text = match serde_json::from_str::<Value>(line) {
        Ok(record) => record
            .get("summary")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| {
                record
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(content_text)
            })
            .unwrap_or_else(|| line.to_string()),
        Err(_) => line.to_string(),
    };

    let collapsed = text.replace(['\n', '\r'], " ");
    let trimmed = collapsed.trim();
    if trimmed.chars().count() > SUMMARY_MAX_CHARS {
        let truncated: String = trimmed.chars().take(SUMMARY_MAX_CHARS).collect();
        format!("{truncated}…")
    } else {
        trimmed.to_string()
    }
}

/// Content is either a plain string or an array of content blocks.
fn content_text(content: &Value) -> Option<String> {
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|block| block.get("text").and_then(|t| t.as_str()))
        .map(|s| s.to_string())
}

/// Decode an encoded project id back to an absolute path.
///
/// Greedy best-match descent from `/`: at each level, pick the directory
/// entry that (after `_`→`-` substitution) matches the longest prefix of
/// the remaining parts, consume that many, descend. Parts with no match
/// fall through verbatim as path segments.
pub fn decode_project_id(encoded: &str) -> String {
    let parts: Vec<&str> = encoded
        .trim_start_matches('-')
        .split('-')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return "/".to_string();
    }

    let mut current = PathBuf::from("/");
    let mut remaining = &parts[..];

    for _ in 0..MAX_DECODE_DEPTH {
        if remaining.is_empty() {
            break;
        }
        match best_entry_match(&current, remaining) {
            Some((entry_name, consumed)) => {
                current.push(entry_name);
                remaining = &remaining[consumed..];
            }
            None => {
                // No filesystem guidance left; treat each part as a segment.
                for part in remaining {
                    current.push(part);
                }
                remaining = &[];
            }
        }
    }

    current.display().to_string()
}

/// The directory entry under `dir` consuming the longest prefix of `parts`.
fn best_entry_match(dir: &Path, parts: &[&str]) -> Option<(String, usize)> {
    let entries = std::fs::read_dir(dir).ok()?;

    let mut best: Option<(String, usize)> = None;
    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let normalized = name.replace('_', "-");
        let entry_parts: Vec<&str> = normalized.split('-').collect();
        if entry_parts.is_empty() || entry_parts.len() > parts.len() {
            continue;
        }
        if entry_parts.iter().zip(parts).all(|(a, b)| a == b) {
            let consumed = entry_parts.len();
            let better = match &best {
                Some((best_name, best_consumed)) => {
                    consumed > *best_consumed
                        || (consumed == *best_consumed && name < *best_name)
                }
                None => true,
            };
            if better {
                best = Some((name, consumed));
            }
        }
    }
    best
}
