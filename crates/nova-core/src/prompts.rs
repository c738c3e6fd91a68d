// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Interactive prompt detection
//!
//! The wrapped CLI renders confirmation screens as plain terminal text
//! rather than protocol records. This module recognizes the known screens
//! (permission-bypass confirmation, tool approval, file-edit approval, and
//! generic numbered menus) in raw output and lifts them into structured
//! [`InteractivePrompt`] values. Anything unrecognized stays raw output.

use nova_api_contract::{InteractivePrompt, PromptKind, PromptOption};

/// Scan a raw text chunk for a confirmation screen.
///
/// A screen is a question line followed by at least two numbered options
/// (`1. Yes`, optionally prefixed with the selection caret `❯`).
pub fn detect_prompt(text: &str) -> Option<InteractivePrompt> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let mut options = Vec::new();
    let mut first_option_line = None;
    for (idx, line) in lines.iter().enumerate() {
        if let Some(option) = parse_option_line(line) {
            if first_option_line.is_none() {
                first_option_line = Some(idx);
            }
            options.push(option);
        }
    }
    if options.len() < 2 {
        return None;
    }

    let head = &lines[..first_option_line.unwrap_or(0)];
    let title = head
        .iter()
        .rev()
        .find(|l| l.ends_with('?'))
        .or_else(|| head.iter().rev().find(|l| !l.is_empty()))
        .map(|l| l.to_string())?;

    let description = {
        let rest: Vec<&str> = head
            .iter()
            .filter(|l| !l.is_empty() && **l != title)
            .copied()
            .collect();
        if rest.is_empty() {
            None
        } else {
            Some(rest.join(" "))
        }
    };

    Some(InteractivePrompt {
        kind: classify(&title, description.as_deref()),
        title,
        description,
        options,
    })
}

fn classify(title: &str, description: Option<&str>) -> PromptKind {
    let haystack = format!("{} {}", title, description.unwrap_or("")).to_lowercase();
    if haystack.contains("bypass permissions") {
        PromptKind::BypassConfirm
    } else if haystack.contains("edit") {
        PromptKind::FileEdit
    } else if haystack.contains("tool") || haystack.contains("command") || haystack.contains("proceed") {
        PromptKind::ToolApproval
    } else {
        PromptKind::Selection
    }
}

/// Parse `1. Label`, `❯ 1. Label` or `> 1. Label`; the caret marks the
/// default option.
fn parse_option_line(line: &str) -> Option<PromptOption> {
    let (is_default, rest) = match line.strip_prefix('❯').or_else(|| line.strip_prefix('>')) {
        Some(rest) => (true, rest.trim_start()),
        None => (false, line),
    };

    let dot = rest.find(". ")?;
    let key = &rest[..dot];
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let label = rest[dot + 2..].trim();
    if label.is_empty() {
        return None;
    }

    Some(PromptOption {
        key: key.to_string(),
        label: label.to_string(),
        is_default,
    })
}
