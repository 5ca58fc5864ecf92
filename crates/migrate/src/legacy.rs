#![forbid(unsafe_code)]

//! Wire shape of the retired embedded-branch payload.
//!
//! The old service stored, on each edited message, a JSON array of branch
//! objects whose `messages` arrays duplicated the subsequent conversation
//! turns. Field spellings drifted over its lifetime (`createdAt` vs
//! `created_at`, `type` values in either case), so parsing is tolerant:
//! unknown fields are ignored, timestamps accept integer milliseconds or an
//! RFC3339 string, and anything that is not user-authored maps to ASSISTANT.

use lx_core::branching::{LegacyAnchor, LegacyBranch, LegacyMessage};
use lx_core::model::MessageRole;
use lx_storage::LegacyAnchorRow;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Deserialize)]
pub(crate) struct BranchPayload {
    #[serde(default)]
    messages: Vec<EntryPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntryPayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    created_at: Option<Value>,
}

/// A branch entry the migrator cannot create a row for. Siblings are
/// unaffected; the run records these as per-item failures.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DroppedEntry {
    pub branch_index: usize,
    pub position: usize,
    pub reason: &'static str,
}

#[derive(Debug)]
pub(crate) struct ParsedAnchor {
    pub anchor: LegacyAnchor,
    pub dropped: Vec<DroppedEntry>,
}

pub(crate) fn parse_anchor(row: &LegacyAnchorRow) -> Result<ParsedAnchor, serde_json::Error> {
    let payload: Vec<BranchPayload> = serde_json::from_str(&row.branches_json)?;

    let mut dropped = Vec::new();
    let mut branches = Vec::with_capacity(payload.len());
    for (branch_index, branch) in payload.into_iter().enumerate() {
        let mut messages = Vec::with_capacity(branch.messages.len());
        for (position, entry) in branch.messages.into_iter().enumerate() {
            let Some(id) = entry.id.filter(|id| !id.trim().is_empty()) else {
                dropped.push(DroppedEntry {
                    branch_index,
                    position,
                    reason: "entry has no id",
                });
                continue;
            };
            messages.push(LegacyMessage {
                id,
                role: role_from_kind(entry.kind.as_deref()),
                content: entry.content.unwrap_or_default(),
                created_at_ms: entry
                    .created_at
                    .as_ref()
                    .and_then(timestamp_ms)
                    .unwrap_or(row.created_at_ms),
            });
        }
        branches.push(LegacyBranch { messages });
    }

    let current_branch = row
        .current_branch
        .and_then(|index| usize::try_from(index).ok());

    Ok(ParsedAnchor {
        anchor: LegacyAnchor {
            id: row.id.clone(),
            session_id: row.session_id.clone(),
            current_branch,
            branches,
        },
        dropped,
    })
}

fn role_from_kind(kind: Option<&str>) -> MessageRole {
    match kind.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        Some("user") | Some("human") => MessageRole::User,
        _ => MessageRole::Assistant,
    }
}

fn timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => OffsetDateTime::parse(text, &Rfc3339)
            .ok()
            .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000i128) as i64),
        _ => None,
    }
}
