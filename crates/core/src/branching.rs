#![forbid(unsafe_code)]

//! Planning for the legacy embedded-branch migration.
//!
//! The legacy representation kept, on one "anchor" message, an ordered array
//! of branches (each an ordered array of subsequent messages) plus an index
//! selecting the branch currently shown. Planning turns one anchor into the
//! normalized form: one row per subsequent message, parented on the anchor,
//! with `is_active` set on exactly the current branch, plus one snapshot
//! listing every branch's ids root-through-leaf.
//!
//! This module is pure; persistence and the legacy JSON wire shape live in
//! the storage and migrate crates.

use crate::model::MessageRole;
use std::collections::HashSet;

#[cfg(test)]
mod tests;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LegacyBranch {
    pub messages: Vec<LegacyMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyAnchor {
    pub id: String,
    pub session_id: String,
    /// Index of the branch that was shown to the user; `None` means unset
    /// (treated as 0, like the legacy reader did).
    pub current_branch: Option<usize>,
    pub branches: Vec<LegacyBranch>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at_ms: i64,
    /// Always the anchor id: every branch member points at the edit point.
    pub parent_message_id: String,
    pub is_active: bool,
    /// 0-based position within its branch.
    pub sequence_number: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedSnapshot {
    /// Flattened branch-then-message order. The anchor id repeats at the
    /// head of each non-empty branch so branch boundaries survive the
    /// flattening; subsequent ids appear once each (first occurrence wins).
    pub message_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationPlan {
    pub messages: Vec<PlannedMessage>,
    pub snapshot: Option<PlannedSnapshot>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.snapshot.is_none()
    }
}

/// Effective current-branch index: unset defaults to 0, and an out-of-range
/// recorded index falls back to 0 rather than leaving no branch active.
pub fn effective_current_branch(anchor: &LegacyAnchor) -> usize {
    match anchor.current_branch {
        Some(index) if index < anchor.branches.len() => index,
        _ => 0,
    }
}

pub fn plan_migration(anchor: &LegacyAnchor) -> MigrationPlan {
    let current = effective_current_branch(anchor);

    let mut messages = Vec::new();
    let mut snapshot_ids = Vec::new();
    let mut seen = HashSet::new();

    for (branch_index, branch) in anchor.branches.iter().enumerate() {
        if branch.messages.is_empty() {
            continue;
        }
        snapshot_ids.push(anchor.id.clone());
        for (position, legacy) in branch.messages.iter().enumerate() {
            if !seen.insert(legacy.id.clone()) {
                continue;
            }
            snapshot_ids.push(legacy.id.clone());
            messages.push(PlannedMessage {
                id: legacy.id.clone(),
                session_id: anchor.session_id.clone(),
                role: legacy.role,
                content: legacy.content.clone(),
                created_at_ms: legacy.created_at_ms,
                parent_message_id: anchor.id.clone(),
                is_active: branch_index == current,
                sequence_number: position as i64,
            });
        }
    }

    let snapshot = if snapshot_ids.is_empty() {
        None
    } else {
        Some(PlannedSnapshot {
            message_ids: snapshot_ids,
        })
    };

    MigrationPlan { messages, snapshot }
}
