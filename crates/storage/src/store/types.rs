#![forbid(unsafe_code)]

use lx_core::model::{MessageRole, SnapshotType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRow {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at_ms: i64,
    pub parent_message_id: Option<String>,
    pub is_active: bool,
    pub sequence_number: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotRow {
    pub seq: i64,
    pub session_id: String,
    pub edit_source_id: String,
    pub snapshot_type: SnapshotType,
    pub message_ids: Vec<String>,
    pub created_at_ms: i64,
}

/// A message still carrying the legacy embedded-branch payload. Read-only
/// input to the migrator; the normalized rows never touch these columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyAnchorRow {
    pub id: String,
    pub session_id: String,
    pub created_at_ms: i64,
    pub branches_json: String,
    pub current_branch: Option<i64>,
}

/// Result of the live-edit path: the replacement USER row plus the snapshot
/// taken of the continuation it displaced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditOutcome {
    pub message: MessageRow,
    pub snapshot: SnapshotRow,
}
