#![forbid(unsafe_code)]

use lx_core::model::{MessageRole, SnapshotType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateMessageRequest {
    pub session_id: String,
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub parent_message_id: Option<String>,
    pub is_active: bool,
    pub sequence_number: Option<i64>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditUserMessageRequest {
    pub session_id: String,
    /// The message being edited; becomes the anchor of the new branch.
    pub message_id: String,
    pub new_message_id: String,
    pub content: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivateBranchRequest {
    pub session_id: String,
    pub anchor_id: String,
    /// Children of the anchor that form the branch to show; every other
    /// child of the anchor is deactivated.
    pub message_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendSnapshotRequest {
    pub session_id: String,
    pub edit_source_id: String,
    pub snapshot_type: SnapshotType,
    pub message_ids: Vec<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListSnapshotsRequest {
    pub session_id: String,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachLegacyBranchesRequest {
    pub session_id: String,
    pub message_id: String,
    pub branches_json: String,
    pub current_branch: Option<i64>,
}
