#![forbid(unsafe_code)]

mod error;
mod requests;
mod types;

pub use error::StoreError;
pub use requests::*;
pub use types::*;

use lx_core::ids::{MessageId, SessionId};
use lx_core::model::{MessageRole, SnapshotType};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE: &str = "legalynx_chat.db";
const SCHEMA_VERSION: &str = "v1";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join(DB_FILE);
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            "#,
        )?;

        install_schema(&conn)?;

        Ok(Self { conn, storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn create_message(&mut self, request: CreateMessageRequest) -> Result<MessageRow, StoreError> {
        let session_id = canonicalize_session(&request.session_id)?;
        let id = canonicalize_message(&request.id)?;
        let parent_message_id = request
            .parent_message_id
            .as_deref()
            .map(canonicalize_message)
            .transpose()?;

        if parent_message_id.as_deref() == Some(id.as_str()) {
            return Err(StoreError::InvalidInput("message cannot parent itself"));
        }

        let tx = self.conn.transaction()?;

        if let Some(parent) = parent_message_id.as_deref() {
            if !message_exists_tx(&tx, &session_id, parent)? {
                return Err(StoreError::UnknownMessage);
            }
        }

        let insert = tx.execute(
            "INSERT INTO messages(session_id, id, role, content, created_at_ms, parent_message_id, is_active, sequence_number) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                id,
                request.role.as_str(),
                request.content,
                request.created_at_ms,
                parent_message_id,
                request.is_active,
                request.sequence_number,
            ],
        );
        if let Err(err) = insert {
            return Err(map_insert_conflict(err));
        }

        tx.commit()?;
        Ok(MessageRow {
            id,
            session_id,
            role: request.role,
            content: request.content,
            created_at_ms: request.created_at_ms,
            parent_message_id,
            is_active: request.is_active,
            sequence_number: request.sequence_number,
        })
    }

    pub fn message_exists(&self, session_id: &str, id: &str) -> Result<bool, StoreError> {
        let session_id = canonicalize_session(session_id)?;
        let id = canonicalize_message(id)?;
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM messages WHERE session_id = ?1 AND id = ?2",
                params![session_id, id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    pub fn get_message(&self, session_id: &str, id: &str) -> Result<Option<MessageRow>, StoreError> {
        let session_id = canonicalize_session(session_id)?;
        let id = canonicalize_message(id)?;
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1 AND id = ?2"),
                params![session_id, id],
                read_raw_message,
            )
            .optional()?;
        raw.map(to_message_row).transpose()
    }

    /// The currently-displayed linear history of a session: active rows in
    /// thread order (creation time, then in-branch sequence, then id).
    pub fn active_thread(&self, session_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        let session_id = canonicalize_session(session_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE session_id = ?1 AND is_active = 1 \
             ORDER BY created_at_ms ASC, sequence_number ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![session_id], read_raw_message)?;
        collect_message_rows(rows)
    }

    /// All alternative-continuation rows parented on the given anchor,
    /// across every branch, active or not.
    pub fn branch_children(&self, session_id: &str, anchor_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        let session_id = canonicalize_session(session_id)?;
        let anchor_id = canonicalize_message(anchor_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE session_id = ?1 AND parent_message_id = ?2 \
             ORDER BY sequence_number ASC, created_at_ms ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![session_id, anchor_id], read_raw_message)?;
        collect_message_rows(rows)
    }

    /// Live-edit path: editing a USER message snapshots the continuation it
    /// displaces, deactivates it, and inserts the replacement row as a new
    /// branch under the edited message.
    pub fn edit_user_message(&mut self, request: EditUserMessageRequest) -> Result<EditOutcome, StoreError> {
        let session_id = canonicalize_session(&request.session_id)?;
        let message_id = canonicalize_message(&request.message_id)?;
        let new_message_id = canonicalize_message(&request.new_message_id)?;
        if new_message_id == message_id {
            return Err(StoreError::InvalidInput("replacement id equals edited id"));
        }

        let tx = self.conn.transaction()?;

        let target = {
            let raw = tx
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1 AND id = ?2"),
                    params![session_id, message_id],
                    read_raw_message,
                )
                .optional()?;
            let Some(raw) = raw else {
                return Err(StoreError::UnknownMessage);
            };
            to_message_row(raw)?
        };
        if target.role != MessageRole::User {
            return Err(StoreError::RoleMismatch { actual: target.role });
        }
        if !target.is_active {
            return Err(StoreError::InvalidInput("edited message is not on the active thread"));
        }
        if message_exists_tx(&tx, &session_id, &new_message_id)? {
            return Err(StoreError::MessageAlreadyExists);
        }

        // Active continuation strictly after the edited message, in thread
        // order. These rows form the branch being displaced.
        let thread = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE session_id = ?1 AND is_active = 1 \
                 ORDER BY created_at_ms ASC, sequence_number ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![session_id], read_raw_message)?;
            collect_message_rows(rows)?
        };
        let tail = thread
            .iter()
            .skip_while(|row| row.id != target.id)
            .skip(1)
            .map(|row| row.id.clone())
            .collect::<Vec<_>>();

        let mut snapshot_ids = Vec::with_capacity(tail.len() + 1);
        snapshot_ids.push(target.id.clone());
        snapshot_ids.extend(tail.iter().cloned());
        let snapshot = insert_snapshot_tx(
            &tx,
            &session_id,
            &target.id,
            SnapshotType::LiveEdit,
            &snapshot_ids,
            request.created_at_ms,
        )?;

        for id in &tail {
            tx.execute(
                "UPDATE messages SET is_active = 0 WHERE session_id = ?1 AND id = ?2",
                params![session_id, id],
            )?;
        }

        let next_sequence: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence_number), -1) + 1 FROM messages \
                 WHERE session_id = ?1 AND parent_message_id = ?2",
                params![session_id, target.id],
                |row| row.get(0),
            )?;

        let insert = tx.execute(
            "INSERT INTO messages(session_id, id, role, content, created_at_ms, parent_message_id, is_active, sequence_number) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
            params![
                session_id,
                new_message_id,
                MessageRole::User.as_str(),
                request.content,
                request.created_at_ms,
                target.id,
                next_sequence,
            ],
        );
        if let Err(err) = insert {
            return Err(map_insert_conflict(err));
        }

        tx.commit()?;
        Ok(EditOutcome {
            message: MessageRow {
                id: new_message_id,
                session_id,
                role: MessageRole::User,
                content: request.content,
                created_at_ms: request.created_at_ms,
                parent_message_id: Some(target.id),
                is_active: true,
                sequence_number: Some(next_sequence),
            },
            snapshot,
        })
    }

    /// Switch which branch under an anchor is displayed. Every listed id
    /// must be a child of the anchor; all other children are deactivated,
    /// keeping exactly one branch current per edit point.
    pub fn activate_branch(&mut self, request: ActivateBranchRequest) -> Result<usize, StoreError> {
        let session_id = canonicalize_session(&request.session_id)?;
        let anchor_id = canonicalize_message(&request.anchor_id)?;
        if request.message_ids.is_empty() {
            return Err(StoreError::InvalidInput("a branch needs at least one message"));
        }
        let selected = request
            .message_ids
            .iter()
            .map(|id| canonicalize_message(id))
            .collect::<Result<Vec<_>, _>>()?;

        let tx = self.conn.transaction()?;
        if !message_exists_tx(&tx, &session_id, &anchor_id)? {
            return Err(StoreError::UnknownMessage);
        }

        let children = {
            let mut stmt = tx.prepare(
                "SELECT id FROM messages WHERE session_id = ?1 AND parent_message_id = ?2",
            )?;
            let rows = stmt.query_map(params![session_id, anchor_id], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        for id in &selected {
            if !children.iter().any(|child| child == id) {
                return Err(StoreError::UnknownMessage);
            }
        }

        let mut changed = 0usize;
        for child in &children {
            let active = selected.iter().any(|id| id == child);
            changed += tx.execute(
                "UPDATE messages SET is_active = ?3 \
                 WHERE session_id = ?1 AND id = ?2 AND is_active != ?3",
                params![session_id, child, active],
            )?;
        }

        tx.commit()?;
        Ok(changed)
    }

    pub fn append_snapshot(&mut self, request: AppendSnapshotRequest) -> Result<SnapshotRow, StoreError> {
        let session_id = canonicalize_session(&request.session_id)?;
        let edit_source_id = canonicalize_message(&request.edit_source_id)?;
        if request.message_ids.is_empty() {
            return Err(StoreError::InvalidInput("snapshot needs at least one message id"));
        }

        let tx = self.conn.transaction()?;
        let row = insert_snapshot_tx(
            &tx,
            &session_id,
            &edit_source_id,
            request.snapshot_type,
            &request.message_ids,
            request.created_at_ms,
        )?;
        tx.commit()?;
        Ok(row)
    }

    pub fn has_migration_snapshot(&self, session_id: &str, edit_source_id: &str) -> Result<bool, StoreError> {
        let session_id = canonicalize_session(session_id)?;
        let edit_source_id = canonicalize_message(edit_source_id)?;
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM branch_snapshots \
                 WHERE session_id = ?1 AND edit_source_id = ?2 AND snapshot_type = ?3 \
                 LIMIT 1",
                params![session_id, edit_source_id, SnapshotType::Migration.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    pub fn list_snapshots(&self, request: ListSnapshotsRequest) -> Result<Vec<SnapshotRow>, StoreError> {
        let session_id = canonicalize_session(&request.session_id)?;
        let limit = to_sqlite_i64(request.limit)?;
        let offset = to_sqlite_i64(request.offset)?;

        let mut stmt = self.conn.prepare(
            "SELECT seq, session_id, edit_source_id, snapshot_type, message_ids_json, created_at_ms \
             FROM branch_snapshots \
             WHERE session_id = ?1 \
             ORDER BY seq ASC \
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![session_id, limit, offset], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for raw in rows {
            out.push(to_snapshot_row(raw?)?);
        }
        Ok(out)
    }

    /// The migrator's fixed anchor set: every message still carrying a
    /// legacy embedded-branch payload, oldest first.
    pub fn list_legacy_anchors(&self, session_id: Option<&str>) -> Result<Vec<LegacyAnchorRow>, StoreError> {
        let session_filter = session_id.map(canonicalize_session).transpose()?;

        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, created_at_ms, branches_json, current_branch \
             FROM messages \
             WHERE branches_json IS NOT NULL AND (?1 IS NULL OR session_id = ?1) \
             ORDER BY created_at_ms ASC, session_id ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_filter], |row| {
            Ok(LegacyAnchorRow {
                id: row.get(0)?,
                session_id: row.get(1)?,
                created_at_ms: row.get(2)?,
                branches_json: row.get(3)?,
                current_branch: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Transition-window writer for the legacy columns: the retired upstream
    /// service stored branches this way, and fixtures seed through here. The
    /// migrator itself only ever reads them.
    pub fn attach_legacy_branches(&mut self, request: AttachLegacyBranchesRequest) -> Result<(), StoreError> {
        let session_id = canonicalize_session(&request.session_id)?;
        let message_id = canonicalize_message(&request.message_id)?;
        if request.current_branch.is_some_and(|index| index < 0) {
            return Err(StoreError::InvalidInput("current_branch must not be negative"));
        }

        let updated = self.conn.execute(
            "UPDATE messages SET branches_json = ?3, current_branch = ?4 \
             WHERE session_id = ?1 AND id = ?2",
            params![session_id, message_id, request.branches_json, request.current_branch],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownMessage);
        }
        Ok(())
    }
}

const MESSAGE_COLUMNS: &str =
    "id, session_id, role, content, created_at_ms, parent_message_id, is_active, sequence_number";

type RawMessage = (
    String,
    String,
    String,
    String,
    i64,
    Option<String>,
    bool,
    Option<i64>,
);

fn read_raw_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessage> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn to_message_row(raw: RawMessage) -> Result<MessageRow, StoreError> {
    let (id, session_id, role, content, created_at_ms, parent_message_id, is_active, sequence_number) = raw;
    let role = MessageRole::parse(&role).ok_or(StoreError::Corrupt("unknown message role"))?;
    Ok(MessageRow {
        id,
        session_id,
        role,
        content,
        created_at_ms,
        parent_message_id,
        is_active,
        sequence_number,
    })
}

fn collect_message_rows(
    rows: impl Iterator<Item = rusqlite::Result<RawMessage>>,
) -> Result<Vec<MessageRow>, StoreError> {
    let mut out = Vec::new();
    for raw in rows {
        out.push(to_message_row(raw?)?);
    }
    Ok(out)
}

fn to_snapshot_row(raw: (i64, String, String, String, String, i64)) -> Result<SnapshotRow, StoreError> {
    let (seq, session_id, edit_source_id, snapshot_type, message_ids_json, created_at_ms) = raw;
    let snapshot_type =
        SnapshotType::parse(&snapshot_type).ok_or(StoreError::Corrupt("unknown snapshot type"))?;
    let message_ids = serde_json::from_str::<Vec<String>>(&message_ids_json)
        .map_err(|_| StoreError::Corrupt("snapshot id list is not a JSON string array"))?;
    Ok(SnapshotRow {
        seq,
        session_id,
        edit_source_id,
        snapshot_type,
        message_ids,
        created_at_ms,
    })
}

fn message_exists_tx(tx: &Transaction<'_>, session_id: &str, id: &str) -> Result<bool, StoreError> {
    Ok(tx
        .query_row(
            "SELECT 1 FROM messages WHERE session_id = ?1 AND id = ?2",
            params![session_id, id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn insert_snapshot_tx(
    tx: &Transaction<'_>,
    session_id: &str,
    edit_source_id: &str,
    snapshot_type: SnapshotType,
    message_ids: &[String],
    created_at_ms: i64,
) -> Result<SnapshotRow, StoreError> {
    let message_ids_json = serde_json::to_string(message_ids)
        .map_err(|_| StoreError::InvalidInput("snapshot id list is not serializable"))?;
    tx.execute(
        "INSERT INTO branch_snapshots(session_id, edit_source_id, snapshot_type, message_ids_json, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session_id,
            edit_source_id,
            snapshot_type.as_str(),
            message_ids_json,
            created_at_ms,
        ],
    )?;
    let seq = tx.last_insert_rowid();
    Ok(SnapshotRow {
        seq,
        session_id: session_id.to_string(),
        edit_source_id: edit_source_id.to_string(),
        snapshot_type,
        message_ids: message_ids.to_vec(),
        created_at_ms,
    })
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
          session_id TEXT NOT NULL,
          id TEXT NOT NULL,
          role TEXT NOT NULL,
          content TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          parent_message_id TEXT,
          is_active INTEGER NOT NULL,
          sequence_number INTEGER,
          branches_json TEXT,
          current_branch INTEGER,
          PRIMARY KEY (session_id, id)
        );

        CREATE TABLE IF NOT EXISTS branch_snapshots (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          session_id TEXT NOT NULL,
          edit_source_id TEXT NOT NULL,
          snapshot_type TEXT NOT NULL,
          message_ids_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_parent
          ON messages(session_id, parent_message_id);
        CREATE INDEX IF NOT EXISTS idx_messages_active
          ON messages(session_id, is_active, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_snapshots_session
          ON branch_snapshots(session_id, seq);
        "#,
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", SCHEMA_VERSION],
    )?;
    Ok(())
}

fn map_insert_conflict(err: rusqlite::Error) -> StoreError {
    if is_constraint_violation(&err) {
        return StoreError::MessageAlreadyExists;
    }
    StoreError::Sql(err)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

fn to_sqlite_i64(value: usize) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("numeric overflow"))
}

fn canonicalize_session(value: &str) -> Result<String, StoreError> {
    SessionId::try_new(value)
        .map(|id| id.as_str().to_string())
        .map_err(|_| StoreError::InvalidInput("invalid session id"))
}

fn canonicalize_message(value: &str) -> Result<String, StoreError> {
    MessageId::try_new(value)
        .map(|id| id.as_str().to_string())
        .map_err(|_| StoreError::InvalidInput("invalid message id"))
}
