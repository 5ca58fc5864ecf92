#![forbid(unsafe_code)]

use lx_core::model::{MessageRole, SnapshotType};
use lx_storage::{
    AttachLegacyBranchesRequest, CreateMessageRequest, ListSnapshotsRequest, SqliteStore,
};
use std::path::{Path, PathBuf};
use std::process::Output;

fn temp_storage_dir(label: &str) -> PathBuf {
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    std::env::temp_dir().join(format!(
        "lx_migrate_test_{label}_{}_{now_ms}",
        std::process::id()
    ))
}

fn run_migrator(storage_dir: &Path, extra_args: &[&str]) -> Output {
    let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_lx_migrate"));
    cmd.arg("--storage-dir").arg(storage_dir);
    for arg in extra_args {
        cmd.arg(arg);
    }
    cmd.env_remove("LX_STORAGE_DIR");
    cmd.env_remove("LX_SESSION");
    cmd.output().expect("spawn lx_migrate")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn seed_anchor(store: &mut SqliteStore, session: &str, id: &str, payload: &str, current: Option<i64>) {
    store
        .create_message(CreateMessageRequest {
            session_id: session.to_string(),
            id: id.to_string(),
            role: MessageRole::User,
            content: format!("anchor {id}"),
            parent_message_id: None,
            is_active: true,
            sequence_number: None,
            created_at_ms: 1_000,
        })
        .expect("anchor row");
    store
        .attach_legacy_branches(AttachLegacyBranchesRequest {
            session_id: session.to_string(),
            message_id: id.to_string(),
            branches_json: payload.to_string(),
            current_branch: current,
        })
        .expect("legacy payload");
}

const TWO_BRANCH_PAYLOAD: &str = r#"[
    { "messages": [
        { "id": "a", "type": "user", "content": "first wording", "createdAt": 2000 },
        { "id": "b", "type": "bot", "content": "answer", "createdAt": 3000 }
    ] },
    { "messages": [
        { "id": "c", "type": "user", "content": "second wording", "createdAt": 4000 }
    ] }
]"#;

#[test]
fn migrates_two_branches_with_recorded_current_branch() {
    let dir = temp_storage_dir("two_branches");
    {
        let mut store = SqliteStore::open(&dir).expect("open");
        seed_anchor(&mut store, "sess-1", "m1", TWO_BRANCH_PAYLOAD, Some(1));
    }

    let output = run_migrator(&dir, &[]);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("anchors: 1 total, 1 migrated, 0 skipped"), "{stdout}");
    assert!(stdout.contains("messages: 3 created, 0 already present, 0 failed"), "{stdout}");
    assert!(stdout.contains("snapshots: 1 created"), "{stdout}");

    let store = SqliteStore::open(&dir).expect("reopen");
    let children = store
        .branch_children("sess-1", "m1")
        .expect("children")
        .into_iter()
        .map(|row| (row.id, row.role, row.is_active))
        .collect::<Vec<_>>();
    assert_eq!(
        children,
        vec![
            ("a".to_string(), MessageRole::User, false),
            ("c".to_string(), MessageRole::User, true),
            ("b".to_string(), MessageRole::Assistant, false),
        ]
    );

    let snapshots = store
        .list_snapshots(ListSnapshotsRequest {
            session_id: "sess-1".to_string(),
            limit: 10,
            offset: 0,
        })
        .expect("snapshots");
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].snapshot_type, SnapshotType::Migration);
    assert_eq!(snapshots[0].edit_source_id, "m1");
    assert_eq!(snapshots[0].message_ids, vec!["m1", "a", "b", "m1", "c"]);

    // The legacy payload is input only; it stays for the later schema drop.
    let anchors = store.list_legacy_anchors(None).expect("legacy");
    assert_eq!(anchors.len(), 1);
}

#[test]
fn rerunning_creates_nothing_new() {
    let dir = temp_storage_dir("idempotent");
    {
        let mut store = SqliteStore::open(&dir).expect("open");
        seed_anchor(&mut store, "sess-1", "m1", TWO_BRANCH_PAYLOAD, Some(1));
    }

    let first = run_migrator(&dir, &[]);
    assert!(first.status.success());

    let second = run_migrator(&dir, &[]);
    assert!(second.status.success(), "stderr: {}", stderr_of(&second));
    let stdout = stdout_of(&second);
    assert!(stdout.contains("messages: 0 created, 3 already present, 0 failed"), "{stdout}");
    assert!(stdout.contains("snapshots: 0 created, 1 already present, 0 failed"), "{stdout}");

    let store = SqliteStore::open(&dir).expect("reopen");
    assert_eq!(store.branch_children("sess-1", "m1").expect("children").len(), 3);
    let snapshots = store
        .list_snapshots(ListSnapshotsRequest {
            session_id: "sess-1".to_string(),
            limit: 10,
            offset: 0,
        })
        .expect("snapshots");
    assert_eq!(snapshots.len(), 1);
}

#[test]
fn empty_branches_anchor_is_skipped_and_run_continues() {
    let dir = temp_storage_dir("empty_branches");
    {
        let mut store = SqliteStore::open(&dir).expect("open");
        seed_anchor(&mut store, "sess-1", "m0", "[]", None);
        seed_anchor(&mut store, "sess-1", "m1", TWO_BRANCH_PAYLOAD, None);
    }

    let output = run_migrator(&dir, &[]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("anchors: 2 total, 1 migrated, 1 skipped"), "{stdout}");
    assert!(stderr_of(&output).contains("no branch messages"), "stderr");

    let store = SqliteStore::open(&dir).expect("reopen");
    assert!(store.branch_children("sess-1", "m0").expect("m0 children").is_empty());
    assert!(!store.has_migration_snapshot("sess-1", "m0").expect("m0 snapshot"));
    // Unset current branch defaults to branch 0.
    let active = store
        .branch_children("sess-1", "m1")
        .expect("m1 children")
        .into_iter()
        .filter(|row| row.is_active)
        .map(|row| row.id)
        .collect::<Vec<_>>();
    assert_eq!(active, vec!["a", "b"]);
}

#[test]
fn malformed_payload_skips_anchor_but_not_the_run() {
    let dir = temp_storage_dir("malformed");
    {
        let mut store = SqliteStore::open(&dir).expect("open");
        seed_anchor(&mut store, "sess-1", "m0", r#"{"oops": true}"#, None);
        seed_anchor(&mut store, "sess-1", "m1", TWO_BRANCH_PAYLOAD, Some(0));
    }

    let output = run_migrator(&dir, &[]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("anchors: 2 total, 1 migrated, 1 skipped"), "{stdout}");
    assert!(stderr_of(&output).contains("malformed branches payload"), "stderr");

    let store = SqliteStore::open(&dir).expect("reopen");
    assert_eq!(store.branch_children("sess-1", "m1").expect("children").len(), 3);
}

#[test]
fn entry_failure_is_isolated_from_siblings() {
    let dir = temp_storage_dir("isolation");
    let payload = r#"[
        { "messages": [
            { "type": "user", "content": "entry with no id" },
            { "id": "kept-1", "type": "user", "content": "sibling survives" }
        ] },
        { "messages": [
            { "id": "kept-2", "type": "bot", "content": "other branch survives" }
        ] }
    ]"#;
    {
        let mut store = SqliteStore::open(&dir).expect("open");
        seed_anchor(&mut store, "sess-1", "m1", payload, None);
    }

    let output = run_migrator(&dir, &[]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("messages: 2 created, 0 already present, 1 failed"), "{stdout}");
    assert!(stderr_of(&output).contains("entry has no id"), "stderr");

    let store = SqliteStore::open(&dir).expect("reopen");
    let ids = store
        .branch_children("sess-1", "m1")
        .expect("children")
        .into_iter()
        .map(|row| row.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["kept-1", "kept-2"]);
}

#[test]
fn store_rejection_of_one_entry_is_isolated_from_siblings() {
    let dir = temp_storage_dir("store_isolation");
    // "bad id" passes the parse (it has an id) but fails message-id
    // validation at insert time; the entries around it must still land.
    let payload = r#"[
        { "messages": [
            { "id": "kept-1", "type": "user", "content": "before" },
            { "id": "bad id", "type": "bot", "content": "rejected by the store" },
            { "id": "kept-2", "type": "bot", "content": "after" }
        ] }
    ]"#;
    {
        let mut store = SqliteStore::open(&dir).expect("open");
        seed_anchor(&mut store, "sess-1", "m1", payload, None);
    }

    let output = run_migrator(&dir, &[]);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("messages: 2 created, 0 already present, 1 failed"), "{stdout}");
    assert!(stderr_of(&output).contains("invalid message id"), "stderr");

    let store = SqliteStore::open(&dir).expect("reopen");
    let ids = store
        .branch_children("sess-1", "m1")
        .expect("children")
        .into_iter()
        .map(|row| row.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["kept-1", "kept-2"]);
}

#[test]
fn unreadable_database_is_fatal() {
    let dir = temp_storage_dir("fatal");
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join("legalynx_chat.db"), b"not a sqlite file").expect("corrupt db");

    let output = run_migrator(&dir, &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("cannot open store"), "stderr");
}

#[test]
fn dry_run_writes_nothing() {
    let dir = temp_storage_dir("dry_run");
    {
        let mut store = SqliteStore::open(&dir).expect("open");
        seed_anchor(&mut store, "sess-1", "m1", TWO_BRANCH_PAYLOAD, Some(1));
    }

    let output = run_migrator(&dir, &["--dry-run"]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("anchors: 1 total, 1 would migrate, 0 skipped"), "{stdout}");
    assert!(stdout.contains("messages: 3 created"), "{stdout}");

    let store = SqliteStore::open(&dir).expect("reopen");
    assert!(store.branch_children("sess-1", "m1").expect("children").is_empty());
    assert!(!store.has_migration_snapshot("sess-1", "m1").expect("snapshot"));
}

#[test]
fn session_filter_limits_the_anchor_set() {
    let dir = temp_storage_dir("session_filter");
    {
        let mut store = SqliteStore::open(&dir).expect("open");
        seed_anchor(&mut store, "sess-1", "m1", TWO_BRANCH_PAYLOAD, None);
        seed_anchor(&mut store, "sess-2", "m1", TWO_BRANCH_PAYLOAD, None);
    }

    let output = run_migrator(&dir, &["--session", "sess-1"]);
    assert!(output.status.success());
    assert!(stdout_of(&output).contains("anchors: 1 total"));

    let store = SqliteStore::open(&dir).expect("reopen");
    assert_eq!(store.branch_children("sess-1", "m1").expect("sess-1").len(), 3);
    assert!(store.branch_children("sess-2", "m1").expect("sess-2").is_empty());
}

#[test]
fn missing_storage_dir_is_a_usage_error() {
    let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_lx_migrate"));
    cmd.env_remove("LX_STORAGE_DIR");
    cmd.env_remove("LX_SESSION");
    let output = cmd.output().expect("spawn");
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr_of(&output).contains("--storage-dir is required"));
}

#[test]
fn summary_is_mirrored_next_to_the_database() {
    let dir = temp_storage_dir("report_file");
    {
        let mut store = SqliteStore::open(&dir).expect("open");
        seed_anchor(&mut store, "sess-1", "m1", TWO_BRANCH_PAYLOAD, None);
    }

    let output = run_migrator(&dir, &[]);
    assert!(output.status.success());

    let report = std::fs::read_to_string(dir.join("lx_migrate_last_run.txt")).expect("report file");
    assert!(report.contains("dry_run=false"));
    assert!(report.contains("messages: 3 created"));
}
