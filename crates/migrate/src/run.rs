#![forbid(unsafe_code)]

use crate::legacy;
use crate::report::{MigrationSummary, now_ms};
use lx_core::branching::plan_migration;
use lx_core::model::SnapshotType;
use lx_storage::{
    AppendSnapshotRequest, CreateMessageRequest, LegacyAnchorRow, SqliteStore, StoreError,
};

#[derive(Debug)]
pub(crate) struct RunOptions {
    pub dry_run: bool,
}

/// One sequential pass over a pre-fetched anchor set. Anchors created after
/// the fetch are not picked up; a later run gets them. Every failure below
/// the anchor-set fetch is isolated to the item it hit.
pub(crate) fn migrate_anchors(
    store: &mut SqliteStore,
    anchors: &[LegacyAnchorRow],
    options: &RunOptions,
    summary: &mut MigrationSummary,
) {
    for row in anchors {
        migrate_one(store, row, options, summary);
    }
}

fn migrate_one(
    store: &mut SqliteStore,
    row: &LegacyAnchorRow,
    options: &RunOptions,
    summary: &mut MigrationSummary,
) {
    let parsed = match legacy::parse_anchor(row) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!(
                "anchor {}/{}: malformed branches payload, skipping: {err}",
                row.session_id, row.id
            );
            summary.anchors_skipped += 1;
            return;
        }
    };

    for dropped in &parsed.dropped {
        eprintln!(
            "anchor {}/{}: branch {} entry {}: {}",
            row.session_id, row.id, dropped.branch_index, dropped.position, dropped.reason
        );
        summary.messages_failed += 1;
    }

    let plan = plan_migration(&parsed.anchor);
    if plan.is_empty() {
        eprintln!(
            "anchor {}/{}: no branch messages, skipping",
            row.session_id, row.id
        );
        summary.anchors_skipped += 1;
        return;
    }
    summary.anchors_migrated += 1;

    for planned in &plan.messages {
        if options.dry_run {
            match store.message_exists(&planned.session_id, &planned.id) {
                Ok(true) => summary.messages_skipped += 1,
                Ok(false) => summary.messages_created += 1,
                Err(err) => {
                    eprintln!(
                        "anchor {}/{}: message {}: {err}",
                        row.session_id, row.id, planned.id
                    );
                    summary.messages_failed += 1;
                }
            }
            continue;
        }

        match store.create_message(CreateMessageRequest {
            session_id: planned.session_id.clone(),
            id: planned.id.clone(),
            role: planned.role,
            content: planned.content.clone(),
            parent_message_id: Some(planned.parent_message_id.clone()),
            is_active: planned.is_active,
            sequence_number: Some(planned.sequence_number),
            created_at_ms: planned.created_at_ms,
        }) {
            Ok(_) => summary.messages_created += 1,
            // Already migrated by an earlier run; not an error.
            Err(StoreError::MessageAlreadyExists) => summary.messages_skipped += 1,
            Err(err) => {
                eprintln!(
                    "anchor {}/{}: message {}: {err}",
                    row.session_id, row.id, planned.id
                );
                summary.messages_failed += 1;
            }
        }
    }

    let Some(snapshot) = plan.snapshot else {
        return;
    };
    match store.has_migration_snapshot(&row.session_id, &row.id) {
        Ok(true) => summary.snapshots_skipped += 1,
        Ok(false) if options.dry_run => summary.snapshots_created += 1,
        Ok(false) => match store.append_snapshot(AppendSnapshotRequest {
            session_id: row.session_id.clone(),
            edit_source_id: row.id.clone(),
            snapshot_type: SnapshotType::Migration,
            message_ids: snapshot.message_ids,
            created_at_ms: now_ms(),
        }) {
            Ok(_) => summary.snapshots_created += 1,
            Err(err) => {
                eprintln!("anchor {}/{}: snapshot: {err}", row.session_id, row.id);
                summary.snapshots_failed += 1;
            }
        },
        Err(err) => {
            eprintln!("anchor {}/{}: snapshot: {err}", row.session_id, row.id);
            summary.snapshots_failed += 1;
        }
    }
}
