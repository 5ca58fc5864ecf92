#![forbid(unsafe_code)]

use super::*;
use crate::model::MessageRole;

fn legacy_message(id: &str, role: MessageRole) -> LegacyMessage {
    LegacyMessage {
        id: id.to_string(),
        role,
        content: format!("content of {id}"),
        created_at_ms: 1_000,
    }
}

fn anchor_with(branches: Vec<Vec<LegacyMessage>>, current: Option<usize>) -> LegacyAnchor {
    LegacyAnchor {
        id: "m1".to_string(),
        session_id: "sess-1".to_string(),
        current_branch: current,
        branches: branches
            .into_iter()
            .map(|messages| LegacyBranch { messages })
            .collect(),
    }
}

#[test]
fn two_branches_activate_recorded_index_and_flatten_with_anchor_per_branch() {
    let anchor = anchor_with(
        vec![
            vec![
                legacy_message("a", MessageRole::User),
                legacy_message("b", MessageRole::Assistant),
            ],
            vec![legacy_message("c", MessageRole::User)],
        ],
        Some(1),
    );

    let plan = plan_migration(&anchor);

    let actives = plan
        .messages
        .iter()
        .map(|m| (m.id.as_str(), m.is_active))
        .collect::<Vec<_>>();
    assert_eq!(actives, vec![("a", false), ("b", false), ("c", true)]);

    for planned in &plan.messages {
        assert_eq!(planned.parent_message_id, "m1");
        assert_eq!(planned.session_id, "sess-1");
    }

    let snapshot = plan.snapshot.expect("snapshot for anchor with branches");
    assert_eq!(snapshot.message_ids, vec!["m1", "a", "b", "m1", "c"]);
}

#[test]
fn unset_current_branch_defaults_to_first_branch() {
    let anchor = anchor_with(
        vec![
            vec![legacy_message("a", MessageRole::User)],
            vec![legacy_message("b", MessageRole::User)],
        ],
        None,
    );

    let plan = plan_migration(&anchor);
    let active_ids = plan
        .messages
        .iter()
        .filter(|m| m.is_active)
        .map(|m| m.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(active_ids, vec!["a"]);
}

#[test]
fn out_of_range_current_branch_falls_back_to_first_branch() {
    let anchor = anchor_with(
        vec![
            vec![legacy_message("a", MessageRole::User)],
            vec![legacy_message("b", MessageRole::User)],
        ],
        Some(7),
    );

    assert_eq!(effective_current_branch(&anchor), 0);
    let plan = plan_migration(&anchor);
    let active_ids = plan
        .messages
        .iter()
        .filter(|m| m.is_active)
        .map(|m| m.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(active_ids, vec!["a"]);
}

#[test]
fn empty_branches_array_plans_nothing() {
    let anchor = anchor_with(vec![], None);
    let plan = plan_migration(&anchor);
    assert!(plan.is_empty());
    assert!(plan.snapshot.is_none());
}

#[test]
fn branch_with_no_messages_contributes_no_anchor_entry() {
    let anchor = anchor_with(
        vec![vec![], vec![legacy_message("a", MessageRole::User)]],
        Some(1),
    );

    let plan = plan_migration(&anchor);
    assert_eq!(plan.messages.len(), 1);
    assert!(plan.messages[0].is_active);
    let snapshot = plan.snapshot.expect("snapshot");
    assert_eq!(snapshot.message_ids, vec!["m1", "a"]);
}

#[test]
fn all_branches_empty_plans_no_snapshot() {
    let anchor = anchor_with(vec![vec![], vec![]], None);
    let plan = plan_migration(&anchor);
    assert!(plan.is_empty());
}

#[test]
fn duplicate_id_across_branches_planned_once_first_occurrence_wins() {
    let anchor = anchor_with(
        vec![
            vec![
                legacy_message("a", MessageRole::User),
                legacy_message("b", MessageRole::Assistant),
            ],
            vec![legacy_message("a", MessageRole::User)],
        ],
        Some(0),
    );

    let plan = plan_migration(&anchor);
    assert_eq!(
        plan.messages
            .iter()
            .map(|m| m.id.as_str())
            .collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    assert!(plan.messages.iter().all(|m| m.is_active));

    // The second branch keeps its anchor marker but the repeated id is not
    // listed twice.
    let snapshot = plan.snapshot.expect("snapshot");
    assert_eq!(snapshot.message_ids, vec!["m1", "a", "b", "m1"]);
}

#[test]
fn sequence_numbers_restart_per_branch() {
    let anchor = anchor_with(
        vec![
            vec![
                legacy_message("a", MessageRole::User),
                legacy_message("b", MessageRole::Assistant),
            ],
            vec![
                legacy_message("c", MessageRole::User),
                legacy_message("d", MessageRole::Assistant),
            ],
        ],
        Some(0),
    );

    let plan = plan_migration(&anchor);
    let sequence = plan
        .messages
        .iter()
        .map(|m| (m.id.as_str(), m.sequence_number))
        .collect::<Vec<_>>();
    assert_eq!(sequence, vec![("a", 0), ("b", 1), ("c", 0), ("d", 1)]);
}
