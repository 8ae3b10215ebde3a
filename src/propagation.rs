//! Status propagation over the task tree.
//!
//! Two cascade directions run over `triage_status`:
//!
//! - **Downward**: an explicit user action setting a task to `Done` completes
//!   every descendant, except that a `Dropped` subtree stays dropped.
//! - **Upward derivation**: after a status change, reparent or delete, a
//!   parent's status is recomputed from its children (all closed with at
//!   least one `Done` forces `Done`; all `Dropped` forces `Dropped`; a
//!   closed parent whose children no longer qualify reverts to `Ready`).
//!
//! Upward derivation issues status updates of its own. Those carry
//! [`MutationOrigin::CascadeDerived`], which suppresses the downward cascade
//! and breaks the mutual-trigger loop; the origin is threaded explicitly
//! through the call instead of living in a shared flag.

use crate::error::{Result, TrellisError};
use crate::graph::TaskGraphStore;
use crate::model::{TaskId, TriageStatus};

/// Who initiated a status mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOrigin {
    /// Direct caller action; triggers the downward `Done` cascade.
    UserInitiated,
    /// Issued by upward derivation; never cascades downward.
    CascadeDerived,
}

/// Sets `id` to `status` and runs both cascade directions.
///
/// Returns every id whose stored state changed, the target first. Setting a
/// task to the status it already has is a no-op and returns an empty list.
///
/// # Errors
///
/// Returns [`TrellisError::TaskNotFound`] for an unknown id.
pub fn set_status(
    store: &mut TaskGraphStore,
    id: &TaskId,
    status: TriageStatus,
    origin: MutationOrigin,
) -> Result<Vec<TaskId>> {
    let task = store.get(id).ok_or_else(|| TrellisError::not_found(id))?;
    if task.triage_status == status {
        return Ok(Vec::new());
    }
    let parent_id = task.parent_id.clone();

    let mut changed = Vec::new();
    apply(store, id, status, &mut changed);

    if status == TriageStatus::Blocked {
        demote_blocked_priority(store, id, &mut changed);
    }
    if status == TriageStatus::Done && origin == MutationOrigin::UserInitiated {
        cascade_done(store, id, &mut changed);
    }
    if let Some(parent_id) = parent_id {
        check_parent_completion(store, &parent_id, &mut changed);
    }

    dedup(&mut changed);
    Ok(changed)
}

/// Binary convenience view over the 6-state enum: a closed task reverts to
/// `Ready`, anything else completes (with the usual downward cascade).
///
/// # Errors
///
/// Returns [`TrellisError::TaskNotFound`] for an unknown id.
pub fn toggle_done(store: &mut TaskGraphStore, id: &TaskId) -> Result<Vec<TaskId>> {
    let task = store.get(id).ok_or_else(|| TrellisError::not_found(id))?;
    let target = if task.triage_status.is_closed() {
        TriageStatus::Ready
    } else {
        TriageStatus::Done
    };
    set_status(store, id, target, MutationOrigin::UserInitiated)
}

/// Recomputes `parent_id`'s status from its children and walks upward while
/// statuses keep changing. Safe to call with any id; tasks without children
/// are left untouched.
///
/// Invoked after any status change, reparent or delete that touches a task
/// with a parent.
pub fn check_parent_completion(
    store: &mut TaskGraphStore,
    parent_id: &TaskId,
    changed: &mut Vec<TaskId>,
) {
    let Some(parent) = store.get(parent_id) else {
        return;
    };
    if parent.children.is_empty() {
        return;
    }

    let statuses: Vec<TriageStatus> = parent
        .children
        .iter()
        .filter_map(|c| store.get(c))
        .map(|t| t.triage_status)
        .collect();
    let all_closed = statuses.iter().all(|s| s.is_closed());
    let all_dropped = statuses.iter().all(|s| *s == TriageStatus::Dropped);

    let current = parent.triage_status;
    let target = if all_closed {
        if all_dropped {
            TriageStatus::Dropped
        } else {
            TriageStatus::Done
        }
    } else if current.is_closed() {
        TriageStatus::Ready
    } else {
        return;
    };
    if current == target {
        return;
    }

    let grandparent = parent.parent_id.clone();
    apply(store, parent_id, target, changed);
    // The derived update itself never cascades downward, but it does
    // re-trigger derivation one level further up.
    if let Some(grandparent) = grandparent {
        check_parent_completion(store, &grandparent, changed);
    }
}

/// Downward `Done` cascade. `Dropped` nodes are skipped along with their
/// entire subtree.
fn cascade_done(store: &mut TaskGraphStore, id: &TaskId, changed: &mut Vec<TaskId>) {
    let Some(task) = store.get(id) else {
        return;
    };
    let children = task.children.clone();
    for child_id in children {
        let Some(child) = store.get(&child_id) else {
            continue;
        };
        if child.triage_status == TriageStatus::Dropped {
            continue;
        }
        if child.triage_status != TriageStatus::Done {
            apply(store, &child_id, TriageStatus::Done, changed);
        }
        cascade_done(store, &child_id, changed);
    }
}

/// Blocked work must sort ahead of backlog work without manual reordering:
/// assign one less than the minimum priority among `Backlog` tasks. With no
/// backlog tasks present the priority is left alone.
fn demote_blocked_priority(store: &mut TaskGraphStore, id: &TaskId, changed: &mut Vec<TaskId>) {
    let Some(min) = store.min_backlog_priority() else {
        return;
    };
    let patch = crate::model::TaskPatch {
        priority: Some(min - 1),
        ..Default::default()
    };
    if store.update(id, &patch).is_ok() {
        changed.push(id.clone());
    }
}

fn apply(store: &mut TaskGraphStore, id: &TaskId, status: TriageStatus, changed: &mut Vec<TaskId>) {
    let patch = crate::model::TaskPatch {
        triage_status: Some(status),
        ..Default::default()
    };
    if store.update(id, &patch).is_ok() {
        changed.push(id.clone());
    }
}

fn dedup(changed: &mut Vec<TaskId>) {
    let mut seen = std::collections::HashSet::new();
    changed.retain(|id| seen.insert(id.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskPatch;

    fn set(store: &mut TaskGraphStore, id: &TaskId, status: TriageStatus) -> Vec<TaskId> {
        set_status(store, id, status, MutationOrigin::UserInitiated).unwrap()
    }

    #[test]
    fn test_done_cascades_to_descendants() {
        let mut store = TaskGraphStore::new();
        let (p, _) = store.create("p", None).unwrap();
        let (c1, _) = store.create("c1", Some(&p)).unwrap();
        let (g1, _) = store.create("g1", Some(&c1)).unwrap();

        set(&mut store, &p, TriageStatus::Done);

        assert_eq!(store.get(&c1).unwrap().triage_status, TriageStatus::Done);
        assert_eq!(store.get(&g1).unwrap().triage_status, TriageStatus::Done);
    }

    #[test]
    fn test_dropped_subtree_survives_done_cascade() {
        let mut store = TaskGraphStore::new();
        let (p, _) = store.create("p", None).unwrap();
        let (c1, _) = store.create("c1", Some(&p)).unwrap();
        let (c2, _) = store.create("c2", Some(&p)).unwrap();
        let (g2, _) = store.create("g2", Some(&c2)).unwrap();

        set(&mut store, &c2, TriageStatus::Dropped);
        set(&mut store, &p, TriageStatus::Done);

        assert_eq!(store.get(&c1).unwrap().triage_status, TriageStatus::Done);
        assert_eq!(store.get(&c2).unwrap().triage_status, TriageStatus::Dropped);
        // The subtree under the dropped child is spared as well.
        assert_eq!(store.get(&g2).unwrap().triage_status, TriageStatus::Backlog);
    }

    #[test]
    fn test_last_child_done_derives_parent_done() {
        let mut store = TaskGraphStore::new();
        let (p, _) = store.create("p", None).unwrap();
        let (c1, _) = store.create("c1", Some(&p)).unwrap();

        let changed = set(&mut store, &c1, TriageStatus::Done);

        assert_eq!(store.get(&p).unwrap().triage_status, TriageStatus::Done);
        assert!(changed.contains(&p));
    }

    #[test]
    fn test_reopening_child_reverts_parent_to_ready() {
        let mut store = TaskGraphStore::new();
        let (p, _) = store.create("p", None).unwrap();
        let (c1, _) = store.create("c1", Some(&p)).unwrap();

        set(&mut store, &c1, TriageStatus::Done);
        assert_eq!(store.get(&p).unwrap().triage_status, TriageStatus::Done);

        set(&mut store, &c1, TriageStatus::Ready);
        assert_eq!(store.get(&p).unwrap().triage_status, TriageStatus::Ready);
    }

    #[test]
    fn test_all_dropped_children_derive_parent_dropped() {
        let mut store = TaskGraphStore::new();
        let (p, _) = store.create("p", None).unwrap();
        let (c1, _) = store.create("c1", Some(&p)).unwrap();
        let (c2, _) = store.create("c2", Some(&p)).unwrap();

        set(&mut store, &c1, TriageStatus::Dropped);
        set(&mut store, &c2, TriageStatus::Dropped);

        assert_eq!(store.get(&p).unwrap().triage_status, TriageStatus::Dropped);
    }

    #[test]
    fn test_mixed_closed_children_derive_parent_done() {
        let mut store = TaskGraphStore::new();
        let (p, _) = store.create("p", None).unwrap();
        let (c1, _) = store.create("c1", Some(&p)).unwrap();
        let (c2, _) = store.create("c2", Some(&p)).unwrap();

        set(&mut store, &c1, TriageStatus::Dropped);
        set(&mut store, &c2, TriageStatus::Done);

        assert_eq!(store.get(&p).unwrap().triage_status, TriageStatus::Done);
    }

    #[test]
    fn test_derivation_walks_transitively_upward() {
        let mut store = TaskGraphStore::new();
        let (root, _) = store.create("root", None).unwrap();
        let (mid, _) = store.create("mid", Some(&root)).unwrap();
        let (leaf, _) = store.create("leaf", Some(&mid)).unwrap();

        set(&mut store, &leaf, TriageStatus::Done);

        assert_eq!(store.get(&mid).unwrap().triage_status, TriageStatus::Done);
        assert_eq!(store.get(&root).unwrap().triage_status, TriageStatus::Done);
    }

    #[test]
    fn test_derived_done_does_not_cascade_downward() {
        let mut store = TaskGraphStore::new();
        let (p, _) = store.create("p", None).unwrap();
        let (c1, _) = store.create("c1", Some(&p)).unwrap();
        let (c2, _) = store.create("c2", Some(&p)).unwrap();
        let (g2, _) = store.create("g2", Some(&c2)).unwrap();

        // c2 is closed via derivation from g2; c1 closes p via derivation.
        set(&mut store, &g2, TriageStatus::Done);
        set(&mut store, &c1, TriageStatus::Done);

        assert_eq!(store.get(&p).unwrap().triage_status, TriageStatus::Done);
        // Nothing under p was force-completed by the derived update.
        assert_eq!(store.get(&g2).unwrap().triage_status, TriageStatus::Done);
        assert_eq!(store.get(&c2).unwrap().triage_status, TriageStatus::Done);
    }

    #[test]
    fn test_blocked_demotes_priority_below_backlog() {
        let mut store = TaskGraphStore::new();
        let (x, _) = store.create("x", None).unwrap();
        store
            .update(
                &x,
                &TaskPatch {
                    triage_status: Some(TriageStatus::Ready),
                    priority: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        for (title, priority) in [("b1", 2), ("b2", 3), ("b3", 7)] {
            let (id, _) = store.create(title, None).unwrap();
            store
                .update(
                    &id,
                    &TaskPatch {
                        priority: Some(priority),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        set(&mut store, &x, TriageStatus::Blocked);

        assert_eq!(store.get(&x).unwrap().priority, 1);
    }

    #[test]
    fn test_blocked_without_backlog_keeps_priority() {
        let mut store = TaskGraphStore::new();
        let (x, _) = store.create("x", None).unwrap();
        store
            .update(
                &x,
                &TaskPatch {
                    triage_status: Some(TriageStatus::Ready),
                    priority: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();

        set(&mut store, &x, TriageStatus::Blocked);

        assert_eq!(store.get(&x).unwrap().priority, 5);
    }

    #[test]
    fn test_toggle_done_round_trip() {
        let mut store = TaskGraphStore::new();
        let (t, _) = store.create("t", None).unwrap();

        toggle_done(&mut store, &t).unwrap();
        assert_eq!(store.get(&t).unwrap().triage_status, TriageStatus::Done);

        toggle_done(&mut store, &t).unwrap();
        assert_eq!(store.get(&t).unwrap().triage_status, TriageStatus::Ready);
    }

    #[test]
    fn test_toggle_done_from_dropped_reverts_to_ready() {
        let mut store = TaskGraphStore::new();
        let (t, _) = store.create("t", None).unwrap();
        set(&mut store, &t, TriageStatus::Dropped);

        toggle_done(&mut store, &t).unwrap();
        assert_eq!(store.get(&t).unwrap().triage_status, TriageStatus::Ready);
    }

    #[test]
    fn test_same_status_is_noop() {
        let mut store = TaskGraphStore::new();
        let (t, _) = store.create("t", None).unwrap();
        let changed = set(&mut store, &t, TriageStatus::Backlog);
        assert!(changed.is_empty());
    }

    #[test]
    fn test_childless_parent_is_never_derived() {
        let mut store = TaskGraphStore::new();
        let (p, _) = store.create("p", None).unwrap();
        let mut changed = Vec::new();
        check_parent_completion(&mut store, &p, &mut changed);
        assert!(changed.is_empty());
        assert_eq!(store.get(&p).unwrap().triage_status, TriageStatus::Backlog);
    }
}
