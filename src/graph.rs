//! Canonical in-memory task collection.
//!
//! [`TaskGraphStore`] owns the snapshot every other component mutates. It is
//! a plain owned value with explicit construction so tests can instantiate
//! independent stores; nothing here is global. All mutation is synchronous;
//! mirroring and durable persistence happen above this layer in the
//! reconciler.
//!
//! # Invariants
//!
//! After every mutation:
//! - the parent graph is acyclic;
//! - every task's `children` cache equals the set of tasks whose `parent_id`
//!   points at it;
//! - no task is ever partially deleted (subtree removal is all-or-nothing
//!   within the snapshot).

use crate::error::{Result, TrellisError};
use crate::model::{Task, TaskId, TaskPatch};
use std::collections::{HashMap, HashSet};

/// Outcome of a subtree delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Every id removed, root first in discovery order.
    pub removed: Vec<TaskId>,
    /// The parent the root was detached from, if it had one.
    pub former_parent: Option<TaskId>,
}

/// Outcome of a reparent attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReparentOutcome {
    /// False when the request was an invariant-preserving no-op
    /// (self-target, descendant target, or unchanged parent).
    pub applied: bool,
    pub old_parent: Option<TaskId>,
    pub new_parent: Option<TaskId>,
}

impl ReparentOutcome {
    fn noop(old_parent: Option<TaskId>) -> Self {
        Self {
            applied: false,
            new_parent: old_parent.clone(),
            old_parent,
        }
    }
}

/// The canonical task collection.
#[derive(Debug, Clone, Default)]
pub struct TaskGraphStore {
    tasks: HashMap<TaskId, Task>,
}

impl TaskGraphStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Number of tasks in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the snapshot holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Whether `id` exists in the snapshot.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Iterates over all tasks in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Clones the whole collection out, for export and mirroring.
    #[must_use]
    pub fn export(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    /// Walks the ancestor chain of `id` (excluding `id` itself). Stops if a
    /// task is revisited, so a corrupted chain cannot loop forever.
    #[must_use]
    pub fn ancestors(&self, id: &TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut cursor = self.tasks.get(id).and_then(|t| t.parent_id.clone());
        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                break;
            }
            cursor = self.tasks.get(&current).and_then(|t| t.parent_id.clone());
            out.push(current);
        }
        out
    }

    /// The full subtree rooted at `id`, root first, in discovery order.
    #[must_use]
    pub fn subtree(&self, id: &TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(task) = self.tasks.get(&current) {
                stack.extend(task.children.iter().cloned());
                out.push(current);
            }
        }
        out
    }

    /// Minimum priority among `Backlog` tasks, if any exist.
    #[must_use]
    pub fn min_backlog_priority(&self) -> Option<i64> {
        self.tasks
            .values()
            .filter(|t| t.triage_status == crate::model::TriageStatus::Backlog)
            .map(|t| t.priority)
            .min()
    }

    /// The task currently holding an open timer interval, if any.
    #[must_use]
    pub fn open_timer_task(&self) -> Option<&Task> {
        self.tasks.values().find(|t| t.has_open_timer())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Creates a task with store defaults and attaches it under `parent_id`
    /// when given. If the parent had an open timer interval, the interval
    /// moves onto the new child: decomposing a task migrates in-flight work
    /// to the leaf where it now belongs.
    ///
    /// Returns the new id and every id touched (the new task, plus the
    /// parent when attached).
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] when `parent_id` names a task
    /// that does not exist.
    pub fn create(
        &mut self,
        title: impl Into<String>,
        parent_id: Option<&TaskId>,
    ) -> Result<(TaskId, Vec<TaskId>)> {
        let id = TaskId::generate();
        let mut task = Task::new(id.clone(), title);
        let mut touched = vec![id.clone()];

        if let Some(parent_id) = parent_id {
            let parent = self
                .tasks
                .get_mut(parent_id)
                .ok_or_else(|| TrellisError::not_found(parent_id))?;
            task.parent_id = Some(parent_id.clone());
            parent.children.push(id.clone());
            if let Some(open_idx) = parent.open_entry_index() {
                let entry = parent.timer.remove(open_idx);
                task.timer.push(entry);
            }
            touched.push(parent_id.clone());
        }

        self.tasks.insert(id.clone(), task);
        Ok((id, touched))
    }

    /// Merges a partial field set into the task. `id`, `parent_id` and
    /// `children` are never mutated through this path.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id.
    pub fn update(&mut self, id: &TaskId, patch: &TaskPatch) -> Result<()> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| TrellisError::not_found(id))?;
        patch.apply_to(task);
        Ok(())
    }

    /// Removes the full subtree rooted at `id` and detaches the root from
    /// its former parent's children cache. The whole closure is removed from
    /// the snapshot in one synchronous step.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id.
    pub fn delete(&mut self, id: &TaskId) -> Result<DeleteOutcome> {
        if !self.tasks.contains_key(id) {
            return Err(TrellisError::not_found(id));
        }
        let removed = self.subtree(id);
        let former_parent = self
            .tasks
            .get(id)
            .and_then(|t| t.parent_id.clone());

        for rid in &removed {
            self.tasks.remove(rid);
        }
        if let Some(parent_id) = &former_parent {
            if let Some(parent) = self.tasks.get_mut(parent_id) {
                parent.children.retain(|c| c != id);
            }
        }
        Ok(DeleteOutcome {
            removed,
            former_parent,
        })
    }

    /// Moves `id` under `new_parent_id` (or to the root when `None`).
    ///
    /// Silent no-op when the target is the task itself, a descendant of the
    /// task (which would create a cycle), or the current parent. The no-op is
    /// invariant-preserving by design and is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] when `id` or the named parent
    /// does not exist.
    pub fn reparent(
        &mut self,
        id: &TaskId,
        new_parent_id: Option<&TaskId>,
    ) -> Result<ReparentOutcome> {
        if !self.tasks.contains_key(id) {
            return Err(TrellisError::not_found(id));
        }
        let old_parent = self.tasks[id].parent_id.clone();

        if let Some(target) = new_parent_id {
            if !self.tasks.contains_key(target) {
                return Err(TrellisError::not_found(target));
            }
            if target == id {
                return Ok(ReparentOutcome::noop(old_parent));
            }
            // Attaching under our own descendant would close a cycle.
            if self.ancestors(target).contains(id) {
                return Ok(ReparentOutcome::noop(old_parent));
            }
        }
        if old_parent.as_ref() == new_parent_id {
            return Ok(ReparentOutcome::noop(old_parent));
        }

        if let Some(parent_id) = &old_parent {
            if let Some(parent) = self.tasks.get_mut(parent_id) {
                parent.children.retain(|c| c != id);
            }
        }
        if let Some(target) = new_parent_id {
            if let Some(parent) = self.tasks.get_mut(target) {
                parent.children.push(id.clone());
            }
        }
        let task = self.tasks.get_mut(id).expect("checked above");
        task.parent_id = new_parent_id.cloned();

        Ok(ReparentOutcome {
            applied: true,
            old_parent,
            new_parent: new_parent_id.cloned(),
        })
    }

    /// Wholesale replacement of the entire collection. Children caches are
    /// rebuilt from `parent_id` pointers (the incoming caches are ignored);
    /// a `parent_id` naming a task not present in the import is cleared.
    pub fn import_all(&mut self, tasks: Vec<Task>) {
        self.tasks.clear();
        for mut task in tasks {
            task.children.clear();
            self.tasks.insert(task.id.clone(), task);
        }
        let ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        for id in ids {
            let parent_id = self.tasks[&id].parent_id.clone();
            match parent_id {
                Some(pid) if self.tasks.contains_key(&pid) => {
                    self.tasks
                        .get_mut(&pid)
                        .expect("checked above")
                        .children
                        .push(id);
                }
                Some(_) => {
                    self.tasks.get_mut(&id).expect("key from iteration").parent_id = None;
                }
                None => {}
            }
        }
    }

    // =========================================================================
    // Invariant checks (used heavily by tests, cheap enough to run anywhere)
    // =========================================================================

    /// True when no `parent_id` chain revisits a task.
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        for id in self.tasks.keys() {
            let mut seen = HashSet::new();
            seen.insert(id.clone());
            let mut cursor = self.tasks[id].parent_id.clone();
            while let Some(current) = cursor {
                if !seen.insert(current.clone()) {
                    return false;
                }
                cursor = self.tasks.get(&current).and_then(|t| t.parent_id.clone());
            }
        }
        true
    }

    /// True when every task's `children` cache equals the actual set of
    /// tasks whose `parent_id` points at it.
    #[must_use]
    pub fn children_caches_consistent(&self) -> bool {
        for (id, task) in &self.tasks {
            let cached: HashSet<&TaskId> = task.children.iter().collect();
            if cached.len() != task.children.len() {
                return false;
            }
            let actual: HashSet<&TaskId> = self
                .tasks
                .values()
                .filter(|t| t.parent_id.as_ref() == Some(id))
                .map(|t| &t.id)
                .collect();
            if cached != actual {
                return false;
            }
            if task.children.iter().any(|c| !self.tasks.contains_key(c)) {
                return false;
            }
        }
        true
    }

    /// Number of open timer intervals across the whole collection.
    #[must_use]
    pub fn open_timer_count(&self) -> usize {
        self.tasks.values().filter(|t| t.has_open_timer()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TimeEntry, TriageStatus};

    fn store_with_chain() -> (TaskGraphStore, TaskId, TaskId, TaskId) {
        let mut store = TaskGraphStore::new();
        let (a, _) = store.create("a", None).unwrap();
        let (b, _) = store.create("b", Some(&a)).unwrap();
        let (c, _) = store.create("c", Some(&b)).unwrap();
        (store, a, b, c)
    }

    #[test]
    fn test_create_defaults() {
        let mut store = TaskGraphStore::new();
        let (id, touched) = store.create("first", None).unwrap();
        let task = store.get(&id).unwrap();
        assert_eq!(task.triage_status, TriageStatus::Backlog);
        assert_eq!(task.difficulty.points(), 1.0);
        assert_eq!(task.priority, 0);
        assert!(task.timer.is_empty());
        assert_eq!(touched, vec![id]);
    }

    #[test]
    fn test_create_attaches_to_parent() {
        let mut store = TaskGraphStore::new();
        let (parent, _) = store.create("parent", None).unwrap();
        let (child, touched) = store.create("child", Some(&parent)).unwrap();

        assert_eq!(store.get(&child).unwrap().parent_id, Some(parent.clone()));
        assert!(store.get(&parent).unwrap().children.contains(&child));
        assert!(touched.contains(&parent));
        assert!(store.children_caches_consistent());
    }

    #[test]
    fn test_create_unknown_parent_is_error() {
        let mut store = TaskGraphStore::new();
        let err = store.create("orphan", Some(&TaskId::from("ghost"))).unwrap_err();
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_create_migrates_open_timer_to_child() {
        let mut store = TaskGraphStore::new();
        let (parent, _) = store.create("parent", None).unwrap();
        store
            .tasks
            .get_mut(&parent)
            .unwrap()
            .timer
            .push(TimeEntry::open_at(1_000));

        let (child, _) = store.create("child", Some(&parent)).unwrap();

        assert!(!store.get(&parent).unwrap().has_open_timer());
        let child_task = store.get(&child).unwrap();
        assert_eq!(child_task.timer.len(), 1);
        assert_eq!(child_task.timer[0].start_time, 1_000);
        assert!(child_task.timer[0].is_open());
        assert_eq!(store.open_timer_count(), 1);
    }

    #[test]
    fn test_update_never_touches_structure() {
        let (mut store, a, b, _) = store_with_chain();
        let patch = TaskPatch {
            title: Some("renamed".into()),
            parent_id: Some(None),
            ..Default::default()
        };
        store.update(&b, &patch).unwrap();

        let task = store.get(&b).unwrap();
        assert_eq!(task.title, "renamed");
        assert_eq!(task.parent_id, Some(a));
        assert!(store.children_caches_consistent());
    }

    #[test]
    fn test_delete_removes_whole_closure() {
        let mut store = TaskGraphStore::new();
        let (root, _) = store.create("root", None).unwrap();
        let (a, _) = store.create("a", Some(&root)).unwrap();
        let (b, _) = store.create("b", Some(&a)).unwrap();
        let (c, _) = store.create("c", Some(&a)).unwrap();
        let (d, _) = store.create("d", Some(&c)).unwrap();

        let outcome = store.delete(&a).unwrap();

        let removed: HashSet<_> = outcome.removed.into_iter().collect();
        assert_eq!(removed, HashSet::from([a.clone(), b, c, d]));
        assert_eq!(outcome.former_parent, Some(root.clone()));
        assert!(!store.get(&root).unwrap().children.contains(&a));
        assert_eq!(store.len(), 1);
        assert!(store.children_caches_consistent());
    }

    #[test]
    fn test_reparent_moves_subtree() {
        let (mut store, a, b, c) = store_with_chain();
        let outcome = store.reparent(&c, Some(&a)).unwrap();

        assert!(outcome.applied);
        assert_eq!(outcome.old_parent, Some(b.clone()));
        assert_eq!(store.get(&c).unwrap().parent_id, Some(a.clone()));
        assert!(store.get(&a).unwrap().children.contains(&c));
        assert!(!store.get(&b).unwrap().children.contains(&c));
        assert!(store.is_acyclic());
        assert!(store.children_caches_consistent());
    }

    #[test]
    fn test_reparent_to_self_is_noop() {
        let (mut store, _, b, _) = store_with_chain();
        let before = store.clone();
        let outcome = store.reparent(&b, Some(&b)).unwrap();
        assert!(!outcome.applied);
        assert_eq!(store.export().len(), before.export().len());
        assert_eq!(store.get(&b).unwrap().parent_id, before.get(&b).unwrap().parent_id);
    }

    #[test]
    fn test_reparent_under_descendant_is_noop() {
        let (mut store, a, _, c) = store_with_chain();
        let outcome = store.reparent(&a, Some(&c)).unwrap();
        assert!(!outcome.applied);
        assert!(store.get(&a).unwrap().parent_id.is_none());
        assert!(store.is_acyclic());
        assert!(store.children_caches_consistent());
    }

    #[test]
    fn test_reparent_to_root() {
        let (mut store, _, b, c) = store_with_chain();
        let outcome = store.reparent(&c, None).unwrap();
        assert!(outcome.applied);
        assert!(store.get(&c).unwrap().parent_id.is_none());
        assert!(!store.get(&b).unwrap().children.contains(&c));
        assert!(store.children_caches_consistent());
    }

    #[test]
    fn test_import_all_rebuilds_children_caches() {
        let mut a = Task::new(TaskId::from("a"), "a");
        let mut b = Task::new(TaskId::from("b"), "b");
        b.parent_id = Some(TaskId::from("a"));
        // Stale incoming cache must be ignored.
        a.children.push(TaskId::from("ghost"));

        let mut store = TaskGraphStore::new();
        store.import_all(vec![a, b]);

        assert_eq!(store.get(&TaskId::from("a")).unwrap().children, vec![TaskId::from("b")]);
        assert!(store.children_caches_consistent());
        assert!(store.is_acyclic());
    }

    #[test]
    fn test_import_all_clears_dangling_parent() {
        let mut orphan = Task::new(TaskId::from("x"), "x");
        orphan.parent_id = Some(TaskId::from("missing"));

        let mut store = TaskGraphStore::new();
        store.import_all(vec![orphan]);

        assert!(store.get(&TaskId::from("x")).unwrap().parent_id.is_none());
        assert!(store.children_caches_consistent());
    }

    #[test]
    fn test_subtree_and_ancestors() {
        let (store, a, b, c) = store_with_chain();
        let subtree: HashSet<_> = store.subtree(&a).into_iter().collect();
        assert_eq!(subtree, HashSet::from([a.clone(), b.clone(), c.clone()]));
        assert_eq!(store.ancestors(&c), vec![b, a]);
    }

    #[test]
    fn test_min_backlog_priority() {
        let mut store = TaskGraphStore::new();
        let (a, _) = store.create("a", None).unwrap();
        let (b, _) = store.create("b", None).unwrap();
        store.tasks.get_mut(&a).unwrap().priority = 7;
        store.tasks.get_mut(&b).unwrap().priority = 2;
        assert_eq!(store.min_backlog_priority(), Some(2));

        store.tasks.get_mut(&b).unwrap().triage_status = TriageStatus::Done;
        assert_eq!(store.min_backlog_priority(), Some(7));
    }
}
