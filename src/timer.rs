//! Timer coordination and work aggregation.
//!
//! At most one task in the entire collection may hold an open timer
//! interval. Toggling a timer on closes whatever interval is open anywhere
//! else first, then opens a fresh interval and forces the task to `WIP`.
//!
//! Aggregation assumes work lives at leaves: once a task has children, its
//! own intervals and difficulty stop counting and the aggregate is the sum
//! over its children, recursively.

use crate::error::{Result, TrellisError};
use crate::graph::TaskGraphStore;
use crate::model::{TaskId, TimeEntry, TriageStatus};
use crate::propagation::{self, MutationOrigin};

/// Outcome of a [`toggle_timer`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerToggle {
    /// True when a new interval was opened on the target, false when the
    /// target's own interval was closed.
    pub started: bool,
    /// Every task whose stored state changed, including a previous timer
    /// holder whose interval was closed and any status derivations.
    pub changed: Vec<TaskId>,
}

/// Starts or stops the timer on `id` at instant `now_ms`.
///
/// Stopping closes the task's open interval. Starting first closes any open
/// interval elsewhere in the collection, then opens a new interval and
/// forces the task's status to `WIP`.
///
/// # Errors
///
/// Returns [`TrellisError::TaskNotFound`] for an unknown id.
pub fn toggle_timer(store: &mut TaskGraphStore, id: &TaskId, now_ms: i64) -> Result<TimerToggle> {
    let task = store.get(id).ok_or_else(|| TrellisError::not_found(id))?;
    let mut changed = Vec::new();

    if let Some(open_idx) = task.open_entry_index() {
        close_entry(store, id, open_idx, now_ms);
        changed.push(id.clone());
        return Ok(TimerToggle {
            started: false,
            changed,
        });
    }

    // Exclusive-timer rule: scan the whole collection and close any other
    // running interval before opening ours.
    let holder = store
        .open_timer_task()
        .map(|t| (t.id.clone(), t.open_entry_index().unwrap_or_default()));
    if let Some((holder_id, open_idx)) = holder {
        close_entry(store, &holder_id, open_idx, now_ms);
        changed.push(holder_id);
    }

    {
        let mut timer = store.get(id).map(|t| t.timer.clone()).unwrap_or_default();
        timer.push(TimeEntry::open_at(now_ms));
        store.update(
            id,
            &crate::model::TaskPatch {
                timer: Some(timer),
                ..Default::default()
            },
        )?;
        changed.push(id.clone());
    }

    let status_changed =
        propagation::set_status(store, id, TriageStatus::Wip, MutationOrigin::UserInitiated)?;
    changed.extend(status_changed);
    dedup(&mut changed);

    Ok(TimerToggle {
        started: true,
        changed,
    })
}

/// Replaces the timer interval at `index` on one task. No cross-task effects.
///
/// # Errors
///
/// Returns [`TrellisError::TaskNotFound`] for an unknown id and
/// [`TrellisError::EntryOutOfRange`] for a bad index.
pub fn update_time_entry(
    store: &mut TaskGraphStore,
    id: &TaskId,
    index: usize,
    entry: TimeEntry,
) -> Result<()> {
    let task = store.get(id).ok_or_else(|| TrellisError::not_found(id))?;
    if index >= task.timer.len() {
        return Err(TrellisError::EntryOutOfRange {
            id: id.clone(),
            index,
            len: task.timer.len(),
        });
    }
    let mut timer = task.timer.clone();
    timer[index] = entry;
    store.update(
        id,
        &crate::model::TaskPatch {
            timer: Some(timer),
            ..Default::default()
        },
    )
}

/// Removes the timer interval at `index` on one task.
///
/// # Errors
///
/// Returns [`TrellisError::TaskNotFound`] for an unknown id and
/// [`TrellisError::EntryOutOfRange`] for a bad index.
pub fn delete_time_entry(store: &mut TaskGraphStore, id: &TaskId, index: usize) -> Result<()> {
    let task = store.get(id).ok_or_else(|| TrellisError::not_found(id))?;
    if index >= task.timer.len() {
        return Err(TrellisError::EntryOutOfRange {
            id: id.clone(),
            index,
            len: task.timer.len(),
        });
    }
    let mut timer = task.timer.clone();
    timer.remove(index);
    store.update(
        id,
        &crate::model::TaskPatch {
            timer: Some(timer),
            ..Default::default()
        },
    )
}

/// Total tracked milliseconds for the subtree rooted at `id`. A leaf
/// contributes the sum of its own closed intervals; a task with children
/// contributes only its children's aggregates.
///
/// # Errors
///
/// Returns [`TrellisError::TaskNotFound`] for an unknown id.
pub fn total_time(store: &TaskGraphStore, id: &TaskId) -> Result<i64> {
    let task = store.get(id).ok_or_else(|| TrellisError::not_found(id))?;
    if task.children.is_empty() {
        return Ok(task.timer.iter().map(TimeEntry::duration_ms).sum());
    }
    let mut sum = 0;
    for child in &task.children {
        sum += total_time(store, child)?;
    }
    Ok(sum)
}

/// Total difficulty points for the subtree rooted at `id`, with the same
/// leaves-only accounting as [`total_time`].
///
/// # Errors
///
/// Returns [`TrellisError::TaskNotFound`] for an unknown id.
pub fn total_difficulty(store: &TaskGraphStore, id: &TaskId) -> Result<f64> {
    let task = store.get(id).ok_or_else(|| TrellisError::not_found(id))?;
    if task.children.is_empty() {
        return Ok(task.difficulty.points());
    }
    let mut sum = 0.0;
    for child in &task.children {
        sum += total_difficulty(store, child)?;
    }
    Ok(sum)
}

fn close_entry(store: &mut TaskGraphStore, id: &TaskId, index: usize, now_ms: i64) {
    let Some(task) = store.get(id) else {
        return;
    };
    let mut timer = task.timer.clone();
    if let Some(entry) = timer.get_mut(index) {
        entry.end_time = now_ms;
    }
    let _ = store.update(
        id,
        &crate::model::TaskPatch {
            timer: Some(timer),
            ..Default::default()
        },
    );
}

fn dedup(changed: &mut Vec<TaskId>) {
    let mut seen = std::collections::HashSet::new();
    changed.retain(|id| seen.insert(id.clone()));
}
