//! Three-way reconciliation between snapshot, mirror, and durable backend.
//!
//! Every public mutation follows the same protocol:
//!
//! 1. apply the change synchronously to the in-memory snapshot;
//! 2. publish change notifications (the UI reflects the optimistic state
//!    immediately);
//! 3. mirror the change into the replica mirror in one atomic batch, when
//!    multi-client mode is enabled;
//! 4. persist the change through the persistence gateway, awaited;
//! 5. on persistence failure, consult the operation's declared
//!    [`ConsistencyLevel`]: `Strict` rolls snapshot and mirror back to their
//!    pre-mutation value and propagates the failure, `Optimistic` logs and
//!    leaves the advanced state in place.
//!
//! The snapshot mutation always completes before the only suspension point
//! (the gateway call), so readers never observe a torn update. There is no
//! retry policy and no timeout; a hung gateway call delays settlement of
//! that one mutation without blocking further synchronous mutations.

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, TrellisError};
use crate::gateway::PersistenceGateway;
use crate::graph::TaskGraphStore;
use crate::mirror::{MirrorEvent, MirrorOp, ReplicaMirror};
use crate::model::{Task, TaskId, TaskPatch, TimeEntry, TriageStatus};
use crate::notify::{ChangeEvent, ChangeNotifier};
use crate::propagation::{self, MutationOrigin};
use crate::timer;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Declared consistency guarantee for one reconciled mutation.
///
/// This is an explicit, testable parameter rather than an implicit code-path
/// distinction: any update can be issued at either level, and the level
/// fully determines the failure behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyLevel {
    /// Persistence failure rolls back snapshot and mirror and is returned
    /// to the caller.
    Strict,
    /// Persistence failure is logged; snapshot and mirror stay advanced.
    /// The durable store can silently diverge until the next full load.
    Optimistic,
}

/// How a reconciled mutation reaches the durable backend.
#[derive(Debug, Clone)]
enum GatewayPlan {
    /// Per-task create/update/delete calls, each independently failable.
    PerTask,
    /// One `bulk_update_priorities` call.
    BulkPriorities(Vec<(TaskId, i64)>),
    /// One `import_all` call with the whole snapshot.
    ImportAll,
    /// One `clear_all` call.
    ClearAll,
}

/// One reconciliation transaction: the settled snapshot delta plus its
/// declared consistency level and the notifications it owes.
#[derive(Debug)]
struct Reconciliation {
    op: &'static str,
    level: ConsistencyLevel,
    creates: Vec<TaskId>,
    updates: Vec<TaskId>,
    deletes: Vec<TaskId>,
    plan: GatewayPlan,
    events: Vec<ChangeEvent>,
    /// Mirror keys are wiped before upserts (bulk replacement paths).
    clear_mirror: bool,
}

impl Reconciliation {
    fn new(op: &'static str, level: ConsistencyLevel) -> Self {
        Self {
            op,
            level,
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            plan: GatewayPlan::PerTask,
            events: vec![ChangeEvent::TasksChanged],
            clear_mirror: false,
        }
    }

    fn affected_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.creates
            .iter()
            .chain(self.updates.iter())
            .chain(self.deletes.iter())
    }
}

/// Where the startup snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Loaded from the durable backend.
    Backend,
    /// The replica mirror already held entries from other live clients and
    /// was treated as authoritative.
    Mirror,
}

/// Result of [`SyncReconciler::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub source: SnapshotSource,
    /// Number of tasks loaded into the snapshot.
    pub loaded: usize,
    /// Records from the winning source skipped because they failed to
    /// decode. Discarded records from the losing source are not counted.
    pub skipped: usize,
    /// True when the one-time default seed ran. The external initializer
    /// must record the first-run flag so subsequent empty states are not
    /// re-seeded.
    pub seeded: bool,
}

/// Construction-time configuration for the reconciler.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Assignee filter passed to the gateway's `list` on startup.
    pub user_id: Option<String>,
    /// Whether a previous run already recorded the first-run flag. When
    /// true, an empty backend is taken at face value (the user deleted
    /// everything) and never re-seeded.
    pub first_run_recorded: bool,
    /// Titles created by the one-time seed. Empty means no seeding.
    pub seed_titles: Vec<String>,
}

impl SyncConfig {
    /// Default seed set used when the caller does not supply titles.
    #[must_use]
    pub fn default_seed_titles() -> Vec<String> {
        vec![
            "Capture your first task".to_string(),
            "Break a task into subtasks".to_string(),
            "Start the timer on a task".to_string(),
        ]
    }
}

/// Orchestrates the snapshot, the optional replica mirror, and the durable
/// backend. Owns the canonical [`TaskGraphStore`].
pub struct SyncReconciler {
    graph: TaskGraphStore,
    gateway: Box<dyn PersistenceGateway>,
    mirror: Option<Box<dyn ReplicaMirror>>,
    notifier: Arc<ChangeNotifier>,
    clock: Box<dyn Clock>,
    config: SyncConfig,
    first_run_recorded: bool,
}

impl SyncReconciler {
    /// Creates a reconciler in single-client mode (no mirror).
    #[must_use]
    pub fn new(gateway: Box<dyn PersistenceGateway>, config: SyncConfig) -> Self {
        let first_run_recorded = config.first_run_recorded;
        Self {
            graph: TaskGraphStore::new(),
            gateway,
            mirror: None,
            notifier: Arc::new(ChangeNotifier::new()),
            clock: Box::new(SystemClock),
            config,
            first_run_recorded,
        }
    }

    /// Enables multi-client mode by attaching a replica mirror.
    #[must_use]
    pub fn with_mirror(mut self, mirror: Box<dyn ReplicaMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Replaces the wall clock, for deterministic timer tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The notifier UI consumers subscribe to.
    #[must_use]
    pub fn notifier(&self) -> Arc<ChangeNotifier> {
        Arc::clone(&self.notifier)
    }

    /// Read-only view of the canonical snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &TaskGraphStore {
        &self.graph
    }

    // =========================================================================
    // Startup reconciliation
    // =========================================================================

    /// Loads the snapshot from the durable backend, preferring the replica
    /// mirror when it already holds entries (it may reflect more recent
    /// writes from other live clients). Runs the one-time default seed when
    /// the backend is empty and no first-run flag was recorded.
    ///
    /// Malformed stored records are skipped with a warning and never abort
    /// the load.
    ///
    /// # Errors
    ///
    /// Returns an error only when the backend list call itself fails.
    pub async fn initialize(&mut self) -> Result<StartupReport> {
        let raw = self.gateway.list(self.config.user_id.as_deref()).await?;
        let mut backend_skipped = 0;
        let backend_tasks = decode_records(raw.into_iter(), &mut backend_skipped);

        let mut mirror_skipped = 0;
        let mirror_tasks = match &self.mirror {
            Some(mirror) if !mirror.is_empty() => {
                Some(decode_records(mirror.values().into_iter(), &mut mirror_skipped))
            }
            _ => None,
        };

        let report = if let Some(tasks) = mirror_tasks {
            info!("startup: mirror holds {} entries, treating as authoritative", tasks.len());
            let loaded = tasks.len();
            self.graph.import_all(tasks);
            // Only the winning source's decode failures count: discarded
            // backend records never affected the load.
            StartupReport {
                source: SnapshotSource::Mirror,
                loaded,
                skipped: mirror_skipped,
                seeded: false,
            }
        } else {
            let loaded = backend_tasks.len();
            self.graph.import_all(backend_tasks);
            // An attached but empty mirror is brought up to date so other
            // clients joining later converge from it.
            if loaded > 0 {
                self.mirror_replace_all();
            }
            let seeded = if loaded == 0 && !self.first_run_recorded {
                self.seed_defaults().await;
                true
            } else {
                false
            };
            StartupReport {
                source: SnapshotSource::Backend,
                loaded: self.graph.len(),
                skipped: backend_skipped,
                seeded,
            }
        };

        self.notifier.publish(&ChangeEvent::TasksChanged);
        Ok(report)
    }

    /// One-shot default seed: creates the configured starter tasks through
    /// the normal optimistic write path and marks the flag internally so a
    /// later delete-everything state is not re-seeded within this process.
    async fn seed_defaults(&mut self) {
        let titles = if self.config.seed_titles.is_empty() {
            SyncConfig::default_seed_titles()
        } else {
            self.config.seed_titles.clone()
        };
        info!("first run: seeding {} default tasks", titles.len());

        let mut txn = Reconciliation::new("seed", ConsistencyLevel::Optimistic);
        txn.events.clear();
        for title in titles {
            match self.graph.create(title, None) {
                Ok((id, _)) => txn.creates.push(id),
                Err(e) => warn!("seed task creation failed: {e}"),
            }
        }
        self.first_run_recorded = true;
        // Seed failures are optimistic by definition; commit cannot fail.
        let _ = self.commit(txn, None).await;
    }

    // =========================================================================
    // Remote-change intake
    // =========================================================================

    /// Feeds one mirror change event into the reconciler.
    ///
    /// Local-tagged events were already applied through the synchronous
    /// write path and are ignored to avoid double-processing. Remote-tagged
    /// events replace the entire snapshot from the mirror's current contents
    /// and notify consumers.
    pub fn apply_mirror_event(&mut self, event: MirrorEvent) {
        if event.local {
            debug!("ignoring local mirror event");
            return;
        }
        let Some(mirror) = &self.mirror else {
            return;
        };
        let mut skipped = 0;
        let tasks = decode_records(mirror.values().into_iter(), &mut skipped);
        if skipped > 0 {
            warn!("remote intake: skipped {skipped} malformed mirror records");
        }
        self.graph.import_all(tasks);
        self.notifier.publish(&ChangeEvent::TasksChanged);
    }

    // =========================================================================
    // Task graph operations
    // =========================================================================

    /// Creates a task, optionally attached under a parent. An open timer on
    /// the parent migrates onto the new child.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown parent.
    pub async fn create_task(
        &mut self,
        title: impl Into<String>,
        parent_id: Option<&TaskId>,
    ) -> Result<TaskId> {
        let (id, touched) = self.graph.create(title, parent_id)?;

        let mut txn = Reconciliation::new("create", ConsistencyLevel::Optimistic);
        txn.creates.push(id.clone());
        txn.updates
            .extend(touched.into_iter().filter(|t| *t != id));
        self.commit(txn, None).await?;
        Ok(id)
    }

    /// Applies a partial update at the default optimistic level.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id.
    pub async fn update_task(&mut self, id: &TaskId, patch: TaskPatch) -> Result<()> {
        self.update_task_with(id, patch, ConsistencyLevel::Optimistic)
            .await
    }

    /// Applies a partial update at an explicit consistency level.
    ///
    /// A patch that carries `triage_status` re-derives the parent's status
    /// afterwards so invariant 4 holds, but never cascades downward; use
    /// [`Self::set_status`] for the full state machine.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id, or the
    /// persistence failure when `level` is `Strict` and the backend write
    /// fails.
    pub async fn update_task_with(
        &mut self,
        id: &TaskId,
        patch: TaskPatch,
        level: ConsistencyLevel,
    ) -> Result<()> {
        let prior = self.capture_prior(level);
        self.graph.update(id, &patch)?;

        let mut txn = Reconciliation::new("update", level);
        txn.updates.push(id.clone());
        if patch.triage_status.is_some() {
            if let Some(parent_id) = self.graph.get(id).and_then(|t| t.parent_id.clone()) {
                let mut derived = Vec::new();
                propagation::check_parent_completion(&mut self.graph, &parent_id, &mut derived);
                txn.updates.extend(derived);
            }
        }
        self.commit(txn, prior).await
    }

    /// Reassigns a task to a user. Consistency-critical: on persistence
    /// failure the snapshot and the mirror are reverted to their
    /// pre-mutation value and the failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id, or the
    /// persistence failure after rollback.
    pub async fn assign_user(&mut self, id: &TaskId, user_id: Option<String>) -> Result<()> {
        let patch = TaskPatch {
            user_id: Some(user_id),
            ..Default::default()
        };
        self.update_task_with(id, patch, ConsistencyLevel::Strict)
            .await
    }

    /// Deletes the full subtree rooted at `id`. The in-memory closure is
    /// removed atomically; backend deletes are per task and a failure leaves
    /// the optimistic state in place and reports the operation as failed
    /// only in the log.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id.
    pub async fn delete_task(&mut self, id: &TaskId) -> Result<()> {
        let outcome = self.graph.delete(id)?;

        let mut txn = Reconciliation::new("delete", ConsistencyLevel::Optimistic);
        txn.deletes = outcome.removed;
        if let Some(parent_id) = outcome.former_parent {
            let mut derived = Vec::new();
            propagation::check_parent_completion(&mut self.graph, &parent_id, &mut derived);
            txn.updates.extend(derived);
        }
        self.commit(txn, None).await
    }

    /// Moves `id` under a new parent (or to the root). Cycle-creating and
    /// self targets are invariant-preserving no-ops: nothing is written, a
    /// no-op notification is still published, and `false` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] when `id` or the target parent
    /// does not exist.
    pub async fn reparent_task(
        &mut self,
        id: &TaskId,
        new_parent_id: Option<&TaskId>,
    ) -> Result<bool> {
        let outcome = self.graph.reparent(id, new_parent_id)?;
        if !outcome.applied {
            debug!("reparent no-op for {id}");
            self.notifier.publish(&ChangeEvent::TasksChanged);
            return Ok(false);
        }

        let mut txn = Reconciliation::new("reparent", ConsistencyLevel::Optimistic);
        txn.updates.push(id.clone());
        let mut derived = Vec::new();
        if let Some(old_parent) = &outcome.old_parent {
            txn.updates.push(old_parent.clone());
            propagation::check_parent_completion(&mut self.graph, old_parent, &mut derived);
        }
        if let Some(new_parent) = &outcome.new_parent {
            txn.updates.push(new_parent.clone());
            propagation::check_parent_completion(&mut self.graph, new_parent, &mut derived);
        }
        txn.updates.extend(derived);
        self.commit(txn, None).await?;
        Ok(true)
    }

    /// Wholesale replacement of the entire collection, bypassing per-task
    /// diffing. Mirror and backend are both rewritten from scratch.
    pub async fn import_tasks(&mut self, tasks: Vec<Task>) -> Result<()> {
        self.graph.import_all(tasks);

        let mut txn = Reconciliation::new("import", ConsistencyLevel::Optimistic);
        txn.updates = self.graph.iter().map(|t| t.id.clone()).collect();
        txn.plan = GatewayPlan::ImportAll;
        txn.clear_mirror = true;
        self.commit(txn, None).await
    }

    /// Clones the whole collection out, the export counterpart of
    /// [`Self::import_tasks`].
    #[must_use]
    pub fn export_tasks(&self) -> Vec<Task> {
        self.graph.export()
    }

    /// Empties snapshot, mirror, and backend.
    pub async fn clear_all(&mut self) -> Result<()> {
        self.graph.import_all(Vec::new());

        let mut txn = Reconciliation::new("clear", ConsistencyLevel::Optimistic);
        txn.plan = GatewayPlan::ClearAll;
        txn.clear_mirror = true;
        self.commit(txn, None).await
    }

    // =========================================================================
    // Status operations
    // =========================================================================

    /// Sets a task's status, running the downward cascade and upward
    /// derivation.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id.
    pub async fn set_status(&mut self, id: &TaskId, status: TriageStatus) -> Result<()> {
        let changed =
            propagation::set_status(&mut self.graph, id, status, MutationOrigin::UserInitiated)?;
        if changed.is_empty() {
            return Ok(());
        }
        let mut txn = Reconciliation::new("set_status", ConsistencyLevel::Optimistic);
        txn.updates = changed;
        self.commit(txn, None).await
    }

    /// Binary completion toggle: closed tasks revert to `Ready`, anything
    /// else completes with the downward cascade.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id.
    pub async fn toggle_done(&mut self, id: &TaskId) -> Result<()> {
        let changed = propagation::toggle_done(&mut self.graph, id)?;
        if changed.is_empty() {
            return Ok(());
        }
        let mut txn = Reconciliation::new("toggle_done", ConsistencyLevel::Optimistic);
        txn.updates = changed;
        self.commit(txn, None).await
    }

    // =========================================================================
    // Timer operations
    // =========================================================================

    /// Starts or stops the timer on `id`, closing any other open interval
    /// in the collection first and forcing the task to `WIP` on start.
    /// Returns true when an interval was opened.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id.
    pub async fn toggle_timer(&mut self, id: &TaskId) -> Result<bool> {
        let now_ms = self.clock.now_ms();
        let toggle = timer::toggle_timer(&mut self.graph, id, now_ms)?;

        let mut txn = Reconciliation::new("toggle_timer", ConsistencyLevel::Optimistic);
        txn.updates = toggle.changed;
        txn.events.push(ChangeEvent::TimerToggled(id.clone()));
        self.commit(txn, None).await?;
        Ok(toggle.started)
    }

    /// Replaces one timer interval on one task.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] or
    /// [`TrellisError::EntryOutOfRange`].
    pub async fn update_time_entry(
        &mut self,
        id: &TaskId,
        index: usize,
        entry: TimeEntry,
    ) -> Result<()> {
        timer::update_time_entry(&mut self.graph, id, index, entry)?;
        let mut txn = Reconciliation::new("update_time_entry", ConsistencyLevel::Optimistic);
        txn.updates.push(id.clone());
        self.commit(txn, None).await
    }

    /// Removes one timer interval on one task.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] or
    /// [`TrellisError::EntryOutOfRange`].
    pub async fn delete_time_entry(&mut self, id: &TaskId, index: usize) -> Result<()> {
        timer::delete_time_entry(&mut self.graph, id, index)?;
        let mut txn = Reconciliation::new("delete_time_entry", ConsistencyLevel::Optimistic);
        txn.updates.push(id.clone());
        self.commit(txn, None).await
    }

    /// Total tracked milliseconds for the subtree rooted at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id.
    pub fn total_time(&self, id: &TaskId) -> Result<i64> {
        timer::total_time(&self.graph, id)
    }

    /// Total difficulty points for the subtree rooted at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`TrellisError::TaskNotFound`] for an unknown id.
    pub fn total_difficulty(&self, id: &TaskId) -> Result<f64> {
        timer::total_difficulty(&self.graph, id)
    }

    // =========================================================================
    // Priority operations
    // =========================================================================

    /// Bulk priority rewrite from UI reordering, persisted through the
    /// backend's bulk call. Unknown ids are skipped.
    pub async fn reorder_priorities(&mut self, updates: Vec<(TaskId, i64)>) -> Result<()> {
        let mut txn = Reconciliation::new("reorder", ConsistencyLevel::Optimistic);
        let mut applied = Vec::new();
        for (id, priority) in updates {
            let patch = TaskPatch {
                priority: Some(priority),
                ..Default::default()
            };
            if self.graph.update(&id, &patch).is_ok() {
                txn.updates.push(id.clone());
                applied.push((id, priority));
            }
        }
        if applied.is_empty() {
            return Ok(());
        }
        txn.plan = GatewayPlan::BulkPriorities(applied);
        self.commit(txn, None).await
    }

    // =========================================================================
    // Reconciliation internals
    // =========================================================================

    fn capture_prior(&self, level: ConsistencyLevel) -> Option<TaskGraphStore> {
        match level {
            ConsistencyLevel::Strict => Some(self.graph.clone()),
            ConsistencyLevel::Optimistic => None,
        }
    }

    /// Runs steps 2–5 of the protocol for an already-applied snapshot
    /// mutation. `prior` must be the pre-mutation snapshot for `Strict`
    /// transactions.
    async fn commit(
        &mut self,
        txn: Reconciliation,
        prior: Option<TaskGraphStore>,
    ) -> Result<()> {
        for event in &txn.events {
            self.notifier.publish(event);
        }
        self.mirror_apply(&txn);

        if let Err(e) = self.persist(&txn).await {
            match txn.level {
                ConsistencyLevel::Strict => {
                    warn!("{}: persistence failed, rolling back: {e}", txn.op);
                    self.rollback(&txn, prior);
                    return Err(e);
                }
                ConsistencyLevel::Optimistic => {
                    // Known divergence risk: the durable store now lags the
                    // snapshot and the mirror until the next full load.
                    warn!("{}: persistence failed, keeping optimistic state: {e}", txn.op);
                }
            }
        }
        Ok(())
    }

    /// Mirrors the transaction's delta in one atomic batch.
    fn mirror_apply(&self, txn: &Reconciliation) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let mut ops = Vec::new();
        if txn.clear_mirror {
            ops.push(MirrorOp::Clear);
        }
        for id in txn.creates.iter().chain(txn.updates.iter()) {
            if let Some(task) = self.graph.get(id) {
                match serde_json::to_value(task) {
                    Ok(value) => ops.push(MirrorOp::Set(id.to_string(), value)),
                    Err(e) => warn!("mirror encode failed for {id}: {e}"),
                }
            }
        }
        for id in &txn.deletes {
            ops.push(MirrorOp::Delete(id.to_string()));
        }
        if !ops.is_empty() {
            mirror.transact(ops);
        }
    }

    /// Rewrites the entire mirror from the current snapshot.
    fn mirror_replace_all(&self) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let mut ops = vec![MirrorOp::Clear];
        for task in self.graph.iter() {
            match serde_json::to_value(task) {
                Ok(value) => ops.push(MirrorOp::Set(task.id.to_string(), value)),
                Err(e) => warn!("mirror encode failed for {}: {e}", task.id),
            }
        }
        mirror.transact(ops);
    }

    /// Drives the durable backend. Each call is independently failable; the
    /// first failure is returned after the remaining calls were attempted,
    /// so one bad record does not starve the rest of the batch.
    async fn persist(&self, txn: &Reconciliation) -> Result<()> {
        let mut first_failure: Option<TrellisError> = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                if first_failure.is_none() {
                    first_failure = Some(e);
                } else {
                    warn!("{}: additional persistence failure: {e}", txn.op);
                }
            }
        };

        match &txn.plan {
            GatewayPlan::PerTask => {
                for id in &txn.creates {
                    if let Some(task) = self.graph.get(id) {
                        record(self.gateway.create(task).await.map(|_| ()));
                    }
                }
                for id in &txn.updates {
                    if let Some(task) = self.graph.get(id) {
                        let patch = TaskPatch::replacing(task);
                        record(self.gateway.update(id, &patch).await.map(|_| ()));
                    }
                }
                for id in &txn.deletes {
                    record(self.gateway.delete(id).await);
                }
            }
            GatewayPlan::BulkPriorities(updates) => {
                record(self.gateway.bulk_update_priorities(updates).await);
            }
            GatewayPlan::ImportAll => {
                record(self.gateway.import_all(&self.graph.export()).await);
            }
            GatewayPlan::ClearAll => {
                record(self.gateway.clear_all().await);
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Restores snapshot and mirror to their pre-mutation value and lets
    /// consumers know the optimistic state they saw has been withdrawn.
    fn rollback(&mut self, txn: &Reconciliation, prior: Option<TaskGraphStore>) {
        let Some(prior) = prior else {
            warn!("{}: strict rollback requested without prior snapshot", txn.op);
            return;
        };

        if let Some(mirror) = &self.mirror {
            let mut ops = Vec::new();
            for id in txn.affected_ids() {
                match prior.get(id) {
                    Some(task) => match serde_json::to_value(task) {
                        Ok(value) => ops.push(MirrorOp::Set(id.to_string(), value)),
                        Err(e) => warn!("mirror encode failed for {id}: {e}"),
                    },
                    None => ops.push(MirrorOp::Delete(id.to_string())),
                }
            }
            if !ops.is_empty() {
                mirror.transact(ops);
            }
        }

        self.graph = prior;
        self.notifier.publish(&ChangeEvent::TasksChanged);
    }
}

impl std::fmt::Debug for SyncReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncReconciler")
            .field("tasks", &self.graph.len())
            .field("multi_client", &self.mirror.is_some())
            .field("first_run_recorded", &self.first_run_recorded)
            .finish()
    }
}

/// Decodes raw stored records, skipping malformed ones with a warning.
fn decode_records(
    records: impl Iterator<Item = serde_json::Value>,
    skipped: &mut usize,
) -> Vec<Task> {
    let mut tasks = Vec::new();
    for value in records {
        let key = value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("<no id>")
            .to_string();
        match serde_json::from_value::<Task>(value) {
            Ok(task) => tasks.push(task),
            Err(e) => {
                warn!("skipping malformed stored record {key}: {e}");
                *skipped += 1;
            }
        }
    }
    tasks
}
