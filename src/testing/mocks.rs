//! Mock implementations of the engine's external interfaces.
//!
//! These mocks provide controllable test doubles for the durable backend,
//! the replica mirror, and the wall clock, enabling deterministic tests.

use crate::clock::Clock;
use crate::error::{Result, TrellisError};
use crate::gateway::PersistenceGateway;
use crate::mirror::{MirrorEvent, MirrorObserver, MirrorOp, ReplicaMirror};
use crate::model::{Task, TaskId, TaskPatch};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

// =============================================================================
// MockPersistenceGateway
// =============================================================================

#[derive(Debug, Default, Clone)]
struct FailureFlags {
    list: bool,
    create: bool,
    update: bool,
    delete: bool,
    bulk: bool,
    clear: bool,
    import: bool,
}

#[derive(Debug, Default)]
struct GatewayState {
    /// Stored records, raw JSON so tests can plant malformed entries.
    records: BTreeMap<String, Value>,
    fail: FailureFlags,
    /// Call log, one entry per gateway call, e.g. `"update:abc"`.
    calls: Vec<String>,
}

/// In-memory durable backend with per-operation failure injection.
///
/// Cloning yields a handle onto the same state.
///
/// # Example
///
/// ```rust,ignore
/// let gateway = MockPersistenceGateway::new().with_failing_updates();
/// let handle = gateway.clone();
/// // move `gateway` into the reconciler, assert through `handle`
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockPersistenceGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl MockPersistenceGateway {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-loads a stored task.
    #[must_use]
    pub fn with_task(self, task: &Task) -> Self {
        let value = serde_json::to_value(task).expect("task serializes");
        self.state
            .lock()
            .unwrap()
            .records
            .insert(task.id.to_string(), value);
        self
    }

    /// Plants a raw stored record, malformed ones included.
    #[must_use]
    pub fn with_raw_record(self, key: &str, value: Value) -> Self {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(key.to_string(), value);
        self
    }

    /// Makes every `update` call fail.
    #[must_use]
    pub fn with_failing_updates(self) -> Self {
        self.state.lock().unwrap().fail.update = true;
        self
    }

    /// Makes every `create` call fail.
    #[must_use]
    pub fn with_failing_creates(self) -> Self {
        self.state.lock().unwrap().fail.create = true;
        self
    }

    /// Makes every `delete` call fail.
    #[must_use]
    pub fn with_failing_deletes(self) -> Self {
        self.state.lock().unwrap().fail.delete = true;
        self
    }

    /// Makes the startup `list` call fail.
    #[must_use]
    pub fn with_failing_list(self) -> Self {
        self.state.lock().unwrap().fail.list = true;
        self
    }

    /// Toggles update failures at runtime, for failures injected mid-test.
    pub fn set_fail_updates(&self, fail: bool) {
        self.state.lock().unwrap().fail.update = fail;
    }

    /// Toggles delete failures at runtime.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail.delete = fail;
    }

    /// Number of stored records.
    #[must_use]
    pub fn stored_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    /// Decoded stored task by id, if present and well-formed.
    #[must_use]
    pub fn stored_task(&self, id: &TaskId) -> Option<Task> {
        let state = self.state.lock().unwrap();
        state
            .records
            .get(id.as_str())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn log(&self, entry: String) {
        self.state.lock().unwrap().calls.push(entry);
    }

    fn fail_if(&self, flag: bool, operation: &str) -> Result<()> {
        if flag {
            Err(TrellisError::persistence(operation, "injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistenceGateway for MockPersistenceGateway {
    async fn list(&self, user_id: Option<&str>) -> Result<Vec<Value>> {
        self.log(format!("list:{}", user_id.unwrap_or("*")));
        let state = self.state.lock().unwrap();
        if state.fail.list {
            return Err(TrellisError::persistence("list", "injected failure"));
        }
        let records = state
            .records
            .values()
            .filter(|v| match user_id {
                Some(uid) => v.get("userId").and_then(Value::as_str) == Some(uid),
                None => true,
            })
            .cloned()
            .collect();
        Ok(records)
    }

    async fn create(&self, task: &Task) -> Result<Task> {
        self.log(format!("create:{}", task.id));
        let fail = self.state.lock().unwrap().fail.create;
        self.fail_if(fail, "create")?;
        let value = serde_json::to_value(task)?;
        self.state
            .lock()
            .unwrap()
            .records
            .insert(task.id.to_string(), value);
        Ok(task.clone())
    }

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        self.log(format!("update:{id}"));
        let fail = self.state.lock().unwrap().fail.update;
        self.fail_if(fail, "update")?;

        let mut state = self.state.lock().unwrap();
        let record = state
            .records
            .get(id.as_str())
            .ok_or_else(|| TrellisError::not_found(id))?;
        let mut task: Task = serde_json::from_value(record.clone())
            .map_err(|e| TrellisError::malformed(id.as_str(), e.to_string()))?;
        patch.apply_to(&mut task);
        // The wire patch carries parent_id; the durable store applies it.
        if let Some(parent_id) = &patch.parent_id {
            task.parent_id = parent_id.clone();
        }
        let value = serde_json::to_value(&task)?;
        state.records.insert(id.to_string(), value);
        Ok(task)
    }

    async fn delete(&self, id: &TaskId) -> Result<()> {
        self.log(format!("delete:{id}"));
        let fail = self.state.lock().unwrap().fail.delete;
        self.fail_if(fail, "delete")?;
        self.state.lock().unwrap().records.remove(id.as_str());
        Ok(())
    }

    async fn bulk_update_priorities(&self, updates: &[(TaskId, i64)]) -> Result<()> {
        self.log(format!("bulk_priorities:{}", updates.len()));
        let fail = self.state.lock().unwrap().fail.bulk;
        self.fail_if(fail, "bulk_update_priorities")?;
        let mut state = self.state.lock().unwrap();
        for (id, priority) in updates {
            if let Some(record) = state.records.get_mut(id.as_str()) {
                record["priority"] = Value::from(*priority);
            }
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.log("clear_all".to_string());
        let fail = self.state.lock().unwrap().fail.clear;
        self.fail_if(fail, "clear_all")?;
        self.state.lock().unwrap().records.clear();
        Ok(())
    }

    async fn import_all(&self, tasks: &[Task]) -> Result<()> {
        self.log(format!("import_all:{}", tasks.len()));
        let fail = self.state.lock().unwrap().fail.import;
        self.fail_if(fail, "import_all")?;
        let mut state = self.state.lock().unwrap();
        state.records.clear();
        for task in tasks {
            let value = serde_json::to_value(task)?;
            state.records.insert(task.id.to_string(), value);
        }
        Ok(())
    }
}

// =============================================================================
// InMemoryMirror
// =============================================================================

/// In-process stand-in for the replicated observable map.
///
/// Applies batches atomically under one lock and tags observer events as
/// local; [`InMemoryMirror::apply_remote`] simulates a batch arriving from
/// another replica. Cloning yields a handle onto the same state.
#[derive(Clone, Default)]
pub struct InMemoryMirror {
    map: Arc<Mutex<BTreeMap<String, Value>>>,
    observers: Arc<Mutex<Vec<MirrorObserver>>>,
    transactions: Arc<Mutex<usize>>,
}

impl InMemoryMirror {
    /// Creates an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-loads an entry, as if another client had written it earlier.
    #[must_use]
    pub fn with_entry(self, key: &str, value: Value) -> Self {
        self.map.lock().unwrap().insert(key.to_string(), value);
        self
    }

    /// Applies a batch as if it came from another replica: observers see a
    /// remote-tagged event.
    pub fn apply_remote(&self, ops: Vec<MirrorOp>) {
        self.apply(ops);
        self.notify(MirrorEvent::remote());
    }

    /// Number of atomic batches applied so far (local and remote).
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        *self.transactions.lock().unwrap()
    }

    /// Current keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.map.lock().unwrap().keys().cloned().collect()
    }

    fn apply(&self, ops: Vec<MirrorOp>) {
        let mut map = self.map.lock().unwrap();
        for op in ops {
            match op {
                MirrorOp::Set(key, value) => {
                    map.insert(key, value);
                }
                MirrorOp::Delete(key) => {
                    map.remove(&key);
                }
                MirrorOp::Clear => map.clear(),
            }
        }
        drop(map);
        *self.transactions.lock().unwrap() += 1;
    }

    fn notify(&self, event: MirrorEvent) {
        let observers = self.observers.lock().unwrap();
        for observer in observers.iter() {
            observer(event);
        }
    }
}

impl ReplicaMirror for InMemoryMirror {
    fn get(&self, key: &str) -> Option<Value> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.transact(vec![MirrorOp::Set(key.to_string(), value)]);
    }

    fn delete(&self, key: &str) {
        self.transact(vec![MirrorOp::Delete(key.to_string())]);
    }

    fn values(&self) -> Vec<Value> {
        self.map.lock().unwrap().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    fn transact(&self, ops: Vec<MirrorOp>) {
        self.apply(ops);
        self.notify(MirrorEvent::local());
    }

    fn observe(&self, observer: MirrorObserver) {
        self.observers.lock().unwrap().push(observer);
    }
}

impl std::fmt::Debug for InMemoryMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMirror")
            .field("len", &self.map.lock().unwrap().len())
            .field("transactions", &self.transaction_count())
            .finish()
    }
}

// =============================================================================
// FixedClock
// =============================================================================

/// Clock pinned to a settable instant.
#[derive(Debug, Clone, Default)]
pub struct FixedClock {
    ms: Arc<AtomicI64>,
}

impl FixedClock {
    /// Creates a clock pinned at epoch millisecond `ms`.
    #[must_use]
    pub fn at_ms(ms: i64) -> Self {
        let clock = Self::default();
        clock.ms.store(ms, Ordering::SeqCst);
        clock
    }

    /// Moves the clock forward.
    pub fn advance_ms(&self, delta: i64) {
        self.ms.fetch_add(delta, Ordering::SeqCst);
    }

    /// Pins the clock to an absolute instant.
    pub fn set_ms(&self, ms: i64) {
        self.ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.ms.load(Ordering::SeqCst))
            .single()
            .unwrap_or_else(Utc::now)
    }
}
