//! Replica mirror interface.
//!
//! The mirror is a shared, observable key → JSON-value map used to converge
//! state across concurrently running clients when multi-client mode is
//! enabled. It is an assumed building block (CRDT map or equivalent), not
//! implemented here; the engine only requires atomic multi-key batches and
//! change events tagged with their origin.
//!
//! Merge policy is whole-object last-writer-wins per task id: every write
//! replaces the value under the key, there is no field-level merge. Two
//! clients editing different fields of the same task concurrently will not
//! merge; the later write wins entirely.

use serde_json::Value;

/// One operation inside an atomic mirror batch.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOp {
    /// Replace the value under `key` wholesale.
    Set(String, Value),
    /// Remove `key`.
    Delete(String),
    /// Remove every key. Used by bulk import/clear paths.
    Clear,
}

/// Change event emitted by the mirror to observers.
///
/// `local` is true when the change originated from this client's own
/// transaction; the reconciler ignores those to avoid double-processing,
/// and replaces its snapshot wholesale on remote-tagged events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorEvent {
    pub local: bool,
}

impl MirrorEvent {
    /// An event for a change made by this client.
    #[must_use]
    pub fn local() -> Self {
        Self { local: true }
    }

    /// An event for a change received from another replica.
    #[must_use]
    pub fn remote() -> Self {
        Self { local: false }
    }
}

/// Observer callback registered with [`ReplicaMirror::observe`].
pub type MirrorObserver = Box<dyn Fn(MirrorEvent) + Send + Sync>;

/// A shared, observable key → value map with atomic multi-key transactions.
///
/// Implementations are expected to be replicated (the engine never sees the
/// transport); the in-memory implementation in [`crate::testing`] stands in
/// for replication during tests.
pub trait ReplicaMirror: Send + Sync {
    /// Reads the value under `key`, if present.
    fn get(&self, key: &str) -> Option<Value>;

    /// Writes a single key. Equivalent to a one-op transaction.
    fn set(&self, key: &str, value: Value);

    /// Deletes a single key. Equivalent to a one-op transaction.
    fn delete(&self, key: &str);

    /// All current values, in unspecified order.
    fn values(&self) -> Vec<Value>;

    /// Number of keys currently present.
    fn len(&self) -> usize;

    /// True when the mirror holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies `ops` atomically: other replicas observe either none or all
    /// of the batch, never a prefix.
    fn transact(&self, ops: Vec<MirrorOp>);

    /// Registers an observer for subsequent changes. Events for this
    /// client's own writes arrive tagged `local: true`.
    fn observe(&self, observer: MirrorObserver);
}
