//! Trellis - Task-Tree Synchronization Engine
//!
//! The canonical in-memory task collection, its hierarchical and temporal
//! invariants (status cascading, exclusive timers, cycle-free parentage,
//! priority ordering), and the reconciliation of that state across three
//! cooperating stores: a synchronous snapshot, an optional replicated
//! mirror for multi-client convergence, and an asynchronous durable
//! backend.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`model`] - The `Task` entity and its value types
//! - [`graph`] - Canonical snapshot with tree-invariant maintenance
//! - [`propagation`] - Cascading status state machine
//! - [`timer`] - Exclusive-timer coordination and work aggregation
//! - [`sync`] - Three-way reconciliation, startup load/seed, remote intake
//! - [`gateway`] / [`mirror`] - Consumed external interfaces
//! - [`notify`] - Change notification pub/sub
//! - [`testing`] - Testing infrastructure (mocks for all external seams)
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis::sync::{SyncConfig, SyncReconciler};
//! use trellis::testing::MockPersistenceGateway;
//!
//! let gateway = MockPersistenceGateway::new();
//! let mut engine = SyncReconciler::new(Box::new(gateway), SyncConfig::default());
//! engine.initialize().await?;
//!
//! let id = engine.create_task("write the report", None).await?;
//! engine.toggle_timer(&id).await?;
//! ```

pub mod clock;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod mirror;
pub mod model;
pub mod notify;
pub mod propagation;
pub mod sync;
pub mod testing;
pub mod timer;

// Re-export commonly used types
pub use error::{Result, TrellisError};

// Re-export model types
pub use model::{Difficulty, Task, TaskId, TaskPatch, TimeEntry, TriageStatus};

// Re-export engine types
pub use graph::{DeleteOutcome, ReparentOutcome, TaskGraphStore};
pub use propagation::MutationOrigin;
pub use sync::{ConsistencyLevel, SnapshotSource, StartupReport, SyncConfig, SyncReconciler};

// Re-export interface types
pub use clock::{Clock, SystemClock};
pub use gateway::PersistenceGateway;
pub use mirror::{MirrorEvent, MirrorObserver, MirrorOp, ReplicaMirror};
pub use notify::{ChangeEvent, ChangeNotifier, SubscriptionId};
