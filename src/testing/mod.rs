//! Testing infrastructure: controllable doubles for the engine's external
//! collaborators.
//!
//! The engine's seams are the persistence gateway, the replica mirror, and
//! the clock. The mocks here implement all three with shared-handle state
//! (cloning a mock yields a handle onto the same state), so a test can move
//! one into the reconciler and keep a handle for assertions and failure
//! injection.

mod mocks;

pub use mocks::{FixedClock, InMemoryMirror, MockPersistenceGateway};
