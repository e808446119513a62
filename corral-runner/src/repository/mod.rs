//! Repository layer
//!
//! The coordinator as seen by a runner, and the local store of agent
//! records. Both are trait-based so agents can run against in-memory
//! doubles.

mod coordinator;
mod state;

pub use coordinator::{Coordinator, HttpCoordinator};
pub use state::{FileStateStore, PersistedAgent, StateStore, slot_key};
