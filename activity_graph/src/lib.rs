//! # Activity Graph
//!
//! The runtime state layer of the narrative simulation: a typed graph of
//! world entities whose evolution is driven by declarative rules, decayed
//! breadth-first event propagation, and a dirty-tracking snapshot mechanism
//! that survives process restarts.
//!
//! ## Core Components
//!
//! - **graph**: the sealed graph container, its change log, and the builder
//! - **engine**: condition evaluation, action execution, the event lifecycle
//!   state machine, and cascade-bounded propagation
//! - **snapshot**: capture/restore of the runtime delta for persistence
//!
//! ## Design Philosophy
//!
//! - **Single-writer**: one session owns one graph; every entry point runs to
//!   completion before the next, so evaluation always sees consistent state
//! - **Fail-closed, absorb-errors**: malformed rules evaluate false and
//!   failed actions become result data; nothing in-session raises across the
//!   tick boundary
//! - **Data-driven**: rules and content are serializable values supplied by
//!   the world model, never code

pub mod engine;
pub mod graph;
pub mod snapshot;

pub use engine::*;
pub use graph::*;
pub use snapshot::*;
