//! Executable model of the C3D cache-coherence protocol.
//!
//! C3D is a three-level coherence scheme for a NUMA machine: each socket owns
//! a private last-level cache (LLC) and a private DRAM cache (DC) acting as a
//! shared-by-proxy intermediate tier, with a single home directory at memory.
//! This crate is the protocol's reference model: every stable and transient
//! state, every message, and every race is explicit, so a model checker can
//! verify single-writer/multiple-reader and per-location sequential
//! consistency under all legal interleavings.
//!
//! The model checks one coherence unit in isolation; soundness for multiple
//! lines follows from per-line independence. There is no timing, no cache
//! geometry, and no data pipeline, just the coherence engine.
//!
//! Entry points: [`system::System`] is one machine state and its step
//! relation, [`explore::explore`] is the built-in exhaustive verifier,
//! [`model::CoherenceModel`] adapts the machine to stateright, and
//! [`sim::random_walk`] drives long seeded schedules.

#![warn(missing_docs)]

/// Model sizing knobs and their validation.
pub mod config;
/// Home directory controller.
pub mod directory;
/// DRAM-cache controller.
pub mod dram_cache;
/// Fatal failure taxonomy.
pub mod error;
/// Exhaustive breadth-first verification with counterexample traces.
pub mod explore;
/// Universally quantified safety checks.
pub mod invariants;
/// Last-level cache controller.
pub mod llc;
/// Message envelope and virtual channels.
pub mod message;
/// stateright adapter.
pub mod model;
/// Bounded, unordered per-node mailboxes.
pub mod network;
/// Seeded random-walk scheduling.
pub mod sim;
/// The whole-machine aggregate and its step relation.
pub mod system;
/// Run artifact capture and persistence.
pub mod trace;
/// Core identifiers and the symbolic value domain.
pub mod types;

pub use config::ModelConfig;
pub use error::Fault;
pub use error::ProtocolError;
pub use invariants::InvariantViolation;
pub use model::CoherenceModel;
pub use system::Rule;
pub use system::System;
