//! # Marcus
//!
//! Marcus is a coordination server for autonomous software-engineering
//! agents. Agents register with declared capabilities and repeatedly ask
//! "what should I work on next?"; the server owns the shared assignment
//! state over an external task board, orders work by inferred dependencies,
//! and hands each task out with the upstream context the agent needs to
//! integrate with existing work.
//!
//! ## Architecture
//!
//! - **Board adapter**: uniform read/write of tasks on an external board,
//!   pluggable per provider; the only component doing network I/O
//! - **Assignment ledger**: crash-safe, fsynced record of agent/task leases
//! - **Decision/artifact journal**: append-only logs feeding downstream
//!   context
//! - **Dependency inference**: declared edges, phase ordering, keyword
//!   heuristics, and optional advisor suggestions merged into a DAG
//! - **Scheduler**: eligibility filtering plus skill/priority/age ranking
//! - **Coordinator**: single writer per project orchestrating every
//!   operation
//! - **Reconciler**: startup and periodic repair of ledger/board drift

/// AI advisor seam (optional, rate-limited)
pub mod advisor;
/// HTTP transport for the control protocol
pub mod api;
/// Board adapter and providers
pub mod board;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Context assembly for handed-out tasks
pub mod context;
/// Per-project coordination engine
pub mod coordinator;
/// Error types and wire error kinds
pub mod error;
/// Dependency DAG inference
pub mod inference;
/// Decision/artifact journal
pub mod journal;
/// Durable assignment ledger
pub mod ledger;
/// Core data models
pub mod models;
/// Control protocol envelopes and dispatch
pub mod protocol;
/// Background reconciliation loop
pub mod reconciler;
/// Eligibility filter and ranker
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use error::{ErrorKind, MarcusError, Result};
