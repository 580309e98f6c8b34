//! End-to-end sync scenarios.
//!
//! Replicas are wired exactly as the node wires them, with in-memory hub
//! fakes standing in for the network:
//! - Offline edits collapse before transport and converge on peers
//! - Stale remote writes leave local state untouched
//! - Partial hub batches split into delivered, failed and retried rows
//! - Per-transport lanes back off independently
//! - The outbox survives a restart on SQLite

pub mod test_utils;

#[cfg(test)]
mod convergence_tests;

#[cfg(test)]
mod delivery_tests;
