//! # dagcalc
//!
//! dagcalc is a distributed arithmetic evaluator. A single orchestrator
//! decomposes user-submitted expressions into DAGs of binary operations
//! and leases ready tasks; any number of agent processes pull those
//! tasks, compute them after a configured per-operation latency, and
//! report results back.
//!
//! ## Architecture
//!
//! The system consists of:
//! - **Parser**: infix → postfix → dependency-ordered task list
//! - **Repository**: atomic task leasing and expression/task/user state
//! - **Orchestrator service**: expression lifecycle and authentication
//! - **RPC server**: the agent-facing task protocol
//! - **HTTP facade**: the user-facing REST API
//! - **Agent pool**: N concurrent worker loops per agent process
//!
//! ## Usage
//!
//! Run the `orchestrator` binary, then one or more `agent` binaries
//! pointed at it; both read the same key=value configuration file.

/// Agent worker pool and RPC client
pub mod agent;
/// User-facing HTTP server and endpoints
pub mod api;
/// Password hashing, bearer tokens, auth middleware
pub mod auth;
/// Configuration loading
pub mod config;
/// Error types and handling
pub mod error;
/// Core data models
pub mod models;
/// Orchestrator service and agent RPC server
pub mod orchestrator;
/// Expression parsing and DAG construction
pub mod parser;
/// Storage contract and in-memory backend
pub mod repository;

#[cfg(test)]
mod tests;

pub use error::{DagcalcError, Result};
