//! Scope-based authorization for the gateway.
//!
//! A scope record grants permissions to callers whose token carries a group
//! of the same name. Evaluation is pure and works over an immutable
//! [`ScopeTable`] snapshot; a watcher task swaps snapshots when scope records
//! change in the store.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod engine;
mod loader;
mod table;

pub use engine::{evaluate, AccessRequest, Decision, DenyReason, ScopeEngine};
pub use loader::{load_scope_files, load_table, spawn_scope_watcher, ScopeLoaderConfig};
pub use table::ScopeTable;
