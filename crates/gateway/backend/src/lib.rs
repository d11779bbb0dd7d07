//! Backend-agnostic persistence for the registry data plane.
//!
//! The gateway stores every record as a JSON document in a named, namespaced
//! collection. Two backends implement the same narrow contract:
//! - [`MemoryBackend`]: deterministic in-process store; vector search is an
//!   exact client-side cosine scan (the fallback path).
//! - `PostgresBackend` (feature `postgres`): JSONB documents with a pgvector
//!   column; vector search runs natively in the database.
//!
//! Single-key operations are atomic. Multi-key consistency is not promised;
//! callers tolerate partial failures.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
mod filter;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod schema;
mod traits;

pub use error::{BackendError, BackendResult};
pub use filter::Filter;
pub use memory::MemoryBackend;
pub use schema::{CollectionSpec, IndexSpec, VectorMetric, VectorSpec};
pub use traits::{ListOptions, RegistryBackend, SortOrder, SortSpec, VectorHit};
