//! Semantic discovery index.
//!
//! Keeps one in-memory cosine index per `(namespace, entity_type)` and a
//! synchronizer task that drains the store's change events: re-embedding when
//! an entity's searchable text changes, dropping entries on delete. The index
//! is never the source of truth; it is rebuilt from the store at startup.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod blob;
mod index;
mod shard;
mod sync;

pub use blob::{fingerprint, text_blob};
pub use index::{IndexStats, VectorIndex};
pub use shard::{IndexEntry, SearchFilter, SearchHit};
pub use sync::{spawn_synchronizer, DeadLetter, SyncConfig, SyncHandle};
