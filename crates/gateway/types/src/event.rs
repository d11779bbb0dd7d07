//! Change events emitted after successful entity-store mutations.

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityType};
use crate::namespace::Namespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Created,
    Updated,
    Deleted,
    Toggled,
}

/// Broadcast notification of a successful mutation.
///
/// `snapshot` is the post-mutation state, except for `Deleted` where it is
/// the last state prior to removal. `seq` is a store-wide monotonic counter
/// used by subscribers to detect when they have caught up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub seq: u64,
    pub namespace: Namespace,
    pub entity_type: EntityType,
    pub path: String,
    pub op: ChangeOp,
    pub snapshot: Entity,
}
