//! Restartable paging over entity listings.

use std::sync::Arc;

use gateway_types::{Entity, EntityType, Namespace, RegistryResult};

use crate::store::{EntityFilter, RegistryStore};

/// Lazy, restartable walk over a listing sorted by `updated_at` descending.
///
/// Each page re-queries the store, so a pager survives process restarts of
/// the backend and tolerates concurrent writes (at the cost of possibly
/// observing an entity twice when it moves in the ordering).
pub struct EntityPager {
    store: Arc<RegistryStore>,
    namespace: Namespace,
    entity_type: EntityType,
    filter: EntityFilter,
    page_size: usize,
    offset: usize,
    exhausted: bool,
}

impl EntityPager {
    pub(crate) fn new(
        store: Arc<RegistryStore>,
        namespace: Namespace,
        entity_type: EntityType,
        filter: EntityFilter,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            namespace,
            entity_type,
            filter,
            page_size: page_size.max(1),
            offset: 0,
            exhausted: false,
        }
    }

    /// Fetch the next page; empty when the sequence is exhausted.
    pub async fn next_page(&mut self) -> RegistryResult<Vec<Entity>> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        let page = self
            .store
            .list_entities(
                &self.namespace,
                self.entity_type,
                &self.filter,
                Some(self.page_size),
                self.offset,
            )
            .await?;
        self.offset += page.len();
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        Ok(page)
    }

    /// Restart from the beginning of the sequence.
    pub fn restart(&mut self) {
        self.offset = 0;
        self.exhausted = false;
    }
}
