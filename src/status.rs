//! Per-item cache and save status tracking
//!
//! Answers "is this item cached locally" and "does it have saves" from a
//! memoized map. Entries live until explicitly invalidated; nothing expires on
//! a timer. Callers invalidate after downloads, deletions, platform switches
//! and user refreshes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::ItemId;
use crate::sources::{LocalInventory, SaveInventory};

/// How save presence is determined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveCheck {
    /// Ask the save inventory for cloud and local saves
    #[default]
    Full,
    /// Always report no saves, without any query
    Skip,
    /// Only consider the local save
    LocalOnly,
}

/// Memoized status for one item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatusEntry {
    pub is_cached: Option<bool>,
    pub has_saves: Option<bool>,
}

/// Sole owner and mutator of cache status entries
pub struct CacheStatusTracker {
    local: Arc<dyn LocalInventory>,
    saves: Arc<dyn SaveInventory>,
    check: SaveCheck,
    entries: HashMap<ItemId, CacheStatusEntry>,
}

impl CacheStatusTracker {
    pub fn new(
        local: Arc<dyn LocalInventory>,
        saves: Arc<dyn SaveInventory>,
        check: SaveCheck,
    ) -> Self {
        Self {
            local,
            saves,
            check,
            entries: HashMap::new(),
        }
    }

    pub fn check(&self) -> SaveCheck {
        self.check
    }

    /// Whether a verified local artifact exists.
    ///
    /// A present-but-unverified artifact reports `false` and is logged. Query
    /// failures are not memoized.
    pub async fn is_cached(&mut self, item_id: ItemId) -> bool {
        if let Some(cached) = self.entry(item_id).is_cached {
            return cached;
        }

        let cached = match self.local.check_integrity(item_id).await {
            Ok(report) => {
                if report.cached && !report.verified {
                    warn!("Integrity mismatch for item {}, treating as not cached", item_id);
                }
                report.cached && report.verified
            }
            Err(e) => {
                warn!("Integrity check failed for item {}: {:#}", item_id, e);
                return false;
            }
        };

        debug!("Item {} cached={}", item_id, cached);
        self.entries.entry(item_id).or_default().is_cached = Some(cached);
        cached
    }

    /// Whether the item has any save, according to the configured check
    pub async fn has_saves(&mut self, item_id: ItemId) -> bool {
        if let Some(has_saves) = self.entry(item_id).has_saves {
            return has_saves;
        }

        let result = match self.check {
            SaveCheck::Skip => Ok(false),
            SaveCheck::Full => self
                .saves
                .list_save_candidates(item_id)
                .await
                .map(|listing| !listing.is_empty()),
            SaveCheck::LocalOnly => self
                .saves
                .local_candidate(item_id)
                .await
                .map(|local| local.is_some()),
        };

        match result {
            Ok(has_saves) => {
                self.entries.entry(item_id).or_default().has_saves = Some(has_saves);
                has_saves
            }
            Err(e) => {
                warn!("Save lookup failed for item {}: {:#}", item_id, e);
                false
            }
        }
    }

    /// Memoized entry without querying anything
    pub fn peek(&self, item_id: ItemId) -> Option<CacheStatusEntry> {
        self.entries.get(&item_id).copied()
    }

    pub fn invalidate(&mut self, item_id: ItemId) {
        if self.entries.remove(&item_id).is_some() {
            debug!("Invalidated status for item {}", item_id);
        }
    }

    pub fn invalidate_all(&mut self) {
        debug!("Invalidated {} status entries", self.entries.len());
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, item_id: ItemId) -> CacheStatusEntry {
        self.entries.get(&item_id).copied().unwrap_or_default()
    }
}
