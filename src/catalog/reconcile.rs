//! Catalog / local install reconciliation
//!
//! Joins local install records with the remote catalog. A local file is never
//! dropped because the catalog failed to return it; it becomes a degraded view.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{CatalogItem, InstalledItemView, ItemId, LocalInstallRecord, Platform, PlatformId};

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledLibrary {
    pub items: Vec<InstalledItemView>,
    pub platforms: Vec<Platform>,
}

impl InstalledLibrary {
    /// Reconcile and derive installed platforms in one go
    pub fn build(
        catalog: &[CatalogItem],
        platforms: &[Platform],
        local_index: &[LocalInstallRecord],
    ) -> Self {
        let items = reconcile(catalog, platforms, local_index);
        let platforms = installed_platforms(platforms, &items);
        Self { items, platforms }
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.items.iter().any(|view| view.item_id == item_id)
    }

    pub fn degraded_count(&self) -> usize {
        self.items.iter().filter(|view| view.is_degraded()).count()
    }
}

/// Build one view per local record, in local index order.
///
/// A matched view takes its platform from the catalog item; the record's
/// platform id is only used for degraded views.
pub fn reconcile(
    catalog: &[CatalogItem],
    platforms: &[Platform],
    local_index: &[LocalInstallRecord],
) -> Vec<InstalledItemView> {
    let items_by_id: HashMap<ItemId, &CatalogItem> =
        catalog.iter().map(|item| (item.id, item)).collect();
    let platforms_by_id: HashMap<PlatformId, &Platform> =
        platforms.iter().map(|p| (p.id, p)).collect();

    local_index
        .iter()
        .map(|record| match items_by_id.get(&record.item_id) {
            Some(item) => InstalledItemView {
                item_id: record.item_id,
                local_path: record.local_path.clone(),
                platform_id: item.platform.id,
                item: Some((*item).clone()),
                platform: platforms_by_id.get(&item.platform.id).map(|p| (*p).clone()),
            },
            None => {
                debug!(
                    "Item {} not in catalog, keeping degraded view for {}",
                    record.item_id,
                    record.local_path.display()
                );
                InstalledItemView {
                    item_id: record.item_id,
                    local_path: record.local_path.clone(),
                    platform_id: record.platform_id,
                    item: None,
                    platform: None,
                }
            }
        })
        .collect()
}

/// Platforms with at least one installed item, in catalog platform order.
pub fn installed_platforms(platforms: &[Platform], views: &[InstalledItemView]) -> Vec<Platform> {
    let present: HashSet<PlatformId> = views.iter().map(|view| view.platform_id).collect();

    platforms
        .iter()
        .filter(|p| present.contains(&p.id))
        .cloned()
        .collect()
}
