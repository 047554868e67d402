//! Catalog data model and the in-memory catalog store.
//!
//! Items and platforms come from the remote library. A refresh replaces the
//! whole snapshot; individual items are never patched in place.

pub mod reconcile;
pub mod snapshot;

pub use reconcile::{installed_platforms, reconcile, InstalledLibrary};
pub use snapshot::{CatalogSnapshot, SnapshotCatalog};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type ItemId = u64;
pub type PlatformId = u64;

/// Platform reference carried by each catalog item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRef {
    pub id: PlatformId,
    pub slug: String,
    pub name: String,
}

/// A remote library entry (game/ROM)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub name: String,
    pub platform: PlatformRef,
    /// Canonical filename on the server
    pub file_name: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// A platform known to the remote library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub id: PlatformId,
    pub name: String,
    /// Identifier matched against emulator capabilities
    pub slug: String,
    /// Hint only, used to hide empty platforms
    #[serde(default)]
    pub rom_count: u32,
}

/// Evidence that an item's asset exists on local storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalInstallRecord {
    pub item_id: ItemId,
    pub local_path: PathBuf,
    pub platform_id: PlatformId,
}

/// An installed item joined with whatever catalog metadata is available.
///
/// `item` and `platform` are `None` for degraded views, i.e. local files the
/// remote catalog did not return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledItemView {
    pub item_id: ItemId,
    pub local_path: PathBuf,
    pub platform_id: PlatformId,
    pub item: Option<CatalogItem>,
    pub platform: Option<Platform>,
}

impl InstalledItemView {
    /// True when the catalog had no entry for this local record
    pub fn is_degraded(&self) -> bool {
        self.item.is_none()
    }

    /// Catalog name, or the local file stem for degraded views
    pub fn display_name(&self) -> String {
        match &self.item {
            Some(item) => item.name.clone(),
            None => file_stem(&self.local_path),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Last-fetched remote items and platforms.
///
/// Items are held behind an `Arc` so the mirrored page provider can share the
/// snapshot without copying it.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    items: Arc<[CatalogItem]>,
    platforms: Vec<Platform>,
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl CatalogStore {
    pub fn new(items: Vec<CatalogItem>, platforms: Vec<Platform>) -> Self {
        Self {
            items: items.into(),
            platforms,
        }
    }

    /// Replace the whole snapshot
    pub fn replace(&mut self, items: Vec<CatalogItem>, platforms: Vec<Platform>) {
        self.items = items.into();
        self.platforms = platforms;
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn shared_items(&self) -> Arc<[CatalogItem]> {
        Arc::clone(&self.items)
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn item(&self, id: ItemId) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn platform(&self, id: PlatformId) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.id == id)
    }

    /// Platforms worth listing (non-zero rom count), in catalog order
    pub fn listed_platforms(&self) -> Vec<Platform> {
        self.platforms
            .iter()
            .filter(|p| p.rom_count > 0)
            .cloned()
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_listed_platforms_hides_empty() {
        let store = CatalogStore::new(
            Vec::new(),
            vec![platform(1, "snes", 10), platform(2, "n64", 0), platform(3, "gba", 4)],
        );

        let listed: Vec<_> = store.listed_platforms().into_iter().map(|p| p.id).collect();
        assert_eq!(listed, vec![1, 3]);
    }

    #[test]
    fn test_replace_supersedes_snapshot() {
        let snes = platform(1, "snes", 1);
        let mut store = CatalogStore::new(vec![item(1, &snes)], vec![snes.clone()]);
        let shared = store.shared_items();

        store.replace(vec![item(2, &snes), item(3, &snes)], vec![snes]);

        assert!(store.item(1).is_none());
        assert_eq!(store.items().len(), 2);
        // Previously handed out snapshots stay intact
        assert_eq!(shared.len(), 1);
    }

    #[test]
    fn test_degraded_display_name_uses_file_stem() {
        let view = InstalledItemView {
            item_id: 9,
            local_path: PathBuf::from("/roms/snes/Chrono Trigger (USA).sfc"),
            platform_id: 1,
            item: None,
            platform: None,
        };
        assert!(view.is_degraded());
        assert_eq!(view.display_name(), "Chrono Trigger (USA)");
    }

    #[test]
    fn test_item_deserialize_defaults() {
        let json = r#"{
            "id": 4,
            "name": "Super Metroid",
            "platform": {"id": 1, "slug": "snes", "name": "SNES"},
            "file_name": "super_metroid.sfc"
        }"#;
        let item: CatalogItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.size_bytes, 0);
        assert!(item.cover_url.is_none());
        assert_eq!(item.platform.slug, "snes");
    }
}
