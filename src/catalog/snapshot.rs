//! JSON catalog snapshots
//!
//! A full copy of the remote library (items + platforms) saved to disk. Serves
//! as a catalog source for offline use and as the mirrored-library input.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CatalogItem, Platform, PlatformId};
use crate::sources::CatalogSource;

/// Serialized catalog contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub items: Vec<CatalogItem>,
}

impl CatalogSnapshot {
    /// Load a snapshot from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog snapshot: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog snapshot: {}", path.display()))
    }

    /// Save the snapshot to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write catalog snapshot: {}", path.display()))?;
        Ok(())
    }

    pub fn items_for_platform(
        &self,
        platform_id: PlatformId,
    ) -> impl Iterator<Item = &CatalogItem> {
        self.items
            .iter()
            .filter(move |item| item.platform.id == platform_id)
    }
}

/// Catalog source reading a snapshot file on every fetch
pub struct SnapshotCatalog {
    path: PathBuf,
}

impl SnapshotCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<CatalogSnapshot> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || CatalogSnapshot::load(&path))
            .await
            .context("Snapshot reader panicked")?
    }
}

#[async_trait]
impl CatalogSource for SnapshotCatalog {
    async fn fetch_all_items(&self) -> Result<Vec<CatalogItem>> {
        Ok(self.read().await?.items)
    }

    async fn fetch_platforms(&self) -> Result<Vec<Platform>> {
        Ok(self.read().await?.platforms)
    }

    async fn fetch_items_for_platform(
        &self,
        platform_id: PlatformId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<CatalogItem>, usize)> {
        let snapshot = self.read().await?;
        let total = snapshot.items_for_platform(platform_id).count();
        let items = snapshot
            .items_for_platform(platform_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((items, total))
    }
}
