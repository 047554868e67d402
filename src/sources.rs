//! Collaborator contracts consumed by the engine.
//!
//! Every external dependency (remote catalog, local inventory, save storage,
//! the download/launch backend, emulator capabilities) is injected behind one
//! of these traits. Implementations report `anyhow` errors; the engine decides
//! how each failure is surfaced.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::catalog::{CatalogItem, ItemId, LocalInstallRecord, Platform, PlatformId};
use crate::download::TransferEvent;
use crate::saves::{CloudSave, LocalSave};

/// Remote library catalog
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_all_items(&self) -> Result<Vec<CatalogItem>>;

    async fn fetch_platforms(&self) -> Result<Vec<Platform>>;

    /// One server page of a platform listing, returning `(items, total)`.
    async fn fetch_items_for_platform(
        &self,
        platform_id: PlatformId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<CatalogItem>, usize)>;
}

/// Outcome of a local integrity check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// A local artifact exists for the item
    pub cached: bool,
    /// The artifact matches what was recorded at install time
    pub verified: bool,
}

/// Local inventory of installed items
#[async_trait]
pub trait LocalInventory: Send + Sync {
    async fn list_installed(&self) -> Result<Vec<LocalInstallRecord>>;

    async fn cache_size(&self, item_id: ItemId) -> Result<u64>;

    async fn check_integrity(&self, item_id: ItemId) -> Result<IntegrityReport>;

    async fn delete(&self, item_id: ItemId) -> Result<()>;
}

/// Save candidates known for one item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveListing {
    #[serde(default)]
    pub cloud: Vec<CloudSave>,
    #[serde(default)]
    pub local: Option<LocalSave>,
}

impl SaveListing {
    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty() && self.local.is_none()
    }
}

/// Cloud and local save storage
#[async_trait]
pub trait SaveInventory: Send + Sync {
    async fn list_save_candidates(&self, item_id: ItemId) -> Result<SaveListing>;

    /// Local save only, without touching remote storage
    async fn local_candidate(&self, item_id: ItemId) -> Result<Option<LocalSave>>;
}

/// Download/launch backend.
///
/// `start` hands back a channel that yields progress and ends with exactly one
/// `Complete` or `Error` event.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn start(&self, item: &CatalogItem) -> Result<mpsc::Receiver<TransferEvent>>;

    /// Best-effort; the backend may still be writing when this returns.
    async fn cancel(&self) -> Result<()>;
}

/// An emulator (or other launch target) and the platforms it handles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub name: String,
    #[serde(default)]
    pub supported_platforms: Vec<String>,
}

/// Emulator capability metadata
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    async fn supported_targets(&self) -> Result<HashMap<String, TargetInfo>>;

    async fn configured_paths(&self) -> Result<HashMap<String, PathBuf>>;
}
