//! The engine facade
//!
//! One [`Engine`] value owns the catalog store, the reconciled installed
//! library, the status tracker, the pager and the download orchestrator. All
//! mutation goes through `&mut self`; background work (transfer relays, the
//! delayed refresh) reports back through [`Engine::next_event`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{
    CatalogStore, InstalledItemView, InstalledLibrary, ItemId, LocalInstallRecord, Platform,
    PlatformId,
};
use crate::config::EngineConfig;
use crate::download::{
    DownloadOrchestrator, DownloadSession, DownloadState, DownloadUpdate, RefreshTimer,
};
use crate::error::{EngineError, Result};
use crate::pagination::{clamp_page, Page, PaginationController};
use crate::saves::{validate_listing, RankedOptions, SaveResolver};
use crate::sources::{
    CapabilitySource, CatalogSource, LocalInventory, SaveInventory, TargetInfo, Transfer,
};
use crate::status::CacheStatusTracker;

/// External services the engine is wired to
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogSource>,
    pub local: Arc<dyn LocalInventory>,
    pub saves: Arc<dyn SaveInventory>,
    pub transfer: Arc<dyn Transfer>,
    pub capabilities: Arc<dyn CapabilitySource>,
}

/// An emulator able to run a given platform, with its configured path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchTarget {
    pub key: String,
    pub name: String,
    pub path: PathBuf,
}

/// Something that happened in the background
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Download(DownloadUpdate),
    /// The delayed secondary refresh after a completed download ran
    LibraryRefreshed,
}

pub struct Engine {
    config: EngineConfig,
    collaborators: Collaborators,
    store: CatalogStore,
    local_index: Vec<LocalInstallRecord>,
    library: InstalledLibrary,
    tracker: CacheStatusTracker,
    pager: PaginationController,
    downloads: DownloadOrchestrator,
    refresh_timer: RefreshTimer,
    targets: HashMap<String, TargetInfo>,
    target_paths: HashMap<String, PathBuf>,
    current_platform: Option<PlatformId>,
    closed: bool,
}

impl Engine {
    /// Build an engine and load its initial state.
    ///
    /// Capability metadata, catalog items and platforms are fetched in
    /// parallel. Any of them failing leaves that part empty; installed items
    /// still show up as degraded views.
    pub async fn open(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let (targets, paths, items, platforms) = tokio::join!(
            collaborators.capabilities.supported_targets(),
            collaborators.capabilities.configured_paths(),
            collaborators.catalog.fetch_all_items(),
            collaborators.catalog.fetch_platforms(),
        );

        let targets = targets.unwrap_or_else(|e| {
            warn!("Could not load emulator targets: {:#}", e);
            HashMap::new()
        });
        let target_paths = paths.unwrap_or_else(|e| {
            warn!("Could not load emulator paths: {:#}", e);
            HashMap::new()
        });
        let store = match (items, platforms) {
            (Ok(items), Ok(platforms)) => CatalogStore::new(items, platforms),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Catalog unavailable, starting offline: {:#}", e);
                CatalogStore::default()
            }
        };

        let pager = build_pager(&config, &collaborators, &store);
        let tracker = CacheStatusTracker::new(
            Arc::clone(&collaborators.local),
            Arc::clone(&collaborators.saves),
            config.save_check(),
        );
        let downloads = DownloadOrchestrator::new(Arc::clone(&collaborators.transfer));
        let refresh_timer = RefreshTimer::new(config.refresh_delay());

        let mut engine = Self {
            config,
            collaborators,
            store,
            local_index: Vec::new(),
            library: InstalledLibrary::default(),
            tracker,
            pager,
            downloads,
            refresh_timer,
            targets,
            target_paths,
            current_platform: None,
            closed: false,
        };

        if let Err(e) = engine.refresh_installed().await {
            warn!("Local inventory unavailable: {}", e);
        }

        info!(
            "Engine ready: {} catalog items, {} installed ({} degraded), paging {}",
            engine.store.items().len(),
            engine.library.items.len(),
            engine.library.degraded_count(),
            if engine.pager.is_mirrored() { "mirrored" } else { "remote" }
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn rebuild_library(&mut self) {
        self.library =
            InstalledLibrary::build(self.store.items(), self.store.platforms(), &self.local_index);
    }

    /// Re-fetch items and platforms. On failure nothing changes.
    pub async fn refresh_catalog(&mut self) -> Result<()> {
        self.ensure_open()?;

        let catalog = &self.collaborators.catalog;
        let (items, platforms) =
            tokio::try_join!(catalog.fetch_all_items(), catalog.fetch_platforms())
                .map_err(EngineError::fetch)?;

        self.store.replace(items, platforms);
        if self.pager.is_mirrored() {
            self.pager = build_pager(&self.config, &self.collaborators, &self.store);
        }
        self.rebuild_library();
        debug!("Catalog refreshed: {} items", self.store.items().len());
        Ok(())
    }

    /// Re-read the local inventory and reconcile
    pub async fn refresh_installed(&mut self) -> Result<()> {
        self.ensure_open()?;

        let records = self
            .collaborators
            .local
            .list_installed()
            .await
            .map_err(EngineError::fetch)?;
        self.local_index = records;
        self.rebuild_library();
        debug!(
            "Installed library: {} items on {} platforms",
            self.library.items.len(),
            self.library.platforms.len()
        );
        Ok(())
    }

    /// User-triggered refresh: forget every status and reload both sources.
    ///
    /// The local inventory is reloaded even when the catalog fetch fails.
    pub async fn refresh(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.tracker.invalidate_all();

        let installed = self.refresh_installed().await;
        let catalog = self.refresh_catalog().await;
        installed.and(catalog)
    }

    /// Change the listed platform and return its first page
    pub async fn switch_platform(&mut self, platform_id: PlatformId) -> Result<Page> {
        self.ensure_open()?;
        self.tracker.invalidate_all();
        self.current_platform = Some(platform_id);
        self.page(platform_id, 1).await
    }

    pub fn current_platform(&self) -> Option<PlatformId> {
        self.current_platform
    }

    /// One listing page; out-of-range page numbers land on the nearest page
    pub async fn page(&self, platform_id: PlatformId, page: usize) -> Result<Page> {
        self.ensure_open()?;

        let result = self.pager.page(platform_id, page.max(1)).await;
        let clamped = clamp_page(page, result.window.total_pages);
        if clamped == result.window.page {
            return Ok(result);
        }
        Ok(self.pager.page(platform_id, clamped).await)
    }

    pub async fn is_cached(&mut self, item_id: ItemId) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.tracker.is_cached(item_id).await)
    }

    pub async fn has_saves(&mut self, item_id: ItemId) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.tracker.has_saves(item_id).await)
    }

    /// Bytes on disk for an item, 0 when it is not installed
    pub async fn cache_size(&self, item_id: ItemId) -> Result<u64> {
        self.ensure_open()?;

        self.collaborators
            .local
            .cache_size(item_id)
            .await
            .map_err(EngineError::fetch)
    }

    pub fn installed(&self) -> &[InstalledItemView] {
        &self.library.items
    }

    pub fn installed_platforms(&self) -> &[Platform] {
        &self.library.platforms
    }

    /// Catalog platforms worth listing (non-zero item count)
    pub fn listed_platforms(&self) -> Vec<Platform> {
        self.store.listed_platforms()
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.store
    }

    /// Start downloading a catalog item. Returns once the backend is asked.
    pub fn start_download(&mut self, item_id: ItemId) -> Result<()> {
        self.ensure_open()?;

        let item = self
            .store
            .item(item_id)
            .cloned()
            .ok_or(EngineError::UnknownItem(item_id))?;
        self.downloads.start(&item)
    }

    /// Abandon the active download. Its cached status is re-checked on next query.
    pub async fn cancel_download(&mut self) -> Result<ItemId> {
        self.ensure_open()?;

        let item_id = self.downloads.cancel().await?;
        self.tracker.invalidate(item_id);
        Ok(item_id)
    }

    pub fn download_state(&self) -> DownloadState {
        self.downloads.state()
    }

    pub fn download_session(&self) -> Option<&DownloadSession> {
        self.downloads.session()
    }

    /// Wait for the next background event.
    ///
    /// Returns `None` when nothing is running: no active download and no
    /// pending delayed refresh.
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        if self.closed {
            return None;
        }

        let downloading = self.downloads.is_active();
        let refresh_pending = self.refresh_timer.is_scheduled();
        if !downloading && !refresh_pending {
            return None;
        }

        tokio::select! {
            update = self.downloads.next_update(), if downloading => {
                let update = update?;
                if let DownloadUpdate::Completed { item_id } = &update {
                    self.on_download_complete(*item_id).await;
                }
                Some(EngineEvent::Download(update))
            }
            _ = self.refresh_timer.fired(), if refresh_pending => {
                if let Err(e) = self.refresh_installed().await {
                    warn!("Delayed library refresh failed: {}", e);
                }
                Some(EngineEvent::LibraryRefreshed)
            }
        }
    }

    async fn on_download_complete(&mut self, item_id: ItemId) {
        self.tracker.invalidate(item_id);
        if let Err(e) = self.refresh_installed().await {
            warn!("Library refresh after download failed: {}", e);
        }
        self.refresh_timer.schedule();
    }

    /// Remove an installed item from disk.
    ///
    /// On failure the install index and cached status stay as they were.
    pub async fn delete_item(&mut self, item_id: ItemId) -> Result<()> {
        self.ensure_open()?;

        self.collaborators
            .local
            .delete(item_id)
            .await
            .map_err(|e| EngineError::DeletionFailed {
                item_id,
                reason: format!("{:#}", e),
            })?;

        self.tracker.invalidate(item_id);
        self.local_index.retain(|record| record.item_id != item_id);
        self.rebuild_library();

        if let Err(e) = self.refresh_installed().await {
            warn!("Library refresh after delete failed: {}", e);
        }
        info!("Deleted item {}", item_id);
        Ok(())
    }

    /// Rank the save candidates for resuming an item
    pub async fn resolve_saves(&self, item_id: ItemId) -> Result<RankedOptions> {
        self.ensure_open()?;

        let listing = self
            .collaborators
            .saves
            .list_save_candidates(item_id)
            .await
            .map_err(EngineError::fetch)?;
        validate_listing(&listing)?;

        Ok(SaveResolver::new(self.config.max_cloud_saves).resolve_listing(&listing))
    }

    /// Emulators supporting `platform_slug` that have a configured path
    pub fn launch_targets(&self, platform_slug: &str) -> Vec<LaunchTarget> {
        let mut targets: Vec<LaunchTarget> = self
            .targets
            .iter()
            .filter(|(_, info)| {
                info.supported_platforms
                    .iter()
                    .any(|slug| slug.eq_ignore_ascii_case(platform_slug))
            })
            .filter_map(|(key, info)| {
                self.target_paths.get(key).map(|path| LaunchTarget {
                    key: key.clone(),
                    name: info.name.clone(),
                    path: path.clone(),
                })
            })
            .collect();
        targets.sort_by(|a, b| a.key.cmp(&b.key));
        targets
    }

    /// Stop background work. Every later call fails with `Closed`.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.downloads.is_active() {
            if let Err(e) = self.downloads.cancel().await {
                warn!("Failed to cancel download on close: {}", e);
            }
        }
        self.refresh_timer.cancel();
        self.tracker.invalidate_all();
        self.closed = true;
        info!("Engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn build_pager(
    config: &EngineConfig,
    collaborators: &Collaborators,
    store: &CatalogStore,
) -> PaginationController {
    if config.library_mirrored {
        PaginationController::mirrored(store.shared_items(), config.page_size)
    } else {
        PaginationController::remote(Arc::clone(&collaborators.catalog), config.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{item, platform, record};
    use crate::catalog::CatalogItem;
    use crate::download::{TransferEvent, TransferProgress, TransferStep};
    use crate::saves::{CloudSave, LocalSave, SaveCandidate};
    use crate::sources::fakes::{
        FakeCapabilities, FakeCatalog, FakeInventory, FakeSaves, FakeTransfer,
    };
    use crate::sources::SaveListing;
    use crate::status::SaveCheck;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Harness {
        catalog: Arc<FakeCatalog>,
        inventory: Arc<FakeInventory>,
        saves: Arc<FakeSaves>,
        transfer: Arc<FakeTransfer>,
        capabilities: Arc<FakeCapabilities>,
    }

    impl Harness {
        fn new(
            items: Vec<CatalogItem>,
            platforms: Vec<Platform>,
            records: Vec<LocalInstallRecord>,
        ) -> Self {
            Self {
                catalog: Arc::new(FakeCatalog::new(items, platforms)),
                inventory: Arc::new(FakeInventory::new(records)),
                saves: Arc::new(FakeSaves::default()),
                transfer: Arc::new(FakeTransfer::default()),
                capabilities: Arc::new(FakeCapabilities::default()),
            }
        }

        /// Three SNES items, one GBA item, SNES item 1 installed
        fn basic() -> Self {
            let snes = platform(1, "snes", 3);
            let gba = platform(2, "gba", 1);
            let empty = platform(3, "n64", 0);
            Self::new(
                vec![item(1, &snes), item(2, &snes), item(3, &snes), item(4, &gba)],
                vec![snes, gba, empty],
                vec![record(1, 1)],
            )
        }

        fn collaborators(&self) -> Collaborators {
            Collaborators {
                catalog: self.catalog.clone(),
                local: self.inventory.clone(),
                saves: self.saves.clone(),
                transfer: self.transfer.clone(),
                capabilities: self.capabilities.clone(),
            }
        }

        async fn open(&self) -> Engine {
            self.open_with(EngineConfig::default()).await
        }

        async fn open_with(&self, config: EngineConfig) -> Engine {
            Engine::open(config, self.collaborators()).await.unwrap()
        }

        async fn wait_for_transfer(&self) -> tokio::sync::mpsc::Sender<TransferEvent> {
            while self.transfer.started().is_empty() {
                tokio::task::yield_now().await;
            }
            self.transfer.sender()
        }
    }

    fn progress(step: TransferStep, percent: f32) -> TransferEvent {
        TransferEvent::Progress(TransferProgress::new(step, percent))
    }

    #[tokio::test]
    async fn test_open_reconciles_with_degraded_entries() {
        let harness = Harness::basic();
        harness.inventory.add(record(99, 2));
        let engine = harness.open().await;

        assert_eq!(engine.installed().len(), 2);
        assert!(!engine.installed()[0].is_degraded());
        assert!(engine.installed()[1].is_degraded());

        let slugs: Vec<_> = engine.installed_platforms().iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["snes", "gba"]);

        let listed: Vec<_> = engine.listed_platforms().iter().map(|p| p.id).collect();
        assert_eq!(listed, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_open_offline_keeps_local_items() {
        let harness = Harness::basic();
        harness.catalog.set_failing(true);
        let engine = harness.open().await;

        assert!(engine.catalog().items().is_empty());
        assert_eq!(engine.installed().len(), 1);
        assert!(engine.installed()[0].is_degraded());
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let harness = Harness::basic();
        let config = EngineConfig {
            page_size: 0,
            ..Default::default()
        };
        let result = Engine::open(config, harness.collaborators()).await;
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_refresh_catalog_failure_changes_nothing() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;

        harness.catalog.set_failing(true);
        let err = engine.refresh_catalog().await.unwrap_err();
        assert!(matches!(err, EngineError::TransientFetch(_)));
        assert_eq!(engine.catalog().items().len(), 4);
        assert!(!engine.installed()[0].is_degraded());
    }

    #[tokio::test]
    async fn test_refresh_catalog_updates_mirrored_pages() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;

        let snes = platform(1, "snes", 4);
        harness.catalog.items.lock().unwrap().push(item(5, &snes));
        engine.refresh_catalog().await.unwrap();

        let page = engine.page(1, 1).await.unwrap();
        assert_eq!(page.window.total_count, 4);
    }

    #[tokio::test]
    async fn test_mirrored_paging_clamps_and_never_calls_remote() {
        let snes = platform(1, "snes", 120);
        let items: Vec<_> = (1..=120).map(|id| item(id, &snes)).collect();
        let harness = Harness::new(items, vec![snes], vec![]);
        let config = EngineConfig {
            page_size: 50,
            ..Default::default()
        };
        let engine = harness.open_with(config).await;

        let last = engine.page(1, 3).await.unwrap();
        assert_eq!(last.items.len(), 20);
        assert_eq!(last.items[0].id, 101);

        let beyond = engine.page(1, 9).await.unwrap();
        assert_eq!(beyond.window.page, 3);
        assert_eq!(beyond.items, last.items);

        assert_eq!(harness.catalog.page_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remote_paging_uses_catalog() {
        let harness = Harness::basic();
        let config = EngineConfig {
            page_size: 2,
            library_mirrored: false,
            ..Default::default()
        };
        let mut engine = harness.open_with(config).await;

        let page = engine.switch_platform(1).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.window.total_pages, 2);
        assert_eq!(engine.current_platform(), Some(1));
        assert!(harness.catalog.page_calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_status_memoized_until_platform_switch() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;

        assert!(engine.is_cached(1).await.unwrap());
        assert!(engine.is_cached(1).await.unwrap());
        assert_eq!(harness.inventory.integrity_calls(), 1);

        engine.switch_platform(2).await.unwrap();
        assert!(engine.is_cached(1).await.unwrap());
        assert_eq!(harness.inventory.integrity_calls(), 2);
    }

    #[tokio::test]
    async fn test_user_refresh_invalidates_everything() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;

        engine.is_cached(1).await.unwrap();
        engine.refresh().await.unwrap();
        engine.is_cached(1).await.unwrap();
        assert_eq!(harness.inventory.integrity_calls(), 2);
    }

    #[tokio::test]
    async fn test_unmirrored_skip_check_never_queries_saves() {
        let harness = Harness::basic();
        harness.saves.listings.lock().unwrap().insert(
            1,
            SaveListing {
                cloud: vec![],
                local: Some(LocalSave {
                    updated_at: "2024-01-01T00:00:00Z".to_string(),
                    path: None,
                }),
            },
        );
        let config = EngineConfig {
            library_mirrored: false,
            unmirrored_save_check: SaveCheck::Skip,
            ..Default::default()
        };
        let mut engine = harness.open_with(config).await;

        assert!(!engine.has_saves(1).await.unwrap());
        assert_eq!(harness.saves.list_calls(), 0);
        assert_eq!(harness.saves.local_calls(), 0);
    }

    #[tokio::test]
    async fn test_start_unknown_item() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;
        assert!(matches!(
            engine.start_download(42),
            Err(EngineError::UnknownItem(42))
        ));
        assert_eq!(engine.download_state(), DownloadState::Idle);
    }

    #[tokio::test]
    async fn test_second_download_rejected() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;

        engine.start_download(2).unwrap();
        let err = engine.start_download(3).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInProgress { item_id: 2 }));
        assert_eq!(engine.download_session().unwrap().item_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_download_refreshes_now_and_later() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;

        assert!(!engine.is_cached(2).await.unwrap());
        engine.start_download(2).unwrap();
        let tx = harness.wait_for_transfer().await;

        tx.send(progress(TransferStep::Downloading, 40.0)).await.unwrap();
        match engine.next_event().await {
            Some(EngineEvent::Download(DownloadUpdate::Progress(session))) => {
                assert_eq!(session.state, DownloadState::Downloading);
                assert_eq!(session.percent, 40.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        harness.inventory.add(record(2, 1));
        let list_calls = harness.inventory.list_calls();
        tx.send(TransferEvent::Complete).await.unwrap();

        assert_eq!(
            engine.next_event().await,
            Some(EngineEvent::Download(DownloadUpdate::Completed { item_id: 2 }))
        );
        assert_eq!(engine.download_state(), DownloadState::Idle);
        assert_eq!(harness.inventory.list_calls(), list_calls + 1);
        assert_eq!(engine.installed().len(), 2);

        // Tracker entry for item 2 was dropped, so this re-queries
        assert!(engine.is_cached(2).await.unwrap());

        let before = tokio::time::Instant::now();
        assert_eq!(engine.next_event().await, Some(EngineEvent::LibraryRefreshed));
        assert!(before.elapsed() >= Duration::from_secs(3));
        assert_eq!(harness.inventory.list_calls(), list_calls + 2);

        assert_eq!(engine.next_event().await, None);
    }

    #[tokio::test]
    async fn test_failed_download_reports_message() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;

        engine.start_download(3).unwrap();
        let tx = harness.wait_for_transfer().await;
        tx.send(TransferEvent::Error("disk full".to_string())).await.unwrap();

        match engine.next_event().await {
            Some(EngineEvent::Download(DownloadUpdate::Failed { item_id, message, session })) => {
                assert_eq!(item_id, 3);
                assert_eq!(message, "disk full");
                assert_eq!(session.percent, 0.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(engine.next_event().await, None);
    }

    #[tokio::test]
    async fn test_cancel_invalidates_item() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;

        engine.is_cached(2).await.unwrap();
        engine.start_download(2).unwrap();
        harness.wait_for_transfer().await;

        assert_eq!(engine.cancel_download().await.unwrap(), 2);
        assert_eq!(harness.transfer.cancels(), 1);
        assert_eq!(engine.download_state(), DownloadState::Idle);

        engine.is_cached(2).await.unwrap();
        assert_eq!(harness.inventory.integrity_calls(), 2);

        assert!(matches!(
            engine.cancel_download().await,
            Err(EngineError::NoActiveDownload)
        ));
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_state() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;
        assert!(engine.is_cached(1).await.unwrap());

        *harness.inventory.fail_delete.lock().unwrap() = true;
        let err = engine.delete_item(1).await.unwrap_err();
        assert!(matches!(err, EngineError::DeletionFailed { item_id: 1, .. }));

        assert_eq!(engine.installed().len(), 1);
        assert!(engine.is_cached(1).await.unwrap());
        assert_eq!(harness.inventory.integrity_calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_item() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;
        assert!(engine.is_cached(1).await.unwrap());

        engine.delete_item(1).await.unwrap();
        assert!(engine.installed().is_empty());
        assert!(engine.installed_platforms().is_empty());
        assert!(!engine.is_cached(1).await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_size_reports_installed_bytes() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;
        assert_eq!(engine.cache_size(1).await.unwrap(), 1024);
        assert_eq!(engine.cache_size(2).await.unwrap(), 0);

        engine.delete_item(1).await.unwrap();
        assert_eq!(engine.cache_size(1).await.unwrap(), 0);

        engine.close().await;
        assert!(matches!(engine.cache_size(1).await, Err(EngineError::Closed)));
    }

    #[tokio::test]
    async fn test_resolve_saves_interleaves_local() {
        let harness = Harness::basic();
        harness.saves.listings.lock().unwrap().insert(
            1,
            SaveListing {
                cloud: vec![
                    CloudSave {
                        id: "a".to_string(),
                        file_name: "a.srm".to_string(),
                        updated_at: "2024-02-01T00:00:00Z".to_string(),
                    },
                    CloudSave {
                        id: "b".to_string(),
                        file_name: "b.srm".to_string(),
                        updated_at: "2023-12-01T00:00:00Z".to_string(),
                    },
                ],
                local: Some(LocalSave {
                    updated_at: "2024-01-01T00:00:00Z".to_string(),
                    path: None,
                }),
            },
        );
        let engine = harness.open().await;

        let ranked = engine.resolve_saves(1).await.unwrap();
        assert_eq!(ranked.len(), 4);
        assert!(ranked.options[0].recommended);
        assert!(matches!(
            &ranked.options[0].candidate,
            SaveCandidate::Cloud { id, .. } if id == "a"
        ));
        assert!(matches!(ranked.options[1].candidate, SaveCandidate::Local { .. }));
        assert!(matches!(
            &ranked.options[2].candidate,
            SaveCandidate::Cloud { id, .. } if id == "b"
        ));
        assert!(matches!(ranked.options[3].candidate, SaveCandidate::None));
    }

    #[tokio::test]
    async fn test_resolve_saves_rejects_bad_listing() {
        let harness = Harness::basic();
        harness.saves.listings.lock().unwrap().insert(
            1,
            SaveListing {
                cloud: vec![CloudSave {
                    id: String::new(),
                    file_name: "orphan.srm".to_string(),
                    updated_at: "2024-02-01T00:00:00Z".to_string(),
                }],
                local: None,
            },
        );
        let engine = harness.open().await;
        assert!(matches!(
            engine.resolve_saves(1).await,
            Err(EngineError::Invariant(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_targets_need_a_path() {
        let mut harness = Harness::basic();
        let capabilities = FakeCapabilities {
            targets: HashMap::from([
                (
                    "snes9x".to_string(),
                    TargetInfo {
                        name: "Snes9x".to_string(),
                        supported_platforms: vec!["snes".to_string()],
                    },
                ),
                (
                    "bsnes".to_string(),
                    TargetInfo {
                        name: "bsnes".to_string(),
                        supported_platforms: vec!["SNES".to_string()],
                    },
                ),
                (
                    "mgba".to_string(),
                    TargetInfo {
                        name: "mGBA".to_string(),
                        supported_platforms: vec!["gba".to_string()],
                    },
                ),
                (
                    "higan".to_string(),
                    TargetInfo {
                        name: "higan".to_string(),
                        supported_platforms: vec!["snes".to_string()],
                    },
                ),
            ]),
            paths: HashMap::from([
                ("snes9x".to_string(), PathBuf::from("/usr/bin/snes9x")),
                ("bsnes".to_string(), PathBuf::from("/usr/bin/bsnes")),
                ("mgba".to_string(), PathBuf::from("/usr/bin/mgba")),
            ]),
        };
        harness.capabilities = Arc::new(capabilities);
        let engine = harness.open().await;

        let keys: Vec<_> = engine.launch_targets("snes").into_iter().map(|t| t.key).collect();
        assert_eq!(keys, vec!["bsnes", "snes9x"]);
        assert!(engine.launch_targets("psx").is_empty());
    }

    #[tokio::test]
    async fn test_close_stops_everything() {
        let harness = Harness::basic();
        let mut engine = harness.open().await;

        engine.start_download(2).unwrap();
        harness.wait_for_transfer().await;
        engine.close().await;

        assert!(engine.is_closed());
        assert_eq!(harness.transfer.cancels(), 1);
        assert_eq!(engine.next_event().await, None);
        assert!(matches!(engine.is_cached(1).await, Err(EngineError::Closed)));
        assert!(matches!(engine.start_download(2), Err(EngineError::Closed)));
        assert!(matches!(engine.refresh().await, Err(EngineError::Closed)));
    }
}
