//! Platform listing pagination
//!
//! Two strategies sit behind [`PageProvider`]: slicing the mirrored catalog in
//! memory, or asking the server for one offset/limit window at a time.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::{CatalogItem, PlatformId};
use crate::sources::CatalogSource;

/// Default number of items per listing page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Position of one page within a platform listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub platform_id: PlatformId,
    /// 1-based
    pub page: usize,
    pub page_size: usize,
    pub offset: usize,
    pub total_count: usize,
    pub total_pages: usize,
}

impl PageWindow {
    pub fn new(platform_id: PlatformId, page: usize, page_size: usize, total_count: usize) -> Self {
        Self {
            platform_id,
            page,
            page_size,
            offset: page_offset(page, page_size),
            total_count,
            total_pages: total_pages(total_count, page_size),
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// `ceil(total / page_size)`, never less than one page
pub fn total_pages(total_count: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 1;
    }
    total_count.div_ceil(page_size).max(1)
}

/// Clamp a requested page number into `[1, total_pages]`
pub fn clamp_page(page: usize, total_pages: usize) -> usize {
    page.clamp(1, total_pages.max(1))
}

fn page_offset(page: usize, page_size: usize) -> usize {
    page.saturating_sub(1).saturating_mul(page_size)
}

/// One page of a platform listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<CatalogItem>,
    pub window: PageWindow,
}

impl Page {
    fn empty(platform_id: PlatformId, page: usize, page_size: usize) -> Self {
        Self {
            items: Vec::new(),
            window: PageWindow::new(platform_id, page, page_size, 0),
        }
    }
}

/// Source of listing pages
#[async_trait]
pub trait PageProvider: Send + Sync {
    async fn page(&self, platform_id: PlatformId, page: usize, page_size: usize) -> Page;

    /// Whether pages come from memory rather than the server
    fn is_mirrored(&self) -> bool;
}

/// Slices a mirrored catalog snapshot; never calls the server
pub struct MirroredPages {
    items: Arc<[CatalogItem]>,
}

impl MirroredPages {
    pub fn new(items: Arc<[CatalogItem]>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl PageProvider for MirroredPages {
    async fn page(&self, platform_id: PlatformId, page: usize, page_size: usize) -> Page {
        let filtered: Vec<&CatalogItem> = self
            .items
            .iter()
            .filter(|item| item.platform.id == platform_id)
            .collect();

        let window = PageWindow::new(platform_id, page, page_size, filtered.len());
        let items = filtered
            .into_iter()
            .skip(window.offset)
            .take(page_size)
            .cloned()
            .collect();

        Page { items, window }
    }

    fn is_mirrored(&self) -> bool {
        true
    }
}

/// Delegates each page to the server's offset/limit query
pub struct RemotePages {
    source: Arc<dyn CatalogSource>,
}

impl RemotePages {
    pub fn new(source: Arc<dyn CatalogSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl PageProvider for RemotePages {
    async fn page(&self, platform_id: PlatformId, page: usize, page_size: usize) -> Page {
        let offset = page_offset(page, page_size);
        match self
            .source
            .fetch_items_for_platform(platform_id, page_size, offset)
            .await
        {
            Ok((mut items, total)) => {
                if items.len() > page_size {
                    warn!(
                        "Server returned {} items for a page of {}, truncating",
                        items.len(),
                        page_size
                    );
                    items.truncate(page_size);
                }
                Page {
                    items,
                    window: PageWindow::new(platform_id, page, page_size, total),
                }
            }
            Err(e) => {
                warn!(
                    "Failed to fetch page {} of platform {}: {:#}",
                    page, platform_id, e
                );
                Page::empty(platform_id, page, page_size)
            }
        }
    }

    fn is_mirrored(&self) -> bool {
        false
    }
}

/// Computes page windows over the configured provider
pub struct PaginationController {
    provider: Box<dyn PageProvider>,
    page_size: usize,
}

impl PaginationController {
    pub fn new(provider: Box<dyn PageProvider>, page_size: usize) -> Self {
        Self {
            provider,
            page_size: page_size.max(1),
        }
    }

    pub fn mirrored(items: Arc<[CatalogItem]>, page_size: usize) -> Self {
        Self::new(Box::new(MirroredPages::new(items)), page_size)
    }

    pub fn remote(source: Arc<dyn CatalogSource>, page_size: usize) -> Self {
        Self::new(Box::new(RemotePages::new(source)), page_size)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_mirrored(&self) -> bool {
        self.provider.is_mirrored()
    }

    /// Fetch one page. `page` is expected to be clamped by the caller already.
    pub async fn page(&self, platform_id: PlatformId, page: usize) -> Page {
        let page = page.max(1);
        let result = self.provider.page(platform_id, page, self.page_size).await;
        debug!(
            "Platform {} page {}/{}: {} items of {}",
            platform_id,
            result.window.page,
            result.window.total_pages,
            result.items.len(),
            result.window.total_count
        );
        result
    }
}
