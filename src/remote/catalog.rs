//! Catalog source backed by the library server's REST API

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{build_client, endpoint, get_json};
use crate::catalog::{CatalogItem, Platform, PlatformId, PlatformRef};
use crate::sources::CatalogSource;

/// Page size used when mirroring the whole library
const FULL_FETCH_PAGE: usize = 500;

/// ROM entry as returned by the server
#[derive(Debug, Clone, Deserialize)]
struct RomDto {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    fs_name: String,
    #[serde(default)]
    fs_size_bytes: u64,
    platform_id: PlatformId,
    #[serde(default)]
    platform_slug: String,
    #[serde(default, alias = "platform_display_name")]
    platform_name: String,
    #[serde(default, alias = "path_cover_large")]
    url_cover: Option<String>,
    #[serde(default)]
    regions: Vec<String>,
}

impl From<RomDto> for CatalogItem {
    fn from(rom: RomDto) -> Self {
        CatalogItem {
            id: rom.id,
            name: rom
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| rom.fs_name.clone()),
            platform: PlatformRef {
                id: rom.platform_id,
                slug: rom.platform_slug,
                name: rom.platform_name,
            },
            file_name: rom.fs_name,
            size_bytes: rom.fs_size_bytes,
            cover_url: rom.url_cover.filter(|u| !u.is_empty()),
            region: rom.regions.into_iter().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RomPage {
    #[serde(default)]
    items: Vec<RomDto>,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct PlatformDto {
    id: PlatformId,
    slug: String,
    #[serde(default, alias = "display_name")]
    name: String,
    #[serde(default)]
    rom_count: u32,
}

impl From<PlatformDto> for Platform {
    fn from(p: PlatformDto) -> Self {
        let name = if p.name.is_empty() { p.slug.clone() } else { p.name };
        Platform {
            id: p.id,
            name,
            slug: p.slug,
            rom_count: p.rom_count,
        }
    }
}

/// Library server catalog client
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn rom_page(
        &self,
        platform_id: Option<PlatformId>,
        limit: usize,
        offset: usize,
    ) -> Result<RomPage> {
        let mut url = endpoint(&self.base_url, &["api", "roms"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(platform_id) = platform_id {
                query.append_pair("platform_id", &platform_id.to_string());
            }
            query
                .append_pair("limit", &limit.to_string())
                .append_pair("offset", &offset.to_string());
        }
        get_json(&self.client, url).await
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn fetch_all_items(&self) -> Result<Vec<CatalogItem>> {
        let mut items = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.rom_page(None, FULL_FETCH_PAGE, offset).await?;
            let fetched = page.items.len();
            items.extend(page.items.into_iter().map(CatalogItem::from));
            offset += fetched;

            if fetched == 0 || offset >= page.total {
                break;
            }
        }

        debug!("Fetched {} catalog items", items.len());
        Ok(items)
    }

    async fn fetch_platforms(&self) -> Result<Vec<Platform>> {
        let url = endpoint(&self.base_url, &["api", "platforms"])?;
        let platforms: Vec<PlatformDto> = get_json(&self.client, url).await?;
        Ok(platforms.into_iter().map(Platform::from).collect())
    }

    async fn fetch_items_for_platform(
        &self,
        platform_id: PlatformId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<CatalogItem>, usize)> {
        let page = self.rom_page(Some(platform_id), limit, offset).await?;
        let total = page.total;
        Ok((page.items.into_iter().map(CatalogItem::from).collect(), total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rom_dto_conversion() {
        let json = r#"{
            "items": [{
                "id": 12,
                "name": "",
                "fs_name": "Zelda (USA).zip",
                "fs_size_bytes": 1048576,
                "platform_id": 3,
                "platform_slug": "snes",
                "platform_display_name": "Super Nintendo",
                "url_cover": "",
                "regions": ["USA", "Europe"]
            }],
            "total": 1
        }"#;
        let page: RomPage = serde_json::from_str(json).unwrap();
        let item = CatalogItem::from(page.items.into_iter().next().unwrap());

        assert_eq!(item.name, "Zelda (USA).zip");
        assert_eq!(item.platform.name, "Super Nintendo");
        assert_eq!(item.platform.slug, "snes");
        assert_eq!(item.size_bytes, 1048576);
        assert!(item.cover_url.is_none());
        assert_eq!(item.region.as_deref(), Some("USA"));
    }

    #[test]
    fn test_platform_dto_falls_back_to_slug() {
        let json = r#"[{"id": 1, "slug": "gba", "rom_count": 4}]"#;
        let platforms: Vec<PlatformDto> = serde_json::from_str(json).unwrap();
        let platform = Platform::from(platforms.into_iter().next().unwrap());
        assert_eq!(platform.name, "gba");
        assert_eq!(platform.rom_count, 4);
    }
}
