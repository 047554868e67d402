//! Save inventory: cloud saves from the library server, local saves on disk
//!
//! Local saves for an item live in `<saves_dir>/<item_id>/`; the most recently
//! modified file there is the local candidate.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{build_client, endpoint, get_json};
use crate::catalog::ItemId;
use crate::saves::{CloudSave, LocalSave};
use crate::sources::{SaveInventory, SaveListing};

/// Save entry as returned by the server
#[derive(Debug, Clone, Deserialize)]
struct SaveDto {
    id: u64,
    #[serde(default)]
    rom_id: Option<ItemId>,
    file_name: String,
    #[serde(default)]
    updated_at: String,
}

impl From<SaveDto> for CloudSave {
    fn from(save: SaveDto) -> Self {
        CloudSave {
            id: save.id.to_string(),
            file_name: save.file_name,
            updated_at: save.updated_at,
        }
    }
}

/// Keep the saves belonging to `item_id`; entries without a rom id are trusted
fn cloud_saves_for(item_id: ItemId, saves: Vec<SaveDto>) -> Vec<CloudSave> {
    saves
        .into_iter()
        .filter(|save| save.rom_id.is_none_or(|rom_id| rom_id == item_id))
        .map(CloudSave::from)
        .collect()
}

/// Most recently modified file directly inside `dir`
fn newest_local_save(dir: &Path) -> Result<Option<LocalSave>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read save directory {}", dir.display()))?
    {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        if newest.as_ref().is_none_or(|(best, _)| modified > *best) {
            newest = Some((modified, entry.path()));
        }
    }

    Ok(newest.map(|(modified, path)| LocalSave {
        updated_at: DateTime::<Utc>::from(modified).to_rfc3339(),
        path: Some(path),
    }))
}

/// Save inventory backed by the library server and a local save directory
pub struct HttpSaves {
    client: reqwest::Client,
    base_url: String,
    saves_dir: PathBuf,
}

impl HttpSaves {
    /// An empty `base_url` disables cloud saves
    pub fn new(base_url: &str, saves_dir: PathBuf) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            saves_dir,
        })
    }

    async fn cloud_saves(&self, item_id: ItemId) -> Result<Vec<CloudSave>> {
        if self.base_url.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = endpoint(&self.base_url, &["api", "saves"])?;
        url.query_pairs_mut().append_pair("rom_id", &item_id.to_string());
        let saves: Vec<SaveDto> = get_json(&self.client, url).await?;

        let saves = cloud_saves_for(item_id, saves);
        debug!("Item {} has {} cloud saves", item_id, saves.len());
        Ok(saves)
    }

    async fn local_save(&self, item_id: ItemId) -> Result<Option<LocalSave>> {
        let dir = self.saves_dir.join(item_id.to_string());
        tokio::task::spawn_blocking(move || newest_local_save(&dir))
            .await
            .context("Save directory scan panicked")?
    }
}

#[async_trait]
impl SaveInventory for HttpSaves {
    async fn list_save_candidates(&self, item_id: ItemId) -> Result<SaveListing> {
        let (cloud, local) = tokio::join!(self.cloud_saves(item_id), self.local_save(item_id));
        Ok(SaveListing {
            cloud: cloud?,
            local: local?,
        })
    }

    async fn local_candidate(&self, item_id: ItemId) -> Result<Option<LocalSave>> {
        self.local_save(item_id).await
    }
}
