//! Streaming ROM downloads with optional zip extraction

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{build_client, endpoint, truncate_error};
use crate::catalog::{CatalogItem, LocalInstallRecord};
use crate::download::{TransferEvent, TransferProgress, TransferStep};
use crate::index::LocalIndexDb;
use crate::sources::Transfer;

/// How often to report download progress (in milliseconds)
const CALLBACK_INTERVAL_MS: u128 = 250;

/// Capacity of the event channel handed to the caller
const EVENT_BUFFER: usize = 64;

/// Downloads items from the library server into a local directory
pub struct HttpTransfer {
    client: reqwest::Client,
    base_url: String,
    downloads_dir: PathBuf,
    extract_archives: bool,
    index: Option<Arc<LocalIndexDb>>,
    cancel: Mutex<Option<watch::Sender<bool>>>,
}

impl HttpTransfer {
    pub fn new(base_url: &str, downloads_dir: PathBuf, extract_archives: bool) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            downloads_dir,
            extract_archives,
            index: None,
            cancel: Mutex::new(None),
        })
    }

    /// Record finished installs in the given index
    pub fn with_index(mut self, index: Arc<LocalIndexDb>) -> Self {
        self.index = Some(index);
        self
    }

    fn replace_cancel(&self, sender: Option<watch::Sender<bool>>) -> Result<()> {
        let mut slot = self
            .cancel
            .lock()
            .map_err(|_| anyhow!("transfer lock poisoned"))?;
        if let Some(previous) = std::mem::replace(&mut *slot, sender) {
            let _ = previous.send(true);
        }
        Ok(())
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn start(&self, item: &CatalogItem) -> Result<mpsc::Receiver<TransferEvent>> {
        let file_name = Path::new(&item.file_name)
            .file_name()
            .ok_or_else(|| anyhow!("Item {} has no usable file name", item.id))?
            .to_owned();
        let platform_dir = if item.platform.slug.is_empty() {
            item.platform.id.to_string()
        } else {
            item.platform.slug.clone()
        };

        let id = item.id.to_string();
        let url = endpoint(
            &self.base_url,
            &["api", "roms", &id, "content", &item.file_name],
        )?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.replace_cancel(Some(cancel_tx))?;

        let job = Job {
            client: self.client.clone(),
            url,
            item: item.clone(),
            target: self.downloads_dir.join(platform_dir).join(file_name),
            extract: self.extract_archives,
            index: self.index.clone(),
            tx,
            cancel: cancel_rx,
        };

        info!("Starting download of {} ({})", item.name, item.file_name);
        tokio::spawn(job.run());
        Ok(rx)
    }

    async fn cancel(&self) -> Result<()> {
        self.replace_cancel(None)
    }
}

struct Job {
    client: reqwest::Client,
    url: reqwest::Url,
    item: CatalogItem,
    target: PathBuf,
    extract: bool,
    index: Option<Arc<LocalIndexDb>>,
    tx: mpsc::Sender<TransferEvent>,
    cancel: watch::Receiver<bool>,
}

impl Job {
    async fn run(self) {
        let tx = self.tx.clone();
        let event = match self.execute().await {
            Ok(()) => TransferEvent::Complete,
            Err(e) => {
                warn!("Download failed: {:#}", e);
                TransferEvent::Error(format!("{:#}", e))
            }
        };
        let _ = tx.send(event).await;
    }

    async fn emit(&self, progress: TransferProgress) -> Result<()> {
        self.tx
            .send(TransferEvent::Progress(progress))
            .await
            .map_err(|_| anyhow!("Download abandoned"))
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn execute(&self) -> Result<()> {
        self.emit(TransferProgress::new(TransferStep::Preparing, 0.0))
            .await?;

        if let Some(parent) = self.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let part = self.target.with_extension(format!(
            "{}.part",
            self.target
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("bin")
        ));

        if let Err(e) = self.fetch(&part).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        tokio::fs::rename(&part, &self.target)
            .await
            .with_context(|| format!("Failed to move download into {}", self.target.display()))?;

        let local_path = if self.extract && is_zip(&self.target) {
            self.extract_target().await?
        } else {
            self.target.clone()
        };

        if let Some(index) = self.index.clone() {
            let record = LocalInstallRecord {
                item_id: self.item.id,
                local_path,
                platform_id: self.item.platform.id,
            };
            tokio::task::spawn_blocking(move || index.record_install(&record))
                .await
                .context("Index writer panicked")??;
        }

        Ok(())
    }

    async fn fetch(&self, part: &Path) -> Result<u64> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .with_context(|| format!("Connection failed: {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("HTTP {} - {}", status.as_u16(), truncate_error(&body));
        }

        let total = response.content_length().unwrap_or(self.item.size_bytes);
        let mut file = tokio::fs::File::create(part)
            .await
            .with_context(|| format!("Failed to create {}", part.display()))?;

        let mut done = 0u64;
        let mut last_report = Instant::now();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            if self.cancelled() {
                bail!("Download cancelled");
            }
            let chunk = chunk.context("Failed to read chunk")?;
            file.write_all(&chunk)
                .await
                .context("Failed to write chunk")?;
            done += chunk.len() as u64;

            if last_report.elapsed().as_millis() >= CALLBACK_INTERVAL_MS {
                last_report = Instant::now();
                self.emit(
                    TransferProgress::new(TransferStep::Downloading, percent_of(done, total))
                        .with_bytes(done, total),
                )
                .await?;
            }
        }

        file.flush().await.context("Failed to flush download")?;
        self.emit(TransferProgress::new(TransferStep::Downloading, 100.0).with_bytes(done, done))
            .await?;

        debug!("Downloaded {} bytes to {}", done, part.display());
        Ok(done)
    }

    async fn extract_target(&self) -> Result<PathBuf> {
        let archive = self.target.clone();
        let out_dir = self.target.with_extension("");
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();

        self.emit(TransferProgress::new(TransferStep::Extracting, 0.0))
            .await?;

        let dest = out_dir.clone();
        let files = tokio::task::spawn_blocking(move || {
            extract_zip(&archive, &dest, Some(&tx), Some(&cancel))
        })
        .await
        .context("Extraction task panicked")??;

        tokio::fs::remove_file(&self.target)
            .await
            .with_context(|| format!("Failed to remove {}", self.target.display()))?;

        info!("Extracted {} files to {}", files, out_dir.display());
        Ok(out_dir)
    }
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn percent_of(done: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        ((done as f64 / total as f64) * 100.0).min(100.0) as f32
    }
}

/// Extract every entry of a zip archive into `out_dir`.
///
/// Must run on a blocking thread when `tx` is given. Entries whose names
/// escape the output directory are skipped. Returns the number of entries
/// processed.
pub fn extract_zip(
    archive_path: &Path,
    out_dir: &Path,
    tx: Option<&mpsc::Sender<TransferEvent>>,
    cancel: Option<&watch::Receiver<bool>>,
) -> Result<u32> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Not a valid zip archive: {}", archive_path.display()))?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let total = archive.len() as u32;
    for i in 0..archive.len() {
        if cancel.is_some_and(|c| *c.borrow()) {
            bail!("Extraction cancelled");
        }

        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping unsafe archive path: {}", entry.name());
            continue;
        };
        let dest = out_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&dest)
                .with_context(|| format!("Failed to create {}", dest.display()))?;
            std::io::copy(&mut entry, &mut out)
                .with_context(|| format!("Failed to extract {}", dest.display()))?;
        }

        if let Some(tx) = tx {
            let current = i as u32 + 1;
            let progress = TransferProgress::new(
                TransferStep::Extracting,
                current as f32 * 100.0 / total.max(1) as f32,
            )
            .with_files(current, total);
            tx.blocking_send(TransferEvent::Progress(progress))
                .map_err(|_| anyhow!("Extraction abandoned"))?;
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        writer.add_directory("ff7/", options).unwrap();
        writer.start_file("ff7/disc1.bin", options).unwrap();
        writer.write_all(&[1u8; 64]).unwrap();
        writer.start_file("ff7/disc2.bin", options).unwrap();
        writer.write_all(&[2u8; 32]).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_extract_zip_reports_files() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("ff7.zip");
        build_zip(&archive);

        let out = temp.path().join("out");
        let (tx, mut rx) = mpsc::channel(16);
        let count = extract_zip(&archive, &out, Some(&tx), None).unwrap();
        drop(tx);

        assert_eq!(count, 3);
        assert_eq!(std::fs::read(out.join("ff7/disc1.bin")).unwrap().len(), 64);
        assert_eq!(std::fs::read(out.join("ff7/disc2.bin")).unwrap().len(), 32);

        let mut counters = Vec::new();
        while let Ok(TransferEvent::Progress(p)) = rx.try_recv() {
            assert_eq!(p.step, TransferStep::Extracting);
            counters.push(p.files.unwrap().current);
        }
        assert_eq!(counters, vec![1, 2, 3]);
    }

    #[test]
    fn test_extract_zip_honours_cancel() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("ff7.zip");
        build_zip(&archive);

        let (cancel_tx, cancel_rx) = watch::channel(true);
        let err = extract_zip(&archive, &temp.path().join("out"), None, Some(&cancel_rx))
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        drop(cancel_tx);
    }

    #[test]
    fn test_extract_rejects_non_zip() {
        let temp = TempDir::new().unwrap();
        let bogus = temp.path().join("bogus.zip");
        std::fs::write(&bogus, b"not a zip").unwrap();
        assert!(extract_zip(&bogus, &temp.path().join("out"), None, None).is_err());
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 0), 0.0);
        assert_eq!(percent_of(50, 200), 25.0);
        assert_eq!(percent_of(300, 200), 100.0);
    }

    #[test]
    fn test_is_zip() {
        assert!(is_zip(Path::new("/roms/snes/Zelda.ZIP")));
        assert!(!is_zip(Path::new("/roms/snes/Zelda.sfc")));
    }
}
