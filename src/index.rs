//! SQLite-backed local install index
//!
//! Records which catalog items have been installed, where, and how large the
//! artifact was at install time. Integrity is a size comparison against the
//! file (or directory tree) currently on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::catalog::{ItemId, LocalInstallRecord};
use crate::sources::{IntegrityReport, LocalInventory};

/// One row of the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallEntry {
    pub record: LocalInstallRecord,
    /// Size recorded when the install finished
    pub size_bytes: u64,
    pub installed_at: i64,
}

/// Local inventory stored in SQLite.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct LocalIndexDb {
    conn: Arc<Mutex<Connection>>,
}

impl LocalIndexDb {
    /// Open or create the index database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open install index: {}", path.display()))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("install index lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS installs (
                item_id INTEGER PRIMARY KEY,
                platform_id INTEGER NOT NULL,
                local_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                installed_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_installs_platform
                ON installs(platform_id);
            "#,
        )?;
        Ok(())
    }

    /// Record (or replace) an install, measuring the artifact now on disk
    pub fn record_install(&self, record: &LocalInstallRecord) -> Result<u64> {
        let size = artifact_size(&record.local_path)
            .with_context(|| format!("Failed to measure {}", record.local_path.display()))?;
        let now = chrono::Utc::now().timestamp();

        self.conn()?.execute(
            r#"
            INSERT INTO installs (item_id, platform_id, local_path, size_bytes, installed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(item_id) DO UPDATE SET
                platform_id = ?2,
                local_path = ?3,
                size_bytes = ?4,
                installed_at = ?5
            "#,
            params![
                record.item_id as i64,
                record.platform_id as i64,
                record.local_path.to_string_lossy(),
                size as i64,
                now
            ],
        )?;

        info!(
            "Recorded install of item {} at {} ({} bytes)",
            record.item_id,
            record.local_path.display(),
            size
        );
        Ok(size)
    }

    pub fn get(&self, item_id: ItemId) -> Result<Option<InstallEntry>> {
        let entry = self
            .conn()?
            .query_row(
                "SELECT item_id, platform_id, local_path, size_bytes, installed_at
                 FROM installs WHERE item_id = ?1",
                params![item_id as i64],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn entries(&self) -> Result<Vec<InstallEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT item_id, platform_id, local_path, size_bytes, installed_at
             FROM installs ORDER BY platform_id, item_id",
        )?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn remove_row(&self, item_id: ItemId) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM installs WHERE item_id = ?1", params![item_id as i64])?;
        Ok(())
    }

    fn integrity(&self, item_id: ItemId) -> Result<IntegrityReport> {
        let Some(entry) = self.get(item_id)? else {
            return Ok(IntegrityReport::default());
        };
        if !entry.record.local_path.exists() {
            return Ok(IntegrityReport::default());
        }

        let actual = artifact_size(&entry.record.local_path)?;
        let verified = actual == entry.size_bytes;
        if !verified {
            warn!(
                "Size mismatch for item {}: expected {} bytes, found {}",
                item_id, entry.size_bytes, actual
            );
        }
        Ok(IntegrityReport {
            cached: true,
            verified,
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<InstallEntry> {
    let item_id: i64 = row.get(0)?;
    let platform_id: i64 = row.get(1)?;
    let local_path: String = row.get(2)?;
    let size_bytes: i64 = row.get(3)?;
    Ok(InstallEntry {
        record: LocalInstallRecord {
            item_id: item_id as ItemId,
            local_path: PathBuf::from(local_path),
            platform_id: platform_id as u64,
        },
        size_bytes: size_bytes as u64,
        installed_at: row.get(4)?,
    })
}

/// File size, or the summed size of every file below a directory
pub fn artifact_size(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path)?;
    if meta.is_file() {
        return Ok(meta.len());
    }

    let mut total = 0;
    for entry in fs::read_dir(path)? {
        total += artifact_size(&entry?.path())?;
    }
    Ok(total)
}

impl LocalIndexDb {
    /// Run a query or filesystem walk off the async runtime
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LocalIndexDb) -> Result<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .context("Install index task panicked")?
    }

    fn installed_size(&self, item_id: ItemId) -> Result<u64> {
        match self.get(item_id)? {
            Some(entry) if entry.record.local_path.exists() => {
                artifact_size(&entry.record.local_path)
            }
            _ => Ok(0),
        }
    }

    /// Remove the artifact, then the row. A failed removal keeps the row.
    fn remove(&self, item_id: ItemId) -> Result<()> {
        let entry = self
            .get(item_id)?
            .ok_or_else(|| anyhow!("item {} is not installed", item_id))?;
        let path = &entry.record.local_path;

        if path.is_dir() {
            fs::remove_dir_all(path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        } else if path.exists() {
            fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
        }

        self.remove_row(item_id)?;
        info!("Deleted item {} from {}", item_id, path.display());
        Ok(())
    }
}

#[async_trait]
impl LocalInventory for LocalIndexDb {
    async fn list_installed(&self) -> Result<Vec<LocalInstallRecord>> {
        self.blocking(|db| Ok(db.entries()?.into_iter().map(|e| e.record).collect()))
            .await
    }

    async fn cache_size(&self, item_id: ItemId) -> Result<u64> {
        self.blocking(move |db| db.installed_size(item_id)).await
    }

    async fn check_integrity(&self, item_id: ItemId) -> Result<IntegrityReport> {
        self.blocking(move |db| db.integrity(item_id)).await
    }

    async fn delete(&self, item_id: ItemId) -> Result<()> {
        self.blocking(move |db| db.remove(item_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_rom(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![0u8; len]).unwrap();
        path
    }

    fn record(item_id: ItemId, path: PathBuf) -> LocalInstallRecord {
        LocalInstallRecord {
            item_id,
            local_path: path,
            platform_id: 1,
        }
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let temp = TempDir::new().unwrap();
        let db = LocalIndexDb::open_in_memory().unwrap();
        let path = write_rom(temp.path(), "zelda.sfc", 2048);

        assert_eq!(db.record_install(&record(7, path.clone())).unwrap(), 2048);

        let installed = db.list_installed().await.unwrap();
        assert_eq!(installed, vec![record(7, path)]);
        assert_eq!(db.cache_size(7).await.unwrap(), 2048);
        assert_eq!(db.cache_size(8).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_integrity_detects_size_change() {
        let temp = TempDir::new().unwrap();
        let db = LocalIndexDb::open_in_memory().unwrap();
        let path = write_rom(temp.path(), "metroid.sfc", 100);
        db.record_install(&record(1, path.clone())).unwrap();

        let ok = db.check_integrity(1).await.unwrap();
        assert!(ok.cached && ok.verified);

        // Truncated by an interrupted write
        fs::write(&path, vec![0u8; 40]).unwrap();
        let bad = db.check_integrity(1).await.unwrap();
        assert!(bad.cached);
        assert!(!bad.verified);

        fs::remove_file(&path).unwrap();
        assert_eq!(db.check_integrity(1).await.unwrap(), IntegrityReport::default());
        assert_eq!(db.check_integrity(99).await.unwrap(), IntegrityReport::default());
    }

    #[tokio::test]
    async fn test_directory_artifacts_are_summed() {
        let temp = TempDir::new().unwrap();
        let game_dir = temp.path().join("ff7");
        fs::create_dir_all(game_dir.join("disc2")).unwrap();
        write_rom(&game_dir, "disc1.bin", 300);
        write_rom(&game_dir.join("disc2"), "disc2.bin", 200);

        let db = LocalIndexDb::open_in_memory().unwrap();
        assert_eq!(db.record_install(&record(3, game_dir.clone())).unwrap(), 500);

        db.delete(3).await.unwrap();
        assert!(!game_dir.exists());
        assert!(db.list_installed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_item_fails() {
        let db = LocalIndexDb::open_in_memory().unwrap();
        assert!(db.delete(42).await.is_err());
    }

    #[tokio::test]
    async fn test_record_replaces_existing_row() {
        let temp = TempDir::new().unwrap();
        let db = LocalIndexDb::open_in_memory().unwrap();
        let first = write_rom(temp.path(), "a.gba", 10);
        let second = write_rom(temp.path(), "b.gba", 20);

        db.record_install(&record(5, first)).unwrap();
        db.record_install(&record(5, second.clone())).unwrap();

        let entry = db.get(5).unwrap().unwrap();
        assert_eq!(entry.record.local_path, second);
        assert_eq!(entry.size_bytes, 20);
        assert_eq!(db.entries().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inventory_calls_run_from_spawned_tasks() {
        let temp = TempDir::new().unwrap();
        let db = LocalIndexDb::open_in_memory().unwrap();
        for id in 1..=4u64 {
            let dir = temp.path().join(format!("game_{}", id));
            fs::create_dir_all(&dir).unwrap();
            write_rom(&dir, "disc.bin", 100 * id as usize);
            db.record_install(&record(id, dir)).unwrap();
        }

        let handles: Vec<_> = (1..=4u64)
            .map(|id| {
                let db = db.clone();
                tokio::spawn(async move { db.check_integrity(id).await.unwrap() })
            })
            .collect();
        for handle in handles {
            let report = handle.await.unwrap();
            assert!(report.cached && report.verified);
        }

        // Clones share the connection, so a delete through one is seen by all
        let other = db.clone();
        other.delete(2).await.unwrap();
        assert_eq!(db.list_installed().await.unwrap().len(), 3);
        assert_eq!(db.cache_size(3).await.unwrap(), 300);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("index.db");
        let db = LocalIndexDb::open(&path).unwrap();
        assert!(path.exists());
        assert!(db.entries().unwrap().is_empty());
    }
}
