//! retrocache - local cache and save reconciliation for a remote game library

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use retrocache::catalog::{CatalogSnapshot, ItemId, PlatformId, SnapshotCatalog};
use retrocache::config::{ConfiguredEmulators, Settings};
use retrocache::download::DownloadUpdate;
use retrocache::index::LocalIndexDb;
use retrocache::logging;
use retrocache::remote::{HttpCatalog, HttpSaves, HttpTransfer};
use retrocache::saves::{validate_listing, SaveResolver};
use retrocache::sources::{CatalogSource, SaveListing};
use retrocache::{Collaborators, Engine, EngineError, EngineEvent};

#[derive(Parser)]
#[command(name = "retrocache")]
#[command(version)]
#[command(about = "Local cache and save reconciliation for a remote game library")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write daily log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Library server URL (overrides the settings file)
    #[arg(long, global = true, env = "RETROCACHE_SERVER")]
    server: Option<String>,

    /// Read the catalog from a JSON snapshot instead of the server
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the catalog and install summary
    Info,

    /// List one page of a platform
    Page {
        platform: PlatformId,

        #[arg(default_value = "1")]
        page: usize,
    },

    /// List installed items
    Installed,

    /// Download an item into the library
    Download { item_id: ItemId },

    /// Remove an installed item from disk
    Delete { item_id: ItemId },

    /// Rank save candidates read from a JSON listing
    Resolve {
        /// File with `{"cloud": [...], "local": {...}}`
        listing: PathBuf,
    },

    /// Show emulators that can launch a platform
    Targets { platform_slug: String },

    /// Save the server catalog to a JSON snapshot
    Snapshot { output: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_dir.as_deref())?;

    let mut settings = Settings::load();
    if let Some(server) = cli.server {
        settings.server_url = server;
    }

    match cli.command {
        Commands::Resolve { listing } => resolve(&settings, &listing)?,
        Commands::Snapshot { output } => snapshot(&settings, &output).await?,
        command => {
            let mut engine = open_engine(&settings, cli.snapshot.as_deref()).await?;
            let result = run(&mut engine, command).await;
            engine.close().await;
            result?;
        }
    }

    Ok(())
}

async fn open_engine(settings: &Settings, snapshot: Option<&Path>) -> Result<Engine> {
    let index = Arc::new(LocalIndexDb::open(&settings.index_path()?)?);

    let catalog: Arc<dyn CatalogSource> = match snapshot {
        Some(path) => Arc::new(SnapshotCatalog::new(path)),
        None => Arc::new(HttpCatalog::new(settings.require_server()?)?),
    };

    // Without a server every download fails with an invalid URL error
    let transfer = HttpTransfer::new(
        settings.server_url.trim(),
        settings.downloads_dir()?,
        settings.extract_archives,
    )?
    .with_index(Arc::clone(&index));
    let saves = HttpSaves::new(settings.server_url.trim(), settings.saves_dir()?)?;

    let collaborators = Collaborators {
        catalog,
        local: index,
        saves: Arc::new(saves),
        transfer: Arc::new(transfer),
        capabilities: Arc::new(ConfiguredEmulators::new(settings.emulators.clone())),
    };

    Ok(Engine::open(settings.engine.clone(), collaborators).await?)
}

async fn run(engine: &mut Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Info => {
            let platforms = engine.listed_platforms();
            println!("=== Catalog ===");
            println!("Items:      {}", engine.catalog().items().len());
            println!("Platforms:  {}", platforms.len());
            println!("Installed:  {}", engine.installed().len());
            println!();

            for platform in platforms {
                println!(
                    "{:>6}  {:>4}  {:<16} {}",
                    platform.rom_count, platform.id, platform.slug, platform.name
                );
            }
        }

        Commands::Page { platform, page } => {
            let page = engine.page(platform, page).await?;
            println!(
                "Page {}/{} ({} items)\n",
                page.window.page, page.window.total_pages, page.window.total_count
            );
            for item in &page.items {
                let marker = if engine.is_cached(item.id).await? { "*" } else { " " };
                println!("{} {:>6}  {}", marker, item.id, item.name);
            }
        }

        Commands::Installed => {
            let mut total_bytes = 0;
            for view in engine.installed() {
                let size = engine.cache_size(view.item_id).await?;
                total_bytes += size;
                let note = if view.is_degraded() { "  (not in catalog)" } else { "" };
                println!(
                    "{:>6}  {:>10}  {}  {}{}",
                    view.item_id,
                    format_bytes(size),
                    view.display_name(),
                    view.local_path.display(),
                    note
                );
            }
            eprintln!(
                "\nTotal: {} items, {}",
                engine.installed().len(),
                format_bytes(total_bytes)
            );
        }

        Commands::Download { item_id } => download(engine, item_id).await?,

        Commands::Delete { item_id } => {
            engine.delete_item(item_id).await?;
            println!("Deleted item {}", item_id);
        }

        Commands::Targets { platform_slug } => {
            let targets = engine.launch_targets(&platform_slug);
            if targets.is_empty() {
                println!("No configured emulator supports '{}'", platform_slug);
            }
            for target in targets {
                println!("{:<12} {:<20} {}", target.key, target.name, target.path.display());
            }
        }

        Commands::Resolve { .. } | Commands::Snapshot { .. } => {
            bail!("This command runs without opening the library")
        }
    }

    Ok(())
}

async fn download(engine: &mut Engine, item_id: ItemId) -> Result<()> {
    engine.start_download(item_id)?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {msg} [{bar:40.cyan/blue}] {pos}%")?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    loop {
        tokio::select! {
            event = engine.next_event() => match event {
                Some(EngineEvent::Download(DownloadUpdate::Progress(session))) => {
                    pb.set_message(format!("{} {}", session.state.name(), session.item_name));
                    pb.set_position(session.percent as u64);
                }
                Some(EngineEvent::Download(DownloadUpdate::Completed { item_id })) => {
                    pb.finish_with_message(format!("Item {} installed", item_id));
                    return Ok(());
                }
                Some(EngineEvent::Download(DownloadUpdate::Failed { message, .. })) => {
                    pb.abandon();
                    bail!("Download failed: {}", message);
                }
                Some(EngineEvent::LibraryRefreshed) => {}
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                match cancel_outcome(engine.cancel_download().await)? {
                    Some(item_id) => pb.abandon_with_message(format!("Cancelled item {}", item_id)),
                    None => pb.finish_with_message(format!("Item {} already finished", item_id)),
                }
                return Ok(());
            }
        }
    }
}

/// A cancel that raced the download finishing is not an error
fn cancel_outcome(result: retrocache::Result<ItemId>) -> Result<Option<ItemId>> {
    match result {
        Ok(item_id) => Ok(Some(item_id)),
        Err(EngineError::NoActiveDownload) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn resolve(settings: &Settings, listing_path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(listing_path)
        .with_context(|| format!("Failed to read {}", listing_path.display()))?;
    let listing: SaveListing = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", listing_path.display()))?;
    validate_listing(&listing)?;

    let ranked = SaveResolver::new(settings.engine.max_cloud_saves).resolve_listing(&listing);
    for (index, option) in ranked.options.iter().enumerate() {
        let marker = if option.recommended { "  (recommended)" } else { "" };
        println!("{:>2}. {}{}", index + 1, option.candidate.label(), marker);
    }
    println!("\nDefault: {}", serde_json::to_string(&ranked.default_choice())?);
    Ok(())
}

async fn snapshot(settings: &Settings, output: &Path) -> Result<()> {
    let catalog = HttpCatalog::new(settings.require_server()?)?;
    let (items, platforms) =
        tokio::try_join!(catalog.fetch_all_items(), catalog.fetch_platforms())?;

    let snapshot = CatalogSnapshot { platforms, items };
    snapshot.save(output)?;
    println!(
        "Saved {} items on {} platforms to {}",
        snapshot.items.len(),
        snapshot.platforms.len(),
        output.display()
    );
    Ok(())
}

/// Format bytes into human-readable string (B, KiB, MiB, GiB)
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.0} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}
