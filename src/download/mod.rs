//! Download orchestration
//!
//! Drives one download/launch at a time through
//! Idle -> Preparing -> Downloading -> Extracting -> Complete | Error.
//!
//! The backend's event stream is forwarded by a worker task into a bounded
//! channel. Only the owner of the orchestrator applies those events, so the
//! session is never mutated off the control thread. Every session carries a
//! generation number; cancelling bumps it and anything still in flight for
//! the old session is dropped on arrival.

pub mod refresh;
pub mod session;

pub use refresh::{RefreshTimer, DEFAULT_REFRESH_DELAY};
pub use session::{
    clamp_percent, DownloadSession, DownloadState, DownloadUpdate, FileCounter, TransferEvent,
    TransferProgress, TransferStep,
};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogItem, ItemId};
use crate::error::{EngineError, Result};
use crate::sources::Transfer;

/// Capacity of the progress channel between worker and owner
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Backend event tagged with the session it belongs to
#[derive(Debug)]
struct Tagged {
    generation: u64,
    event: TransferEvent,
}

/// Single-session download state machine
pub struct DownloadOrchestrator {
    transfer: Arc<dyn Transfer>,
    session: Option<DownloadSession>,
    generation: u64,
    forwarder: Option<JoinHandle<()>>,
    tx: mpsc::Sender<Tagged>,
    rx: mpsc::Receiver<Tagged>,
}

impl DownloadOrchestrator {
    pub fn new(transfer: Arc<dyn Transfer>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transfer,
            session: None,
            generation: 0,
            forwarder: None,
            tx,
            rx,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(DownloadState::Idle)
    }

    pub fn session(&self) -> Option<&DownloadSession> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Accept a download and hand it to the backend without waiting on it.
    ///
    /// Outcomes arrive through [`next_update`](Self::next_update). Must be
    /// called from within a tokio runtime.
    pub fn start(&mut self, item: &CatalogItem) -> Result<()> {
        if let Some(active) = &self.session {
            return Err(EngineError::AlreadyInProgress {
                item_id: active.item_id,
            });
        }

        self.generation += 1;
        self.session = Some(DownloadSession::new(item));

        let transfer = Arc::clone(&self.transfer);
        let tx = self.tx.clone();
        let generation = self.generation;
        let item = item.clone();
        info!("Starting download of '{}' (item {})", item.name, item.id);
        self.forwarder = Some(tokio::spawn(forward_events(transfer, item, generation, tx)));

        Ok(())
    }

    /// Next update for the active session, or `None` when idle.
    pub async fn next_update(&mut self) -> Option<DownloadUpdate> {
        loop {
            self.session.as_ref()?;
            let tagged = self.rx.recv().await?;
            if tagged.generation != self.generation {
                debug!("Dropping event from stale download session {}", tagged.generation);
                continue;
            }
            if let Some(update) = self.apply(tagged.event) {
                return Some(update);
            }
        }
    }

    fn apply(&mut self, event: TransferEvent) -> Option<DownloadUpdate> {
        let session = self.session.as_mut()?;
        match event {
            TransferEvent::Progress(progress) => {
                session.apply(&progress);
                Some(DownloadUpdate::Progress(session.clone()))
            }
            TransferEvent::Complete => {
                session.complete();
                let item_id = session.item_id;
                info!("Download of item {} complete", item_id);
                self.finish();
                Some(DownloadUpdate::Completed { item_id })
            }
            TransferEvent::Error(message) => {
                session.fail();
                let failed = session.clone();
                warn!("Download of item {} failed: {}", failed.item_id, message);
                self.finish();
                Some(DownloadUpdate::Failed {
                    item_id: failed.item_id,
                    message,
                    session: failed,
                })
            }
        }
    }

    /// Return to Idle after a terminal event
    fn finish(&mut self) {
        self.session = None;
        // The worker exits on its own after forwarding the terminal event
        self.forwarder = None;
    }

    /// Abandon the active session and return to Idle.
    ///
    /// The backend is asked to stop but may keep writing for a while, so any
    /// partial artifact for the returned item must be re-verified.
    pub async fn cancel(&mut self) -> Result<ItemId> {
        let session = self.session.take().ok_or(EngineError::NoActiveDownload)?;

        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.generation += 1;
        while self.rx.try_recv().is_ok() {}

        if let Err(e) = self.transfer.cancel().await {
            warn!("Backend refused cancel for item {}: {:#}", session.item_id, e);
        }

        info!(
            "Cancelled download of item {} during {}",
            session.item_id,
            session.state.name()
        );
        Ok(session.item_id)
    }
}

impl Drop for DownloadOrchestrator {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Worker: relay backend events until the first terminal one
async fn forward_events(
    transfer: Arc<dyn Transfer>,
    item: CatalogItem,
    generation: u64,
    tx: mpsc::Sender<Tagged>,
) {
    let mut events = match transfer.start(&item).await {
        Ok(events) => events,
        Err(e) => {
            let event = TransferEvent::Error(format!("{:#}", e));
            let _ = tx.send(Tagged { generation, event }).await;
            return;
        }
    };

    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        if tx.send(Tagged { generation, event }).await.is_err() || terminal {
            return;
        }
    }

    let event = TransferEvent::Error("Transfer ended without completing".to_string());
    let _ = tx.send(Tagged { generation, event }).await;
}
