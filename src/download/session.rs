//! Download session state and the events that move it

use serde::Serialize;

use crate::catalog::{CatalogItem, ItemId};

/// Step reported by a transfer backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferStep {
    Preparing,
    Downloading,
    Extracting,
}

/// Position within a multi-file archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileCounter {
    pub current: u32,
    pub total: u32,
}

/// Raw progress as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransferProgress {
    pub step: TransferStep,
    pub percent: f32,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub files: Option<FileCounter>,
}

impl TransferProgress {
    pub fn new(step: TransferStep, percent: f32) -> Self {
        Self {
            step,
            percent,
            bytes_done: 0,
            bytes_total: 0,
            files: None,
        }
    }

    pub fn with_bytes(mut self, bytes_done: u64, bytes_total: u64) -> Self {
        self.bytes_done = bytes_done;
        self.bytes_total = bytes_total;
        self
    }

    pub fn with_files(mut self, current: u32, total: u32) -> Self {
        self.files = Some(FileCounter { current, total });
        self
    }
}

/// Event emitted by a transfer backend. A stream ends with `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress(TransferProgress),
    Complete,
    Error(String),
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferEvent::Complete | TransferEvent::Error(_))
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DownloadState {
    Idle,
    Preparing,
    Downloading,
    Extracting,
    Complete,
    Error,
}

impl DownloadState {
    pub fn name(&self) -> &'static str {
        match self {
            DownloadState::Idle => "Idle",
            DownloadState::Preparing => "Preparing",
            DownloadState::Downloading => "Downloading",
            DownloadState::Extracting => "Extracting",
            DownloadState::Complete => "Complete",
            DownloadState::Error => "Error",
        }
    }
}

impl From<TransferStep> for DownloadState {
    fn from(step: TransferStep) -> Self {
        match step {
            TransferStep::Preparing => DownloadState::Preparing,
            TransferStep::Downloading => DownloadState::Downloading,
            TransferStep::Extracting => DownloadState::Extracting,
        }
    }
}

/// The single active download
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadSession {
    pub item_id: ItemId,
    pub item_name: String,
    pub state: DownloadState,
    /// Always within `[0, 100]`, non-decreasing while the step is unchanged
    pub percent: f32,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub files: Option<FileCounter>,
}

impl DownloadSession {
    pub fn new(item: &CatalogItem) -> Self {
        Self {
            item_id: item.id,
            item_name: item.name.clone(),
            state: DownloadState::Preparing,
            percent: 0.0,
            bytes_done: 0,
            bytes_total: item.size_bytes,
            files: None,
        }
    }

    /// Fold a backend progress report into the session.
    pub fn apply(&mut self, progress: &TransferProgress) {
        let state = DownloadState::from(progress.step);
        let percent = clamp_percent(progress.percent);

        if state != self.state {
            self.state = state;
            self.percent = percent;
        } else {
            self.percent = self.percent.max(percent);
        }

        self.bytes_done = progress.bytes_done;
        if progress.bytes_total > 0 {
            self.bytes_total = progress.bytes_total;
        }
        self.files = progress.files;
    }

    pub(crate) fn complete(&mut self) {
        self.state = DownloadState::Complete;
        self.percent = 100.0;
    }

    pub(crate) fn fail(&mut self) {
        self.state = DownloadState::Error;
        self.percent = 0.0;
    }
}

pub fn clamp_percent(percent: f32) -> f32 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// What the orchestrator reports back to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadUpdate {
    Progress(DownloadSession),
    Completed { item_id: ItemId },
    /// Message is the backend's, verbatim
    Failed {
        item_id: ItemId,
        message: String,
        session: DownloadSession,
    },
}
