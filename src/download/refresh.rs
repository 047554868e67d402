//! Delayed library refresh
//!
//! After a completed download the local inventory can lag the filesystem, so
//! a second refresh runs a fixed delay later. Rescheduling restarts the delay.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Default delay for the secondary refresh
pub const DEFAULT_REFRESH_DELAY: Duration = Duration::from_secs(3);

/// A cancellable one-shot timer task
pub struct RefreshTimer {
    delay: Duration,
    task: Option<JoinHandle<()>>,
    generation: u64,
    tx: mpsc::Sender<u64>,
    rx: mpsc::Receiver<u64>,
}

impl RefreshTimer {
    pub fn new(delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel(4);
        Self {
            delay,
            task: None,
            generation: 0,
            tx,
            rx,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm the timer, replacing any pending one
    pub fn schedule(&mut self) {
        self.abort_task();
        self.generation += 1;

        let deadline = Instant::now() + self.delay;
        let generation = self.generation;
        let tx = self.tx.clone();
        self.task = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = tx.send(generation).await;
        }));
        debug!("Delayed refresh scheduled in {:?}", self.delay);
    }

    pub fn cancel(&mut self) {
        if self.task.is_some() {
            debug!("Delayed refresh cancelled");
        }
        self.abort_task();
        self.generation += 1;
    }

    pub fn is_scheduled(&self) -> bool {
        self.task.is_some()
    }

    /// Resolves when the currently armed timer fires.
    ///
    /// Pending forever when nothing is scheduled.
    pub async fn fired(&mut self) {
        loop {
            match self.rx.recv().await {
                Some(generation) if generation == self.generation => {
                    self.task = None;
                    return;
                }
                Some(_) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.abort_task();
    }
}
