//! # Write queue
//!
//! Best-effort writes (read receipts, profile refreshes) go through a bounded
//! queue owned by whoever constructs it, drained by one background task.
//! Unconditional batches that arrive together are coalesced into a single commit.
//! Request transitions never use this path; they commit directly.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::batch::WriteBatch;
use crate::error::{AppError, Result};
use crate::traits::DocumentStore;

enum Command {
    Write(WriteBatch),
    Flush(oneshot::Sender<()>),
}

pub struct WriteQueue {
    tx: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriteQueue {
    /// Spawns the drain task. Must be called inside a tokio runtime.
    pub fn start(store: Arc<dyn DocumentStore>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(drain(store, rx));
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues a batch, waiting for room if the queue is full.
    pub async fn enqueue(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let tx = self.sender().await?;
        tx.send(Command::Write(batch))
            .await
            .map_err(|_| AppError::Internal("write queue closed".into()))
    }

    /// Resolves once everything queued before this call has been committed (or dropped).
    pub async fn flush(&self) -> Result<()> {
        let tx = self.sender().await?;
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(Command::Flush(done_tx))
            .await
            .map_err(|_| AppError::Internal("write queue closed".into()))?;
        done_rx
            .await
            .map_err(|_| AppError::Internal("write queue worker stopped".into()))
    }

    /// Flushes, closes the queue and waits for the worker. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(tx) = self.tx.lock().await.take() else {
            return Ok(());
        };
        drop(tx);
        if let Some(worker) = self.worker.lock().await.take() {
            worker
                .await
                .map_err(|e| AppError::Internal(format!("write queue worker panicked: {e}")))?;
        }
        debug!("write queue shut down");
        Ok(())
    }

    async fn sender(&self) -> Result<mpsc::Sender<Command>> {
        self.tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| AppError::Internal("write queue is shut down".into()))
    }
}

async fn drain(store: Arc<dyn DocumentStore>, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        let mut pending = Vec::new();
        let mut flushes = Vec::new();
        route(command, &mut pending, &mut flushes);
        while let Ok(next) = rx.try_recv() {
            route(next, &mut pending, &mut flushes);
        }

        for group in coalesce(pending) {
            commit_group(store.as_ref(), group).await;
        }
        for done in flushes {
            let _ = done.send(());
        }
    }
}

fn route(command: Command, pending: &mut Vec<WriteBatch>, flushes: &mut Vec<oneshot::Sender<()>>) {
    match command {
        Command::Write(batch) => pending.push(batch),
        Command::Flush(done) => flushes.push(done),
    }
}

/// Groups runs of unconditional batches; conditional ones stay alone so one
/// failed precondition cannot take unrelated writes down with it.
fn coalesce(batches: Vec<WriteBatch>) -> Vec<Vec<WriteBatch>> {
    let mut groups: Vec<Vec<WriteBatch>> = Vec::new();
    for batch in batches {
        match groups.last_mut() {
            Some(group)
                if batch.is_unconditional() && group.iter().all(WriteBatch::is_unconditional) =>
            {
                group.push(batch)
            }
            _ => groups.push(vec![batch]),
        }
    }
    groups
}

/// Commits a group as one batch, falling back to one commit per batch if the
/// merged write fails (e.g. one target conversation was deleted meanwhile).
async fn commit_group(store: &dyn DocumentStore, group: Vec<WriteBatch>) {
    if group.len() > 1 {
        let mut merged = WriteBatch::new();
        for batch in group.iter().cloned() {
            merged.merge(batch);
        }
        match store.commit(merged).await {
            Ok(()) => return,
            Err(e) => debug!(error = %e, size = group.len(), "coalesced write failed, retrying individually"),
        }
    }
    for batch in group {
        if let Err(e) = store.commit(batch).await {
            warn!(error = %e, "queued write dropped");
        }
    }
}
