//! Explicit execution queue for accepted withdrawals.
//!
//! Submit returns `pending` immediately; a dedicated worker drains the
//! queue and performs the slow sign/broadcast/settle step. The
//! reconciliation sweep is the safety net for anything stuck in between.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::lifecycle::Shutdown;
use crate::withdrawal::engine::WithdrawalEngine;
use crate::withdrawal::types::WithdrawalError;

/// Bounded handle for enqueueing accepted withdrawal ids.
#[derive(Clone)]
pub struct ExecutionQueue {
    tx: mpsc::Sender<Uuid>,
}

impl ExecutionQueue {
    /// Create the queue and its receiving end.
    pub fn new(depth: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without blocking; a full queue is an error the caller
    /// must roll back.
    pub fn enqueue(&self, withdrawal_id: Uuid) -> Result<(), WithdrawalError> {
        self.tx
            .try_send(withdrawal_id)
            .map_err(|_| WithdrawalError::QueueFull)
    }
}

/// Spawn the worker that executes queued withdrawals until shutdown.
pub fn spawn_worker(
    engine: Arc<WithdrawalEngine>,
    mut rx: mpsc::Receiver<Uuid>,
    shutdown: &Shutdown,
) -> JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        tracing::info!("withdrawal worker started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("withdrawal worker shutting down");
                    break;
                }
                next = rx.recv() => {
                    match next {
                        Some(withdrawal_id) => engine.execute(withdrawal_id).await,
                        None => break,
                    }
                }
            }
        }
    })
}
