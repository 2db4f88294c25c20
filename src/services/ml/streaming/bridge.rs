//! Background generation republished as a cancellable token stream
//!
//! The model's `generate` call blocks until it is done and only reports
//! progress through a per-token callback. [`StreamingBridge::start`] runs it
//! on a dedicated worker thread and hands tokens over a channel of capacity
//! one, so the worker never runs more than one token ahead of the consumer.
//! Dropping or closing the [`GenerationStream`] cancels the session token and
//! closes the channel; the worker notices on its next callback and unwinds.

use super::events::WorkerMessage;
use crate::services::ml::backend::{StreamControl, TextModel};
use crate::services::ml::params::GenerationParams;
use crate::types::errors::GenerationError;
use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// Exclusive access to a model for the lifetime of one worker
pub type ModelGuard = OwnedMutexGuard<Box<dyn TextModel>>;

const HANDOFF_CAPACITY: usize = 1;

pub struct StreamingBridge;

impl StreamingBridge {
    /// Launch generation on a worker thread.
    ///
    /// The worker owns `model` until generation ends, which keeps the model
    /// locked for this session only.
    pub fn start(
        model: ModelGuard,
        input_ids: Vec<u32>,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> Result<GenerationStream, GenerationError> {
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        let worker_cancel = cancel.clone();

        let worker = std::thread::Builder::new()
            .name("generation-worker".into())
            .spawn(move || run_worker(model, input_ids, params, tx, worker_cancel))
            .map_err(|e| GenerationError::Backend(format!("failed to spawn worker: {e}")))?;

        tracing::debug!("[BRIDGE] Worker thread started");
        Ok(GenerationStream {
            receiver: rx,
            cancel,
            worker: Some(worker),
            finished: false,
        })
    }
}

fn run_worker(
    mut model: ModelGuard,
    input_ids: Vec<u32>,
    params: GenerationParams,
    tx: mpsc::Sender<WorkerMessage>,
    cancel: CancellationToken,
) {
    let mut delivered = 0usize;
    let result = model.generate(&input_ids, &params, &mut |token| {
        if cancel.is_cancelled() {
            return StreamControl::Stop;
        }
        // Blocks while the previous token is still unread
        match tx.blocking_send(WorkerMessage::Token(token)) {
            Ok(()) => {
                delivered += 1;
                StreamControl::Continue
            }
            Err(_) => {
                cancel.cancel();
                StreamControl::Stop
            }
        }
    });

    match result {
        Ok(_) => {
            tracing::debug!("[BRIDGE] Worker finished after {} tokens", delivered);
            if !cancel.is_cancelled() {
                let _ = tx.blocking_send(WorkerMessage::Finished);
            }
        }
        Err(err) => {
            tracing::warn!("[BRIDGE] Generation failed after {} tokens: {}", delivered, err);
            model.clear_cache();
            if !cancel.is_cancelled() {
                let _ = tx.blocking_send(WorkerMessage::Failed(err));
            }
        }
    }
}

/// Consumer half of a bridged generation.
///
/// Yields tokens in production order, then ends. A failure is yielded once
/// as `Err` before the end.
pub struct GenerationStream {
    receiver: mpsc::Receiver<WorkerMessage>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

impl GenerationStream {
    /// Token that aborts this session when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.receiver.close();
    }

    /// Abort if still running and wait for the worker thread to exit
    pub async fn close(mut self) -> Result<(), GenerationError> {
        self.cancel();
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let joined = tokio::task::spawn_blocking(move || worker.join())
            .await
            .map_err(|_| GenerationError::WorkerPanicked)?;
        joined.map_err(|_| GenerationError::WorkerPanicked)
    }
}

impl Stream for GenerationStream {
    type Item = Result<u32, GenerationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.receiver.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(message) => {
                if message.as_ref().map_or(true, WorkerMessage::is_terminal) {
                    this.finished = true;
                }
                Poll::Ready(match message {
                    Some(WorkerMessage::Token(token)) => Some(Ok(token)),
                    Some(WorkerMessage::Failed(err)) => Some(Err(err)),
                    Some(WorkerMessage::Finished) | None => None,
                })
            }
        }
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
        }
    }
}
