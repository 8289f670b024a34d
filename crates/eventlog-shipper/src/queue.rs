// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded queue between source pipelines and delivery workers.
//!
//! Producers block when the queue is full. The queue closes once every
//! [`QueueSender`] is gone; receivers then drain what is left and observe
//! `None`.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::errors::PipelineError;
use crate::event::Event;

/// Outcome of [`QueueSender::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// Shutdown was requested while waiting for room; the event was dropped.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Event>,
}

/// Shared consumer side. Cloning hands out another handle to the same queue.
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Event>>>,
}

pub fn channel(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueSender { tx },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl QueueSender {
    /// Waits for room in the queue unless `cancel` fires first.
    pub async fn send(
        &self,
        event: Event,
        cancel: &CancellationToken,
    ) -> Result<Enqueued, PipelineError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(Enqueued::Cancelled),
            sent = self.tx.send(event) => sent
                .map(|()| Enqueued::Accepted)
                .map_err(|_| PipelineError::QueueClosed),
        }
    }

    /// Drops this handle. The queue closes when the last one is closed.
    pub fn close(self) {
        drop(self.tx);
    }
}

impl QueueReceiver {
    /// Next event, or `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }
}
