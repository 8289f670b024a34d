// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery worker pool.
//!
//! Workers share the consumer side of the queue and ship one event at a
//! time. Failed attempts are retried according to the [`RetryStrategy`];
//! once attempts are exhausted the event is logged and dropped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::STATS_REPORT_INTERVAL;
use crate::errors::ShippingError;
use crate::event::Event;
use crate::metrics;
use crate::queue::QueueReceiver;
use crate::sink::EventSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Number of attempts, retried without waiting
    Immediate(u32),
    /// Number of attempts and a step in milliseconds; after the n-th failed
    /// attempt (counting from zero) the worker waits n steps
    LinearBackoff(u32, u64),
}

impl RetryStrategy {
    pub fn new(max_attempts: u32, backoff_step: Duration) -> Self {
        let step_ms = u64::try_from(backoff_step.as_millis()).unwrap_or(u64::MAX);
        if step_ms == 0 {
            RetryStrategy::Immediate(max_attempts)
        } else {
            RetryStrategy::LinearBackoff(max_attempts, step_ms)
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                (*attempts).max(1)
            }
        }
    }

    /// Wait after the failed attempt with index `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, step_ms) => {
                Duration::from_millis(step_ms.saturating_mul(u64::from(attempt)))
            }
        }
    }
}

/// Final result of shipping one event.
#[derive(Debug)]
pub enum Delivery {
    Delivered(StatusCode),
    /// Attempts exhausted or shutdown interrupted the backoff.
    Dropped(Option<ShippingError>),
}

impl Delivery {
    /// Status code recorded for the event; 0 when no response was received.
    pub fn status_code(&self) -> u16 {
        match self {
            Delivery::Delivered(status) => status.as_u16(),
            Delivery::Dropped(Some(ShippingError::Destination(Some(status), _))) => {
                status.as_u16()
            }
            Delivery::Dropped(_) => 0,
        }
    }
}

/// Rolling per-worker counters, reported and reset every
/// [`STATS_REPORT_INTERVAL`] deliveries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    pub count: u64,
    pub dropped: u64,
    pub statuses: BTreeMap<u16, u64>,
}

impl DeliveryStats {
    pub fn record(&mut self, delivery: &Delivery) {
        self.count += 1;
        if matches!(delivery, Delivery::Dropped(_)) {
            self.dropped += 1;
        }
        *self.statuses.entry(delivery.status_code()).or_default() += 1;
    }

    pub fn is_due(&self) -> bool {
        self.count >= STATS_REPORT_INTERVAL
    }
}

pub struct DeliveryWorker {
    id: usize,
    sink: Arc<dyn EventSink>,
    retry: RetryStrategy,
    queue: QueueReceiver,
    cancel: CancellationToken,
    stats: DeliveryStats,
}

impl DeliveryWorker {
    pub fn new(
        id: usize,
        sink: Arc<dyn EventSink>,
        retry: RetryStrategy,
        queue: QueueReceiver,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            sink,
            retry,
            queue,
            cancel,
            stats: DeliveryStats::default(),
        }
    }

    /// Ships events until the queue is closed and drained.
    pub async fn run(mut self) {
        info!("DELIVERY | Worker {} started", self.id);

        while let Some(event) = self.queue.recv().await {
            let delivery = self.deliver(&event).await;
            metrics::record_delivery(delivery.status_code());
            if matches!(delivery, Delivery::Dropped(_)) {
                metrics::record_dropped();
            }

            self.stats.record(&delivery);
            if self.stats.is_due() {
                let stats = std::mem::take(&mut self.stats);
                info!(
                    worker = self.id,
                    dropped = stats.dropped,
                    statuses = ?stats.statuses,
                    "DELIVERY | Sent {} events",
                    stats.count
                );
            }
        }

        info!("DELIVERY | Worker {} stopped", self.id);
    }

    /// Ships `event`, retrying failed attempts.
    pub async fn deliver(&self, event: &Event) -> Delivery {
        let id = event.origin.document_id();
        let attempts = self.retry.max_attempts();
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.sink.ship(&id, event).await {
                Ok(status) => {
                    debug!("DELIVERY | Sent {id} {status}");
                    return Delivery::Delivered(status);
                }
                Err(e) => {
                    warn!(
                        "DELIVERY | Attempt {} of {attempts} for {id} failed: {e}",
                        attempt + 1
                    );
                    last_error = Some(e);
                }
            }

            if attempt + 1 == attempts {
                break;
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    warn!(
                        uri = %self.sink.location(&id, event),
                        "DELIVERY | Shutdown interrupted retries, dropping {id}"
                    );
                    return Delivery::Dropped(last_error);
                }
                () = tokio::time::sleep(self.retry.delay_after(attempt)) => {}
            }
        }

        error!(
            uri = %self.sink.location(&id, event),
            event = ?event,
            "DELIVERY | Giving up on {id} after {attempts} attempts"
        );
        Delivery::Dropped(last_error)
    }
}

/// Starts `count` workers sharing `queue`.
pub fn spawn_workers(
    count: usize,
    sink: &Arc<dyn EventSink>,
    retry: &RetryStrategy,
    queue: &QueueReceiver,
    cancel: &CancellationToken,
) -> JoinSet<()> {
    let mut workers = JoinSet::new();
    for id in 0..count {
        let worker = DeliveryWorker::new(
            id,
            Arc::clone(sink),
            retry.clone(),
            queue.clone(),
            cancel.clone(),
        );
        workers.spawn(worker.run());
    }
    workers
}
