// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Coordinator owning every task of the agent.
//!
//! ```text
//!   source pipelines (one per directory)
//!       │
//!       v
//!   ┌─────────────┐
//!   │    Queue    │ (bounded, shared)
//!   └──────┬──────┘
//!          │
//!          v
//!   delivery workers ──> document store
//! ```
//!
//! Shutdown runs in a fixed order: signal stop, wait for every pipeline,
//! close the queue, then let the workers drain it. Closing the queue before
//! the pipelines are gone would leave producers sending into a closed queue.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::delivery::{self, RetryStrategy};
use crate::errors::ConfigError;
use crate::pipeline::SourcePipeline;
use crate::queue::{self, QueueSender};
use crate::sink::{EventSink, HttpSink};

pub struct EventLogAgent {
    config: AgentConfig,
    cancel: CancellationToken,
    pipelines: JoinSet<()>,
    workers: JoinSet<()>,
    queue: Option<QueueSender>,
}

impl EventLogAgent {
    /// Validates `config` and starts shipping to the configured HTTP sink.
    pub fn start(config: AgentConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let sink: Arc<dyn EventSink> = Arc::new(HttpSink::new(config.sink.clone())?);
        Ok(Self::start_with_sink(config, sink))
    }

    /// Starts one pipeline per source and the delivery workers.
    pub fn start_with_sink(config: AgentConfig, sink: Arc<dyn EventSink>) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = queue::channel(config.queue_capacity);
        let retry = RetryStrategy::new(config.max_attempts, config.backoff_step);

        let workers =
            delivery::spawn_workers(config.worker_count(), &sink, &retry, &rx, &cancel);

        let mut pipelines = JoinSet::new();
        for source in &config.sources {
            let pipeline =
                SourcePipeline::new(source.clone(), &config, tx.clone(), cancel.clone());
            pipelines.spawn(pipeline.supervise());
        }

        info!(
            sources = config.sources.len(),
            workers = config.worker_count(),
            "AGENT | Started {}",
            config.app_name
        );

        Self {
            config,
            cancel,
            pipelines,
            workers,
            queue: Some(tx),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the agent. Workers get the configured grace period to drain
    /// the queue and are aborted afterwards.
    pub async fn shutdown(mut self) {
        info!("AGENT | Shutting down");
        self.cancel.cancel();

        while let Some(joined) = self.pipelines.join_next().await {
            if let Err(e) = joined {
                error!("AGENT | Pipeline task failed: {e}");
            }
        }

        if let Some(queue) = self.queue.take() {
            queue.close();
        }

        let workers = &mut self.workers;
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!("AGENT | Delivery task failed: {e}");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "AGENT | Workers did not drain within {:?}, aborting",
                self.config.shutdown_grace
            );
            self.workers.shutdown().await;
        }
        info!("AGENT | Stopped");
    }
}
