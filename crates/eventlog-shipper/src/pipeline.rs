// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-source poll loop.
//!
//! Every cycle the pipeline:
//!
//! 1. resolves the active file and the offset to read from,
//! 2. waits for the poll interval,
//! 3. reloads the metadata catalog,
//! 4. reads and frames the bytes appended since the last cycle,
//! 5. parses every record and enqueues the deliverable events.
//!
//! Tail state lives only in memory. A restarted pipeline starts over from
//! the end of the active file.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::config::{AgentConfig, SourceConfig};
use crate::errors::PipelineError;
use crate::metrics;
use crate::parser::RecordParser;
use crate::queue::{Enqueued, QueueSender};
use crate::rotation::{RotationResolver, TailState};
use crate::tailer;

pub struct SourcePipeline {
    source: SourceConfig,
    metadata_path: PathBuf,
    resolver: RotationResolver,
    parser: RecordParser,
    poll_interval: Duration,
    restart_delay: Duration,
    queue: QueueSender,
    cancel: CancellationToken,
}

impl SourcePipeline {
    pub fn new(
        source: SourceConfig,
        config: &AgentConfig,
        queue: QueueSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            metadata_path: source.path.join(&config.metadata_file),
            resolver: RotationResolver::new(
                &config.log_extension,
                config.utc_offset,
                config.read_from_start,
            ),
            parser: RecordParser::new(
                config.min_level,
                config.utc_offset,
                &config.app_name,
                &source.name,
                &source.path,
            ),
            poll_interval: config.poll_interval,
            restart_delay: config.restart_delay,
            source,
            queue,
            cancel,
        }
    }

    /// Runs the pipeline, restarting it after fatal errors until shutdown.
    /// A zero restart delay leaves a failed source stopped.
    pub async fn supervise(self) {
        let name = self.source.name.clone();
        info!(source = %name, "PIPELINE | Watching {}", self.source.path.display());

        loop {
            let Err(e) = self.run().await else {
                break;
            };

            error!(source = %name, "PIPELINE | Source failed: {e}");
            metrics::record_pipeline_failure(&name);

            if self.restart_delay.is_zero() {
                warn!(source = %name, "PIPELINE | Restarts are disabled, source stays stopped");
                break;
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.restart_delay) => {
                    info!(source = %name, "PIPELINE | Restarting");
                }
            }
        }

        info!(source = %name, "PIPELINE | Stopped");
    }

    /// Polls the source until cancelled. Returns an error on conditions
    /// that make the source unusable.
    pub async fn run(&self) -> Result<(), PipelineError> {
        let name = self.source.name.as_str();
        let mut state: Option<TailState> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let active = match self.resolver.resolve(&self.source.path, state.as_ref()).await {
                Ok(active) => Some(active),
                Err(e) if !e.is_fatal() => {
                    warn!(source = %name, "PIPELINE | {e}");
                    None
                }
                Err(e) => return Err(e.into()),
            };

            if !self.wait().await {
                return Ok(());
            }
            let catalog = Catalog::load(&self.metadata_path).await?;
            let Some(active) = active else {
                continue;
            };

            let started = Instant::now();
            let Some(batch) = tailer::tail_once(&active.path, active.offset, &self.cancel).await?
            else {
                return Ok(());
            };
            metrics::record_tail_read(name, started.elapsed());
            debug!(
                source = %name,
                records = batch.records.len(),
                "PIPELINE | Read {} from {} to {}",
                active.path.display(),
                active.offset,
                batch.next_offset
            );

            for record in &batch.records {
                let event = match self.parser.parse(record, &active.path, &catalog) {
                    Ok(event) => event,
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        metrics::record_malformed(name);
                        error!(source = %name, "PIPELINE | Dropping record: {e}: {}", record.text());
                        continue;
                    }
                };
                metrics::record_parsed(name);

                if !event.deliverable {
                    continue;
                }
                match self.queue.send(event, &self.cancel).await? {
                    Enqueued::Accepted => metrics::record_enqueued(name),
                    Enqueued::Cancelled => return Ok(()),
                }
            }

            state = Some(TailState {
                path: active.path,
                offset: batch.next_offset,
            });
        }
    }

    /// Sleeps for the poll interval. Returns false when cancelled first.
    async fn wait(&self) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(self.poll_interval) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CatalogError, ParseError};
    use crate::event::{Event, Level};
    use crate::queue::{self, QueueReceiver};
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use std::io::Write;
    use std::path::Path;

    const METADATA: &str = "1CV8LOG(ver 2.0)\n{1,3ee0bd4d-5ec4-4c1e-a8b4-4ab3cde0c5a3,\"alice\",7},\n";

    fn record(severity: &str, session: u32) -> String {
        format!(
            "{{20240115103000,U,\n{{2444a6a1c1d00,1a2f}},7,1,3,4,2,{severity},\"\",5,{{\"U\"}},\"\",1,1,0,{session},0,{{0}}\n}},\n"
        )
    }

    fn config(read_from_start: bool) -> AgentConfig {
        AgentConfig {
            app_name: "accounting".to_string(),
            poll_interval: Duration::from_millis(10),
            restart_delay: Duration::ZERO,
            read_from_start,
            ..Default::default()
        }
    }

    fn source(dir: &Path) -> SourceConfig {
        SourceConfig {
            name: "main".to_string(),
            path: dir.to_path_buf(),
        }
    }

    fn setup(log: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1Cv8.lgf"), METADATA).unwrap();
        let path = dir.path().join("20240115000000.lgp");
        std::fs::write(&path, log).unwrap();
        (dir, path)
    }

    fn append(path: &Path, contents: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    async fn next_event(rx: &QueueReceiver) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within 5s")
            .expect("queue closed")
    }

    #[tokio::test]
    async fn test_ships_existing_records_from_start() {
        let (dir, path) = setup(&format!("1CV8LOG(ver 2.0)\n\n{}", record("I", 5)));
        let (tx, rx) = queue::channel(10);
        let cancel = CancellationToken::new();
        let pipeline = SourcePipeline::new(source(dir.path()), &config(true), tx, cancel.clone());
        let handle = tokio::spawn(pipeline.supervise());

        let event = next_event(&rx).await;
        assert_eq!(event.user, "alice");
        assert_eq!(event.transaction_status, "committed");
        assert_eq!(event.level, Level::Info);
        assert_eq!(event.app, "accounting");
        assert_eq!(event.source, "main");
        assert_eq!(event.origin.file, path);

        cancel.cancel();
        handle.await.unwrap();
        // the pipeline owned the only sender
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_tails_only_appended_records() {
        let (dir, path) = setup(&record("I", 1));
        let (tx, rx) = queue::channel(10);
        let cancel = CancellationToken::new();
        let pipeline = SourcePipeline::new(source(dir.path()), &config(false), tx, cancel.clone());
        let handle = tokio::spawn(pipeline.supervise());

        tokio::time::sleep(Duration::from_millis(100)).await;
        append(&path, &record("E", 2));

        let event = next_event(&rx).await;
        assert_eq!(event.session, "2");
        assert_eq!(event.level, Level::Error);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_skips_non_deliverable_and_malformed_records() {
        let log = format!("{}{{garbage}},\n{}", record("I", 1), record("W", 2));
        let (dir, _path) = setup(&log);
        let (tx, rx) = queue::channel(10);
        let cancel = CancellationToken::new();
        let config = AgentConfig {
            min_level: Level::Warning,
            ..config(true)
        };
        let pipeline = SourcePipeline::new(source(dir.path()), &config, tx, cancel.clone());
        let handle = tokio::spawn(pipeline.supervise());

        let event = next_event(&rx).await;
        assert_eq!(event.session, "2");
        assert_eq!(event.level, Level::Warning);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_catalog_reloaded_after_poll_wait() {
        let (dir, _path) = setup(&record("I", 6));
        let (tx, rx) = queue::channel(10);
        let cancel = CancellationToken::new();
        let config = AgentConfig {
            poll_interval: Duration::from_millis(300),
            ..config(true)
        };
        let pipeline = SourcePipeline::new(source(dir.path()), &config, tx, cancel.clone());
        let handle = tokio::spawn(pipeline.supervise());

        // the computer shows up in the catalog while the first cycle waits
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(
            dir.path().join("1Cv8.lgf"),
            format!("{METADATA}{{2,\"ws-01\",1}},\n"),
        )
        .unwrap();

        let event = next_event(&rx).await;
        assert_eq!(event.computer, "ws-01");
        assert_eq!(event.computer_id, Some(1));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_cycle_records_source_metrics() {
        let (dir, _path) = setup(&record("I", 7));
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let (tx, rx) = queue::channel(10);
                let cancel = CancellationToken::new();
                let pipeline =
                    SourcePipeline::new(source(dir.path()), &config(true), tx, cancel.clone());
                let (result, event) = tokio::join!(pipeline.run(), async {
                    let event = next_event(&rx).await;
                    cancel.cancel();
                    event
                });
                result.unwrap();
                assert_eq!(event.session, "7");
            });
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let value = |name: &str| {
            snapshot
                .iter()
                .find(|(key, ..)| {
                    key.key().name() == name
                        && key
                            .key()
                            .labels()
                            .any(|label| label.key() == "source" && label.value() == "main")
                })
                .map(|(.., value)| value.clone())
        };
        assert!(matches!(
            value("eventlog_tail_read_seconds"),
            Some(DebugValue::Gauge(_))
        ));
        assert_eq!(
            value("eventlog_records_parsed_total"),
            Some(&DebugValue::Counter(1))
        );
        assert_eq!(
            value("eventlog_events_enqueued_total"),
            Some(&DebugValue::Counter(1))
        );
    }

    #[tokio::test]
    async fn test_missing_metadata_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20240115000000.lgp"), "").unwrap();
        let (tx, _rx) = queue::channel(10);
        let pipeline =
            SourcePipeline::new(source(dir.path()), &config(true), tx, CancellationToken::new());

        let result = pipeline.run().await;
        assert!(matches!(
            result,
            Err(PipelineError::Catalog(CatalogError::Io { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_severity_is_fatal() {
        let (dir, _path) = setup(&record("X", 1));
        let (tx, _rx) = queue::channel(10);
        let pipeline =
            SourcePipeline::new(source(dir.path()), &config(true), tx, CancellationToken::new());

        let result = pipeline.run().await;
        assert!(matches!(
            result,
            Err(PipelineError::Parse(ParseError::UnknownSeverity(_)))
        ));
    }

    #[tokio::test]
    async fn test_empty_directory_keeps_polling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1Cv8.lgf"), METADATA).unwrap();
        let (tx, rx) = queue::channel(10);
        let cancel = CancellationToken::new();
        let pipeline = SourcePipeline::new(source(dir.path()), &config(true), tx, cancel.clone());
        let handle = tokio::spawn(pipeline.supervise());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        std::fs::write(dir.path().join("20240115000000.lgp"), record("I", 3)).unwrap();
        let event = next_event(&rx).await;
        assert_eq!(event.session, "3");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_restarts_failed_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20240115000000.lgp"), record("I", 4)).unwrap();
        let (tx, rx) = queue::channel(10);
        let cancel = CancellationToken::new();
        let config = AgentConfig {
            restart_delay: Duration::from_millis(20),
            ..config(true)
        };
        let pipeline = SourcePipeline::new(source(dir.path()), &config, tx, cancel.clone());
        let handle = tokio::spawn(pipeline.supervise());

        // fails on the missing metadata file until it shows up
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!handle.is_finished());
        std::fs::write(dir.path().join("1Cv8.lgf"), METADATA).unwrap();

        let event = next_event(&rx).await;
        assert_eq!(event.user, "alice");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_wait_returns_promptly() {
        let (dir, _path) = setup("");
        let (tx, _rx) = queue::channel(10);
        let cancel = CancellationToken::new();
        let config = AgentConfig {
            poll_interval: Duration::from_secs(3600),
            ..config(true)
        };
        let pipeline = SourcePipeline::new(source(dir.path()), &config, tx, cancel.clone());
        let handle = tokio::spawn(pipeline.supervise());

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pipeline must stop on cancel")
            .unwrap();
    }
}
