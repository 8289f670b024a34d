// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Incremental reading of the active log file and multi-line record framing.
//!
//! A record starts on a line whose first byte is `{` and ends on the line
//! where the running brace depth returns to zero:
//!
//! ```text
//! {20240115103000,U,                                      depth 1
//! {2444a6a1c1d00,1a2f},7,1,3,4,2,I,"",5,{"U"},"",1,1,0,5,0,{0}   depth 1
//! },                                                      depth 0 -> emit
//! ```
//!
//! Braces are counted per byte and are not quote-aware: a comment containing
//! an unbalanced `{` or `}` desynchronizes the depth until the end of the
//! current read.

use std::borrow::Cow;
use std::io::SeekFrom;
use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::PipelineError;

/// A complete record and the file offset right after its last line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRecord {
    pub raw: Vec<u8>,
    pub end_offset: u64,
}

impl CompletedRecord {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw)
    }
}

/// Result of one pass over the file.
#[derive(Debug, Default)]
pub struct TailBatch {
    pub next_offset: u64,
    pub records: Vec<CompletedRecord>,
}

/// Two-state framing machine: idle until a line opens a record, then
/// accumulating until the braces balance.
#[derive(Debug, Default)]
pub struct RecordFramer {
    buffer: Vec<u8>,
    depth: i64,
    started: bool,
}

impl RecordFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (including its terminator). Returns the framed record
    /// once the line closes it.
    pub fn push_line(&mut self, line: &[u8]) -> Option<Vec<u8>> {
        if !self.started {
            if line.first() != Some(&b'{') {
                return None;
            }
            self.started = true;
            self.depth = 0;
        }

        self.buffer.extend_from_slice(line);
        for byte in line {
            match byte {
                b'{' => self.depth += 1,
                b'}' => self.depth -= 1,
                _ => {}
            }
        }

        if self.depth == 0 {
            self.started = false;
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    /// Whether a record is currently being accumulated.
    pub fn is_accumulating(&self) -> bool {
        self.started
    }
}

/// Reads `path` from `from_offset` to the end of the file and frames complete
/// records.
///
/// Every consumed line moves the offset forward, including lines outside of
/// any record. A record still open at end of file is dropped; its bytes are
/// already accounted for. Returns `Ok(None)` when `cancel` fires, leaving the
/// caller's state untouched.
pub async fn tail_once(
    path: &Path,
    from_offset: u64,
    cancel: &CancellationToken,
) -> Result<Option<TailBatch>, PipelineError> {
    let tail_err = |source| PipelineError::Tail {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(tail_err)?;
    let len = file.metadata().await.map_err(tail_err)?.len();
    if len < from_offset {
        warn!(
            file = %path.display(),
            offset = from_offset,
            size = len,
            "TAILER | File shrank below the saved offset, continuing from its end"
        );
        return Ok(Some(TailBatch {
            next_offset: len,
            records: Vec::new(),
        }));
    }

    file.seek(SeekFrom::Start(from_offset))
        .await
        .map_err(tail_err)?;
    read_records(path, &mut BufReader::new(file), from_offset, cancel).await
}

/// Frames records from `reader`, which is positioned at `from_offset` of
/// `path`, until end of input or cancellation.
async fn read_records<R>(
    path: &Path,
    reader: &mut R,
    from_offset: u64,
    cancel: &CancellationToken,
) -> Result<Option<TailBatch>, PipelineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut batch = TailBatch {
        next_offset: from_offset,
        records: Vec::new(),
    };
    let mut framer = RecordFramer::new();
    let mut line = Vec::new();

    loop {
        if cancel.is_cancelled() {
            debug!(file = %path.display(), "TAILER | Cancelled mid-read");
            return Ok(None);
        }

        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(|source| PipelineError::Tail {
                path: path.to_path_buf(),
                source,
            })?;
        if read == 0 {
            break;
        }
        batch.next_offset += read as u64;
        trace!("TAILER | {}", String::from_utf8_lossy(&line));

        if let Some(raw) = framer.push_line(&line) {
            batch.records.push(CompletedRecord {
                raw,
                end_offset: batch.next_offset,
            });
        }
    }

    if framer.is_accumulating() {
        debug!(
            file = %path.display(),
            offset = batch.next_offset,
            "TAILER | Dropping record left open at end of file"
        );
    }

    Ok(Some(batch))
}
