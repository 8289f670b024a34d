// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Picks the file a source is currently writing to and the offset tailing
//! resumes from.
//!
//! Rotated files are named after the moment they were opened
//! (`20240115000000.lgp`). Two signals are compared: the newest modification
//! time among candidates and the newest date embedded in a file name. The
//! modification time only wins when it is strictly later than the newest
//! name date; otherwise the name is trusted.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use tracing::debug;

use crate::errors::ResolveError;

/// Length of the date prefix of rotated file names (`YYYYMMDD`).
const DATE_PREFIX_LEN: usize = 8;

/// Active file of a source and the byte offset already consumed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailState {
    pub path: PathBuf,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct RotationResolver {
    extension: String,
    utc_offset: FixedOffset,
    read_from_start: bool,
}

struct Candidate {
    path: PathBuf,
    modified: DateTime<Utc>,
    name_date: Option<DateTime<Utc>>,
}

impl RotationResolver {
    pub fn new(extension: &str, utc_offset: FixedOffset, read_from_start: bool) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_lowercase(),
            utc_offset,
            read_from_start,
        }
    }

    /// Returns the active file of `dir` and the offset to tail it from.
    ///
    /// When the active file is the one described by `previous`, its offset is
    /// kept. Otherwise tailing starts at the current end of the file so that
    /// only bytes appended from now on are surfaced.
    pub async fn resolve(
        &self,
        dir: &Path,
        previous: Option<&TailState>,
    ) -> Result<TailState, ResolveError> {
        let active = self.newest_file(dir).await?;

        if let Some(previous) = previous.filter(|p| p.path == active) {
            return Ok(previous.clone());
        }

        let metadata = tokio::fs::metadata(&active)
            .await
            .map_err(|source| ResolveError::Stat {
                path: active.clone(),
                source,
            })?;
        let offset = if self.read_from_start {
            0
        } else {
            metadata.len()
        };

        debug!(
            file = %active.display(),
            offset,
            "ROTATION | Switched active file"
        );
        Ok(TailState {
            path: active,
            offset,
        })
    }

    async fn newest_file(&self, dir: &Path) -> Result<PathBuf, ResolveError> {
        let list_err = |source| ResolveError::ListDir {
            path: dir.to_path_buf(),
            source,
        };

        let mut entries = tokio::fs::read_dir(dir).await.map_err(list_err)?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
            paths.push(entry.path());
        }
        paths.sort();

        let mut candidates = Vec::new();
        for path in paths {
            // Opening the file refreshes metadata that some filesystems
            // (SMB shares, NTFS) otherwise serve stale.
            drop(tokio::fs::File::open(&path).await);

            let Ok(metadata) = tokio::fs::metadata(&path).await else {
                continue;
            };
            if !metadata.is_file() || !self.has_extension(&path) {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push(Candidate {
                name_date: self.name_date(&path),
                modified: DateTime::<Utc>::from(modified),
                path,
            });
        }

        let by_mtime = candidates.iter().fold(None::<&Candidate>, |best, c| match best {
            Some(b) if c.modified <= b.modified => Some(b),
            _ => Some(c),
        });
        let by_name = candidates
            .iter()
            .filter(|c| c.name_date.is_some())
            .fold(None::<&Candidate>, |best, c| match best {
                Some(b) if c.name_date <= b.name_date => Some(b),
                _ => Some(c),
            });

        let chosen = match (by_mtime, by_name) {
            (Some(m), Some(n)) if n.name_date.is_some_and(|date| m.modified <= date) => n,
            (Some(m), _) => m,
            (None, _) => return Err(ResolveError::NoCandidates(dir.to_path_buf())),
        };
        Ok(chosen.path.clone())
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.to_lowercase() == self.extension)
    }

    /// Midnight of the date encoded in the first eight characters of the
    /// file name, in the configured time zone.
    fn name_date(&self, path: &Path) -> Option<DateTime<Utc>> {
        let name = path.file_name()?.to_str()?;
        let prefix = name.get(..DATE_PREFIX_LEN)?;
        if !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let date = NaiveDate::parse_from_str(prefix, "%Y%m%d").ok()?;
        let midnight = self
            .utc_offset
            .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
            .single()?;
        Some(midnight.with_timezone(&Utc))
    }
}
