// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Normalized events produced by the parser and shipped by the delivery pool.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{ConfigError, ParseError};

/// Severity of a record, ordered from least to most important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    /// Maps the single-letter severity code of the source format.
    pub fn from_code(code: &str) -> Result<Self, ParseError> {
        match code {
            "I" => Ok(Level::Info),
            "E" => Ok(Level::Error),
            "W" => Ok(Level::Warning),
            "N" => Ok(Level::Debug),
            other => Err(ParseError::UnknownSeverity(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warning" | "warn" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            other => Err(ConfigError::Invalid(format!(
                "Invalid level '{other}'. Must be one of: debug, info, warning, error"
            ))),
        }
    }
}

/// Maps the transaction status code of the source format to its name.
/// Unknown codes pass through unchanged.
pub fn transaction_status_name(code: &str) -> String {
    match code {
        "N" => "none",
        "U" => "committed",
        "R" => "unfinished",
        "C" => "rolled-back",
        other => other,
    }
    .to_string()
}

/// Position of the record in its source file. Two events captured at the same
/// position of the same file are the same event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOrigin {
    pub file: PathBuf,
    pub offset: u64,
}

impl RecordOrigin {
    pub fn new(file: &Path, offset: u64) -> Self {
        Self {
            file: file.to_path_buf(),
            offset,
        }
    }

    /// Deterministic document id: sha256 over the hex digest of the file
    /// path followed by the decimal offset.
    pub fn document_id(&self) -> String {
        let file_identity = hex::encode(Sha256::digest(self.file.to_string_lossy().as_bytes()));
        let mut hasher = Sha256::new();
        hasher.update(file_identity.as_bytes());
        hasher.update(self.offset.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A fully parsed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<FixedOffset>,
    pub level: Level,
    pub deliverable: bool,

    pub transaction_status: String,
    pub transaction_status_code: String,
    pub transaction_number: String,

    pub user: String,
    pub user_id: Option<i64>,
    pub computer: String,
    pub computer_id: Option<i64>,
    pub application: String,
    pub application_id: Option<i64>,
    pub event: String,
    pub event_id: Option<i64>,
    pub metadata: String,
    pub metadata_id: Option<i64>,
    pub server: String,
    pub server_id: Option<i64>,

    pub connection: String,
    pub comment: String,
    pub data: String,
    pub representation: String,
    pub port: String,
    pub sync_port: String,
    pub session: String,

    /// Configured application name of the agent.
    pub app: String,
    /// Configured name of the source the record came from.
    pub source: String,
    /// Directory of the source.
    pub folder: PathBuf,
    pub origin: RecordOrigin,
    pub raw: String,
}

impl Event {
    /// Sink collection the event belongs to, partitioned by month.
    pub fn monthly_collection(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.timestamp.format("%Y.%m"))
    }
}

/// JSON body sent to the sink.
#[derive(Debug, Serialize)]
pub struct Document<'a> {
    pub id: &'a str,
    #[serde(flatten)]
    pub event: &'a Event,
}
