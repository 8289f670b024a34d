// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for every stage of the shipping pipeline.
//!
//! Errors are split by the stage that produces them. Where a stage can fail
//! both locally (skip the item, keep going) and terminally (stop the owning
//! source pipeline), the type exposes `is_fatal()` so callers do not have to
//! match on individual variants.

use std::path::PathBuf;

use reqwest::StatusCode;

/// Errors produced while loading the metadata catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read metadata file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata record {kind} has a non-numeric id '{raw}'")]
    InvalidId { kind: u8, raw: String },
}

/// Errors produced while picking the active file of a source directory.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to list directory {path}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no rotated log files found in {0}")]
    NoCandidates(PathBuf),

    #[error("failed to stat resolved file {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    /// Listing problems are retried on the next poll; a file that vanished
    /// between listing and stat is not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResolveError::Stat { .. })
    }
}

/// Errors produced while turning a framed record into an event.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("record does not match the expected layout")]
    NoMatch,

    #[error("invalid record timestamp '{0}'")]
    Timestamp(String),

    #[error("unknown severity code '{0}'")]
    UnknownSeverity(String),
}

impl ParseError {
    /// An unknown severity means the source format changed under us.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParseError::UnknownSeverity(_))
    }
}

/// Conditions that terminate a single source pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to read {path}: {source}")]
    Tail {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("delivery queue closed while the pipeline was still running")]
    QueueClosed,
}

/// Errors from a single attempt to ship a document to the sink.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    #[error("failed to prepare payload: {0}")]
    Payload(String),

    #[error("sink rejected request ({0:?}): {1}")]
    Destination(Option<StatusCode>, String),
}

/// Errors raised while building the agent configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_fatality() {
        let listing = ResolveError::ListDir {
            path: PathBuf::from("/logs"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(!listing.is_fatal());
        assert!(!ResolveError::NoCandidates(PathBuf::from("/logs")).is_fatal());

        let stat = ResolveError::Stat {
            path: PathBuf::from("/logs/20240101000000.lgp"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(stat.is_fatal());
    }

    #[test]
    fn test_parse_error_fatality() {
        assert!(!ParseError::NoMatch.is_fatal());
        assert!(!ParseError::Timestamp("20241399000000".to_string()).is_fatal());
        assert!(ParseError::UnknownSeverity("X".to_string()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let error = ConfigError::Invalid("queue capacity must be greater than 0".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: queue capacity must be greater than 0"
        );
        assert_eq!(
            ConfigError::Missing("EVENTLOG_SINK_URL").to_string(),
            "EVENTLOG_SINK_URL environment variable is not set"
        );
    }
}
