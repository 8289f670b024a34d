// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns framed records into [`Event`]s.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use regex::{Captures, Regex};

use crate::catalog::{Catalog, CatalogKind};
use crate::errors::ParseError;
use crate::event::{transaction_status_name, Event, Level, RecordOrigin};
use crate::tailer::CompletedRecord;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

fn record_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r#"(?s)^\{(?P<timestamp>\d{14}),(?P<status>\w+),\s*"#,
            r#"\{(?P<tx_a>\w+),(?P<tx_b>\w+)\},"#,
            r#"(?P<user>\w+),(?P<computer>\w+),(?P<application>\w+),(?P<connection>\w+),"#,
            r#"(?P<event>\w+),(?P<severity>\w+),"(?P<comment>(?:[^"]|"")*)","#,
            r#"(?P<metadata>\w+),\s*\{(?P<data>.*?)\},"(?P<representation>(?:[^"]|"")*)","#,
            r#"(?P<server>\w+),(?P<port>\w+),(?P<sync_port>\w+),(?P<session>\w+)"#,
            r#"(?P<trailing>.*)\}\s*,?\s*$"#,
        ))
        .expect("static record pattern must compile")
    })
}

/// Parses records of one source. Holds everything an event needs besides
/// the record itself and the catalog.
#[derive(Debug, Clone)]
pub struct RecordParser {
    min_level: Level,
    utc_offset: FixedOffset,
    app: String,
    source: String,
    folder: PathBuf,
}

impl RecordParser {
    pub fn new(
        min_level: Level,
        utc_offset: FixedOffset,
        app: &str,
        source: &str,
        folder: &Path,
    ) -> Self {
        Self {
            min_level,
            utc_offset,
            app: app.to_string(),
            source: source.to_string(),
            folder: folder.to_path_buf(),
        }
    }

    /// Parses `record`, read from `file`, resolving ids through `catalog`.
    ///
    /// Events below the minimum level are returned with `deliverable` unset
    /// rather than filtered out.
    pub fn parse(
        &self,
        record: &CompletedRecord,
        file: &Path,
        catalog: &Catalog,
    ) -> Result<Event, ParseError> {
        let text = record.text();
        let caps = record_pattern()
            .captures(&text)
            .ok_or(ParseError::NoMatch)?;

        let raw_timestamp = &caps["timestamp"];
        let timestamp = NaiveDateTime::parse_from_str(raw_timestamp, TIMESTAMP_FORMAT)
            .ok()
            .and_then(|naive| self.utc_offset.from_local_datetime(&naive).single())
            .ok_or_else(|| ParseError::Timestamp(raw_timestamp.to_string()))?;

        let level = Level::from_code(&caps["severity"])?;

        let (user, user_id) = lookup(&caps, "user", catalog, CatalogKind::Users);
        let (computer, computer_id) = lookup(&caps, "computer", catalog, CatalogKind::Computers);
        let (application, application_id) =
            lookup(&caps, "application", catalog, CatalogKind::Applications);
        let (event, event_id) = lookup(&caps, "event", catalog, CatalogKind::Events);
        let (metadata, metadata_id) = lookup(&caps, "metadata", catalog, CatalogKind::MetaObjects);
        let (server, server_id) = lookup(&caps, "server", catalog, CatalogKind::Servers);

        let status_code = &caps["status"];

        Ok(Event {
            timestamp,
            level,
            deliverable: level >= self.min_level,
            transaction_status: transaction_status_name(status_code),
            transaction_status_code: status_code.to_string(),
            transaction_number: format!("{}-{}", &caps["tx_a"], &caps["tx_b"]),
            user,
            user_id,
            computer,
            computer_id,
            application,
            application_id,
            event,
            event_id,
            metadata,
            metadata_id,
            server,
            server_id,
            connection: caps["connection"].to_string(),
            comment: unquote(&caps["comment"]),
            data: caps["data"].to_string(),
            representation: unquote(&caps["representation"]),
            port: caps["port"].to_string(),
            sync_port: caps["sync_port"].to_string(),
            session: caps["session"].to_string(),
            app: self.app.clone(),
            source: self.source.clone(),
            folder: self.folder.clone(),
            origin: RecordOrigin::new(file, record.end_offset),
            raw: text.to_string(),
        })
    }
}

/// Resolves a numeric capture through the catalog. Non-numeric values pass
/// through unchanged and carry no id.
fn lookup(
    caps: &Captures<'_>,
    group: &str,
    catalog: &Catalog,
    kind: CatalogKind,
) -> (String, Option<i64>) {
    let raw = &caps[group];
    match raw.parse::<i64>() {
        Ok(id) => (catalog.resolve(kind, id), Some(id)),
        Err(_) => (raw.to_string(), None),
    }
}

fn unquote(value: &str) -> String {
    value.replace("\"\"", "\"")
}
