// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use reqwest::Method;

use crate::constants;
use crate::errors::ConfigError;
use crate::event::Level;

/// A watched directory of rotated log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Name attached to every event of the source
    pub name: String,
    /// Directory holding the rotated files and the metadata file
    pub path: PathBuf,
}

/// Where and how events are shipped.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Base URL of the document store
    pub base_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// PUT or POST
    pub method: Method,
    /// Prefix of the monthly collection name
    pub index_prefix: String,
    pub doc_type: String,
    /// Accept self-signed certificates
    pub insecure_skip_verify: bool,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            user: None,
            password: None,
            method: Method::POST,
            index_prefix: constants::DEFAULT_INDEX_PREFIX.to_string(),
            doc_type: constants::DEFAULT_DOC_TYPE.to_string(),
            insecure_skip_verify: false,
            timeout: Duration::from_secs(constants::DEFAULT_SINK_TIMEOUT_SECS),
            https_proxy: None,
        }
    }
}

/// Configuration of the whole agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Application name attached to every event
    pub app_name: String,
    pub sources: Vec<SourceConfig>,
    pub sink: SinkConfig,
    /// Events below this level are parsed but not shipped
    pub min_level: Level,
    pub poll_interval: Duration,
    /// Total delivery attempts per event
    pub max_attempts: u32,
    /// Backoff grows by this step with every failed attempt
    pub backoff_step: Duration,
    pub queue_capacity: usize,
    /// Delivery workers; one per source when unset
    pub workers: Option<usize>,
    /// Fixed time zone of record timestamps and file name dates
    pub utc_offset: FixedOffset,
    pub log_extension: String,
    pub metadata_file: String,
    /// Delay before a failed pipeline is restarted; zero disables restarts
    pub restart_delay: Duration,
    /// How long workers may drain the queue on shutdown
    pub shutdown_grace: Duration,
    /// Tail new files from their start instead of their end
    pub read_from_start: bool,
    /// Prometheus listener address
    pub metrics_addr: SocketAddr,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_name: constants::DEFAULT_APP_NAME.to_string(),
            sources: Vec::new(),
            sink: SinkConfig::default(),
            min_level: Level::Debug,
            poll_interval: Duration::from_secs(constants::DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: constants::DEFAULT_MAX_ATTEMPTS,
            backoff_step: Duration::from_millis(constants::DEFAULT_BACKOFF_STEP_MS),
            queue_capacity: constants::DEFAULT_QUEUE_CAPACITY,
            workers: None,
            utc_offset: default_utc_offset(),
            log_extension: constants::DEFAULT_LOG_EXTENSION.to_string(),
            metadata_file: constants::DEFAULT_METADATA_FILE.to_string(),
            restart_delay: Duration::from_secs(constants::DEFAULT_RESTART_DELAY_SECS),
            shutdown_grace: Duration::from_secs(constants::DEFAULT_SHUTDOWN_GRACE_SECS),
            read_from_start: false,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], constants::DEFAULT_METRICS_PORT)),
            log_level: "info".to_string(),
        }
    }
}

fn default_utc_offset() -> FixedOffset {
    FixedOffset::east_opt(constants::DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sources = parse_sources(&required("EVENTLOG_SOURCES")?)?;

        let sink = SinkConfig {
            base_url: required("EVENTLOG_SINK_URL")?,
            user: optional("EVENTLOG_SINK_USER"),
            password: optional("EVENTLOG_SINK_PASSWORD"),
            method: match optional("EVENTLOG_SINK_METHOD") {
                Some(method) => parse_method(&method)?,
                None => defaults.sink.method.clone(),
            },
            index_prefix: optional("EVENTLOG_SINK_INDEX_PREFIX")
                .unwrap_or(defaults.sink.index_prefix),
            doc_type: optional("EVENTLOG_SINK_DOC_TYPE").unwrap_or(defaults.sink.doc_type),
            insecure_skip_verify: parse_bool(
                "EVENTLOG_SINK_INSECURE_SKIP_VERIFY",
                defaults.sink.insecure_skip_verify,
            )?,
            timeout: Duration::from_secs(parse_var(
                "EVENTLOG_SINK_TIMEOUT_SECS",
                defaults.sink.timeout.as_secs(),
            )?),
            https_proxy: optional("EVENTLOG_HTTPS_PROXY").or_else(|| optional("HTTPS_PROXY")),
        };

        let config = Self {
            app_name: optional("EVENTLOG_APP_NAME").unwrap_or(defaults.app_name),
            sources,
            sink,
            min_level: parse_var("EVENTLOG_MIN_LEVEL", defaults.min_level)?,
            poll_interval: Duration::from_secs(parse_var(
                "EVENTLOG_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            max_attempts: parse_var("EVENTLOG_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_step: Duration::from_millis(parse_var(
                "EVENTLOG_BACKOFF_STEP_MS",
                constants::DEFAULT_BACKOFF_STEP_MS,
            )?),
            queue_capacity: parse_var("EVENTLOG_QUEUE_CAPACITY", defaults.queue_capacity)?,
            workers: optional("EVENTLOG_WORKERS")
                .map(|raw| parse_value("EVENTLOG_WORKERS", &raw))
                .transpose()?,
            utc_offset: match optional("EVENTLOG_UTC_OFFSET") {
                Some(raw) => parse_utc_offset(&raw)?,
                None => defaults.utc_offset,
            },
            log_extension: optional("EVENTLOG_LOG_EXTENSION").unwrap_or(defaults.log_extension),
            metadata_file: optional("EVENTLOG_METADATA_FILE").unwrap_or(defaults.metadata_file),
            restart_delay: Duration::from_secs(parse_var(
                "EVENTLOG_RESTART_DELAY_SECS",
                defaults.restart_delay.as_secs(),
            )?),
            shutdown_grace: Duration::from_secs(parse_var(
                "EVENTLOG_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )?),
            read_from_start: parse_bool("EVENTLOG_READ_FROM_START", defaults.read_from_start)?,
            metrics_addr: parse_var("EVENTLOG_METRICS_ADDR", defaults.metrics_addr)?,
            log_level: optional("EVENTLOG_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one source must be configured".to_string(),
            ));
        }
        for (i, source) in self.sources.iter().enumerate() {
            if source.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source '{}' has an empty name",
                    source.path.display()
                )));
            }
            if self.sources[..i].iter().any(|s| s.name == source.name) {
                return Err(ConfigError::Invalid(format!(
                    "source name '{}' is used more than once",
                    source.name
                )));
            }
        }

        let url = self.sink.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "sink URL '{url}' must start with http:// or https://"
            )));
        }
        if self.sink.method != Method::POST && self.sink.method != Method::PUT {
            return Err(ConfigError::Invalid(format!(
                "sink method '{}' must be POST or PUT",
                self.sink.method
            )));
        }
        if self.sink.doc_type.trim().is_empty() {
            return Err(ConfigError::Invalid("doc type cannot be empty".to_string()));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacity must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max attempts must be greater than 0".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid(
                "worker count must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll interval must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Number of delivery workers to start.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(self.sources.len()).max(1)
    }

    /// `EnvFilter` directives for the agent's own logs. Chatty HTTP and TLS
    /// internals stay off at every level.
    pub fn log_filter(&self) -> String {
        format!("h2=off,hyper=off,rustls=off,{}", self.log_level)
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|val| !val.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{name} has an invalid value '{raw}'")))
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match optional(name).map(|val| val.trim().to_lowercase()) {
        None => Ok(default),
        Some(val) if matches!(val.as_str(), "true" | "1" | "yes") => Ok(true),
        Some(val) if matches!(val.as_str(), "false" | "0" | "no") => Ok(false),
        Some(val) => Err(ConfigError::Invalid(format!(
            "{name} has an invalid value '{val}'"
        ))),
    }
}

fn parse_method(raw: &str) -> Result<Method, ConfigError> {
    match raw.trim().to_uppercase().as_str() {
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        other => Err(ConfigError::Invalid(format!(
            "sink method '{other}' must be POST or PUT"
        ))),
    }
}

/// Parses `name=path` pairs separated by commas or whitespace.
pub fn parse_sources(raw: &str) -> Result<Vec<SourceConfig>, ConfigError> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok(SourceConfig {
                name: name.to_string(),
                path: PathBuf::from(path),
            }),
            _ => Err(ConfigError::Invalid(format!(
                "source '{pair}' must have the form name=path"
            ))),
        })
        .collect()
}

/// Parses `+HH:MM`, `-HH:MM` or `Z`.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::Invalid(format!("UTC offset '{raw}' must look like +03:00"));
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") {
        return Ok(Utc.fix());
    }

    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
