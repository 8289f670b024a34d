// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-attempt delivery of events to the document store.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::SinkConfig;
use crate::errors::{ConfigError, ShippingError};
use crate::event::{Document, Event};

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Performs one delivery attempt of `event` under document id `id`.
    /// Returns the response status when the store accepted the document.
    async fn ship(&self, id: &str, event: &Event) -> Result<StatusCode, ShippingError>;

    /// Where `event` is written to, for diagnostics.
    fn location(&self, id: &str, event: &Event) -> String;
}

/// Writes one JSON document per event to
/// `{base_url}/{monthly collection}/{doc_type}/{id}`.
///
/// Writing the same id twice overwrites the document, which makes retries
/// and re-reads after a restart safe.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    config: SinkConfig,
}

impl HttpSink {
    pub fn new(config: SinkConfig) -> Result<Self, ConfigError> {
        let client = build_client(&config)
            .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

fn build_client(config: &SinkConfig) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .danger_accept_invalid_certs(config.insecure_skip_verify);
    builder = match &config.https_proxy {
        Some(proxy) => builder.proxy(reqwest::Proxy::https(proxy)?),
        None => builder.no_proxy(),
    };
    builder.build()
}

#[async_trait]
impl EventSink for HttpSink {
    async fn ship(&self, id: &str, event: &Event) -> Result<StatusCode, ShippingError> {
        let body = serde_json::to_vec(&Document { id, event })
            .map_err(|e| ShippingError::Payload(e.to_string()))?;
        let url = self.location(id, event);

        let mut request = self
            .client
            .request(self.config.method.clone(), &url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ShippingError::Destination(e.status(), e.to_string()))?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            debug!("SINK | Stored {id} with {status}");
            return Ok(status);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ShippingError::Destination(Some(status), body))
    }

    fn location(&self, id: &str, event: &Event) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            event.monthly_collection(&self.config.index_prefix),
            self.config.doc_type,
            id
        )
    }
}
