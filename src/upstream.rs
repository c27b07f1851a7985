// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Upstream chat service client
//
// POSTs the caller's request envelope, unchanged, to the streaming endpoint
// and hands back the response body as a byte stream.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};

use crate::config::UpstreamConfig;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("upstream returned status {0}")]
    Status(u16),
}

/// Opens the upstream stream for one subscription.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn open_stream(&self, envelope: Bytes) -> Result<ByteStream, UpstreamError>;
}

// ---------------------------------------------------------------------------
// Reqwest client
// ---------------------------------------------------------------------------

pub struct ReqwestUpstreamClient {
    client: reqwest::Client,
    url: String,
}

impl ReqwestUpstreamClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(reqwest::Client::new(), config.stream_url())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn transport_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout(e.to_string())
    } else {
        UpstreamError::Transport(e.to_string())
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn open_stream(&self, envelope: Bytes) -> Result<ByteStream, UpstreamError> {
        let resp = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .body(envelope)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(url = %self.url, status = status.as_u16(), "upstream rejected stream request");
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let stream = resp.bytes_stream().map_err(transport_error);
        Ok(Box::pin(stream))
    }
}
