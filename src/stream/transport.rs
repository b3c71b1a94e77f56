//! Event channel transports.
//!
//! An [`EventTransport`] opens a long-lived server-to-client channel for a URL
//! and yields named [`SseFrame`]s until the server closes it. Dropping the
//! returned stream closes the connection.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use url::Url;

use super::sse::{SseFrame, sse_frames};
use crate::error::{Error, Result};

/// Boxed stream of frames produced by a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame>> + Send>>;

/// Opens event channels.
#[async_trait::async_trait]
pub trait EventTransport: Send + Sync + std::fmt::Debug {
    /// Connect to `url` and return its frames in arrival order.
    async fn connect(&self, url: Url) -> Result<FrameStream>;
}

/// SSE over HTTP using reqwest's incremental body reader.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Build a transport whose connect phase is bounded by `timeout`.
    ///
    /// The body read is never bounded: a stream stays open until it ends or
    /// is cancelled.
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Use a preconfigured reqwest client.
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl EventTransport for HttpTransport {
    async fn connect(&self, url: Url) -> Result<FrameStream> {
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            return Err(Error::from_status(status.as_u16(), message));
        }

        let out = sse_frames(resp.bytes_stream());

        Ok(Box::pin(out))
    }
}
