//! Stream client: one [`StreamRequest`] in, callbacks and a cancel handle out.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::sse::{COMPLETE_EVENT, DEFAULT_EVENT};
use super::transport::{EventTransport, HttpTransport};
use super::types::{NodeResponse, StreamRequest};
use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Receives the events of one open stream.
///
/// Callbacks run sequentially on the stream's task, in the order the backend
/// emitted the frames.
#[async_trait::async_trait]
pub trait StreamObserver: Send + 'static {
    /// A node response arrived.
    async fn on_message(&mut self, node: NodeResponse);

    /// A frame could not be decoded ([`Error::StreamDecode`], stream continues)
    /// or the connection failed ([`Error::StreamTransport`], stream closed).
    async fn on_error(&mut self, _error: Error) {}

    /// The backend signalled normal end-of-stream.
    async fn on_complete(&mut self) {}
}

type MessageFn = Box<dyn FnMut(NodeResponse) + Send>;
type ErrorFn = Box<dyn FnMut(Error) + Send>;
type CompleteFn = Box<dyn FnMut() + Send>;

/// Closure-based [`StreamObserver`].
///
/// ```rust
/// use data_agent_client::stream::Callbacks;
///
/// let callbacks = Callbacks::new(|node| println!("{}: {}", node.node_name, node.text))
///     .on_error(|e| eprintln!("{e}"))
///     .on_complete(|| println!("done"));
/// # drop(callbacks);
/// ```
pub struct Callbacks {
    on_message: MessageFn,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish_non_exhaustive()
    }
}

impl Callbacks {
    #[must_use]
    pub fn new(on_message: impl FnMut(NodeResponse) + Send + 'static) -> Self {
        Self {
            on_message: Box::new(on_message),
            on_error: None,
            on_complete: None,
        }
    }

    #[must_use]
    pub fn on_error(mut self, f: impl FnMut(Error) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

#[async_trait::async_trait]
impl StreamObserver for Callbacks {
    async fn on_message(&mut self, node: NodeResponse) {
        (self.on_message)(node);
    }

    async fn on_error(&mut self, error: Error) {
        if let Some(f) = self.on_error.as_mut() {
            f(error);
        }
    }

    async fn on_complete(&mut self) {
        if let Some(f) = self.on_complete.as_mut() {
            f();
        }
    }
}

/// A capability that closes a live stream.
pub trait CloseStream: Send + Sync + std::fmt::Debug {
    /// Close the stream. Must be safe to call more than once.
    fn close(&self) -> Result<()>;
}

/// Cancellation handle for an open stream.
///
/// Not `Clone`: whoever holds the handle is the only party able to close the
/// stream. Dropping the handle does not close the stream.
#[derive(Debug)]
pub struct StreamHandle {
    id: Uuid,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Identifier used in log events for this stream.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Close the connection. No callback starts after this returns; calling
    /// it again is a no-op.
    pub fn cancel(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        info!(name: "stream.cancelled", stream_id = %self.id, "Stream cancelled");
    }

    /// Whether `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the stream task has exited and its connection is closed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the stream task to exit.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            warn!(name: "stream.task_failed", stream_id = %self.id, error = %e, "Stream task failed");
        }
    }
}

impl CloseStream for StreamHandle {
    fn close(&self) -> Result<()> {
        self.cancel();
        Ok(())
    }
}

/// Opens search streams against the backend.
#[derive(Debug, Clone)]
pub struct StreamClient {
    endpoint: Url,
    transport: Arc<dyn EventTransport>,
}

impl StreamClient {
    /// Client for `base_url` using the default search path over HTTP.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let endpoint = Url::parse(base_url.as_ref())?.join(super::DEFAULT_STREAM_PATH)?;
        Ok(Self::with_transport(endpoint, Arc::new(HttpTransport::new())))
    }

    /// Client built from backend configuration.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let transport = HttpTransport::with_connect_timeout(config.connect_timeout())?;
        Ok(Self::with_transport(config.stream_url()?, Arc::new(transport)))
    }

    /// Client for a full stream endpoint URL and a custom transport.
    #[must_use]
    pub fn with_transport(endpoint: Url, transport: Arc<dyn EventTransport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    /// The stream endpoint, without query parameters.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// The URL `request` would be streamed from.
    #[must_use]
    pub fn request_url(&self, request: &StreamRequest) -> Url {
        let mut url = self.endpoint.clone();
        url.set_query(None);
        request.apply_to(&mut url);
        url
    }

    /// Open a stream for `request`.
    ///
    /// Only a local validation failure is returned as an error. Connection
    /// and decode failures go to [`StreamObserver::on_error`]. Must be called
    /// within a tokio runtime.
    pub fn open<O: StreamObserver>(
        &self,
        request: &StreamRequest,
        observer: O,
    ) -> Result<StreamHandle> {
        request.validate()?;

        let id = Uuid::new_v4();
        let url = self.request_url(request);
        let token = CancellationToken::new();

        info!(
            name: "stream.opened",
            stream_id = %id,
            agent_id = %request.agent_id,
            thread_id = request.thread_id.as_deref().unwrap_or(""),
            nl2sql_only = request.nl2sql_only,
            "Opening search stream"
        );

        let task = tokio::spawn(run_stream(
            id,
            Arc::clone(&self.transport),
            url,
            observer,
            token.clone(),
        ));

        Ok(StreamHandle { id, token, task })
    }
}

async fn run_stream<O: StreamObserver>(
    id: Uuid,
    transport: Arc<dyn EventTransport>,
    url: Url,
    mut observer: O,
    token: CancellationToken,
) {
    let connected = tokio::select! {
        biased;
        () = token.cancelled() => return,
        res = transport.connect(url) => res,
    };

    let mut frames = match connected {
        Ok(frames) => frames,
        Err(e) => {
            if !token.is_cancelled() {
                warn!(name: "stream.failed", stream_id = %id, error = %e, "Stream connection failed");
                observer.on_error(Error::StreamTransport(e.to_string())).await;
            }
            return;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return,
            next = frames.next() => next,
        };
        if token.is_cancelled() {
            return;
        }

        match next {
            Some(Ok(frame)) => match frame.event.as_str() {
                DEFAULT_EVENT => match NodeResponse::from_json(&frame.data) {
                    Ok(node) => {
                        debug!(
                            name: "stream.node",
                            stream_id = %id,
                            node = %node.node_name,
                            text_type = %node.text_type,
                            "Node received"
                        );
                        observer.on_message(node).await;
                    }
                    Err(e) => {
                        warn!(name: "stream.decode_failed", stream_id = %id, error = %e, "Failed to parse SSE data");
                        observer.on_error(Error::StreamDecode(e.to_string())).await;
                    }
                },
                COMPLETE_EVENT => {
                    info!(name: "stream.completed", stream_id = %id, "Stream completed");
                    observer.on_complete().await;
                    return;
                }
                other => {
                    debug!(name: "stream.frame_ignored", stream_id = %id, event = other, "Ignoring frame");
                }
            },
            Some(Err(e)) => {
                warn!(name: "stream.failed", stream_id = %id, error = %e, "Stream connection failed");
                observer.on_error(Error::StreamTransport(e.to_string())).await;
                return;
            }
            None => {
                warn!(name: "stream.failed", stream_id = %id, "Stream closed before completion");
                observer
                    .on_error(Error::StreamTransport("stream closed before completion".into()))
                    .await;
                return;
            }
        }
    }
}
