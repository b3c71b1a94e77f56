//! Streaming search client.
//!
//! A search turn is sent as a GET with query parameters and answered with a
//! server-sent-event stream. Each default-named event carries one
//! [`NodeResponse`]; an event named `complete` ends the stream.
//!
//! # Architecture
//!
//! - [`StreamClient`]: validates a [`StreamRequest`], opens the stream on a
//!   tokio task, and returns a [`StreamHandle`] for cancellation
//! - [`StreamObserver`]: the callback seam (message / error / complete)
//! - [`EventTransport`]: the connection seam; [`HttpTransport`] is the
//!   reqwest-backed implementation
//! - [`sse_frames`]: maps a chunked body onto [`SseFrame`]s
//!
//! # Example
//!
//! ```rust,no_run
//! use data_agent_client::stream::{Callbacks, StreamClient, StreamRequest};
//!
//! # async fn example() -> Result<(), data_agent_client::Error> {
//! let client = StreamClient::new("http://localhost:8065")?;
//! let request = StreamRequest::new("42", "top 10 customers").nl2sql_only(true);
//!
//! let handle = client.open(
//!     &request,
//!     Callbacks::new(|node| println!("[{}] {}", node.text_type, node.text)),
//! )?;
//! handle.cancel();
//! # Ok(())
//! # }
//! ```

mod client;
mod sse;
mod transport;
mod types;

pub use client::{Callbacks, CloseStream, StreamClient, StreamHandle, StreamObserver};
pub use sse::{COMPLETE_EVENT, DEFAULT_EVENT, SseFrame, sse_frames};
pub use transport::{EventTransport, FrameStream, HttpTransport};
pub use types::{DisplayStyle, NodeResponse, ResultData, ResultSet, StreamRequest, TextType};

/// Path of the backend's search stream endpoint.
pub const DEFAULT_STREAM_PATH: &str = "/api/stream/search";
