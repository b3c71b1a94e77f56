//! Server-sent-event frames.
//!
//! Wire parsing is done by `eventsource-stream`; this module maps its events
//! onto the [`SseFrame`]s that transports hand to the stream client.

use eventsource_stream::{Event, Eventsource};
use futures::{Stream, StreamExt};

use crate::error::{Error, Result};

/// Event name used when a frame carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// Event name the backend uses to signal normal end-of-stream.
pub const COMPLETE_EVENT: &str = "complete";

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name (`message` when the frame had none).
    pub event: String,
    /// Joined `data:` lines.
    pub data: String,
    /// Last event id seen on the stream, if any.
    pub id: Option<String>,
}

impl SseFrame {
    /// Build a default-named frame.
    #[must_use]
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: DEFAULT_EVENT.to_string(),
            data: data.into(),
            id: None,
        }
    }

    /// Build a named frame.
    #[must_use]
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }
}

impl From<Event> for SseFrame {
    fn from(event: Event) -> Self {
        Self {
            event: if event.event.is_empty() {
                DEFAULT_EVENT.to_string()
            } else {
                event.event
            },
            data: event.data,
            id: Some(event.id).filter(|id| !id.is_empty()),
        }
    }
}

/// Decode a chunked body into frames.
///
/// Chunk boundaries may fall anywhere, including inside a line ending.
/// Read and parse failures surface as [`Error::StreamTransport`].
pub fn sse_frames<S, B, E>(body: S) -> impl Stream<Item = Result<SseFrame>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    body.eventsource().map(|event| {
        event
            .map(SseFrame::from)
            .map_err(|e| Error::StreamTransport(e.to_string()))
    })
}
