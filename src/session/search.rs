//! Runs search turns for sessions: opens the stream, routes its callbacks
//! into the [`SessionCoordinator`], and forwards them to an optional view
//! channel.

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::runtime::{Generation, SessionCoordinator};
use crate::error::{Error, Result};
use crate::stream::{NodeResponse, StreamClient, StreamObserver, StreamRequest};

/// A stream callback, tagged with its session, as seen by a view.
#[derive(Debug)]
pub enum SessionEvent {
    /// A node was appended to the session's current turn.
    Node {
        session_id: String,
        node: NodeResponse,
    },
    /// A decode failure (`fatal == false`) or a connection failure that ended
    /// the turn.
    Error {
        session_id: String,
        error: Error,
        fatal: bool,
    },
    /// The turn completed normally.
    Completed { session_id: String },
}

impl SessionEvent {
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Node { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::Completed { session_id } => session_id,
        }
    }
}

/// Observer bound to one session and one generation. Callbacks arriving after
/// the generation lost ownership are dropped.
#[derive(Debug)]
struct SessionObserver {
    session_id: String,
    generation: Generation,
    sessions: SessionCoordinator,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl SessionObserver {
    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            // A closed receiver means the view went away.
            let _ = tx.send(event);
        }
    }
}

#[async_trait::async_trait]
impl StreamObserver for SessionObserver {
    async fn on_message(&mut self, node: NodeResponse) {
        if self
            .sessions
            .append_node(&self.session_id, self.generation, node.clone())
        {
            self.emit(SessionEvent::Node {
                session_id: self.session_id.clone(),
                node,
            });
        }
    }

    async fn on_error(&mut self, error: Error) {
        let fatal = error.is_stream_fatal();
        let current = if fatal {
            self.sessions.finish_turn(&self.session_id, self.generation)
        } else {
            self.sessions.is_current(&self.session_id, self.generation)
        };
        if current {
            self.emit(SessionEvent::Error {
                session_id: self.session_id.clone(),
                error,
                fatal,
            });
        }
    }

    async fn on_complete(&mut self) {
        if self.sessions.finish_turn(&self.session_id, self.generation) {
            self.emit(SessionEvent::Completed {
                session_id: self.session_id.clone(),
            });
        }
    }
}

/// Starts, retries and stops search turns on behalf of sessions.
///
/// # Example
///
/// ```rust,no_run
/// use data_agent_client::session::{SessionCoordinator, SessionSearch};
/// use data_agent_client::stream::{StreamClient, StreamRequest};
///
/// # async fn example() -> Result<(), data_agent_client::Error> {
/// let (search, mut events) = SessionSearch::new(
///     StreamClient::new("http://localhost:8065")?,
///     SessionCoordinator::new(),
/// )
/// .with_events();
///
/// search.start("session-1", StreamRequest::new("42", "top 10 customers"))?;
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionSearch {
    client: StreamClient,
    sessions: SessionCoordinator,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl SessionSearch {
    #[must_use]
    pub fn new(client: StreamClient, sessions: SessionCoordinator) -> Self {
        Self {
            client,
            sessions,
            events: None,
        }
    }

    /// Also forward every accepted callback to the returned receiver.
    #[must_use]
    pub fn with_events(mut self) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        (self, rx)
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionCoordinator {
        &self.sessions
    }

    #[must_use]
    pub fn client(&self) -> &StreamClient {
        &self.client
    }

    /// Start a turn for `session_id`, replacing any stream it already has.
    ///
    /// An invalid request is rejected without touching the session.
    pub fn start(&self, session_id: &str, request: StreamRequest) -> Result<Generation> {
        request.validate()?;

        let generation = self.sessions.begin_turn(session_id, request.clone());
        let observer = SessionObserver {
            session_id: session_id.to_string(),
            generation,
            sessions: self.sessions.clone(),
            events: self.events.clone(),
        };

        match self.client.open(&request, observer) {
            Ok(handle) => {
                info!(
                    name: "session.turn_started",
                    session_id,
                    stream_id = %handle.id(),
                    generation,
                    "Search turn started"
                );
                self.sessions
                    .attach_stream(session_id, generation, Box::new(handle));
                Ok(generation)
            }
            Err(e) => {
                warn!(name: "session.turn_failed", session_id, error = %e, "Failed to start search turn");
                self.sessions.finish_turn(session_id, generation);
                Err(e)
            }
        }
    }

    /// Re-issue the session's last request. Returns `Ok(None)` when the
    /// session has never streamed.
    pub fn retry(&self, session_id: &str) -> Result<Option<Generation>> {
        match self.sessions.last_request(session_id) {
            Some(request) => self.start(session_id, request).map(Some),
            None => Ok(None),
        }
    }

    /// Stop the session's stream, keeping its history.
    pub fn stop(&self, session_id: &str) -> bool {
        self.sessions.cancel_stream(session_id)
    }
}
