//! Per-session runtime state and the coordinator that owns it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::stream::{CloseStream, NodeResponse, StreamRequest, TextType};

/// Identifies which stream currently owns a session's state.
pub type Generation = u64;

/// Live bookkeeping for one session.
#[derive(Debug, Default)]
struct SessionRuntimeState {
    is_streaming: bool,
    /// One inner vec per turn.
    node_blocks: Vec<Vec<NodeResponse>>,
    close_stream: Option<Box<dyn CloseStream>>,
    last_request: Option<StreamRequest>,
    html_report_content: String,
    html_report_size: usize,
    markdown_report_content: String,
    generation: Generation,
    /// The current block received a `complete` or `error` node.
    block_ended: bool,
}

impl SessionRuntimeState {
    fn snapshot(&self, session_id: &str) -> SessionSnapshot {
        SessionSnapshot {
            session_id: session_id.to_string(),
            is_streaming: self.is_streaming,
            node_blocks: self.node_blocks.clone(),
            has_active_stream: self.close_stream.is_some(),
            last_request: self.last_request.clone(),
            html_report_content: self.html_report_content.clone(),
            html_report_size: self.html_report_size,
            markdown_report_content: self.markdown_report_content.clone(),
        }
    }

    fn owns(&self, generation: Generation) -> bool {
        self.is_streaming && self.generation == generation
    }

    fn record_report(&mut self, node: &NodeResponse) {
        match node.text_type {
            TextType::Html => {
                self.html_report_content.push_str(&node.text);
                self.html_report_size += node.text.len();
            }
            TextType::Markdown => self.markdown_report_content.push_str(&node.text),
            _ => {}
        }
    }
}

/// Point-in-time copy of a session's runtime state.
///
/// The stream handle itself never leaves the coordinator; only whether one
/// is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub is_streaming: bool,
    pub node_blocks: Vec<Vec<NodeResponse>>,
    pub has_active_stream: bool,
    pub last_request: Option<StreamRequest>,
    pub html_report_content: String,
    pub html_report_size: usize,
    pub markdown_report_content: String,
}

/// Transient state a view renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub is_streaming: bool,
    pub node_blocks: Vec<Vec<NodeResponse>>,
}

/// Thread-safe owner of every open session's runtime state.
///
/// Entries are created lazily by [`get_or_create`](Self::get_or_create) and
/// removed only by [`destroy`](Self::destroy). Stream handles are closed
/// after the map lock is released.
///
/// # Example
///
/// ```rust
/// use data_agent_client::session::{SessionCoordinator, ViewState};
///
/// let sessions = SessionCoordinator::new();
/// let state = sessions.get_or_create("session-a");
/// assert!(!state.is_streaming);
///
/// let mut view = ViewState::default();
/// sessions.pull_into_view("session-a", &mut view);
/// assert!(view.node_blocks.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
}

#[derive(Debug, Default)]
struct CoordinatorInner {
    sessions: RwLock<HashMap<String, SessionRuntimeState>>,
    generations: AtomicU64,
}

impl SessionCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionRuntimeState>> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionRuntimeState>> {
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> Generation {
        self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Return the session's state, inserting a default entry on first access.
    #[must_use]
    pub fn get_or_create(&self, session_id: &str) -> SessionSnapshot {
        {
            let guard = self.read();
            if let Some(state) = guard.get(session_id) {
                return state.snapshot(session_id);
            }
        }

        let mut guard = self.write();
        guard
            .entry(session_id.to_string())
            .or_default()
            .snapshot(session_id)
    }

    /// The session's state, if it exists. Never creates an entry.
    #[must_use]
    pub fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.read().get(session_id).map(|s| s.snapshot(session_id))
    }

    /// Copy `is_streaming` and `node_blocks` into `view`.
    pub fn pull_into_view(&self, session_id: &str, view: &mut ViewState) {
        let snapshot = self.get_or_create(session_id);
        view.is_streaming = snapshot.is_streaming;
        view.node_blocks = snapshot.node_blocks;
    }

    /// Copy the view's `is_streaming` and `node_blocks` back into the session.
    ///
    /// A view reporting "not streaming" while the session still holds a
    /// stream handle ends that stream.
    pub fn push_from_view(&self, session_id: &str, view: &ViewState) {
        let released = {
            let mut guard = self.write();
            let state = guard.entry(session_id.to_string()).or_default();
            state.is_streaming = view.is_streaming;
            state.node_blocks.clone_from(&view.node_blocks);
            if view.is_streaming {
                None
            } else {
                state.close_stream.take()
            }
        };
        if let Some(handle) = released {
            close_quietly(session_id, handle.as_ref());
        }
    }

    /// Remove the session, closing its stream first if one is active.
    ///
    /// Returns whether the session existed. Close failures are logged; the
    /// entry is removed regardless.
    pub fn destroy(&self, session_id: &str) -> bool {
        let removed = self.write().remove(session_id);
        let Some(state) = removed else {
            return false;
        };
        if let Some(handle) = state.close_stream {
            close_quietly(session_id, handle.as_ref());
        }
        info!(name: "session.destroyed", session_id, "Session runtime state removed");
        true
    }

    /// Sorted ids of sessions with `is_streaming` set.
    #[must_use]
    pub fn list_streaming_session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, state)| state.is_streaming)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Start a new turn: close any active stream, mark the session streaming,
    /// remember `request` for retry, and open an empty node block.
    ///
    /// Returns the generation that callbacks for the new stream must present.
    pub fn begin_turn(&self, session_id: &str, request: StreamRequest) -> Generation {
        let generation = self.next_generation();
        let previous = {
            let mut guard = self.write();
            let state = guard.entry(session_id.to_string()).or_default();
            let previous = state.close_stream.take();
            state.generation = generation;
            state.is_streaming = true;
            state.last_request = Some(request);
            state.node_blocks.push(Vec::new());
            state.block_ended = false;
            state.html_report_content.clear();
            state.html_report_size = 0;
            state.markdown_report_content.clear();
            previous
        };
        if let Some(handle) = previous {
            debug!(name: "session.stream_replaced", session_id, "Closing previous stream");
            close_quietly(session_id, handle.as_ref());
        }
        generation
    }

    /// Hand the stream handle for `generation` to the session.
    ///
    /// If the turn already ended or was superseded the handle is closed
    /// immediately and `false` is returned.
    pub fn attach_stream(
        &self,
        session_id: &str,
        generation: Generation,
        handle: Box<dyn CloseStream>,
    ) -> bool {
        let rejected = {
            let mut guard = self.write();
            match guard.get_mut(session_id) {
                Some(state) if state.owns(generation) => {
                    state.close_stream = Some(handle);
                    None
                }
                _ => Some(handle),
            }
        };
        match rejected {
            Some(handle) => {
                close_quietly(session_id, handle.as_ref());
                false
            }
            None => true,
        }
    }

    /// Append `node` to the current turn's block. Ignored unless `generation`
    /// still owns the session and the block has not been ended by a
    /// `complete` or `error` node.
    pub fn append_node(&self, session_id: &str, generation: Generation, node: NodeResponse) -> bool {
        let mut guard = self.write();
        let Some(state) = guard.get_mut(session_id).filter(|s| s.owns(generation)) else {
            return false;
        };
        if state.block_ended {
            debug!(
                name: "session.node_dropped",
                session_id,
                node_name = %node.node_name,
                "Node arrived after its block ended"
            );
            return false;
        }
        state.record_report(&node);
        state.block_ended = node.ends_turn();
        match state.node_blocks.last_mut() {
            Some(block) => block.push(node),
            None => state.node_blocks.push(vec![node]),
        }
        true
    }

    /// End the turn owned by `generation`, dropping its handle.
    pub fn finish_turn(&self, session_id: &str, generation: Generation) -> bool {
        let mut guard = self.write();
        let Some(state) = guard.get_mut(session_id).filter(|s| s.owns(generation)) else {
            return false;
        };
        state.is_streaming = false;
        state.close_stream = None;
        true
    }

    /// Whether `generation` still owns the session.
    #[must_use]
    pub fn is_current(&self, session_id: &str, generation: Generation) -> bool {
        self.read()
            .get(session_id)
            .is_some_and(|s| s.owns(generation))
    }

    /// Close the session's active stream and mark it idle, keeping its history.
    pub fn cancel_stream(&self, session_id: &str) -> bool {
        let generation = self.next_generation();
        let handle = {
            let mut guard = self.write();
            let Some(state) = guard.get_mut(session_id) else {
                return false;
            };
            let was_streaming = state.is_streaming;
            state.is_streaming = false;
            state.generation = generation;
            match state.close_stream.take() {
                Some(handle) => handle,
                None => return was_streaming,
            }
        };
        close_quietly(session_id, handle.as_ref());
        true
    }

    /// The request of the session's most recent turn.
    #[must_use]
    pub fn last_request(&self, session_id: &str) -> Option<StreamRequest> {
        self.read()
            .get(session_id)
            .and_then(|s| s.last_request.clone())
    }

    /// Cached HTML report and its size in bytes.
    #[must_use]
    pub fn html_report(&self, session_id: &str) -> Option<(String, usize)> {
        self.read()
            .get(session_id)
            .map(|s| (s.html_report_content.clone(), s.html_report_size))
    }

    /// Cached markdown report.
    #[must_use]
    pub fn markdown_report(&self, session_id: &str) -> Option<String> {
        self.read()
            .get(session_id)
            .map(|s| s.markdown_report_content.clone())
    }

    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.read().contains_key(session_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted ids of every known session.
    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn close_quietly(session_id: &str, handle: &dyn CloseStream) {
    if let Err(e) = handle.close() {
        warn!(name: "session.close_failed", session_id, error = %e, "Failed to close session stream");
    }
}
