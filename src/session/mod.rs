//! Per-session streaming state.
//!
//! Every open chat session has runtime state that outlives tab switches: is a
//! stream running, which node blocks has it produced, and the handle that
//! closes it. This state is in-memory only; persisted message history belongs
//! to the backend.
//!
//! # Architecture
//!
//! - [`SessionCoordinator`]: thread-safe map of session id to runtime state,
//!   sole owner of each session's stream handle
//! - [`SessionSearch`]: starts turns through the
//!   [`StreamClient`](crate::stream::StreamClient) and routes callbacks into
//!   the coordinator
//! - [`ViewState`]: the transient copy a view renders from
//!
//! # Example
//!
//! ```rust
//! use data_agent_client::session::SessionCoordinator;
//!
//! let sessions = SessionCoordinator::new();
//! let _ = sessions.get_or_create("session-a");
//! assert!(sessions.list_streaming_session_ids().is_empty());
//!
//! sessions.destroy("session-a");
//! assert!(sessions.is_empty());
//! ```

mod runtime;
mod search;

pub use runtime::{Generation, SessionCoordinator, SessionSnapshot, ViewState};
pub use search::{SessionEvent, SessionSearch};
