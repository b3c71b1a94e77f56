//! Data Agent Client
//!
//! Client runtime for a data-agent backend: stream natural-language search
//! turns as server-sent events and keep per-session streaming state so that
//! switching sessions never loses progress or leaks a connection.
//!
//! # Architecture
//!
//! - **Stream Client**: turns a search request into ordered node callbacks
//!   and a cancellation handle
//! - **Session Coordinator**: owns each session's streaming flag, node
//!   blocks, stream handle, last request and report caches
//! - **Session Search**: glue that runs a turn for a session end to end
//! - **Report export**: turns a session's cached HTML report into a file
//!
//! # Modules
//!
//! - [`stream`]: request/response types, SSE decoding, transports, client
//! - [`session`]: runtime state coordinator and search driver
//! - [`report`]: HTML report download
//! - [`config`]: layered configuration
//! - [`error`]: error type shared by all modules

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod report;
pub mod session;
pub mod stream;

pub use error::{Error, Result};
pub use session::{SessionCoordinator, SessionSearch};
pub use stream::{NodeResponse, ResultData, StreamClient, StreamRequest, TextType};
