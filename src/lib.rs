//! **wsmirror**: a live mirror of compositor workspace and window state.
//!
//! A [`Session`](session::Session) holds one connection to the compositor's
//! IPC socket.  It answers explicit queries and keeps a cached copy of the
//! workspace list, the active workspace, and the active window up to date
//! from the event stream that arrives on the same connection.
//!
//! # Architecture
//!
//! * [`traits::Transport`] abstracts the byte stream so the session is not
//!   coupled to a particular socket type.
//! * [`ipc`] holds the Unix-socket transport and the wire codec.
//! * [`state`] holds the cached values and per-field change subscriptions.
//! * [`session`] runs the single reader thread that demultiplexes replies
//!   and events, and serializes queries over the shared connection.

pub mod config;
pub mod ipc;
pub mod session;
pub mod state;
pub mod traits;

pub use ipc::codec::{Record, Reply, Request, Window, Workspace};
pub use session::{RequestError, Session, SessionError, SessionState};
pub use state::{CachedState, Change, Field, Subscription};
