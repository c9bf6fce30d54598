//! Compositor IPC plumbing.
//!
//! [`transport`] owns the Unix socket connection; [`codec`] turns requests
//! into bytes and inbound frames into replies and events.  Neither knows
//! about the cached state.

pub mod codec;
pub mod transport;
