//! The session that ties transport, codec, and state store together.
//!
//! A [`Session`] owns one [`Transport`] and a single background reader
//! thread.  The reader is the only consumer of inbound bytes: it decodes
//! every frame and routes it by kind.
//!
//! * **Events** go to the [`StateStore`].
//! * **Replies** go to the [`StateStore`] and then to the query currently
//!   waiting, if any.
//!
//! The protocol carries no correlation id, so queries are serialized: a
//! mutex is held from send until the reply has been handed over, and the
//! next reply after a send is taken to be its answer.  Events arriving in
//! between never satisfy a query.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Listening -> Closed
//!                     |
//!                     +-------> Failed
//! ```
//!
//! [`Session::open`] connects and returns a session that is already
//! `Listening` and has run its bootstrap queries.  [`Session::close`] (or
//! dropping the session) shuts the transport down and joins the reader.
//! The peer hanging up also ends in `Closed`; cached values stay readable.

use crate::config::SessionConfig;
use crate::ipc::codec::{
    self, DecodeError, DecodedMessage, FrameDecoder, Framing, Reply, Request, GET_ACTIVE_WINDOW,
    GET_WORKSPACES,
};
use crate::ipc::transport::{UnixSocketTransport, UnixTransportError};
use crate::state::{CachedState, Field, StateStore, Subscription};
use crate::traits::{Received, Transport};
use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Listening,
    Closed,
    Failed,
}

/// Errors that prevent a session from being constructed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Nothing exists at the socket path.  Not retried.
    #[error("IPC endpoint not found: {}", .0.display())]
    EndpointNotFound(PathBuf),
    /// The socket exists but the connection failed.
    #[error("connection failed: {0}")]
    Connection(String),
}

impl From<UnixTransportError> for SessionError {
    fn from(e: UnixTransportError) -> Self {
        match e {
            UnixTransportError::EndpointNotFound(path) => SessionError::EndpointNotFound(path),
            other => SessionError::Connection(other.to_string()),
        }
    }
}

/// Reasons a [`Session::query`] can fail.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("session is closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
    #[error("undecodable frame while awaiting reply: {0}")]
    Decode(#[from] DecodeError),
    #[error("connection closed while awaiting reply")]
    Disconnected,
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// One-shot handoff from the reader to the waiting query.
type ReplySlot = mpsc::Sender<Result<Reply, RequestError>>;

/// Deliver `outcome` to a waiting query.  The query may already have given
/// up (timed out between `take` and `send`), in which case it is dropped.
fn hand_over(slot: ReplySlot, outcome: Result<Reply, RequestError>) {
    if let Err(mpsc::SendError(outcome)) = slot.send(outcome) {
        debug!("query stopped waiting, dropping {:?}", outcome);
    }
}

/// Session status and the pending-query slot share one lock, so a query
/// can never install its slot after the reader has declared the session
/// closed.
struct Link {
    status: SessionState,
    pending: Option<ReplySlot>,
}

/// State shared between the session handle and its reader thread.
struct Shared<T> {
    transport: T,
    store: StateStore,
    link: Mutex<Link>,
}

impl<T: Transport> Shared<T> {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Route one frame by its decoded kind.
    fn dispatch(&self, frame: &[u8]) {
        match codec::decode(frame) {
            Ok(DecodedMessage::Event(event)) => {
                debug!("<- event {}", event.kind);
                self.store.apply_event(&event);
            }
            Ok(DecodedMessage::Reply(reply)) => {
                // Cache first, so the caller sees its own reply reflected.
                self.store.apply_reply(&reply);
                let pending = self.link().pending.take();
                match pending {
                    Some(slot) => {
                        debug!("<- reply");
                        hand_over(slot, Ok(reply));
                    }
                    None => debug!("<- unsolicited reply, cached"),
                }
            }
            Ok(DecodedMessage::Unknown) => debug!("<- unrecognised frame, ignored"),
            Err(e) => self.reject(e),
        }
    }

    /// Drop a frame that could not be decoded or delimited.
    fn reject(&self, e: DecodeError) {
        warn!("dropping malformed frame: {}", e);
        // It may have been the reply the waiting query is after.
        let pending = self.link().pending.take();
        if let Some(slot) = pending {
            hand_over(slot, Err(RequestError::Decode(e)));
        }
    }

    /// Mark the session closed, fail any waiting query, and notify
    /// subscribers.
    fn shut_down(&self) {
        let pending = {
            let mut link = self.link();
            link.status = SessionState::Closed;
            link.pending.take()
        };
        if let Some(slot) = pending {
            hand_over(slot, Err(RequestError::Disconnected));
        }
        self.store.close();
        info!("session closed");
    }
}

/// Background loop: drain the transport until the stream ends.
///
/// Never panics on bad input; malformed frames are logged and skipped.
fn run_reader<T: Transport>(shared: &Shared<T>, framing: Framing, max_frame_bytes: usize) {
    let mut frames = FrameDecoder::new(framing, max_frame_bytes);
    loop {
        match shared.transport.receive() {
            Ok(Received::Data(chunk)) => {
                for frame in frames.push(&chunk) {
                    match frame {
                        Ok(bytes) => shared.dispatch(&bytes),
                        Err(e) => shared.reject(e),
                    }
                }
            }
            Ok(Received::EndOfStream) => {
                if let Some(frame) = frames.finish() {
                    shared.dispatch(&frame);
                }
                info!("IPC stream ended");
                break;
            }
            Err(e) => {
                if shared.link().status == SessionState::Closed {
                    debug!("reader stopped: {}", e);
                } else {
                    error!("IPC read error: {}", e);
                }
                break;
            }
        }
    }
    shared.shut_down();
}

/// A live connection to the compositor plus the state mirrored from it.
///
/// # Typical usage
///
/// ```ignore
/// let session = Session::open("/run/user/1000/niri.sock", SessionConfig::default())?;
/// println!("{:?}", session.current_state().workspaces);
/// for change in session.on_change(Field::ActiveWorkspace) {
///     println!("{:?}", change);
/// }
/// ```
pub struct Session<T: Transport> {
    shared: Arc<Shared<T>>,
    config: SessionConfig,
    /// Held from send until the reply is handed over.
    query_lock: Mutex<()>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Session<UnixSocketTransport> {
    /// Connect to the Unix socket at `endpoint` and start a session on it.
    pub fn open(endpoint: impl AsRef<Path>, config: SessionConfig) -> Result<Self, SessionError> {
        let endpoint = endpoint.as_ref();
        debug!(
            "session {:?} -> {:?}",
            SessionState::Disconnected,
            SessionState::Connecting
        );
        let transport = match UnixSocketTransport::connect(endpoint) {
            Ok(t) => t.with_read_buffer_size(config.read_buffer_size),
            Err(e) => {
                error!("session {:?}: {}", SessionState::Failed, e);
                return Err(e.into());
            }
        };
        info!("connected to {}", transport.path().display());
        Ok(Self::start(transport, config))
    }
}

impl<T: Transport> Session<T> {
    /// Start a session over an already connected transport.
    ///
    /// Spawns the reader thread and, unless disabled, runs the bootstrap
    /// queries before returning.  A failed bootstrap query is logged and
    /// leaves its field at the empty value.
    pub fn start(transport: T, config: SessionConfig) -> Self {
        let shared = Arc::new(Shared {
            transport,
            store: StateStore::new(),
            link: Mutex::new(Link {
                status: SessionState::Listening,
                pending: None,
            }),
        });

        let reader = {
            let shared = shared.clone();
            let (framing, max_frame_bytes) = (config.framing, config.max_frame_bytes);
            std::thread::spawn(move || run_reader(&shared, framing, max_frame_bytes))
        };
        info!("session listening");

        let session = Self {
            shared,
            config,
            query_lock: Mutex::new(()),
            reader: Mutex::new(Some(reader)),
        };
        if session.config.bootstrap {
            session.bootstrap();
        }
        session
    }

    fn bootstrap(&self) {
        for action in [GET_WORKSPACES, GET_ACTIVE_WINDOW] {
            if let Err(e) = self.query(action, Map::new()) {
                warn!("bootstrap query {} failed: {}", action, e);
            }
        }
        debug!("bootstrap finished at version {}", self.version());
    }

    /// Send `action` with `params` and block until its reply arrives.
    pub fn query(&self, action: &str, params: Map<String, Value>) -> Result<Reply, RequestError> {
        self.request(&Request::with_params(action, params))
    }

    /// Send a prepared [`Request`] and block until its reply arrives.
    ///
    /// Concurrent callers are served one at a time.
    pub fn request(&self, request: &Request) -> Result<Reply, RequestError> {
        let _turn = self.query_lock.lock().unwrap_or_else(|e| e.into_inner());

        let (tx, rx) = mpsc::channel();
        {
            let mut link = self.shared.link();
            if link.status != SessionState::Listening {
                return Err(RequestError::Closed);
            }
            link.pending = Some(tx);
        }

        debug!("-> {} {:?}", request.action(), request.params());
        let frame = self.config.framing.frame(codec::encode(request));
        if let Err(e) = self.shared.transport.send(&frame) {
            self.shared.link().pending = None;
            return Err(RequestError::Send(e.to_string()));
        }

        match self.config.query_timeout() {
            Some(deadline) => match rx.recv_timeout(deadline) {
                Ok(outcome) => outcome,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    // A late reply will still be cached, just not returned.
                    self.shared.link().pending = None;
                    Err(RequestError::Timeout(deadline))
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => Err(RequestError::Disconnected),
            },
            None => rx.recv().unwrap_or(Err(RequestError::Disconnected)),
        }
    }

    /// Snapshot of the mirrored state.  Never blocks on I/O.
    pub fn current_state(&self) -> CachedState {
        self.shared.store.snapshot()
    }

    /// Stream of future values of `field`.
    pub fn on_change(&self, field: Field) -> Subscription {
        self.shared.store.subscribe(field)
    }

    /// Number of field writes applied since the session started.
    pub fn version(&self) -> u64 {
        self.shared.store.version()
    }

    pub fn status(&self) -> SessionState {
        self.shared.link().status
    }

    /// Shut the transport down and wait for the reader to finish.
    ///
    /// A query still waiting fails with [`RequestError::Closed`].
    /// Calling `close` more than once is harmless.
    pub fn close(&self) {
        let pending = {
            let mut link = self.shared.link();
            link.status = SessionState::Closed;
            link.pending.take()
        };
        if let Some(slot) = pending {
            hand_over(slot, Err(RequestError::Closed));
        }

        self.shared.transport.close();
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("reader thread panicked");
            }
        }
        self.shared.store.close();
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}

//  Tests
