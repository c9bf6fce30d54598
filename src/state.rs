//! Cached mirror of the compositor's workspace and window state.
//!
//! [`StateStore`] holds the last-known value of every mirrored field and
//! fans updates out to per-field [`Subscription`]s.  Every write replaces a
//! field whole; readers only ever see complete values.
//!
//! | source                          | effect                                   |
//! |---------------------------------|------------------------------------------|
//! | reply key `workspaces`          | replace `workspaces`                     |
//! | reply key `active_workspace`    | replace `active_workspace`               |
//! | reply key `active_window`       | replace `active_window`                  |
//! | event `workspaces_changed`      | replace `workspaces` with `.workspaces`  |
//! | event `workspace_activated`     | replace `active_workspace` with `.workspace` |

use crate::ipc::codec::{Event, Reply, Window, Workspace};
use log::{debug, warn};
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Event kind that carries the full workspace list.
pub const WORKSPACES_CHANGED: &str = "workspaces_changed";
/// Event kind that carries the newly active workspace.
pub const WORKSPACE_ACTIVATED: &str = "workspace_activated";

/// A consistent point-in-time copy of the mirrored state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedState {
    /// Workspaces in the order the peer reported them.
    pub workspaces: Vec<Workspace>,
    /// The active workspace, or the empty record.
    pub active_workspace: Workspace,
    /// The focused window, or the empty record.
    pub active_window: Window,
}

/// Names one mirrored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Workspaces,
    ActiveWorkspace,
    ActiveWindow,
}

/// A notification delivered to a [`Subscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Workspaces(Vec<Workspace>),
    ActiveWorkspace(Workspace),
    ActiveWindow(Window),
    /// The session ended.  Nothing follows.
    Closed,
}

impl Change {
    /// The field this change belongs to, or `None` for [`Change::Closed`].
    pub fn field(&self) -> Option<Field> {
        match self {
            Change::Workspaces(_) => Some(Field::Workspaces),
            Change::ActiveWorkspace(_) => Some(Field::ActiveWorkspace),
            Change::ActiveWindow(_) => Some(Field::ActiveWindow),
            Change::Closed => None,
        }
    }
}

struct Subscriber {
    field: Field,
    tx: mpsc::Sender<Change>,
}

struct Inner {
    state: CachedState,
    version: u64,
    subscribers: Vec<Subscriber>,
    closed: bool,
}

/// Thread-safe holder of the [`CachedState`].
///
/// Writes come from a single session reader; everybody else reads
/// snapshots or subscribes.  Notifications are sent while the lock is held,
/// so every subscriber sees updates in the order they were applied.
pub struct StateStore {
    inner: Mutex<Inner>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// An empty store: no workspaces, empty active workspace and window.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CachedState::default(),
                version: 0,
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Values are only ever replaced whole, so a poisoned lock still
        // guards a consistent state.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply every reply key that is present.  Keys are independent.
    pub fn apply_reply(&self, reply: &Reply) {
        let mut inner = self.lock();
        if let Some(workspaces) = &reply.workspaces {
            inner.write(Change::Workspaces(workspaces.clone()));
        }
        if let Some(workspace) = &reply.active_workspace {
            inner.write(Change::ActiveWorkspace(workspace.clone()));
        }
        if let Some(window) = &reply.active_window {
            inner.write(Change::ActiveWindow(window.clone()));
        }
    }

    /// Apply an event.  Unknown kinds are ignored, as are known kinds
    /// whose payload is missing or malformed.
    pub fn apply_event(&self, event: &Event) {
        let change = match event.kind.as_str() {
            WORKSPACES_CHANGED => match event.records("workspaces") {
                Ok(Some(workspaces)) => Change::Workspaces(workspaces),
                Ok(None) => {
                    warn!("{} without a workspaces field, ignoring", event.kind);
                    return;
                }
                Err(e) => {
                    warn!("bad {} payload: {}", event.kind, e);
                    return;
                }
            },
            WORKSPACE_ACTIVATED => match event.record("workspace") {
                Ok(Some(workspace)) => Change::ActiveWorkspace(workspace),
                Ok(None) => {
                    warn!("{} without a workspace field, ignoring", event.kind);
                    return;
                }
                Err(e) => {
                    warn!("bad {} payload: {}", event.kind, e);
                    return;
                }
            },
            other => {
                debug!("ignoring event {:?}", other);
                return;
            }
        };
        self.lock().write(change);
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> CachedState {
        self.lock().state.clone()
    }

    /// Number of field writes applied so far.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Subscribe to every future write of `field`.
    ///
    /// Each call returns an independent stream.  After [`close`](Self::close)
    /// the stream yields [`Change::Closed`] immediately.
    pub fn subscribe(&self, field: Field) -> Subscription {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.lock();
        if inner.closed {
            let _ = tx.send(Change::Closed);
        } else {
            inner.subscribers.push(Subscriber { field, tx });
        }
        Subscription { rx, done: false }
    }

    /// Deliver the terminal notification and drop every subscriber.
    /// Cached values stay readable.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        for sub in inner.subscribers.drain(..) {
            let _ = sub.tx.send(Change::Closed);
        }
    }
}

impl Inner {
    fn write(&mut self, change: Change) {
        let Some(field) = change.field() else {
            return;
        };
        match &change {
            Change::Workspaces(w) => self.state.workspaces = w.clone(),
            Change::ActiveWorkspace(w) => self.state.active_workspace = w.clone(),
            Change::ActiveWindow(w) => self.state.active_window = w.clone(),
            Change::Closed => {}
        }
        self.version += 1;
        // Drop subscribers whose receiving end is gone.
        self.subscribers
            .retain(|sub| sub.field != field || sub.tx.send(change.clone()).is_ok());
    }
}

/// A stream of [`Change`]s for one field.
///
/// Iterating blocks for the next change and ends after [`Change::Closed`],
/// which is always the last item yielded.
pub struct Subscription {
    rx: mpsc::Receiver<Change>,
    done: bool,
}

impl Subscription {
    /// Block until the next change.  `None` once the stream has finished.
    pub fn recv(&mut self) -> Option<Change> {
        if self.done {
            return None;
        }
        let change = self.rx.recv().unwrap_or(Change::Closed);
        self.finish_on_close(change)
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Change> {
        if self.done {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(change) => self.finish_on_close(change),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => self.finish_on_close(Change::Closed),
        }
    }

    /// Every change already delivered, without blocking.
    pub fn drain(&mut self) -> Vec<Change> {
        let mut changes = Vec::new();
        while !self.done {
            match self.rx.try_recv() {
                Ok(change) => changes.extend(self.finish_on_close(change)),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    changes.extend(self.finish_on_close(Change::Closed))
                }
            }
        }
        changes
    }

    fn finish_on_close(&mut self, change: Change) -> Option<Change> {
        if change == Change::Closed {
            self.done = true;
        }
        Some(change)
    }
}

impl Iterator for Subscription {
    type Item = Change;

    fn next(&mut self) -> Option<Change> {
        self.recv()
    }
}

//  Tests
