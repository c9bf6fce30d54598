//! Wire envelope encoding, stream framing, and generic message decoding.
//!
//! # Wire format
//!
//! Requests are JSON objects tagged by `action`:
//!
//! ```json
//! {"action":"get_workspaces"}
//! {"action":"get_active_window"}
//! ```
//!
//! Inbound frames are either replies, carrying one or more of the known
//! reply keys, or events, tagged by `event`:
//!
//! ```json
//! {"workspaces":[{"id":1},{"id":2}]}
//! {"active_window":{}}
//! {"event":"workspaces_changed","workspaces":[{"id":1}]}
//! {"event":"workspace_activated","workspace":{"id":3}}
//! ```
//!
//! Records (workspaces, windows) are passed through untouched; only the
//! envelope is interpreted here.

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An opaque record as provided by the peer: field name to value.
pub type Record = Map<String, Value>;

/// A workspace record.  Identity is peer-defined (typically an `id` field).
pub type Workspace = Record;

/// A window record.  Empty when no window is focused.
pub type Window = Record;

/// Action that asks for the full workspace list.
pub const GET_WORKSPACES: &str = "get_workspaces";
/// Action that asks for the focused window.
pub const GET_ACTIVE_WINDOW: &str = "get_active_window";

const ACTION_KEY: &str = "action";
const EVENT_KEY: &str = "event";
const WORKSPACES_KEY: &str = "workspaces";
const ACTIVE_WORKSPACE_KEY: &str = "active_workspace";
const ACTIVE_WINDOW_KEY: &str = "active_window";

const REPLY_KEYS: [&str; 3] = [WORKSPACES_KEY, ACTIVE_WORKSPACE_KEY, ACTIVE_WINDOW_KEY];

/// Error produced when an inbound frame cannot be decoded.
///
/// Decode errors are never fatal to a session: the offending frame is
/// logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("event tag is not a string: {0}")]
    EventTag(Value),
    #[error("field `{field}` has unexpected shape: {value}")]
    Shape { field: String, value: Value },
    #[error("frame exceeds {limit} bytes")]
    Oversized { limit: usize },
}

//  Requests

/// An outbound command, identified by its `action` tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    action: String,
    params: Map<String, Value>,
}

impl Request {
    /// A request with no parameters.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Map::new(),
        }
    }

    /// A request carrying `params` alongside the action tag.
    pub fn with_params(action: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            params,
        }
    }

    /// Add a single parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }
}

/// Serialize a request into its wire envelope (without framing).
///
/// The action tag always wins over a parameter named `action`.
pub fn encode(request: &Request) -> Vec<u8> {
    let mut object = request.params.clone();
    object.insert(ACTION_KEY.into(), Value::String(request.action.clone()));
    Value::Object(object).to_string().into_bytes()
}

//  Inbound messages

/// A reply to an explicit request.  Each field is `Some` when the
/// corresponding key was present in the frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub workspaces: Option<Vec<Workspace>>,
    pub active_workspace: Option<Workspace>,
    pub active_window: Option<Window>,
}

/// A spontaneous message pushed by the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The `event` tag, e.g. `"workspaces_changed"`.
    pub kind: String,
    /// Every other key of the frame.
    pub payload: Record,
}

impl Event {
    pub fn new(kind: impl Into<String>, payload: Record) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Read `key` from the payload as a single record.
    ///
    /// Returns `Ok(None)` when the key is absent.
    pub fn record(&self, key: &str) -> Result<Option<Record>, DecodeError> {
        self.payload
            .get(key)
            .map(|value| record_from_value(key, value.clone()))
            .transpose()
    }

    /// Read `key` from the payload as an ordered list of records.
    pub fn records(&self, key: &str) -> Result<Option<Vec<Record>>, DecodeError> {
        self.payload
            .get(key)
            .map(|value| records_from_value(key, value.clone()))
            .transpose()
    }
}

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Reply(Reply),
    Event(Event),
    /// Valid JSON that is neither a reply nor an event.  Ignored.
    Unknown,
}

/// Decode a single frame.
///
/// The `event` key is checked before the reply keys, since event payloads
/// may themselves carry a `workspaces` key.
pub fn decode(bytes: &[u8]) -> Result<DecodedMessage, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let mut object = match value {
        Value::Object(object) => object,
        _ => return Ok(DecodedMessage::Unknown),
    };

    if let Some(tag) = object.remove(EVENT_KEY) {
        return match tag {
            Value::String(kind) => Ok(DecodedMessage::Event(Event {
                kind,
                payload: object,
            })),
            other => Err(DecodeError::EventTag(other)),
        };
    }

    if !REPLY_KEYS.iter().any(|key| object.contains_key(*key)) {
        return Ok(DecodedMessage::Unknown);
    }

    let reply = Reply {
        workspaces: object
            .remove(WORKSPACES_KEY)
            .map(|v| records_from_value(WORKSPACES_KEY, v))
            .transpose()?,
        active_workspace: object
            .remove(ACTIVE_WORKSPACE_KEY)
            .map(|v| record_from_value(ACTIVE_WORKSPACE_KEY, v))
            .transpose()?,
        active_window: object
            .remove(ACTIVE_WINDOW_KEY)
            .map(|v| record_from_value(ACTIVE_WINDOW_KEY, v))
            .transpose()?,
    };
    Ok(DecodedMessage::Reply(reply))
}

/// Interpret `value` as a record.  `null` reads as the empty record.
fn record_from_value(field: &str, value: Value) -> Result<Record, DecodeError> {
    match value {
        Value::Object(record) => Ok(record),
        Value::Null => Ok(Record::new()),
        other => Err(DecodeError::Shape {
            field: field.to_string(),
            value: other,
        }),
    }
}

/// Interpret `value` as an ordered list of records.  Order is preserved.
fn records_from_value(field: &str, value: Value) -> Result<Vec<Record>, DecodeError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| record_from_value(field, item))
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(DecodeError::Shape {
            field: field.to_string(),
            value: other,
        }),
    }
}

//  Framing

/// Default upper bound on a single inbound frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 20;

/// How logical messages are delimited on the byte stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// A stream of self-delimiting JSON values.  Values may be separated
    /// by newlines, run together, or split across reads; the
    /// [`FrameDecoder`] finds the boundaries.  Outbound frames get a
    /// trailing `\n`.
    #[default]
    #[serde(alias = "newline")]
    Json,
    /// Every `receive` yields exactly one message; nothing is appended on
    /// send.  Only safe on channels that never split or coalesce writes.
    Chunk,
}

impl Framing {
    /// Wrap an encoded payload for the wire.
    pub fn frame(self, mut payload: Vec<u8>) -> Vec<u8> {
        if self == Framing::Json {
            payload.push(b'\n');
        }
        payload
    }
}

/// Reassembles frames from the chunks a transport hands out.
///
/// A frame that cannot be delimited (a syntax error, or a value growing
/// past the size limit) comes out as an `Err` so the caller can log it and
/// carry on.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    max_frame_bytes: usize,
    buffer: Vec<u8>,
    /// Set after an oversized frame: drop input up to the next newline.
    skipping: bool,
}

impl FrameDecoder {
    pub fn new(framing: Framing, max_frame_bytes: usize) -> Self {
        Self {
            framing,
            max_frame_bytes: max_frame_bytes.max(1),
            buffer: Vec::new(),
            skipping: false,
        }
    }

    /// Feed one received chunk and return every frame it completed.
    ///
    /// Blank input is skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Vec<u8>, DecodeError>> {
        match self.framing {
            Framing::Chunk => {
                if is_blank(chunk) {
                    Vec::new()
                } else if chunk.len() > self.max_frame_bytes {
                    vec![Err(DecodeError::Oversized {
                        limit: self.max_frame_bytes,
                    })]
                } else {
                    vec![Ok(chunk.to_vec())]
                }
            }
            Framing::Json => {
                let mut chunk = chunk;
                if self.skipping {
                    match chunk.iter().position(|b| *b == b'\n') {
                        Some(pos) => {
                            self.skipping = false;
                            chunk = &chunk[pos + 1..];
                        }
                        None => return Vec::new(),
                    }
                }
                self.buffer.extend_from_slice(chunk);
                self.split_values()
            }
        }
    }

    fn split_values(&mut self) -> Vec<Result<Vec<u8>, DecodeError>> {
        let mut frames = Vec::new();
        loop {
            let mut values =
                serde_json::Deserializer::from_slice(&self.buffer).into_iter::<IgnoredAny>();
            match values.next() {
                None => {
                    // Only whitespace left.
                    self.buffer.clear();
                    break;
                }
                Some(Ok(_)) => {
                    let end = values.byte_offset();
                    let frame: Vec<u8> = self.buffer.drain(..end).collect();
                    frames.push(Ok(frame));
                }
                Some(Err(e)) if e.is_eof() => {
                    if self.buffer.len() > self.max_frame_bytes {
                        // Discard what we have and everything up to the next newline.
                        self.buffer.clear();
                        self.skipping = true;
                        frames.push(Err(DecodeError::Oversized {
                            limit: self.max_frame_bytes,
                        }));
                    }
                    break;
                }
                Some(Err(e)) => {
                    // Resynchronise after the next newline, or start afresh.
                    match self.buffer.iter().position(|b| *b == b'\n') {
                        Some(pos) => {
                            self.buffer.drain(..=pos);
                        }
                        None => self.buffer.clear(),
                    }
                    frames.push(Err(DecodeError::Malformed(e)));
                }
            }
        }
        frames
    }

    /// Flush an unterminated trailing frame at end of stream.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buffer);
        if is_blank(&rest) {
            None
        } else {
            Some(rest)
        }
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

//  Tests
