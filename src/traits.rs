//! Core traits that decouple the session from any specific byte transport.
//!
//! The [`Session`](crate::session::Session) only depends on [`Transport`].
//! The Unix-socket implementation lives in
//! [`ipc::transport`](crate::ipc::transport); tests drive sessions through
//! in-memory doubles.

/// Outcome of a single blocking [`Transport::receive`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The next chunk of bytes, exactly as the channel delivered it.
    ///
    /// A chunk may hold part of a message or several messages; splitting
    /// is the job of the [`FrameDecoder`](crate::ipc::codec::FrameDecoder).
    Data(Vec<u8>),
    /// The peer closed the connection.  No further data will arrive.
    EndOfStream,
}

/// Abstraction over a bidirectional byte-stream connection to the
/// compositor's IPC endpoint.
///
/// The session shares one transport between a single background reader
/// and any number of querying threads, so every method takes `&self`.
///
/// # Contract
///
/// * [`receive`](Transport::receive) **blocks** until data arrives or the
///   stream ends.  Only one thread ever calls it.
/// * [`send`](Transport::send) writes the whole buffer or fails.
/// * [`close`](Transport::close) must unblock a concurrent `receive`, which
///   then returns [`Received::EndOfStream`] or an error.
pub trait Transport: Send + Sync + 'static {
    /// The error type produced by this transport.
    type Error: std::error::Error + Send + 'static;

    /// Write `bytes` to the peer in full.
    fn send(&self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Block until the next chunk is available or the peer hangs up.
    fn receive(&self) -> Result<Received, Self::Error>;

    /// Shut the connection down in both directions.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    //  Mock Transport

    /// A test double that records sends and replays a fixed list of chunks.
    #[derive(Debug, Default)]
    struct MockTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        inbound: Mutex<VecDeque<Vec<u8>>>,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("mock error")]
    struct MockError;

    impl Transport for MockTransport {
        type Error = MockError;

        fn send(&self, bytes: &[u8]) -> Result<(), MockError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn receive(&self) -> Result<Received, MockError> {
            Ok(match self.inbound.lock().unwrap().pop_front() {
                Some(chunk) => Received::Data(chunk),
                None => Received::EndOfStream,
            })
        }

        fn close(&self) {
            self.inbound.lock().unwrap().clear();
        }
    }

    #[test]
    fn mock_transport_records_sends() {
        let t = MockTransport::default();
        t.send(b"hello").unwrap();
        assert_eq!(t.sent.lock().unwrap().len(), 1);
        assert_eq!(t.sent.lock().unwrap()[0], b"hello".to_vec());
    }

    #[test]
    fn mock_transport_ends_after_script() {
        let t = MockTransport::default();
        t.inbound.lock().unwrap().push_back(b"a".to_vec());
        assert_eq!(t.receive().unwrap(), Received::Data(b"a".to_vec()));
        assert_eq!(t.receive().unwrap(), Received::EndOfStream);
    }

    #[test]
    fn close_drops_pending_chunks() {
        let t = MockTransport::default();
        t.inbound.lock().unwrap().push_back(b"a".to_vec());
        t.close();
        assert_eq!(t.receive().unwrap(), Received::EndOfStream);
    }
}
