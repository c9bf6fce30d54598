//! Unix-socket [`Transport`] implementation.
//!
//! Opens one long-lived stream connection to the compositor's IPC socket.
//! Reads and writes go through `&UnixStream`, so a single background
//! reader and any number of writers can share the connection without
//! cloning the file descriptor.

use crate::traits::{Received, Transport};
use log::{debug, info};
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

/// Default size of the buffer handed to each `read` call.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Errors produced by the Unix socket transport.
#[derive(Debug, thiserror::Error)]
pub enum UnixTransportError {
    #[error("endpoint not found: {}", .0.display())]
    EndpointNotFound(PathBuf),
    #[error("connect to {}: {source}", .path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write error: {0}")]
    Write(#[source] std::io::Error),
    #[error("read error: {0}")]
    Read(#[source] std::io::Error),
}

/// A [`Transport`] over a connected Unix stream socket.
#[derive(Debug)]
pub struct UnixSocketTransport {
    stream: UnixStream,
    path: PathBuf,
    read_buffer_size: usize,
}

impl UnixSocketTransport {
    /// Connect to the socket at `path`.
    ///
    /// Fails with [`UnixTransportError::EndpointNotFound`] before any
    /// connection attempt when nothing exists at `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, UnixTransportError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(UnixTransportError::EndpointNotFound(path));
        }
        let stream = UnixStream::connect(&path).map_err(|source| UnixTransportError::Connect {
            path: path.clone(),
            source,
        })?;
        info!("connected to {}", path.display());
        Ok(Self {
            stream,
            path,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        })
    }

    /// Override the per-read buffer size.  Zero is bumped to one byte.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// The filesystem path of the socket.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for UnixSocketTransport {
    type Error = UnixTransportError;

    fn send(&self, bytes: &[u8]) -> Result<(), Self::Error> {
        let mut stream = &self.stream;
        stream.write_all(bytes).map_err(UnixTransportError::Write)?;
        stream.flush().map_err(UnixTransportError::Write)
    }

    fn receive(&self) -> Result<Received, Self::Error> {
        let mut buf = vec![0u8; self.read_buffer_size];
        let mut stream = &self.stream;
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return Ok(Received::EndOfStream),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Received::Data(buf));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(UnixTransportError::Read(e)),
            }
        }
    }

    fn close(&self) {
        // Fails with NotConnected when the peer already hung up; nothing to do then.
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("shutdown {}: {}", self.path.display(), e);
        }
    }
}

//  Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixListener;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Monotonic counter to generate unique socket paths per test.
    static TEST_ID: AtomicU32 = AtomicU32::new(0);

    fn tmp_socket_path() -> PathBuf {
        let id = TEST_ID.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "wsmirror-transport-test-{}-{}.sock",
            std::process::id(),
            id
        ))
    }

    #[test]
    fn missing_endpoint_is_reported_before_connecting() {
        let path = tmp_socket_path();
        let err = UnixSocketTransport::connect(&path).unwrap_err();
        assert!(matches!(err, UnixTransportError::EndpointNotFound(p) if p == path));
    }

    #[test]
    fn refused_connection_is_connect_error() {
        // A plain file exists at the path but nobody listens on it.
        let path = tmp_socket_path();
        std::fs::write(&path, b"").unwrap();
        let err = UnixSocketTransport::connect(&path).unwrap_err();
        assert!(matches!(err, UnixTransportError::Connect { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn send_and_receive_over_socket() {
        let path = tmp_socket_path();
        let listener = UnixListener::bind(&path).unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut writer = stream;
            writer.write_all(b"{\"active_window\":{}}\n").unwrap();
            line
        });

        let transport = UnixSocketTransport::connect(&path).unwrap();
        assert_eq!(transport.path(), path.as_path());
        transport.send(b"{\"action\":\"get_active_window\"}\n").unwrap();
        let got = server.join().unwrap();
        assert_eq!(got, "{\"action\":\"get_active_window\"}\n");

        let mut collected = Vec::new();
        while !collected.ends_with(b"\n") {
            match transport.receive().unwrap() {
                Received::Data(chunk) => collected.extend(chunk),
                Received::EndOfStream => break,
            }
        }
        assert_eq!(collected, b"{\"active_window\":{}}\n".to_vec());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn peer_hangup_is_end_of_stream() {
        let path = tmp_socket_path();
        let listener = UnixListener::bind(&path).unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let transport = UnixSocketTransport::connect(&path).unwrap();
        server.join().unwrap();
        assert_eq!(transport.receive().unwrap(), Received::EndOfStream);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn close_unblocks_receive() {
        let path = tmp_socket_path();
        let listener = UnixListener::bind(&path).unwrap();
        // Keep the server side open so the reader really blocks.
        let server = std::thread::spawn(move || listener.accept().unwrap().0);

        let transport = std::sync::Arc::new(UnixSocketTransport::connect(&path).unwrap());
        let _peer = server.join().unwrap();

        let reader = {
            let transport = transport.clone();
            std::thread::spawn(move || transport.receive())
        };
        std::thread::sleep(std::time::Duration::from_millis(100));
        transport.close();

        let outcome = reader.join().unwrap();
        assert!(matches!(outcome, Ok(Received::EndOfStream) | Err(_)));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn read_buffer_size_bounds_chunks() {
        let path = tmp_socket_path();
        let listener = UnixListener::bind(&path).unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"0123456789").unwrap();
            stream
        });

        let transport = UnixSocketTransport::connect(&path)
            .unwrap()
            .with_read_buffer_size(4);
        let _peer = server.join().unwrap();
        match transport.receive().unwrap() {
            Received::Data(chunk) => assert!(!chunk.is_empty() && chunk.len() <= 4),
            Received::EndOfStream => panic!("unexpected end of stream"),
        }

        let _ = std::fs::remove_file(&path);
    }
}
