use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use fieldcast_transport::IpcStream;

use crate::codec::{decode_envelope, decode_header, Envelope, Header, WireConfig};
use crate::error::{WireError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;
const READ_CHUNK_SIZE: usize = 64 * 1024;
/// Upper bound on bytes pulled in by one [`MessageReader::fill`] call so a
/// fast sender cannot stall the caller's tick.
const MAX_FILL_BYTES: usize = 4 * 1024 * 1024;

/// A piece of the incoming stream, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// A new message starts. Its body follows as zero or more `Body` parts.
    Header(Header),
    /// The next chunk of the current message body.
    Body(Bytes),
}

/// Outcome of a non-blocking [`MessageReader::fill`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fill {
    /// Bytes appended to the buffer.
    pub read: usize,
    /// The peer closed its end of the stream.
    pub eof: bool,
}

/// Reads envelopes from any `Read` stream.
///
/// Two modes are supported. [`read_envelope`](Self::read_envelope) blocks
/// until a whole envelope is buffered and is used before streaming starts.
/// [`fill`](Self::fill) plus [`next_part`](Self::next_part) decode
/// incrementally from a non-blocking stream, so a header is visible before
/// its body has arrived.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    config: WireConfig,
    remaining: usize,
    eof: bool,
}

impl<T: Read> MessageReader<T> {
    /// Create a new reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new reader with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            remaining: 0,
            eof: false,
        }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// Returns `Err(WireError::ConnectionClosed)` when EOF is reached.
    pub fn read_envelope(&mut self) -> Result<Envelope> {
        if self.remaining > 0 {
            return Err(WireError::MidMessage {
                remaining: self.remaining,
            });
        }

        loop {
            if let Some(envelope) = decode_envelope(&mut self.buf, self.config.max_payload_size)? {
                return Ok(envelope);
            }

            if self.eof {
                return Err(WireError::ConnectionClosed);
            }

            let mut chunk = [0u8; 8 * 1024];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(WireError::Io(err)),
            };

            if read == 0 {
                self.eof = true;
                return Err(WireError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Pull whatever the stream has ready into the buffer without blocking.
    ///
    /// The inner stream must be in non-blocking mode. A reset connection is
    /// reported as EOF: either way the peer is gone and nothing more will
    /// arrive.
    pub fn fill(&mut self) -> Result<Fill> {
        let mut fill = Fill {
            read: 0,
            eof: self.eof,
        };
        if self.eof {
            return Ok(fill);
        }

        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        while fill.read < MAX_FILL_BYTES {
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    fill.eof = true;
                    break;
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    fill.read += n;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::ConnectionReset => {
                    self.eof = true;
                    fill.eof = true;
                    break;
                }
                Err(err) => return Err(WireError::Io(err)),
            }
        }

        Ok(fill)
    }

    /// Decode the next part from already-buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn next_part(&mut self) -> Result<Option<Part>> {
        if self.remaining > 0 {
            if self.buf.is_empty() {
                return Ok(None);
            }
            let n = self.remaining.min(self.buf.len());
            self.remaining -= n;
            return Ok(Some(Part::Body(self.buf.split_to(n).freeze())));
        }

        match decode_header(&mut self.buf, self.config.max_payload_size)? {
            Some(header) => {
                self.remaining = header.len;
                Ok(Some(Part::Header(header)))
            }
            None => Ok(None),
        }
    }

    /// The peer closed its end and every byte it sent has been read.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Body bytes of the current message not yet returned by `next_part`.
    pub fn remaining_body(&self) -> usize {
        self.remaining
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current reader configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

impl MessageReader<IpcStream> {
    /// Create a reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: WireConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_wire_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_wire_error(err: fieldcast_transport::TransportError) -> WireError {
    match err {
        fieldcast_transport::TransportError::Io(io)
        | fieldcast_transport::TransportError::Accept(io)
        | fieldcast_transport::TransportError::Poll(io) => WireError::Io(io),
        fieldcast_transport::TransportError::Bind { source, .. }
        | fieldcast_transport::TransportError::Connect { source, .. } => WireError::Io(source),
        other => WireError::Io(std::io::Error::other(other.to_string())),
    }
}
