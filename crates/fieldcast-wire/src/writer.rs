use std::collections::VecDeque;
use std::io::{ErrorKind, Write};

use bytes::{Bytes, BytesMut};
use fieldcast_transport::IpcStream;

use crate::codec::{encode_envelope, WireConfig, HEADER_SIZE};
use crate::error::{Result, WireError};
use crate::reader::transport_to_wire_error;
use crate::tag::Tag;

/// Result of one non-blocking [`MessageWriter::flush_queued`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// Bytes handed to the stream during this pass.
    pub written: usize,
    /// Ids of messages whose last byte was written during this pass.
    pub completed: Vec<u64>,
}

/// Outcome of [`MessageWriter::withdraw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Withdraw {
    /// No queued message has this id. It was either written already or
    /// never enqueued.
    Absent,
    /// Removed before any of its bytes reached the stream.
    Withdrawn,
    /// Part of the message is on the stream; it must be finished to keep
    /// the stream framed.
    InProgress,
}

#[derive(Debug)]
struct Outgoing {
    id: u64,
    tag: Tag,
    bytes: Bytes,
    written: usize,
}

impl Outgoing {
    fn is_started(&self) -> bool {
        self.written > 0
    }

    fn is_done(&self) -> bool {
        self.written == self.bytes.len()
    }
}

/// Writes envelopes to any `Write` stream.
///
/// [`send`](Self::send) writes one envelope and blocks until it is out.
/// For non-blocking streams, [`enqueue`](Self::enqueue) places encoded
/// envelopes in an outbox which [`flush_queued`](Self::flush_queued) drains
/// as far as the stream accepts. Envelopes never interleave: once a
/// message has started it finishes before the next one begins.
pub struct MessageWriter<T> {
    inner: T,
    config: WireConfig,
    outbox: VecDeque<Outgoing>,
    peer_closed: bool,
}

impl<T: Write> MessageWriter<T> {
    /// Create a new writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new writer with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            config,
            outbox: VecDeque::new(),
            peer_closed: false,
        }
    }

    fn encode(&self, tag: Tag, payload: &[u8]) -> Result<Bytes> {
        if payload.len() > self.config.max_payload_size {
            return Err(WireError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        encode_envelope(tag, payload, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Encode and write one envelope (blocking).
    ///
    /// Only valid while the outbox is empty; queued messages would
    /// otherwise be overtaken.
    pub fn send(&mut self, tag: Tag, payload: &[u8]) -> Result<()> {
        if let Some(head) = self.outbox.front() {
            return Err(WireError::MidMessage {
                remaining: head.bytes.len() - head.written,
            });
        }

        let bytes = self.encode(tag, payload)?;
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) if is_peer_gone(&err) => {
                    self.peer_closed = true;
                    return Err(WireError::ConnectionClosed);
                }
                Err(err) => return Err(WireError::Io(err)),
            }
        }

        self.flush()
    }

    /// Append an envelope to the outbox.
    pub fn enqueue(&mut self, id: u64, tag: Tag, payload: &[u8]) -> Result<()> {
        let bytes = self.encode(tag, payload)?;
        self.outbox.push_back(Outgoing {
            id,
            tag,
            bytes,
            written: 0,
        });
        Ok(())
    }

    /// Place an envelope ahead of every message that has not started.
    ///
    /// A partially written head stays first.
    pub fn enqueue_urgent(&mut self, id: u64, tag: Tag, payload: &[u8]) -> Result<()> {
        let bytes = self.encode(tag, payload)?;
        let at = match self.outbox.front() {
            Some(head) if head.is_started() => 1,
            _ => 0,
        };
        self.outbox.insert(
            at,
            Outgoing {
                id,
                tag,
                bytes,
                written: 0,
            },
        );
        Ok(())
    }

    /// Write as much of the outbox as the stream accepts without blocking.
    ///
    /// A broken pipe, reset or disconnected stream marks the peer closed
    /// and ends the pass without error; nothing further will be written.
    pub fn flush_queued(&mut self) -> Result<Progress> {
        let mut progress = Progress::default();
        if self.peer_closed {
            return Ok(progress);
        }

        while let Some(head) = self.outbox.front_mut() {
            match self.inner.write(&head.bytes[head.written..]) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(n) => {
                    head.written += n;
                    progress.written += n;
                    if head.is_done() {
                        tracing::trace!(id = head.id, tag = head.tag, "message written");
                        progress.completed.push(head.id);
                        self.outbox.pop_front();
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if is_peer_gone(&err) => {
                    tracing::debug!(error = %err, "peer closed while writing");
                    self.peer_closed = true;
                    break;
                }
                Err(err) => return Err(WireError::Io(err)),
            }
        }

        Ok(progress)
    }

    /// Remove a queued message if none of it has been written.
    ///
    /// Once the peer has closed, nothing more can reach it, so partially
    /// written messages are removed too.
    pub fn withdraw(&mut self, id: u64) -> Withdraw {
        let Some(pos) = self.outbox.iter().position(|m| m.id == id) else {
            return Withdraw::Absent;
        };
        if self.outbox[pos].is_started() && !self.peer_closed {
            return Withdraw::InProgress;
        }
        self.outbox.remove(pos);
        Withdraw::Withdrawn
    }

    /// Whether a message with this id is still in the outbox.
    pub fn is_queued(&self, id: u64) -> bool {
        self.outbox.iter().any(|m| m.id == id)
    }

    /// Whether a queued message has had some of its bytes written.
    pub fn is_started(&self, id: u64) -> bool {
        self.outbox.iter().any(|m| m.id == id && m.is_started())
    }

    /// Number of messages in the outbox.
    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    /// Bytes in the outbox not yet written.
    pub fn pending_bytes(&self) -> usize {
        self.outbox.iter().map(|m| m.bytes.len() - m.written).sum()
    }

    /// The outbox has bytes waiting and the peer can still take them.
    pub fn wants_write(&self) -> bool {
        !self.peer_closed && !self.outbox.is_empty()
    }

    /// A write failed because the peer is gone.
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(WireError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current writer configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

impl MessageWriter<IpcStream> {
    /// Create a writer for `IpcStream` and apply write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: WireConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_wire_error)?;
        Ok(Self::with_config(inner, config))
    }
}

fn is_peer_gone(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::decode_envelope;
    use crate::tag::{IMAGE, QUIT};

    fn decode_all(bytes: &[u8]) -> Vec<(Tag, Vec<u8>)> {
        let mut wire = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Some(env) = decode_envelope(&mut wire, usize::MAX).unwrap() {
            out.push((env.tag, env.payload.to_vec()));
        }
        assert!(wire.is_empty(), "trailing bytes on the wire");
        out
    }

    #[test]
    fn send_writes_single_envelope() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(IMAGE, b"hello").unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(decode_all(&wire), vec![(IMAGE, b"hello".to_vec())]);
    }

    #[test]
    fn payload_too_large_rejected() {
        let cfg = WireConfig {
            max_payload_size: 4,
            ..WireConfig::default()
        };
        let mut writer = MessageWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        assert!(matches!(
            writer.send(IMAGE, b"oversized").unwrap_err(),
            WireError::PayloadTooLarge { .. }
        ));
        assert!(matches!(
            writer.enqueue(1, IMAGE, b"oversized").unwrap_err(),
            WireError::PayloadTooLarge { .. }
        ));
        assert_eq!(writer.queued(), 0);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = MessageWriter::new(ZeroWriter);
        let err = writer.send(IMAGE, b"x").unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[test]
    fn handles_interrupted_write() {
        let sink = InterruptedOnce {
            interrupted: false,
            data: Vec::new(),
        };
        let mut writer = MessageWriter::new(sink);
        writer.send(QUIT, &1i32.to_le_bytes()).unwrap();

        let inner = writer.into_inner();
        assert_eq!(decode_all(&inner.data).len(), 1);
    }

    #[test]
    fn outbox_drains_in_order_across_passes() {
        let mut writer = MessageWriter::new(Throttled::new(5));
        writer.enqueue(1, IMAGE, b"first-payload").unwrap();
        writer.enqueue(2, IMAGE, b"second").unwrap();

        let mut completed = Vec::new();
        let mut passes = 0;
        while writer.queued() > 0 {
            writer.get_mut().refill();
            let progress = writer.flush_queued().unwrap();
            assert!(progress.written <= 5);
            completed.extend(progress.completed);
            passes += 1;
            assert!(passes < 100);
        }

        assert_eq!(completed, vec![1, 2]);
        assert_eq!(
            decode_all(&writer.get_ref().data),
            vec![(IMAGE, b"first-payload".to_vec()), (IMAGE, b"second".to_vec())]
        );
    }

    #[test]
    fn urgent_message_skips_unstarted_queue() {
        let mut writer = MessageWriter::new(Throttled::new(0));
        writer.enqueue(1, IMAGE, b"data-one").unwrap();
        writer.enqueue(2, IMAGE, b"data-two").unwrap();
        writer.enqueue_urgent(3, QUIT, &1i32.to_le_bytes()).unwrap();

        writer.get_mut().budget = usize::MAX;
        writer.flush_queued().unwrap();

        let tags: Vec<Tag> = decode_all(&writer.get_ref().data)
            .into_iter()
            .map(|(tag, _)| tag)
            .collect();
        assert_eq!(tags, vec![QUIT, IMAGE, IMAGE]);
    }

    #[test]
    fn urgent_message_never_splits_started_head() {
        let mut writer = MessageWriter::new(Throttled::new(3));
        writer.enqueue(1, IMAGE, b"partially-written").unwrap();
        writer.enqueue(2, IMAGE, b"later").unwrap();

        writer.flush_queued().unwrap();
        assert!(writer.is_started(1));

        writer.enqueue_urgent(3, QUIT, &1i32.to_le_bytes()).unwrap();
        writer.get_mut().budget = usize::MAX;
        let progress = writer.flush_queued().unwrap();

        assert_eq!(progress.completed, vec![1, 3, 2]);
        let decoded = decode_all(&writer.get_ref().data);
        assert_eq!(decoded[0], (IMAGE, b"partially-written".to_vec()));
        assert_eq!(decoded[1].0, QUIT);
        assert_eq!(decoded[2], (IMAGE, b"later".to_vec()));
    }

    #[test]
    fn withdraw_respects_started_messages() {
        let mut writer = MessageWriter::new(Throttled::new(4));
        writer.enqueue(1, IMAGE, b"head-message").unwrap();
        writer.enqueue(2, IMAGE, b"tail").unwrap();
        writer.flush_queued().unwrap();

        assert_eq!(writer.withdraw(1), Withdraw::InProgress);
        assert_eq!(writer.withdraw(2), Withdraw::Withdrawn);
        assert_eq!(writer.withdraw(2), Withdraw::Absent);
        assert_eq!(writer.withdraw(99), Withdraw::Absent);
        assert!(writer.is_queued(1));
        assert!(!writer.is_queued(2));
    }

    #[test]
    fn broken_pipe_marks_peer_closed() {
        let mut writer = MessageWriter::new(BrokenPipe);
        writer.enqueue(1, IMAGE, b"never-arrives").unwrap();

        let progress = writer.flush_queued().unwrap();
        assert_eq!(progress, Progress::default());
        assert!(writer.peer_closed());
        assert!(!writer.wants_write());

        // Nothing can reach a closed peer, so the message is withdrawable.
        assert_eq!(writer.withdraw(1), Withdraw::Withdrawn);
    }

    #[test]
    fn partially_written_message_withdrawable_after_peer_closes() {
        let mut writer = MessageWriter::new(Throttled::new(4));
        writer.enqueue(1, IMAGE, b"head-message").unwrap();
        writer.flush_queued().unwrap();
        assert_eq!(writer.withdraw(1), Withdraw::InProgress);

        writer.get_mut().closed = true;
        writer.flush_queued().unwrap();
        assert!(writer.peer_closed());
        assert_eq!(writer.withdraw(1), Withdraw::Withdrawn);
    }

    #[test]
    fn blocking_send_refused_with_queued_messages() {
        let mut writer = MessageWriter::new(Throttled::new(0));
        writer.enqueue(1, IMAGE, b"queued").unwrap();
        assert!(matches!(
            writer.send(QUIT, b"x").unwrap_err(),
            WireError::MidMessage { .. }
        ));
    }

    #[test]
    fn pending_bytes_track_outbox() {
        let mut writer = MessageWriter::new(Throttled::new(6));
        writer.enqueue(1, IMAGE, b"abcd").unwrap();
        assert_eq!(writer.pending_bytes(), HEADER_SIZE + 4);
        writer.flush_queued().unwrap();
        assert_eq!(writer.pending_bytes(), HEADER_SIZE + 4 - 6);
    }

    #[test]
    #[cfg(unix)]
    fn applies_write_timeout_for_ipc_stream() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let cfg = WireConfig {
            write_timeout: Some(std::time::Duration::from_millis(10)),
            ..WireConfig::default()
        };

        let writer = MessageWriter::with_config_ipc(IpcStream::from(left), cfg);
        assert!(writer.is_ok());
    }

    /// Accepts at most `budget` bytes between refills, then would block.
    struct Throttled {
        budget: usize,
        per_pass: usize,
        closed: bool,
        data: Vec<u8>,
    }

    impl Throttled {
        fn new(per_pass: usize) -> Self {
            Self {
                budget: per_pass,
                per_pass,
                closed: false,
                data: Vec::new(),
            }
        }

        fn refill(&mut self) {
            self.budget = self.per_pass;
        }
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.closed {
                return Err(std::io::Error::from(ErrorKind::BrokenPipe));
            }
            if self.budget == 0 {
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
