//! Non-blocking point-to-point endpoint over one stream.
//!
//! Sends and receives are posted and return move-only request handles.
//! Progress happens whenever the endpoint is touched: queued bytes are
//! written and arriving bytes are matched against posted receives. Calls
//! that must block wait on socket readiness, never on a timer.

use bytes::Bytes;
use fieldcast_transport::{Interest, IpcStream};
use fieldcast_wire::{MessageReader, MessageWriter, Tag, Withdraw, DEFAULT_MAX_PAYLOAD};

use crate::error::{ChannelError, Result};
use crate::inbox::{Inbox, RecvState, Status, Withdrawn};

/// A posted send. Dropping it does not cancel the send.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a posted send must be tested, waited on or cancelled"]
pub struct SendRequest {
    id: u64,
    tag: Tag,
}

impl SendRequest {
    pub fn tag(&self) -> Tag {
        self.tag
    }
}

/// A posted receive. Dropping it does not cancel the receive.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a posted receive must be tested, waited on or cancelled"]
pub struct RecvRequest {
    id: u64,
    tag: Tag,
}

impl RecvRequest {
    pub fn tag(&self) -> Tag {
        self.tag
    }
}

/// Definitive result of cancelling a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The message never reached the stream.
    Cancelled,
    /// The message was fully written before the cancel took effect.
    Completed,
}

/// Definitive result of cancelling a receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvCancel {
    /// No data will be delivered for this request.
    Cancelled,
    /// The message had fully arrived; here it is.
    Completed(Bytes),
}

impl RecvCancel {
    pub fn outcome(&self) -> CancelOutcome {
        match self {
            RecvCancel::Cancelled => CancelOutcome::Cancelled,
            RecvCancel::Completed(_) => CancelOutcome::Completed,
        }
    }
}

/// One side of a connected stream.
pub struct Endpoint {
    reader: MessageReader<IpcStream>,
    writer: MessageWriter<IpcStream>,
    inbox: Inbox,
    next_id: u64,
}

impl Endpoint {
    /// Wrap a connected stream.
    pub fn from_stream(stream: IpcStream) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        Self::from_parts(
            MessageReader::new(reader_stream),
            MessageWriter::new(stream),
        )
    }

    /// Take over the reader and writer used for the handshake.
    ///
    /// The reader may already hold bytes that arrived behind the handshake
    /// reply, so it is reused rather than rebuilt.
    pub fn from_parts(
        mut reader: MessageReader<IpcStream>,
        mut writer: MessageWriter<IpcStream>,
    ) -> Result<Self> {
        // Shared by both clones of the descriptor.
        reader.get_ref().set_nonblocking(true)?;
        reader.set_max_payload_size(DEFAULT_MAX_PAYLOAD);
        writer.set_max_payload_size(DEFAULT_MAX_PAYLOAD);

        let mut endpoint = Self {
            reader,
            writer,
            inbox: Inbox::default(),
            next_id: 1,
        };
        endpoint.pump_read()?;
        Ok(endpoint)
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn pump_read(&mut self) -> Result<()> {
        self.reader.fill()?;
        while let Some(part) = self.reader.next_part()? {
            self.inbox.accept(part);
        }
        Ok(())
    }

    fn pump_write(&mut self) -> Result<()> {
        if self.writer.wants_write() {
            self.writer.flush_queued()?;
        }
        Ok(())
    }

    /// Make whatever progress is possible without blocking.
    pub fn progress(&mut self) -> Result<()> {
        self.pump_write()?;
        self.pump_read()
    }

    /// Block until the stream is readable or, when `want_write`, writable.
    /// Arriving bytes are absorbed either way.
    fn block(&mut self, want_write: bool) -> Result<()> {
        let want_read = !self.reader.is_eof();
        let interest = match (want_read, want_write) {
            (true, true) => Interest::Both,
            (true, false) => Interest::Readable,
            (false, true) => Interest::Writable,
            (false, false) => return Err(self.disconnected()),
        };
        self.reader.get_ref().poll_ready(interest, None)?;
        self.progress()
    }

    fn disconnected(&self) -> ChannelError {
        ChannelError::Disconnected("peer closed the stream".to_string())
    }

    /// The peer closed its end and everything it sent has been read.
    pub fn peer_eof(&self) -> bool {
        self.reader.is_eof()
    }

    /// A write failed because the peer is gone.
    pub fn peer_closed(&self) -> bool {
        self.writer.peer_closed()
    }

    // --- sends -----------------------------------------------------------

    /// Post a send. The payload is copied into the outbox.
    pub fn isend(&mut self, tag: Tag, payload: &[u8]) -> Result<SendRequest> {
        let id = self.next_id();
        self.writer.enqueue(id, tag, payload)?;
        self.pump_write()?;
        tracing::trace!(id, tag, len = payload.len(), "send posted");
        Ok(SendRequest { id, tag })
    }

    /// Non-blocking completion check. A completed request is cleared from
    /// the slot; an empty slot counts as complete.
    pub fn test_send(&mut self, slot: &mut Option<SendRequest>) -> Result<bool> {
        let Some(req) = slot.as_ref() else {
            return Ok(true);
        };
        self.progress()?;
        if !self.writer.is_queued(req.id) {
            *slot = None;
            return Ok(true);
        }
        if self.writer.peer_closed() {
            return Err(self.disconnected());
        }
        Ok(false)
    }

    /// Block until the send in `slot` completes.
    pub fn wait_send(&mut self, slot: &mut Option<SendRequest>) -> Result<()> {
        while !self.test_send(slot)? {
            self.block(true)?;
        }
        Ok(())
    }

    /// Cancel a posted send.
    ///
    /// A message that has started leaving cannot be recalled without
    /// corrupting the stream, so it is finished first and reported as
    /// completed, unless the peer is already gone.
    pub fn cancel_send(&mut self, req: SendRequest) -> Result<CancelOutcome> {
        let outcome = loop {
            match self.writer.withdraw(req.id) {
                Withdraw::Absent => break CancelOutcome::Completed,
                Withdraw::Withdrawn => break CancelOutcome::Cancelled,
                Withdraw::InProgress => {
                    self.pump_write()?;
                    if self.writer.is_queued(req.id) && !self.writer.peer_closed() {
                        self.block(true)?;
                    }
                }
            }
        };
        tracing::debug!(id = req.id, tag = req.tag, ?outcome, "send cancelled");
        Ok(outcome)
    }

    /// Send and return once the message is fully handed to the transport.
    ///
    /// The message goes ahead of every queued send that has not started.
    pub fn send_sync(&mut self, tag: Tag, payload: &[u8]) -> Result<()> {
        let id = self.next_id();
        self.writer.enqueue_urgent(id, tag, payload)?;
        loop {
            self.pump_write()?;
            if !self.writer.is_queued(id) {
                return Ok(());
            }
            if self.writer.peer_closed() {
                let _ = self.writer.withdraw(id);
                return Err(self.disconnected());
            }
            self.block(true)?;
        }
    }

    /// Messages still in the outbox.
    pub fn outstanding_sends(&self) -> usize {
        self.writer.queued()
    }

    // --- receives --------------------------------------------------------

    /// Post a receive for `tag`.
    pub fn irecv(&mut self, tag: Tag) -> Result<RecvRequest> {
        self.progress()?;
        let id = self.next_id();
        self.inbox.post(id, tag);
        tracing::trace!(id, tag, "receive posted");
        Ok(RecvRequest { id, tag })
    }

    /// Non-blocking completion check. On completion the payload is
    /// returned and the slot cleared.
    ///
    /// Fails with `Disconnected` once the peer has closed and neither this
    /// request nor any unclaimed message can still be delivered.
    pub fn test_recv(&mut self, slot: &mut Option<RecvRequest>) -> Result<Option<Bytes>> {
        let Some(id) = slot.as_ref().map(|req| req.id) else {
            return Ok(None);
        };
        self.progress()?;
        match self.inbox.poll(id) {
            RecvState::Complete(payload) => {
                *slot = None;
                Ok(Some(payload))
            }
            RecvState::Receiving if self.reader.is_eof() => Err(self.disconnected()),
            RecvState::Waiting if self.reader.is_eof() && !self.inbox.has_unclaimed() => {
                Err(self.disconnected())
            }
            RecvState::Waiting | RecvState::Receiving => Ok(None),
            RecvState::Unknown => {
                *slot = None;
                Err(ChannelError::Disconnected(format!(
                    "receive {id} is not posted"
                )))
            }
        }
    }

    /// Block until the receive in `slot` completes.
    pub fn wait_recv(&mut self, slot: &mut Option<RecvRequest>) -> Result<Bytes> {
        loop {
            if let Some(payload) = self.test_recv(slot)? {
                return Ok(payload);
            }
            if slot.is_none() {
                return Err(ChannelError::NotConnected);
            }
            if self.reader.is_eof() {
                // Waiting on a tag the peer will never send.
                return Err(self.disconnected());
            }
            let want_write = self.writer.wants_write();
            self.block(want_write)?;
        }
    }

    /// Cancel a posted receive. Never blocks.
    pub fn cancel_recv(&mut self, req: RecvRequest) -> Result<RecvCancel> {
        let outcome = match self.inbox.cancel(req.id) {
            Withdrawn::Unposted | Withdrawn::Discarding | Withdrawn::Unknown => RecvCancel::Cancelled,
            Withdrawn::Completed(payload) => RecvCancel::Completed(payload),
        };
        tracing::debug!(id = req.id, tag = req.tag, outcome = ?outcome.outcome(), "receive cancelled");
        Ok(outcome)
    }

    /// Blocking receive of the earliest message with `tag`.
    pub fn recv(&mut self, tag: Tag) -> Result<Bytes> {
        let mut slot = Some(self.irecv(tag)?);
        self.wait_recv(&mut slot)
    }

    /// Header of the earliest message nobody has claimed, if any.
    ///
    /// Fails with `Disconnected` once the peer has closed and nothing
    /// unclaimed remains.
    pub fn iprobe(&mut self, tag: Option<Tag>) -> Result<Option<Status>> {
        self.progress()?;
        match self.inbox.probe(tag) {
            Some(status) => Ok(Some(status)),
            None if self.reader.is_eof() && !self.inbox.has_unclaimed() => Err(self.disconnected()),
            None => Ok(None),
        }
    }

    /// Shut down both directions of the stream.
    pub fn shutdown(&mut self) -> Result<()> {
        self.reader.get_ref().shutdown()?;
        Ok(())
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("outbox", &self.writer.queued())
            .field("inbox", &self.inbox.len())
            .field("peer_eof", &self.reader.is_eof())
            .field("peer_closed", &self.writer.peer_closed())
            .finish()
    }
}
