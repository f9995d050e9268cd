use fieldcast_wire::{encode_control, Frame, IMAGE, QUIT, QUIT_SENTINEL};

use crate::endpoint::{CancelOutcome, SendRequest};
use crate::error::{ChannelError, Result};
use crate::handle::{ConnectionHandle, LinkState};
use crate::liveness::{Liveness, LivenessMonitor};
use crate::stats::ProducerStats;

/// What happened to an offered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Posted for sending.
    Sent,
    /// The link is closed (peer quit or local finish); nothing was sent.
    Closed,
    /// The session never had a peer.
    Unconnected,
}

/// Why the producer tore the link down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    PeerQuit,
    Finished,
}

/// Sending side of the stream.
///
/// At most one frame is in flight. A new frame is only posted after the
/// previous send completed, so a slow consumer slows the producer down.
#[derive(Debug)]
pub struct ProducerSession {
    handle: ConnectionHandle,
    liveness: LivenessMonitor,
    send: Option<SendRequest>,
    stats: ProducerStats,
}

impl ProducerSession {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            liveness: LivenessMonitor::new(),
            send: None,
            stats: ProducerStats::default(),
        }
    }

    /// A session with no peer; every offer is a no-op.
    pub fn unconnected() -> Self {
        Self::new(ConnectionHandle::unconnected())
    }

    pub fn state(&self) -> LinkState {
        self.handle.state()
    }

    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Check the quit probe. A completed probe tears the link down.
    pub fn is_alive(&mut self) -> Result<bool> {
        if !self.handle.is_connected() {
            return Ok(false);
        }
        let endpoint = self.handle.endpoint_mut()?;
        match self.liveness.check(endpoint)? {
            Liveness::Alive => Ok(true),
            Liveness::QuitRequested => {
                self.stats.quit_received = true;
                self.teardown(Cause::PeerQuit)?;
                Ok(false)
            }
        }
    }

    /// Offer the next frame.
    ///
    /// Blocks until the previous frame has been handed to the transport.
    pub fn offer(&mut self, frame: &Frame) -> Result<Offer> {
        match self.handle.state() {
            LinkState::Unconnected => {
                self.stats.offers_unconnected += 1;
                return Ok(Offer::Unconnected);
            }
            LinkState::Disconnecting | LinkState::Disconnected => return Ok(Offer::Closed),
            LinkState::Connected => {}
        }

        if !self.is_alive()? {
            return Ok(Offer::Closed);
        }

        if self.send.is_some() {
            let endpoint = self.handle.endpoint_mut()?;
            match endpoint.wait_send(&mut self.send) {
                Ok(()) => self.stats.sends_completed += 1,
                // The consumer may have quit and closed while the frame was
                // going out; its QUIT is still readable.
                Err(ChannelError::Disconnected(reason)) => {
                    if !self.is_alive()? {
                        return Ok(Offer::Closed);
                    }
                    return Err(ChannelError::Disconnected(reason));
                }
                Err(err) => return Err(err),
            }
        }

        if !self.is_alive()? {
            return Ok(Offer::Closed);
        }

        let payload = frame.to_payload();
        let endpoint = self.handle.endpoint_mut()?;
        self.send = Some(endpoint.isend(IMAGE, &payload)?);
        self.stats.frames_sent += 1;
        tracing::trace!(frames_sent = self.stats.frames_sent, "frame posted");
        Ok(Offer::Sent)
    }

    /// End of run: tell the consumer and close.
    pub fn finish(&mut self) -> Result<()> {
        if self.handle.is_connected() {
            self.teardown(Cause::Finished)?;
        }
        Ok(())
    }

    fn teardown(&mut self, cause: Cause) -> Result<()> {
        tracing::info!(?cause, "producer teardown");
        self.handle.begin_disconnect();
        let endpoint = self.handle.endpoint_mut()?;

        match endpoint.send_sync(QUIT, &encode_control(QUIT_SENTINEL)) {
            Ok(()) => tracing::debug!("quit sent"),
            Err(ChannelError::Disconnected(reason)) => {
                tracing::debug!(%reason, "peer already gone; quit not delivered");
            }
            Err(err) => return Err(err),
        }

        if let Some(req) = self.send.take() {
            match endpoint.cancel_send(req)? {
                CancelOutcome::Cancelled => self.stats.sends_cancelled += 1,
                CancelOutcome::Completed => self.stats.sends_completed += 1,
            }
        }

        self.liveness.release(endpoint)?;
        self.handle.close();
        Ok(())
    }
}
