use bytes::Bytes;
use fieldcast_wire::{decode_control, encode_control, tag_name, Frame, Geometry, IMAGE, QUIT, QUIT_SENTINEL};
use serde::Serialize;

use crate::endpoint::{Endpoint, RecvCancel, RecvRequest};
use crate::error::{ChannelError, Result};
use crate::handle::{ConnectionHandle, LinkState};
use crate::rendezvous::{self, RendezvousConfig};
use crate::stats::ConsumerStats;
use crate::teardown::drain_backlog;

/// What the consumer does with an in-flight receive when a newer frame
/// shows up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReceivePolicy {
    /// Drop it and go for the newer frame.
    #[default]
    Freshest,
    /// Finish it first, then go for the newer frame.
    Complete,
}

/// What a single [`ConsumerSession::poll`] observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollEvents {
    pub frames_delivered: u64,
    pub frames_skipped: u64,
    pub peer_quit: bool,
}

/// Receiving side of the stream.
///
/// Holds the display frame, which starts blank and is overwritten each time
/// a receive completes.
#[derive(Debug)]
pub struct ConsumerSession {
    handle: ConnectionHandle,
    policy: ReceivePolicy,
    display: Frame,
    recv: Option<RecvRequest>,
    stats: ConsumerStats,
}

impl ConsumerSession {
    pub fn new(handle: ConnectionHandle, geometry: Geometry, policy: ReceivePolicy) -> Self {
        Self {
            handle,
            policy,
            display: Frame::blank(geometry),
            recv: None,
            stats: ConsumerStats::default(),
        }
    }

    /// A session that never connected. It polls to nothing and keeps a
    /// blank frame.
    pub fn unconnected(geometry: Geometry, policy: ReceivePolicy) -> Self {
        Self::new(ConnectionHandle::unconnected(), geometry, policy)
    }

    /// Rendezvous with a producer, or run unconnected if that fails.
    pub fn connect_or_unconnected(
        config: &RendezvousConfig,
        geometry: Geometry,
        policy: ReceivePolicy,
    ) -> Self {
        match rendezvous::connect(config) {
            Ok(handle) => Self::new(handle, geometry, policy),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    descriptor_file = %config.descriptor_path.display(),
                    "no producer to connect to; running unconnected"
                );
                Self::unconnected(geometry, policy)
            }
        }
    }

    pub fn state(&self) -> LinkState {
        self.handle.state()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn policy(&self) -> ReceivePolicy {
        self.policy
    }

    /// Most recently completed frame.
    pub fn display(&self) -> &Frame {
        &self.display
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    fn endpoint(&mut self) -> Result<&mut Endpoint> {
        self.handle.endpoint_mut()
    }

    fn deliver(&mut self, payload: &Bytes, events: &mut PollEvents) -> Result<()> {
        self.display.decode_into(payload)?;
        if let Some((lo, hi)) = self.display.min_max() {
            let stats = &mut self.stats;
            stats.min_sample = Some(stats.min_sample.map_or(lo, |seen| seen.min(lo)));
            stats.max_sample = Some(stats.max_sample.map_or(hi, |seen| seen.max(hi)));
        }
        self.stats.frames_received += 1;
        events.frames_delivered += 1;
        Ok(())
    }

    /// One non-blocking step: finish a completed receive, then react to
    /// every message that has become visible.
    pub fn poll(&mut self) -> Result<PollEvents> {
        let mut events = PollEvents::default();
        self.stats.polls += 1;
        if !self.handle.is_connected() {
            return Ok(events);
        }

        let completed = self.handle.endpoint_mut()?.test_recv(&mut self.recv)?;
        if let Some(payload) = completed {
            self.deliver(&payload, &mut events)?;
        }

        while let Some(status) = self.endpoint()?.iprobe(None)? {
            match status.tag {
                IMAGE => {
                    if let Some(req) = self.recv.take() {
                        self.settle_outstanding(req, &mut events)?;
                    }
                    let req = self.endpoint()?.irecv(IMAGE)?;
                    self.recv = Some(req);
                }
                QUIT => {
                    let payload = self.endpoint()?.recv(QUIT)?;
                    let sentinel = decode_control(&payload)?;
                    tracing::info!(sentinel, "producer quit");
                    if let Some(req) = self.recv.take() {
                        if let RecvCancel::Completed(_) = self.endpoint()?.cancel_recv(req)? {
                            self.stats.frames_discarded += 1;
                        }
                    }
                    self.stats.quit_received = true;
                    self.handle.close();
                    events.peer_quit = true;
                    break;
                }
                other => {
                    tracing::error!(tag = other, name = tag_name(other), "unexpected message");
                    return Err(ChannelError::UnexpectedTag(other));
                }
            }
        }

        Ok(events)
    }

    fn settle_outstanding(&mut self, req: RecvRequest, events: &mut PollEvents) -> Result<()> {
        match self.policy {
            ReceivePolicy::Freshest => {
                // A newer frame is already visible; whatever the old receive
                // got never reaches the display.
                let outcome = self.endpoint()?.cancel_recv(req)?.outcome();
                tracing::trace!(?outcome, "stale receive dropped");
                self.stats.frames_skipped += 1;
                events.frames_skipped += 1;
            }
            ReceivePolicy::Complete => {
                let mut slot = Some(req);
                let payload = self.endpoint()?.wait_recv(&mut slot)?;
                self.deliver(&payload, events)?;
            }
        }
        Ok(())
    }

    /// Tell the producer to stop, drain what it already sent, then close.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.handle.is_connected() {
            self.handle.close();
            return Ok(());
        }

        tracing::info!("consumer teardown");
        self.handle.begin_disconnect();
        let geometry = self.display.geometry();
        let endpoint = self.handle.endpoint_mut()?;

        let mut quit = Some(endpoint.isend(QUIT, &encode_control(QUIT_SENTINEL))?);

        if let Some(req) = self.recv.take() {
            if let RecvCancel::Completed(_) = endpoint.cancel_recv(req)? {
                self.stats.frames_discarded += 1;
            }
        }

        let drained = drain_backlog(endpoint, geometry)?;
        self.stats.frames_discarded += drained.data;
        if drained.control > 0 {
            self.stats.quit_received = true;
        }

        match endpoint.wait_send(&mut quit) {
            Ok(()) => {}
            Err(ChannelError::Disconnected(reason)) => {
                tracing::debug!(%reason, "producer already gone; quit not delivered");
                if let Some(req) = quit.take() {
                    endpoint.cancel_send(req)?;
                }
            }
            Err(err) => return Err(err),
        }

        tracing::debug!(
            discarded = self.stats.frames_discarded,
            "backlog drained"
        );
        self.handle.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::thread;
    use std::time::Duration;

    use fieldcast_transport::IpcStream;
    use fieldcast_wire::quantize;

    use super::*;
    use crate::producer::{Offer, ProducerSession};

    const SMALL: Geometry = Geometry::new(16, 16);

    fn linked(policy: ReceivePolicy) -> (ProducerSession, ConsumerSession) {
        let (left, right) = UnixStream::pair().unwrap();
        let producer = Endpoint::from_stream(IpcStream::from(left)).unwrap();
        let consumer = Endpoint::from_stream(IpcStream::from(right)).unwrap();
        (
            ProducerSession::new(ConnectionHandle::from_endpoint(producer, "link-c")),
            ConsumerSession::new(
                ConnectionHandle::from_endpoint(consumer, "link-c"),
                SMALL,
                policy,
            ),
        )
    }

    fn frame_with(value: f64) -> Frame {
        let samples = vec![quantize(value); SMALL.samples()];
        Frame::from_samples(SMALL, samples).unwrap()
    }

    fn poll_until<F: Fn(&ConsumerSession) -> bool>(consumer: &mut ConsumerSession, done: F) {
        for _ in 0..1000 {
            consumer.poll().unwrap();
            if done(consumer) {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("condition never reached");
    }

    #[test]
    fn unconnected_session_keeps_blank_frame() {
        let mut consumer = ConsumerSession::unconnected(SMALL, ReceivePolicy::Freshest);
        for _ in 0..3 {
            assert_eq!(consumer.poll().unwrap(), PollEvents::default());
        }
        assert!(consumer.display().samples().iter().all(|&s| s == 0));
        assert_eq!(consumer.stats().polls, 3);
        consumer.shutdown().unwrap();
        assert_eq!(consumer.state(), LinkState::Unconnected);
    }

    #[test]
    fn delivered_frame_matches_sent_values() {
        let (mut producer, mut consumer) = linked(ReceivePolicy::Freshest);
        assert_eq!(producer.offer(&frame_with(0.5)).unwrap(), Offer::Sent);

        poll_until(&mut consumer, |c| c.stats().frames_received == 1);
        let value = consumer.display().value(3, 7);
        assert!((value - 0.5).abs() <= 1.0 / fieldcast_wire::SAMPLE_SCALE);
        assert_eq!(consumer.stats().max_sample, Some(quantize(0.5)));
    }

    #[test]
    fn sample_range_spans_every_delivered_frame() {
        let (mut producer, mut consumer) = linked(ReceivePolicy::Complete);

        assert_eq!(producer.offer(&frame_with(0.9)).unwrap(), Offer::Sent);
        poll_until(&mut consumer, |c| c.stats().frames_received == 1);
        assert_eq!(producer.offer(&frame_with(0.1)).unwrap(), Offer::Sent);
        poll_until(&mut consumer, |c| c.stats().frames_received == 2);

        let stats = consumer.stats();
        assert_eq!(stats.max_sample, Some(quantize(0.9)));
        assert_eq!(stats.min_sample, Some(quantize(0.1)));
        assert!((consumer.display().value(0, 0) - 0.1).abs() <= 1.0 / fieldcast_wire::SAMPLE_SCALE);
    }

    #[test]
    fn freshest_policy_skips_stale_receive() {
        let (mut producer, mut consumer) = linked(ReceivePolicy::Freshest);

        // Three frames land before the consumer looks.
        for value in [0.1, 0.2, 0.3] {
            assert_eq!(producer.offer(&frame_with(value)).unwrap(), Offer::Sent);
        }
        poll_until(&mut consumer, |c| {
            let s = c.stats();
            s.frames_received + s.frames_skipped == 3
        });

        let stats = consumer.stats();
        let display = consumer.display().value(0, 0);
        assert!((display - 0.3).abs() <= 1.0 / fieldcast_wire::SAMPLE_SCALE);
        assert!(stats.frames_received >= 1);
        assert!(stats.frames_received + stats.frames_skipped <= producer.stats().frames_sent);
    }

    #[test]
    fn stale_frame_is_not_displayed() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut raw = Endpoint::from_stream(IpcStream::from(left)).unwrap();
        let consumer_ep = Endpoint::from_stream(IpcStream::from(right)).unwrap();
        let mut consumer = ConsumerSession::new(
            ConnectionHandle::from_endpoint(consumer_ep, "link-raw"),
            SMALL,
            ReceivePolicy::Freshest,
        );

        raw.send_sync(IMAGE, &frame_with(0.1).to_payload()).unwrap();
        raw.send_sync(IMAGE, &frame_with(0.9).to_payload()).unwrap();

        let first = consumer.poll().unwrap();
        assert_eq!(first.frames_delivered, 0);
        assert_eq!(first.frames_skipped, 1);

        let second = consumer.poll().unwrap();
        assert_eq!(second.frames_delivered, 1);
        assert!((consumer.display().value(5, 5) - 0.9).abs() <= 1.0 / fieldcast_wire::SAMPLE_SCALE);

        let stats = consumer.stats();
        assert_eq!((stats.frames_received, stats.frames_skipped), (1, 1));
    }

    #[test]
    fn complete_policy_never_skips() {
        let (mut producer, mut consumer) = linked(ReceivePolicy::Complete);
        for value in [0.1, 0.2, 0.3, 0.4] {
            assert_eq!(producer.offer(&frame_with(value)).unwrap(), Offer::Sent);
        }
        poll_until(&mut consumer, |c| c.stats().frames_received == 4);
        assert_eq!(consumer.stats().frames_skipped, 0);
    }

    #[test]
    fn producer_quit_closes_consumer() {
        let (mut producer, mut consumer) = linked(ReceivePolicy::Freshest);
        assert_eq!(producer.offer(&frame_with(0.25)).unwrap(), Offer::Sent);
        producer.finish().unwrap();

        let mut quit = false;
        for _ in 0..1000 {
            let events = consumer.poll().unwrap();
            if events.peer_quit {
                quit = true;
                break;
            }
        }
        assert!(quit);
        assert_eq!(consumer.state(), LinkState::Disconnected);
        assert!(consumer.stats().quit_received);

        // Further polls are no-ops once closed.
        assert_eq!(consumer.poll().unwrap(), PollEvents::default());
        consumer.shutdown().unwrap();
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut raw = Endpoint::from_stream(IpcStream::from(left)).unwrap();
        let consumer_ep = Endpoint::from_stream(IpcStream::from(right)).unwrap();
        let mut consumer = ConsumerSession::new(
            ConnectionHandle::from_endpoint(consumer_ep, "link-odd"),
            SMALL,
            ReceivePolicy::Freshest,
        );

        raw.send_sync(9, b"??").unwrap();
        let mut result = consumer.poll();
        for _ in 0..100 {
            if result.is_err() {
                break;
            }
            result = consumer.poll();
        }
        assert!(matches!(result, Err(ChannelError::UnexpectedTag(9))));
    }

    #[test]
    fn peer_vanishing_without_quit_is_fatal() {
        let (producer, mut consumer) = linked(ReceivePolicy::Freshest);
        drop(producer);

        let mut result = consumer.poll();
        for _ in 0..100 {
            if result.is_err() {
                break;
            }
            result = consumer.poll();
        }
        assert!(matches!(result, Err(ChannelError::Disconnected(_))));
    }

    #[test]
    fn consumer_shutdown_while_producer_streams() {
        let (left, right) = UnixStream::pair().unwrap();
        let producer_ep = Endpoint::from_stream(IpcStream::from(left)).unwrap();
        let consumer_ep = Endpoint::from_stream(IpcStream::from(right)).unwrap();
        let geometry = Geometry::STANDARD;

        let producer = thread::spawn(move || {
            let mut session =
                ProducerSession::new(ConnectionHandle::from_endpoint(producer_ep, "link-s"));
            let frame = Frame::blank(geometry);
            loop {
                match session.offer(&frame).unwrap() {
                    Offer::Sent => {}
                    Offer::Closed => break,
                    Offer::Unconnected => unreachable!(),
                }
            }
            session.stats()
        });

        let mut consumer = ConsumerSession::new(
            ConnectionHandle::from_endpoint(consumer_ep, "link-s"),
            geometry,
            ReceivePolicy::Freshest,
        );
        poll_until(&mut consumer, |c| c.stats().frames_received >= 2);
        consumer.shutdown().unwrap();
        assert_eq!(consumer.state(), LinkState::Disconnected);

        let producer_stats = producer.join().unwrap();
        assert!(producer_stats.quit_received);
        let consumer_stats = consumer.stats();
        assert!(
            consumer_stats.frames_received + consumer_stats.frames_skipped
                <= producer_stats.frames_sent
        );
        assert_eq!(
            producer_stats.sends_completed + producer_stats.sends_cancelled,
            producer_stats.frames_sent
        );
    }
}
