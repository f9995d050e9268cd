use fieldcast_wire::{decode_control, QUIT};

use crate::endpoint::{Endpoint, RecvRequest};
use crate::error::{ChannelError, Result};

/// Answer of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// The peer sent QUIT.
    QuitRequested,
}

/// Keeps one receive posted for QUIT and reports when it completes.
#[derive(Debug, Default)]
pub struct LivenessMonitor {
    probe: Option<RecvRequest>,
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post the probe if needed, otherwise test it.
    pub fn check(&mut self, endpoint: &mut Endpoint) -> Result<Liveness> {
        if self.probe.is_none() {
            let probe = endpoint
                .irecv(QUIT)
                .map_err(|err| ChannelError::LivenessProbe(Box::new(err)))?;
            self.probe = Some(probe);
            return Ok(Liveness::Alive);
        }

        match endpoint.test_recv(&mut self.probe)? {
            Some(payload) => {
                let sentinel = decode_control(&payload)?;
                tracing::info!(sentinel, "quit requested by peer");
                Ok(Liveness::QuitRequested)
            }
            None => Ok(Liveness::Alive),
        }
    }

    /// Whether a probe is currently posted.
    pub fn is_armed(&self) -> bool {
        self.probe.is_some()
    }

    /// Cancel an outstanding probe.
    pub fn release(&mut self, endpoint: &mut Endpoint) -> Result<()> {
        if let Some(probe) = self.probe.take() {
            endpoint.cancel_recv(probe)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use fieldcast_transport::IpcStream;
    use fieldcast_wire::{encode_control, IMAGE, QUIT_SENTINEL};

    use super::*;

    fn pair() -> (Endpoint, Endpoint) {
        let (left, right) = UnixStream::pair().unwrap();
        (
            Endpoint::from_stream(IpcStream::from(left)).unwrap(),
            Endpoint::from_stream(IpcStream::from(right)).unwrap(),
        )
    }

    #[test]
    fn first_check_arms_probe() {
        let (mut producer, _consumer) = pair();
        let mut monitor = LivenessMonitor::new();

        assert!(!monitor.is_armed());
        assert_eq!(monitor.check(&mut producer).unwrap(), Liveness::Alive);
        assert!(monitor.is_armed());
        assert_eq!(monitor.check(&mut producer).unwrap(), Liveness::Alive);
    }

    #[test]
    fn quit_completes_probe() {
        let (mut producer, mut consumer) = pair();
        let mut monitor = LivenessMonitor::new();
        monitor.check(&mut producer).unwrap();

        consumer
            .send_sync(QUIT, &encode_control(QUIT_SENTINEL))
            .unwrap();

        let mut state = Liveness::Alive;
        while state == Liveness::Alive {
            state = monitor.check(&mut producer).unwrap();
        }
        assert_eq!(state, Liveness::QuitRequested);
        assert!(!monitor.is_armed());
    }

    #[test]
    fn data_does_not_trip_probe() {
        let (mut producer, mut consumer) = pair();
        let mut monitor = LivenessMonitor::new();
        monitor.check(&mut producer).unwrap();

        consumer.send_sync(IMAGE, &[0u8; 8]).unwrap();
        for _ in 0..10 {
            assert_eq!(monitor.check(&mut producer).unwrap(), Liveness::Alive);
        }
        assert_eq!(producer.iprobe(None).unwrap().map(|s| s.tag), Some(IMAGE));
    }

    #[test]
    fn peer_gone_without_quit_is_an_error() {
        let (mut producer, consumer) = pair();
        let mut monitor = LivenessMonitor::new();
        monitor.check(&mut producer).unwrap();
        drop(consumer);

        let err = monitor.check(&mut producer).unwrap_err();
        assert!(matches!(err, ChannelError::Disconnected(_)));
    }

    #[test]
    fn release_cancels_probe() {
        let (mut producer, _consumer) = pair();
        let mut monitor = LivenessMonitor::new();
        monitor.check(&mut producer).unwrap();

        monitor.release(&mut producer).unwrap();
        assert!(!monitor.is_armed());
        monitor.release(&mut producer).unwrap();
    }
}
