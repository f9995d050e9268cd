use serde::Serialize;

/// Counters kept by the producer session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerStats {
    /// Frames posted for sending.
    pub frames_sent: u64,
    /// Sends observed complete by the next offer.
    pub sends_completed: u64,
    /// Sends withdrawn during teardown before any byte left.
    pub sends_cancelled: u64,
    /// Offers made while the session had no peer.
    pub offers_unconnected: u64,
    pub quit_received: bool,
}

/// Counters kept by the consumer session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub frames_received: u64,
    /// In-flight receives dropped in favour of a newer frame.
    pub frames_skipped: u64,
    /// Messages thrown away while draining at shutdown.
    pub frames_discarded: u64,
    pub polls: u64,
    /// Smallest sample seen across all delivered frames.
    pub min_sample: Option<i16>,
    /// Largest sample seen across all delivered frames.
    pub max_sample: Option<i16>,
    pub quit_received: bool,
}
