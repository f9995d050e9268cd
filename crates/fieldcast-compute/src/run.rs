//! The producer run loop.
//!
//! Every rank recomputes its band each iteration from the time the root
//! broadcasts. Once per send interval all ranks gather, and the root offers
//! the assembled frame to the consumer if it has one.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fieldcast_channel::{rendezvous, Offer, ProducerSession, ProducerStats, RendezvousConfig};
use fieldcast_wire::Geometry;
use serde::Serialize;

use crate::aggregate::{Allocation, FrameAggregator, REQUIRED_WORKERS};
use crate::error::{ComputeError, Result};
use crate::field::FieldBand;
use crate::group::{ProcessGroup, ThreadGroup};

/// How long the producer runs by default.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(15);

/// Minimum spacing between two sends, roughly 30 frames per second.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_micros(33_333);

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub workers: usize,
    pub geometry: Geometry,
    pub duration: Duration,
    pub send_interval: Duration,
    /// Offer a channel to a consumer. `None` runs without one.
    pub rendezvous: Option<RendezvousConfig>,
    pub allocation: Allocation,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            workers: REQUIRED_WORKERS,
            geometry: Geometry::STANDARD,
            duration: DEFAULT_DURATION,
            send_interval: DEFAULT_SEND_INTERVAL,
            rendezvous: None,
            allocation: Allocation::Pooled,
        }
    }
}

/// What one rank did during the run.
#[derive(Debug, Clone, Serialize)]
pub struct RankReport {
    pub rank: usize,
    /// Iterations of the compute loop.
    pub frames: u64,
    /// Gathers this rank took part in.
    pub gathers: u64,
    pub elapsed_secs: f64,
    pub fps: f64,
    /// Frames per second handed to the consumer.
    pub send_fps: f64,
    /// Channel counters, root only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<ProducerStats>,
}

/// Run the producer group to completion.
///
/// The worker count and partition are checked before any thread starts
/// or any channel is opened.
pub fn run(config: &ProducerConfig) -> Result<Vec<RankReport>> {
    if config.workers != REQUIRED_WORKERS {
        return Err(ComputeError::WorkerCount {
            expected: REQUIRED_WORKERS,
            actual: config.workers,
        });
    }
    if config.geometry.band_rows(config.workers).is_none() {
        return Err(ComputeError::Partition {
            rows: config.geometry.height,
            workers: config.workers,
        });
    }

    ThreadGroup::run(config.workers, |member| {
        let result = run_rank(&member, config);
        if let Err(err) = &result {
            // Other ranks may be parked in a collective.
            member.abort(&err.to_string());
        }
        result
    })?
    .into_iter()
    .collect()
}

fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn open_session<G: ProcessGroup>(
    member: &G,
    config: &ProducerConfig,
) -> Result<Option<ProducerSession>> {
    if !member.is_root() {
        return Ok(None);
    }
    let session = match &config.rendezvous {
        Some(rendezvous_config) => ProducerSession::new(rendezvous::open(rendezvous_config)?),
        None => ProducerSession::unconnected(),
    };
    Ok(Some(session))
}

fn run_rank<G: ProcessGroup>(member: &G, config: &ProducerConfig) -> Result<RankReport> {
    let rank = member.rank();
    let mut session = open_session(member, config)?;

    let mut aggregator = FrameAggregator::new(member, config.geometry, config.allocation)?;
    let mut band = FieldBand::new(config.geometry, rank, aggregator.band_rows());

    let start = member.broadcast_f64(wall_clock())?;
    let end = start + config.duration.as_secs_f64();
    let send_interval = config.send_interval.as_secs_f64();
    let mut time = start;
    let mut last_send = start;
    let mut frames = 0u64;
    let mut sent = 0u64;

    while time < end {
        band.update(time - start);

        if time - last_send > send_interval {
            let gathered = aggregator.gather(band.samples())?;
            if let (Some(frame), Some(session)) = (gathered, session.as_mut()) {
                if session.offer(frame)? == Offer::Sent {
                    sent += 1;
                    tracing::debug!(rank, elapsed = time - start, "frame offered");
                }
            }
            last_send = time;
        }

        time = member.broadcast_f64(wall_clock())?;
        frames += 1;
    }

    if let Some(session) = session.as_mut() {
        session.finish()?;
    }

    let elapsed = time - start;
    let per_second = |count: u64| {
        if elapsed > 0.0 {
            count as f64 / elapsed
        } else {
            0.0
        }
    };
    let report = RankReport {
        rank,
        frames,
        gathers: aggregator.gathers(),
        elapsed_secs: elapsed,
        fps: per_second(frames),
        send_fps: per_second(sent),
        channel: session.as_ref().map(ProducerSession::stats),
    };
    tracing::info!(
        rank,
        frames,
        sent,
        fps = report.fps,
        send_fps = report.send_fps,
        "producer rank finished"
    );
    Ok(report)
}
