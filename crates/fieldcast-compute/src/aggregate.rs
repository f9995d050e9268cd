use fieldcast_wire::{Frame, Geometry};
use serde::Serialize;

use crate::error::{ComputeError, Result};
use crate::group::ProcessGroup;

/// Number of workers the aggregation is built for.
pub const REQUIRED_WORKERS: usize = 2;

/// How the root obtains the buffer a gather writes into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Allocation {
    /// One frame, reused for every gather.
    #[default]
    Pooled,
    /// A fresh frame for every gather.
    PerTick,
}

/// Assembles a full frame on the root from every worker's band of rows.
///
/// Rank `k` contributes rows `k * band_rows .. (k + 1) * band_rows`.
#[derive(Debug)]
pub struct FrameAggregator<'g, G: ProcessGroup + ?Sized> {
    member: &'g G,
    geometry: Geometry,
    band_rows: usize,
    allocation: Allocation,
    frame: Option<Frame>,
    gathers: u64,
}

impl<'g, G: ProcessGroup + ?Sized> FrameAggregator<'g, G> {
    pub fn new(member: &'g G, geometry: Geometry, allocation: Allocation) -> Result<Self> {
        if member.size() != REQUIRED_WORKERS {
            return Err(ComputeError::WorkerCount {
                expected: REQUIRED_WORKERS,
                actual: member.size(),
            });
        }
        let band_rows = geometry
            .band_rows(member.size())
            .ok_or(ComputeError::Partition {
                rows: geometry.height,
                workers: member.size(),
            })?;

        Ok(Self {
            member,
            geometry,
            band_rows,
            allocation,
            frame: None,
            gathers: 0,
        })
    }

    /// Rows each worker contributes.
    pub fn band_rows(&self) -> usize {
        self.band_rows
    }

    /// Samples each worker contributes.
    pub fn partition_len(&self) -> usize {
        self.band_rows * self.geometry.width
    }

    pub fn gathers(&self) -> u64 {
        self.gathers
    }

    /// Collective: every member passes its partition. The root gets the
    /// assembled frame, everyone else `None`.
    pub fn gather(&mut self, partition: &[i16]) -> Result<Option<&Frame>> {
        if partition.len() != self.partition_len() {
            return Err(ComputeError::PartitionLength {
                expected: self.partition_len(),
                actual: partition.len(),
            });
        }
        self.gathers += 1;

        if !self.member.is_root() {
            self.member.gather_i16(partition, None)?;
            return Ok(None);
        }

        let geometry = self.geometry;
        let frame = match self.allocation {
            Allocation::Pooled => self.frame.get_or_insert_with(|| Frame::blank(geometry)),
            Allocation::PerTick => self.frame.insert(Frame::blank(geometry)),
        };
        self.member.gather_i16(partition, Some(frame.samples_mut()))?;
        Ok(Some(&*frame))
    }
}
