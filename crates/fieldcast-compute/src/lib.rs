//! The producing side of fieldcast.
//!
//! A fixed group of workers each compute a band of rows of the field. The
//! root gathers the bands into one frame and, when a consumer is attached,
//! streams it with a [`fieldcast_channel::ProducerSession`].

pub mod aggregate;
pub mod error;
pub mod field;
pub mod group;
pub mod run;

pub use aggregate::{Allocation, FrameAggregator, REQUIRED_WORKERS};
pub use error::{ComputeError, GroupError, Result};
pub use field::{base_value, time_factor, FieldBand};
pub use group::{ProcessGroup, ThreadGroup, ROOT};
pub use run::{run, ProducerConfig, RankReport, DEFAULT_DURATION, DEFAULT_SEND_INTERVAL};
