/// Errors raised by a process group collective.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    /// Some member aborted the group; every pending and later collective
    /// fails with this.
    #[error("group aborted by rank {rank}: {reason}")]
    Aborted { rank: usize, reason: String },

    /// The shared collective state was poisoned by a panicking member.
    #[error("group state poisoned")]
    Poisoned,

    /// A member thread panicked.
    #[error("rank {0} panicked")]
    RankPanicked(usize),

    /// A member thread could not be started.
    #[error("failed to spawn rank {rank}: {source}")]
    Spawn {
        rank: usize,
        source: std::io::Error,
    },

    /// Members passed buffers of different sizes to the same collective.
    #[error("collective buffer is {actual} elements, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
}

/// Errors that can occur while running the producer group.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Channel(#[from] fieldcast_channel::ChannelError),

    #[error(transparent)]
    Wire(#[from] fieldcast_wire::WireError),

    /// The group does not have the number of workers the aggregation needs.
    #[error("producer needs exactly {expected} workers, got {actual}")]
    WorkerCount { expected: usize, actual: usize },

    /// The frame rows cannot be split evenly across the workers.
    #[error("{rows} rows cannot be split evenly across {workers} workers")]
    Partition { rows: usize, workers: usize },

    /// A worker's partition has the wrong number of samples.
    #[error("partition holds {actual} samples, expected {expected}")]
    PartitionLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, ComputeError>;
