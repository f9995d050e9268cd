use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use fieldcast_channel::ReceivePolicy;
use fieldcast_compute::Allocation;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod compute;
pub mod version;
pub mod visualize;

/// Environment variable that overrides the descriptor file location.
pub const DESCRIPTOR_ENV: &str = "FIELDCAST_DESCRIPTOR";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the producer group, optionally offering a channel to a consumer.
    Compute(ComputeArgs),
    /// Connect to a producer and follow the stream.
    Visualize(VisualizeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Compute(args) => compute::run(args, format),
        Command::Visualize(args) => visualize::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum AllocationArg {
    Pooled,
    PerTick,
}

impl From<AllocationArg> for Allocation {
    fn from(arg: AllocationArg) -> Self {
        match arg {
            AllocationArg::Pooled => Allocation::Pooled,
            AllocationArg::PerTick => Allocation::PerTick,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum PolicyArg {
    /// Drop an in-flight frame as soon as a newer one shows up.
    Freshest,
    /// Finish an in-flight frame before moving on.
    Complete,
}

impl From<PolicyArg> for ReceivePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Freshest => ReceivePolicy::Freshest,
            PolicyArg::Complete => ReceivePolicy::Complete,
        }
    }
}

#[derive(Args, Debug)]
pub struct ComputeArgs {
    /// Publish a rendezvous descriptor and wait for a consumer.
    #[arg(long)]
    pub open_port: bool,
    /// Number of workers in the group.
    #[arg(long, default_value_t = fieldcast_compute::REQUIRED_WORKERS)]
    pub workers: usize,
    /// How long to run (e.g. 15s, 500ms).
    #[arg(long, default_value = "15s")]
    pub duration: String,
    /// Minimum spacing between two frames sent to the consumer.
    #[arg(long, default_value = "33ms")]
    pub send_interval: String,
    /// How the root allocates the gather buffer.
    #[arg(long, value_enum, default_value = "pooled")]
    pub allocation: AllocationArg,
    /// Where to publish the rendezvous descriptor.
    #[arg(long, value_name = "PATH", env = DESCRIPTOR_ENV)]
    pub descriptor_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VisualizeArgs {
    /// Where to read the rendezvous descriptor.
    #[arg(long, value_name = "PATH", env = DESCRIPTOR_ENV)]
    pub descriptor_file: Option<PathBuf>,
    /// Poll interval.
    #[arg(long, default_value = "5ms")]
    pub tick: String,
    /// Stop after this long. Runs until Ctrl-C when unset.
    #[arg(long)]
    pub duration: Option<String>,
    /// How often to print a status line.
    #[arg(long, default_value = "2s")]
    pub status_interval: String,
    /// What to do with an in-flight frame when a newer one arrives.
    #[arg(long, value_enum, default_value = "freshest")]
    pub policy: PolicyArg,
    /// Exit as soon as the producer says quit.
    #[arg(long)]
    pub exit_on_quit: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `15s`, `33ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
