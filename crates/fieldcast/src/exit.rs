use std::fmt;
use std::io;

use fieldcast_channel::ChannelError;
use fieldcast_compute::{ComputeError, GroupError};
use fieldcast_transport::TransportError;
use fieldcast_wire::WireError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
/// The two ends disagree about what is on the wire.
pub const PROTOCOL_DESYNC: i32 = 76;
/// The quit probe could not be posted.
pub const LIVENESS_FAILED: i32 = 77;
/// A worker aborted the producer group.
pub const GROUP_ABORTED: i32 = 78;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn wire_error(context: &str, err: WireError) -> CliError {
    match err {
        WireError::Io(source) => io_error(context, source),
        WireError::InvalidMagic
        | WireError::GeometryMismatch { .. }
        | WireError::ControlMismatch { .. }
        | WireError::MidMessage { .. } => {
            CliError::new(PROTOCOL_DESYNC, format!("{context}: {err}"))
        }
        WireError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        WireError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Transport(err) => transport_error(context, err),
        ChannelError::Wire(err) => wire_error(context, err),
        ChannelError::DescriptorUnavailable { source, .. }
        | ChannelError::DescriptorPublish { source, .. } => io_error(context, source),
        ChannelError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ChannelError::HandshakeFailed(_)
        | ChannelError::Json(_)
        | ChannelError::InvalidDescriptor(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ChannelError::UnresolvableShape { .. } | ChannelError::UnexpectedTag(_) => {
            CliError::new(PROTOCOL_DESYNC, format!("{context}: {err}"))
        }
        ChannelError::LivenessProbe(_) => {
            CliError::new(LIVENESS_FAILED, format!("{context}: {err}"))
        }
        ChannelError::Disconnected(_) | ChannelError::NotConnected => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn compute_error(context: &str, err: ComputeError) -> CliError {
    match err {
        ComputeError::Channel(err) => channel_error(context, err),
        ComputeError::Wire(err) => wire_error(context, err),
        ComputeError::WorkerCount { .. } | ComputeError::Partition { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        ComputeError::Group(GroupError::Aborted { .. }) => {
            CliError::new(GROUP_ABORTED, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}
