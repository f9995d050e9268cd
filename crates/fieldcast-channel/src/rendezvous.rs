use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use fieldcast_transport::{IpcStream, UnixDomainSocket};
use fieldcast_wire::{MessageReader, MessageWriter, WireConfig};

use crate::descriptor::{self, default_descriptor_path, Descriptor};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::handle::ConnectionHandle;
use crate::handshake::{handshake_client_with_config, handshake_server_with_config, HandshakeConfig};

const SOCKET_PREFIX: &str = "fieldcast";

static NEXT_LINK: AtomicU64 = AtomicU64::new(1);

/// Where the rendezvous happens and how the link is negotiated.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// File the descriptor is published to and read from.
    pub descriptor_path: PathBuf,
    /// Directory the accepting side binds its socket in.
    pub socket_dir: PathBuf,
    pub handshake: HandshakeConfig,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            descriptor_path: default_descriptor_path(),
            socket_dir: std::env::temp_dir(),
            handshake: HandshakeConfig::default(),
        }
    }
}

impl RendezvousConfig {
    /// Default configuration with a different descriptor file.
    pub fn with_descriptor_path(path: impl Into<PathBuf>) -> Self {
        Self {
            descriptor_path: path.into(),
            ..Self::default()
        }
    }
}

/// Publish a fresh endpoint and wait for one peer to connect.
///
/// Blocks in accept with no timeout.
pub fn open(config: &RendezvousConfig) -> Result<ConnectionHandle> {
    let socket = UnixDomainSocket::bind_unique(&config.socket_dir, SOCKET_PREFIX)?;
    let descriptor = Descriptor::for_socket(socket.path());
    let published = descriptor::publish(&config.descriptor_path, &descriptor)?;
    tracing::info!(
        %descriptor,
        file = %config.descriptor_path.display(),
        "rendezvous open; waiting for consumer"
    );

    let stream = socket.accept()?;
    let (mut reader, mut writer) = handshake_io(stream, &config.handshake)?;
    let link_id = format!(
        "link-{}-{}",
        std::process::id(),
        NEXT_LINK.fetch_add(1, Ordering::Relaxed)
    );
    handshake_server_with_config(&mut reader, &mut writer, &link_id, &config.handshake)?;
    let endpoint = Endpoint::from_parts(reader, writer)?;

    tracing::info!(%link_id, "consumer connected");
    Ok(ConnectionHandle::from_endpoint(endpoint, link_id)
        .with_descriptor(descriptor)
        .with_acceptor(socket, published))
}

/// Connect to the endpoint published in the descriptor file.
pub fn connect(config: &RendezvousConfig) -> Result<ConnectionHandle> {
    let descriptor = descriptor::read_descriptor(&config.descriptor_path)?;
    let stream = UnixDomainSocket::connect(descriptor.socket_path())?;
    let (mut reader, mut writer) = handshake_io(stream, &config.handshake)?;
    let result = handshake_client_with_config(&mut reader, &mut writer, &config.handshake)?;
    let endpoint = Endpoint::from_parts(reader, writer)?;

    tracing::info!(%descriptor, link_id = %result.link_id, "connected to producer");
    Ok(ConnectionHandle::from_endpoint(endpoint, result.link_id).with_descriptor(descriptor))
}

fn handshake_io(
    stream: IpcStream,
    config: &HandshakeConfig,
) -> Result<(MessageReader<IpcStream>, MessageWriter<IpcStream>)> {
    let reader_stream = stream.try_clone()?;
    // Handshake uses a tighter pre-link payload budget; the endpoint restores
    // runtime limits.
    let wire_config = WireConfig {
        max_payload_size: config.max_handshake_payload,
        read_timeout: Some(config.timeout),
        write_timeout: Some(config.timeout),
    };
    let reader = MessageReader::with_config_ipc(reader_stream, wire_config.clone())?;
    let writer = MessageWriter::with_config_ipc(stream, wire_config)?;
    Ok((reader, writer))
}
