//! Connect-time negotiation on the HELLO tag.
//!
//! The client sends a [`HandshakeRequest`], the server checks it against
//! its own configuration and answers with a [`HandshakeResponse`] carrying
//! the link id. A server that rejects the request closes the connection
//! without answering, so the client only ever sees a disconnect.
//!
//! Streaming messages carry no version or layout information; this exchange
//! is the only place a mismatched build is caught.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::str::FromStr;
use std::time::{Duration, Instant};

use fieldcast_wire::{
    tag_name, Geometry, MessageReader, MessageWriter, WireError, HELLO, SAMPLE_BYTES, SAMPLE_SCALE,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_LINK_ID_LEN: usize = 128;

/// Frame layout both endpoints must share.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub sample_bytes: usize,
    pub scale: f64,
}

impl From<Geometry> for GridSpec {
    fn from(geometry: Geometry) -> Self {
        Self {
            width: geometry.width,
            height: geometry.height,
            sample_bytes: SAMPLE_BYTES,
            scale: SAMPLE_SCALE,
        }
    }
}

impl Default for GridSpec {
    fn default() -> Self {
        Geometry::STANDARD.into()
    }
}

impl fmt::Display for GridSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} ({} B, scale {})",
            self.width, self.height, self.sample_bytes, self.scale
        )
    }
}

/// Sent by the connecting side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: String,
    pub grid: GridSpec,
}

/// Sent back by the accepting side once the request checks out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeResponse {
    pub protocol: String,
    pub version: String,
    pub grid: GridSpec,
    /// Opaque id the accepting side assigned to this link.
    pub link_id: String,
}

/// What a successful handshake agreed on.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResult {
    pub link_id: String,
    /// Version of the remote side.
    pub peer_version: String,
    pub grid: GridSpec,
}

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Upper bound for the whole exchange.
    pub timeout: Duration,
    pub protocol_name: String,
    /// `<major>.<minor>`.
    pub protocol_version: String,
    pub max_handshake_payload: usize,
    /// Local frame layout.
    pub grid: GridSpec,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: "fieldcast".to_string(),
            protocol_version: "1.0".to_string(),
            max_handshake_payload: 16 * 1024,
            grid: GridSpec::default(),
        }
    }
}

/// `<major>.<minor>` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProtocolVersion {
    major: u16,
    minor: u16,
}

impl ProtocolVersion {
    /// A client may be newer than the server within the same major.
    fn accepts_client(self, client: ProtocolVersion) -> bool {
        client.major == self.major && client.minor >= self.minor
    }
}

impl FromStr for ProtocolVersion {
    type Err = ChannelError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = |why: &str| ChannelError::HandshakeFailed(format!("invalid version '{raw}': {why}"));

        bounded("protocol version", raw, MAX_VERSION_LEN)?;
        let (major, minor) = raw
            .split_once('.')
            .ok_or_else(|| invalid("expected '<major>.<minor>'"))?;
        if minor.contains('.') {
            return Err(invalid("expected '<major>.<minor>'"));
        }
        Ok(Self {
            major: major.parse().map_err(|_| invalid("non-numeric major"))?,
            minor: minor.parse().map_err(|_| invalid("non-numeric minor"))?,
        })
    }
}

fn bounded(what: &str, value: &str, max: usize) -> Result<()> {
    if value.is_empty() || value.len() > max {
        return Err(ChannelError::HandshakeFailed(format!(
            "invalid {what} length: {}",
            value.len()
        )));
    }
    Ok(())
}

/// Check what the remote side announced against the local configuration.
fn check_remote(
    config: &HandshakeConfig,
    protocol: &str,
    server: ProtocolVersion,
    client: ProtocolVersion,
    grid: &GridSpec,
) -> Result<()> {
    bounded("protocol name", protocol, MAX_PROTOCOL_LEN)?;
    if protocol != config.protocol_name {
        return Err(ChannelError::HandshakeFailed(format!(
            "unknown protocol '{protocol}' (expected '{}')",
            config.protocol_name
        )));
    }
    if !server.accepts_client(client) {
        return Err(ChannelError::HandshakeFailed(format!(
            "incompatible versions: client {}.{}, server {}.{}",
            client.major, client.minor, server.major, server.minor
        )));
    }
    if *grid != config.grid {
        return Err(ChannelError::HandshakeFailed(format!(
            "grid mismatch: local {}, peer {grid}",
            config.grid
        )));
    }
    Ok(())
}

fn local_version(config: &HandshakeConfig) -> Result<ProtocolVersion> {
    bounded("protocol name", &config.protocol_name, MAX_PROTOCOL_LEN)?;
    config.protocol_version.parse()
}

pub fn handshake_client<R: Read, W: Write>(
    reader: &mut MessageReader<R>,
    writer: &mut MessageWriter<W>,
) -> Result<HandshakeResult> {
    handshake_client_with_config(reader, writer, &HandshakeConfig::default())
}

/// Announce the local configuration and wait for the server's answer.
pub fn handshake_client_with_config<R: Read, W: Write>(
    reader: &mut MessageReader<R>,
    writer: &mut MessageWriter<W>,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    let local = local_version(config)?;
    send_hello(
        writer,
        &HandshakeRequest {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version.clone(),
            grid: config.grid,
        },
    )?;

    let resp: HandshakeResponse = recv_hello(reader, config)?;
    let server = resp.version.parse()?;
    bounded("link id", &resp.link_id, MAX_LINK_ID_LEN)?;
    check_remote(config, &resp.protocol, server, local, &resp.grid)?;

    Ok(HandshakeResult {
        link_id: resp.link_id,
        peer_version: resp.version,
        grid: resp.grid,
    })
}

pub fn handshake_server<R: Read, W: Write>(
    reader: &mut MessageReader<R>,
    writer: &mut MessageWriter<W>,
    link_id: &str,
) -> Result<HandshakeResult> {
    handshake_server_with_config(reader, writer, link_id, &HandshakeConfig::default())
}

/// Validate the client's request and answer it with `link_id`.
///
/// A rejected request gets no response; the caller drops the connection.
pub fn handshake_server_with_config<R: Read, W: Write>(
    reader: &mut MessageReader<R>,
    writer: &mut MessageWriter<W>,
    link_id: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    let local = local_version(config)?;
    bounded("link id", link_id, MAX_LINK_ID_LEN)?;

    let req: HandshakeRequest = recv_hello(reader, config)?;
    let client = req.version.parse()?;
    check_remote(config, &req.protocol, local, client, &req.grid)?;

    send_hello(
        writer,
        &HandshakeResponse {
            protocol: config.protocol_name.clone(),
            version: config.protocol_version.clone(),
            grid: config.grid,
            link_id: link_id.to_string(),
        },
    )?;

    tracing::debug!(link_id, peer_version = %req.version, "handshake accepted");
    Ok(HandshakeResult {
        link_id: link_id.to_string(),
        peer_version: req.version,
        grid: req.grid,
    })
}

fn send_hello<T: Serialize, W: Write>(writer: &mut MessageWriter<W>, value: &T) -> Result<()> {
    writer.send(HELLO, &serde_json::to_vec(value)?)?;
    Ok(())
}

fn recv_hello<T: DeserializeOwned, R: Read>(
    reader: &mut MessageReader<R>,
    config: &HandshakeConfig,
) -> Result<T> {
    let deadline = Instant::now() + config.timeout;
    while Instant::now() < deadline {
        let envelope = match reader.read_envelope() {
            Ok(envelope) => envelope,
            Err(WireError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                continue;
            }
            Err(WireError::ConnectionClosed) => {
                return Err(ChannelError::Disconnected(
                    "connection closed during handshake".to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        };

        if envelope.tag != HELLO {
            return Err(ChannelError::HandshakeFailed(format!(
                "expected HELLO, got {} ({})",
                tag_name(envelope.tag),
                envelope.tag
            )));
        }
        if envelope.payload.len() > config.max_handshake_payload {
            return Err(ChannelError::HandshakeFailed(format!(
                "handshake payload too large: {} (max {})",
                envelope.payload.len(),
                config.max_handshake_payload
            )));
        }
        return Ok(serde_json::from_slice(&envelope.payload)?);
    }
    Err(ChannelError::Timeout(config.timeout))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, ErrorKind, Read};
    use std::os::unix::net::UnixStream;
    use std::thread;
    use std::time::Duration;

    use fieldcast_wire::IMAGE;

    use super::*;

    /// Run both sides over a socket pair.
    fn negotiate(
        server: HandshakeConfig,
        client: HandshakeConfig,
    ) -> (Result<HandshakeResult>, Result<HandshakeResult>) {
        let (left, right) = UnixStream::pair().unwrap();
        let server = thread::spawn(move || {
            let mut reader = MessageReader::new(left.try_clone().unwrap());
            let mut writer = MessageWriter::new(left);
            handshake_server_with_config(&mut reader, &mut writer, "link-1", &server)
        });

        let mut reader = MessageReader::new(right.try_clone().unwrap());
        let mut writer = MessageWriter::new(right);
        let client = handshake_client_with_config(&mut reader, &mut writer, &client);
        (client, server.join().unwrap())
    }

    fn assert_rejected(server: HandshakeConfig, client: HandshakeConfig, needle: &str) {
        let (client, server) = negotiate(server, client);
        assert!(
            matches!(client, Err(ChannelError::Disconnected(_))),
            "client: {client:?}"
        );
        match server {
            Err(ChannelError::HandshakeFailed(msg)) => assert!(msg.contains(needle), "{msg}"),
            other => panic!("server: {other:?}"),
        }
    }

    #[test]
    fn matching_builds_agree() {
        let (client, server) = negotiate(HandshakeConfig::default(), HandshakeConfig::default());
        let client = client.unwrap();
        let server = server.unwrap();

        assert_eq!(client.link_id, "link-1");
        assert_eq!(client.peer_version, "1.0");
        assert_eq!(client.grid, GridSpec::default());
        assert_eq!(server.link_id, "link-1");
        assert_eq!(server.grid.width, 512);
    }

    #[test]
    fn newer_client_minor_is_accepted() {
        let client = HandshakeConfig {
            protocol_version: "1.3".to_string(),
            ..HandshakeConfig::default()
        };
        let (client, server) = negotiate(HandshakeConfig::default(), client);
        assert_eq!(client.unwrap().peer_version, "1.0");
        assert_eq!(server.unwrap().peer_version, "1.3");
    }

    #[test]
    fn grid_geometry_must_match() {
        let client = HandshakeConfig {
            grid: Geometry::new(256, 256).into(),
            ..HandshakeConfig::default()
        };
        assert_rejected(HandshakeConfig::default(), client, "grid mismatch");
    }

    #[test]
    fn sample_scale_must_match() {
        let server = HandshakeConfig {
            grid: GridSpec {
                scale: 255.0,
                ..GridSpec::default()
            },
            ..HandshakeConfig::default()
        };
        assert_rejected(server, HandshakeConfig::default(), "scale 255");
    }

    #[test]
    fn protocol_name_must_match() {
        let client = HandshakeConfig {
            protocol_name: "otherproto".to_string(),
            ..HandshakeConfig::default()
        };
        assert_rejected(HandshakeConfig::default(), client, "unknown protocol");
    }

    #[test]
    fn older_client_is_rejected() {
        let server = HandshakeConfig {
            protocol_version: "2.0".to_string(),
            ..HandshakeConfig::default()
        };
        assert_rejected(server, HandshakeConfig::default(), "incompatible versions");
    }

    #[test]
    fn oversized_hello_is_rejected() {
        let server = HandshakeConfig {
            max_handshake_payload: 16,
            ..HandshakeConfig::default()
        };
        assert_rejected(server, HandshakeConfig::default(), "too large");
    }

    #[test]
    fn garbage_hello_is_a_json_error() {
        let (left, right) = UnixStream::pair().unwrap();
        MessageWriter::new(left).send(HELLO, b"{not-json").unwrap();

        let mut reader = MessageReader::new(right.try_clone().unwrap());
        let mut writer = MessageWriter::new(right);
        let result = handshake_server(&mut reader, &mut writer, "link-6");
        assert!(matches!(result, Err(ChannelError::Json(_))));
    }

    #[test]
    fn data_before_hello_is_rejected() {
        let (left, right) = UnixStream::pair().unwrap();
        MessageWriter::new(left).send(IMAGE, b"{}").unwrap();

        let mut reader = MessageReader::new(right.try_clone().unwrap());
        let mut writer = MessageWriter::new(right);
        let result = handshake_server(&mut reader, &mut writer, "link-7");
        assert!(matches!(result, Err(ChannelError::HandshakeFailed(msg)) if msg.contains("IMAGE")));
    }

    struct SilentPeer;

    impl Read for SilentPeer {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::TimedOut))
        }
    }

    #[test]
    fn silent_server_times_out() {
        let mut reader = MessageReader::new(SilentPeer);
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        let config = HandshakeConfig {
            timeout: Duration::from_millis(25),
            ..HandshakeConfig::default()
        };

        let result = handshake_client_with_config(&mut reader, &mut writer, &config);
        assert!(matches!(result, Err(ChannelError::Timeout(_))));
    }

    #[test]
    fn versions_parse_as_major_minor() {
        let v = |s: &str| s.parse::<ProtocolVersion>();
        assert_eq!(v("1.2").unwrap(), ProtocolVersion { major: 1, minor: 2 });
        assert!(v("1").is_err());
        assert!(v("1.x").is_err());
        assert!(v("1.0.0").is_err());
        assert!(v("").is_err());

        let server = v("1.1").unwrap();
        assert!(server.accepts_client(v("1.1").unwrap()));
        assert!(server.accepts_client(v("1.4").unwrap()));
        assert!(!server.accepts_client(v("1.0").unwrap()));
        assert!(!server.accepts_client(v("2.1").unwrap()));
    }
}
