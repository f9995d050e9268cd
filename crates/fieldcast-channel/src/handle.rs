use fieldcast_transport::UnixDomainSocket;

use crate::descriptor::{Descriptor, PublishedDescriptor};
use crate::endpoint::Endpoint;
use crate::error::{ChannelError, Result};

/// Lifecycle of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No rendezvous happened; the session runs without a peer.
    Unconnected,
    Connected,
    /// Teardown in progress.
    Disconnecting,
    /// Terminal. Nothing owned by the handle is reused.
    Disconnected,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Unconnected => "unconnected",
            LinkState::Connected => "connected",
            LinkState::Disconnecting => "disconnecting",
            LinkState::Disconnected => "disconnected",
        }
    }
}

/// Owns everything a rendezvous produced: the descriptor, the endpoint and,
/// on the accepting side, the listening socket and the published file.
#[derive(Debug)]
pub struct ConnectionHandle {
    state: LinkState,
    descriptor: Option<Descriptor>,
    link_id: Option<String>,
    endpoint: Option<Endpoint>,
    acceptor: Option<UnixDomainSocket>,
    published: Option<PublishedDescriptor>,
}

impl ConnectionHandle {
    /// A handle that never connected.
    pub fn unconnected() -> Self {
        Self {
            state: LinkState::Unconnected,
            descriptor: None,
            link_id: None,
            endpoint: None,
            acceptor: None,
            published: None,
        }
    }

    /// A connected handle around an already established endpoint.
    pub fn from_endpoint(endpoint: Endpoint, link_id: impl Into<String>) -> Self {
        Self {
            state: LinkState::Connected,
            descriptor: None,
            link_id: Some(link_id.into()),
            endpoint: Some(endpoint),
            acceptor: None,
            published: None,
        }
    }

    pub(crate) fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub(crate) fn with_acceptor(
        mut self,
        acceptor: UnixDomainSocket,
        published: PublishedDescriptor,
    ) -> Self {
        self.acceptor = Some(acceptor);
        self.published = Some(published);
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref()
    }

    pub fn link_id(&self) -> Option<&str> {
        self.link_id.as_deref()
    }

    /// The live endpoint, while connected or tearing down.
    pub fn endpoint_mut(&mut self) -> Result<&mut Endpoint> {
        match self.state {
            LinkState::Connected | LinkState::Disconnecting => {
                self.endpoint.as_mut().ok_or(ChannelError::NotConnected)
            }
            LinkState::Unconnected | LinkState::Disconnected => Err(ChannelError::NotConnected),
        }
    }

    /// Enter `Disconnecting`. Only meaningful from `Connected`.
    pub fn begin_disconnect(&mut self) {
        if self.state == LinkState::Connected {
            tracing::debug!(link_id = self.link_id.as_deref(), "link disconnecting");
            self.state = LinkState::Disconnecting;
        }
    }

    /// Release the endpoint, the listening socket and the published
    /// descriptor. Idempotent; an unconnected handle is left as it is.
    pub fn close(&mut self) {
        match self.state {
            LinkState::Unconnected | LinkState::Disconnected => return,
            LinkState::Connected | LinkState::Disconnecting => {}
        }

        if let Some(mut endpoint) = self.endpoint.take() {
            if let Err(err) = endpoint.shutdown() {
                tracing::debug!(error = %err, "endpoint shutdown failed");
            }
        }
        // Drop removes the socket file when it is still ours.
        self.acceptor.take();
        if let Some(mut published) = self.published.take() {
            published.remove();
        }

        self.state = LinkState::Disconnected;
        tracing::info!(link_id = self.link_id.as_deref(), "link closed");
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}
