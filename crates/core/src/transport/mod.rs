/// Onion transport for a p2p host
///
/// Dials and hosts legacy onion services through a Tor control session:
/// - outbound streams opened by the session, then upgraded
/// - inbound streams accepted from the published service, then upgraded
/// - optional fallback to plain TCP for non-onion peers

mod connection;
mod endpoint;
mod listener;
mod upgrade;

pub use connection::OnionConn;
pub use endpoint::OnionTransport;
pub use listener::OnionListener;
pub use upgrade::{RawUpgrade, Upgrader};

use crate::registry::ProtocolDescriptor;
use async_trait::async_trait;
use multiaddr::Multiaddr;
use onionlink_common::{PeerId, Result};
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream between two peers, addressed by multiaddrs
#[async_trait]
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {
    /// `None` when the local end has no meaningful address
    fn local_multiaddr(&self) -> Option<&Multiaddr>;

    fn remote_multiaddr(&self) -> &Multiaddr;

    async fn close(&mut self) -> Result<()>;
}

/// Source of inbound connections on one address
#[async_trait]
pub trait Listener: Send + Sync {
    type Output: Send + 'static;

    async fn accept(&self) -> Result<Self::Output>;

    fn multiaddr(&self) -> &Multiaddr;

    async fn close(&self) -> Result<()>;
}

/// Capability set a p2p host drives a transport through
#[async_trait]
pub trait Transport: Send + Sync {
    type Output: Send + 'static;
    type Listener: Listener<Output = Self::Output>;

    async fn dial(&self, raddr: &Multiaddr, peer: &PeerId) -> Result<Self::Output>;

    async fn listen(&self, laddr: &Multiaddr) -> Result<Self::Listener>;

    fn can_handle(&self, addr: &Multiaddr) -> bool;

    fn protocols(&self) -> Vec<ProtocolDescriptor>;
}

#[async_trait]
impl Conn for OnionConn {
    fn local_multiaddr(&self) -> Option<&Multiaddr> {
        OnionConn::local_multiaddr(self)
    }

    fn remote_multiaddr(&self) -> &Multiaddr {
        OnionConn::remote_multiaddr(self)
    }

    async fn close(&mut self) -> Result<()> {
        OnionConn::close(self).await
    }
}

#[async_trait]
impl<O: Send + 'static> Listener for OnionListener<O> {
    type Output = O;

    async fn accept(&self) -> Result<O> {
        OnionListener::accept(self).await
    }

    fn multiaddr(&self) -> &Multiaddr {
        OnionListener::multiaddr(self)
    }

    async fn close(&self) -> Result<()> {
        OnionListener::close(self).await
    }
}
