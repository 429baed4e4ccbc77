use super::connection::OnionConn;
use async_trait::async_trait;
use onionlink_common::PeerId;

/// Secures and multiplexes raw onion connections.
///
/// Outbound upgrades know which peer was dialed; inbound ones learn the
/// remote identity from the handshake.
#[async_trait]
pub trait Upgrader: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn upgrade_outbound(&self, conn: OnionConn, peer: &PeerId) -> anyhow::Result<Self::Output>;

    async fn upgrade_inbound(&self, conn: OnionConn) -> anyhow::Result<Self::Output>;
}

/// Hands raw connections through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct RawUpgrade;

#[async_trait]
impl Upgrader for RawUpgrade {
    type Output = OnionConn;

    async fn upgrade_outbound(&self, conn: OnionConn, _peer: &PeerId) -> anyhow::Result<OnionConn> {
        Ok(conn)
    }

    async fn upgrade_inbound(&self, conn: OnionConn) -> anyhow::Result<OnionConn> {
        Ok(conn)
    }
}
