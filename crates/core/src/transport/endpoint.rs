use super::connection::OnionConn;
use super::listener::OnionListener;
use super::upgrade::{RawUpgrade, Upgrader};
use super::Transport;
use crate::address::{self, OnionAddr};
use crate::control::ControlSession;
use crate::keys::KeyStore;
use crate::registry::{self, ProtocolDescriptor};
use async_trait::async_trait;
use multiaddr::Multiaddr;
use onionlink_common::{KeyMode, PeerId, Result, TransportConfig, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transport that dials and hosts onion services through a control session
pub struct OnionTransport<S, U = RawUpgrade> {
    /// Authenticated control session, shared with every listener
    session: Arc<S>,

    /// Service keys, read once at construction
    keys: Arc<KeyStore>,

    /// Upgrades raw connections in both directions
    upgrader: Arc<U>,

    /// Refuse plain TCP addresses
    only_onion: bool,

    closed: AtomicBool,
}

impl<S: ControlSession, U: Upgrader> OnionTransport<S, U> {
    /// Create a transport over an unauthenticated session.
    ///
    /// Authenticates with `config.auth`. Fails with
    /// [`TransportError::NotRegistered`] if the onion protocols were never
    /// registered.
    pub async fn new(session: S, keys: KeyStore, config: &TransportConfig, upgrader: U) -> Result<Self> {
        if !registry::is_registered() {
            return Err(TransportError::NotRegistered);
        }

        session.authenticate(&config.auth).await?;

        info!(
            "Authenticated with control port {}/{} ({} onion key(s), onion-only: {})",
            config.control_network,
            config.control_addr,
            keys.len(),
            config.only_onion
        );

        Ok(Self {
            session: Arc::new(session),
            keys: Arc::new(keys),
            upgrader: Arc::new(upgrader),
            only_onion: config.only_onion,
            closed: AtomicBool::new(false),
        })
    }

    /// Load keys as `config.key_mode` says, then create the transport
    pub async fn from_config(session: S, config: &TransportConfig, upgrader: U) -> Result<Self> {
        let dir = config.key_dir.clone();
        let mode = config.key_mode;

        let keys = tokio::task::spawn_blocking(move || match mode {
            KeyMode::LoadOnly => KeyStore::load(&dir),
            KeyMode::GenerateIfEmpty => KeyStore::load_or_generate(&dir),
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))??;

        Self::new(session, keys, config, upgrader).await
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn is_onion_only(&self) -> bool {
        self.only_onion
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// End the control session. Listeners already created stay up until
    /// closed; closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.session.close().await {
            warn!("Failed to close control session: {}", e);
        }

        info!("Onion transport closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::TransportClosed);
        }
        Ok(())
    }

    /// `host:port` to hand to the session for a remote address
    fn dial_target(&self, raddr: &Multiaddr) -> Result<String> {
        if let Some(target) = address::tcp_target(raddr) {
            if self.only_onion {
                return Err(TransportError::Unsupported(format!(
                    "{} (transport is onion-only)",
                    raddr
                )));
            }
            return Ok(target);
        }

        Ok(OnionAddr::try_from(raddr)?.dial_target())
    }
}

#[async_trait]
impl<S: ControlSession, U: Upgrader> Transport for OnionTransport<S, U> {
    type Output = U::Output;
    type Listener = OnionListener<U::Output>;

    async fn dial(&self, raddr: &Multiaddr, peer: &PeerId) -> Result<U::Output> {
        self.ensure_open()?;

        let target = self.dial_target(raddr)?;
        debug!("Dialing {} ({}) for peer {}", raddr, target, peer.short_hex());

        let stream = self.session.dial("tcp", &target).await?;
        let conn = OnionConn::outbound(stream, raddr.clone());

        let output = self
            .upgrader
            .upgrade_outbound(conn, peer)
            .await
            .map_err(TransportError::Upgrade)?;

        debug!("Connected to {}", raddr);
        Ok(output)
    }

    async fn listen(&self, laddr: &Multiaddr) -> Result<Self::Listener> {
        self.ensure_open()?;

        if address::tcp_target(laddr).is_some() {
            return Err(TransportError::Unsupported(format!(
                "{} (only onion services can be hosted)",
                laddr
            )));
        }

        let addr = OnionAddr::try_from(laddr)?;
        let key = self
            .keys
            .lookup(addr.host())
            .ok_or_else(|| TransportError::KeyNotFound(addr.host().to_string()))?;

        let raw = self.session.listen(addr.port(), key).await?;
        info!("Published onion service {}", laddr);

        Ok(OnionListener::spawn(
            raw,
            &addr,
            self.session.clone(),
            self.upgrader.clone(),
        ))
    }

    fn can_handle(&self, addr: &Multiaddr) -> bool {
        address::is_valid_onion_multiaddr(addr)
            || (!self.only_onion && address::tcp_target(addr).is_some())
    }

    fn protocols(&self) -> Vec<ProtocolDescriptor> {
        registry::handled_protocols(self.only_onion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::OnionKey;
    use crate::registry::{register_protocols, ONION, TCP};
    use crate::testing::{fixture_key, MockSession, FIXTURE_KEY_PEM};
    use onionlink_common::{ControlAuth, SessionError};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const SERVICE: &str = "/onion/purykhkju3itporr:4003";

    fn peer() -> PeerId {
        PeerId::from_bytes(vec![7u8; 34]).unwrap()
    }

    fn fixture_store() -> KeyStore {
        let mut keys = KeyStore::new();
        keys.insert(fixture_key());
        keys
    }

    async fn transport(only_onion: bool) -> (OnionTransport<MockSession>, MockSession) {
        register_protocols();

        let session = MockSession::new();
        let config = TransportConfig::default().with_only_onion(only_onion);
        let transport = OnionTransport::new(session.clone(), fixture_store(), &config, RawUpgrade)
            .await
            .unwrap();
        (transport, session)
    }

    #[tokio::test]
    async fn test_listen_dial_accept() {
        let (transport, session) = transport(true).await;
        let addr: Multiaddr = SERVICE.parse().unwrap();

        let listener = transport.listen(&addr).await.unwrap();
        assert_eq!(listener.multiaddr(), &addr);
        assert_eq!(session.count("ADD_ONION RSA1024:"), 1);

        let mut outbound = transport.dial(&addr, &peer()).await.unwrap();
        assert!(outbound.local_multiaddr().is_none());
        assert_eq!(outbound.remote_multiaddr(), &addr);
        assert!(session
            .commands()
            .contains(&"DIAL tcp purykhkju3itporr.onion:4003".to_string()));

        let mut inbound = listener.accept().await.unwrap();
        assert_eq!(inbound.local_multiaddr(), Some(&addr));

        outbound.write_all(b"hello over tor").await.unwrap();
        let mut buf = [0u8; 14];
        inbound.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello over tor");

        inbound.write_all(b"ack").await.unwrap();
        let mut ack = [0u8; 3];
        outbound.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, b"ack");

        listener.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_without_key_makes_no_session_call() {
        let (transport, session) = transport(true).await;
        let addr: Multiaddr = "/onion/erhkddypoy6qml6h:4003".parse().unwrap();

        let err = transport.listen(&addr).await.err().unwrap();
        assert!(matches!(err, TransportError::KeyNotFound(ref id) if id == "erhkddypoy6qml6h"));
        assert_eq!(session.commands(), vec!["AUTHENTICATE".to_string()]);
    }

    #[tokio::test]
    async fn test_listen_rejects_non_onion() {
        let (transport, session) = transport(false).await;

        let tcp: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        assert!(matches!(
            transport.listen(&tcp).await.err().unwrap(),
            TransportError::Unsupported(_)
        ));

        let udp: Multiaddr = "/ip4/127.0.0.1/udp/4001".parse().unwrap();
        assert!(matches!(
            transport.listen(&udp).await.err().unwrap(),
            TransportError::MalformedAddress(_)
        ));

        assert_eq!(session.count("ADD_ONION"), 0);
    }

    #[tokio::test]
    async fn test_listen_surfaces_session_failure() {
        let (transport, session) = transport(true).await;
        session.fail_listen();

        let err = transport.listen(&SERVICE.parse().unwrap()).await.err().unwrap();
        assert!(matches!(err, TransportError::Session(SessionError::Command { .. })));
    }

    #[tokio::test]
    async fn test_closed_listener_returns_closed_error() {
        let (transport, _session) = transport(true).await;
        let listener = transport.listen(&SERVICE.parse().unwrap()).await.unwrap();

        listener.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("accept must not hang on a closed listener");
        assert!(result.err().unwrap().is_closed_listener());
    }

    #[tokio::test]
    async fn test_dial_unknown_service() {
        let (transport, _session) = transport(true).await;
        let addr: Multiaddr = "/onion/erhkddypoy6qml6h:4003".parse().unwrap();

        let err = transport.dial(&addr, &peer()).await.err().unwrap();
        assert!(matches!(err, TransportError::Session(_)));
    }

    #[tokio::test]
    async fn test_onion_only_refuses_tcp() {
        let (transport, session) = transport(true).await;
        let tcp: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();

        assert!(!transport.can_handle(&tcp));
        let err = transport.dial(&tcp, &peer()).await.err().unwrap();
        assert!(matches!(err, TransportError::Unsupported(_)));
        assert_eq!(session.count("DIAL"), 0);
    }

    #[tokio::test]
    async fn test_mixed_mode_dials_tcp() {
        let (transport, session) = transport(false).await;

        let server = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let addr: Multiaddr = format!("/ip4/127.0.0.1/tcp/{}", port).parse().unwrap();

        assert!(transport.can_handle(&addr));
        let conn = transport.dial(&addr, &peer()).await.unwrap();
        assert!(conn.local_multiaddr().is_none());
        assert_eq!(conn.remote_multiaddr(), &addr);

        let _ = server.accept().await.unwrap();
        assert!(session
            .commands()
            .contains(&format!("DIAL tcp 127.0.0.1:{}", port)));
    }

    #[tokio::test]
    async fn test_dial_rejects_unusable_addresses() {
        let (transport, _session) = transport(false).await;

        let udp: Multiaddr = "/ip4/127.0.0.1/udp/4001".parse().unwrap();
        assert!(!transport.can_handle(&udp));
        assert!(matches!(
            transport.dial(&udp, &peer()).await.err().unwrap(),
            TransportError::MalformedAddress(_)
        ));
    }

    #[tokio::test]
    async fn test_can_handle_and_protocols() {
        let (onion_only, _) = transport(true).await;
        let (mixed, _) = transport(false).await;

        let onion: Multiaddr = SERVICE.parse().unwrap();
        assert!(onion_only.can_handle(&onion));
        assert!(mixed.can_handle(&onion));

        let stacked: Multiaddr = format!("{}/tcp/80", SERVICE).parse().unwrap();
        assert!(!onion_only.can_handle(&stacked));

        assert_eq!(onion_only.protocols(), vec![ONION]);
        assert_eq!(mixed.protocols(), vec![ONION, TCP]);
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        register_protocols();

        let session = MockSession::with_password("secret");
        let err = OnionTransport::new(session, KeyStore::new(), &TransportConfig::default(), RawUpgrade)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Session(SessionError::Authentication(_))));

        let session = MockSession::with_password("secret");
        let config = TransportConfig::default().with_auth(ControlAuth::Password {
            password: "secret".to_string(),
        });
        assert!(OnionTransport::new(session, KeyStore::new(), &config, RawUpgrade)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_close_transport() {
        let (transport, session) = transport(true).await;

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.is_closed());
        assert!(session.is_closed());
        assert_eq!(session.count("QUIT"), 1);

        let addr: Multiaddr = SERVICE.parse().unwrap();
        assert!(matches!(
            transport.dial(&addr, &peer()).await.err().unwrap(),
            TransportError::TransportClosed
        ));
        assert!(matches!(
            transport.listen(&addr).await.err().unwrap(),
            TransportError::TransportClosed
        ));
    }

    #[tokio::test]
    async fn test_from_config_loads_keys() {
        register_protocols();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("purykhkju3itporr.onion_key"), FIXTURE_KEY_PEM).unwrap();

        let config = TransportConfig::default().with_key_dir(dir.path());
        let transport = OnionTransport::from_config(MockSession::new(), &config, RawUpgrade)
            .await
            .unwrap();
        assert!(transport.keys().contains("purykhkju3itporr"));

        let missing = TransportConfig::default().with_key_dir(dir.path().join("missing"));
        let err = OnionTransport::from_config(MockSession::new(), &missing, RawUpgrade)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::KeyDirectory { .. }));
    }

    #[tokio::test]
    async fn test_from_config_generates_key() {
        register_protocols();

        let dir = tempfile::tempdir().unwrap();
        let config = TransportConfig::default()
            .with_key_dir(dir.path())
            .with_key_mode(KeyMode::GenerateIfEmpty);

        let transport = OnionTransport::from_config(MockSession::new(), &config, RawUpgrade)
            .await
            .unwrap();
        assert_eq!(transport.keys().len(), 1);

        let id = transport.keys().identities()[0].to_string();
        let key: &OnionKey = transport.keys().lookup(&id).unwrap();
        let addr = key.onion_addr(9000).unwrap().to_multiaddr();

        let listener = transport.listen(&addr).await.unwrap();
        assert_eq!(listener.multiaddr(), &addr);
        listener.close().await.unwrap();
    }

    /// Tags each connection with the peer it was dialed for
    struct Tagging;

    #[async_trait]
    impl Upgrader for Tagging {
        type Output = (Option<PeerId>, OnionConn);

        async fn upgrade_outbound(
            &self,
            conn: OnionConn,
            peer: &PeerId,
        ) -> anyhow::Result<Self::Output> {
            Ok((Some(peer.clone()), conn))
        }

        async fn upgrade_inbound(&self, conn: OnionConn) -> anyhow::Result<Self::Output> {
            Ok((None, conn))
        }
    }

    #[tokio::test]
    async fn test_upgrader_sees_dialed_peer() {
        register_protocols();

        let config = TransportConfig::default();
        let transport = OnionTransport::new(MockSession::new(), fixture_store(), &config, Tagging)
            .await
            .unwrap();
        let addr: Multiaddr = SERVICE.parse().unwrap();

        let listener = transport.listen(&addr).await.unwrap();
        let (tag, _conn) = transport.dial(&addr, &peer()).await.unwrap();
        assert_eq!(tag, Some(peer()));

        let (tag, conn) = listener.accept().await.unwrap();
        assert_eq!(tag, None);
        assert_eq!(conn.local_multiaddr(), Some(&addr));
    }
}
