//! Control-port session abstraction
//!
//! The transport never speaks the Tor control protocol itself. It drives an
//! authenticated session through this trait, which a controller library (or
//! a test double) implements.

use crate::keys::OnionKey;
use async_trait::async_trait;
use onionlink_common::{ControlAuth, SessionError};
use tokio::net::{TcpListener, TcpStream};

/// Connection to a Tor control port.
///
/// Shared by the transport and every listener it creates; implementations
/// must tolerate concurrent calls.
#[async_trait]
pub trait ControlSession: Send + Sync + 'static {
    /// Authenticate the session with the given credentials
    async fn authenticate(&self, auth: &ControlAuth) -> Result<(), SessionError>;

    /// Publish the onion service of `key` on virtual port `port`.
    ///
    /// Returns a local listener that Tor forwards service connections to.
    async fn listen(&self, port: u16, key: &OnionKey) -> Result<TcpListener, SessionError>;

    /// Open a stream through Tor to `address` (`host:port`, where host may
    /// be a `.onion` name).
    async fn dial(&self, network: &str, address: &str) -> Result<TcpStream, SessionError>;

    /// Withdraw a service previously published with [`ControlSession::listen`]
    async fn remove_listener(&self, service_id: &str) -> Result<(), SessionError>;

    /// End the session
    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}
