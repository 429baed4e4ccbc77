//! Onion-service transport for p2p hosts.
//!
//! Dials and hosts legacy (v2) onion services through an authenticated Tor
//! control session, handing every connection to an upgrader.

pub mod address;
pub mod control;
pub mod keys;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use address::{is_valid_onion_multiaddr, parse, validate, OnionAddr};
pub use control::ControlSession;
pub use keys::{KeyError, KeyStore, OnionKey};
pub use registry::{register_protocols, ProtocolDescriptor};

// Re-export transport types
pub use transport::{
    Conn, Listener, OnionConn, OnionListener, OnionTransport, RawUpgrade, Transport, Upgrader,
};

pub use multiaddr::{Multiaddr, Protocol};
pub use onionlink_common::{
    ControlAuth, KeyMode, PeerId, Result, SessionError, TransportConfig, TransportError,
};
