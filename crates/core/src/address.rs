//! Onion address codec
//!
//! Onion addresses travel as multiaddrs of the form `/onion/<host>:<port>`,
//! where `host` is the 16-character base32 encoding of the first ten bytes
//! of the service's identity digest. Validation never fails, only answers
//! yes or no; extraction reports why an address was rejected.

use multiaddr::{Multiaddr, Protocol};
use onionlink_common::config::protocol::{ONION_HOST_LEN, ONION_ID_BYTES};
use onionlink_common::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

const ONION_SCHEME: &str = "/onion/";

/// A parsed onion service address (e.g., "erhkddypoy6qml6h:4003")
///
/// Serialized as its `host:port` string, so deserialization goes through the
/// same validation as parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OnionAddr {
    host: String,
    id: [u8; ONION_ID_BYTES],
    port: u16,
}

impl OnionAddr {
    /// Build an address from the raw identity bytes of a service
    pub fn from_id(id: [u8; ONION_ID_BYTES], port: u16) -> Result<Self> {
        if port == 0 {
            return Err(TransportError::invalid_port("port 0 is out of range"));
        }

        Ok(Self {
            host: data_encoding::BASE32.encode(&id).to_lowercase(),
            id,
            port,
        })
    }

    /// Lower-case base32 host, without the ".onion" suffix
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Virtual port of the service
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Raw identity bytes encoded in the host
    pub fn id(&self) -> &[u8; ONION_ID_BYTES] {
        &self.id
    }

    /// Host with the ".onion" suffix, as resolved by Tor
    pub fn hostname(&self) -> String {
        format!("{}.onion", self.host)
    }

    /// `host.onion:port`, the form handed to a control session dial
    pub fn dial_target(&self) -> String {
        format!("{}:{}", self.hostname(), self.port)
    }

    pub fn to_multiaddr(&self) -> Multiaddr {
        Multiaddr::empty().with(Protocol::Onion(Cow::Owned(self.id), self.port))
    }
}

impl fmt::Display for OnionAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for OnionAddr {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let host_port = strip_scheme(s)?;

        let mut segments = host_port.split(':');
        let (host, port) = match (segments.next(), segments.next(), segments.next()) {
            (Some(host), Some(port), None) => (host, port),
            _ => {
                return Err(TransportError::malformed(format!(
                    "{:?} is not of the form <host>:<port>",
                    s
                )))
            }
        };

        let id = decode_host(host)?;
        let port = parse_port(port)?;

        Ok(Self {
            host: host.to_ascii_lowercase(),
            id,
            port,
        })
    }
}

impl TryFrom<String> for OnionAddr {
    type Error = TransportError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<OnionAddr> for String {
    fn from(addr: OnionAddr) -> Self {
        addr.to_string()
    }
}

impl TryFrom<&Multiaddr> for OnionAddr {
    type Error = TransportError;

    fn try_from(addr: &Multiaddr) -> Result<Self> {
        let mut components = addr.iter();
        match (components.next(), components.next()) {
            (Some(Protocol::Onion(id, port)), None) => Self::from_id(*id, port),
            _ => Err(TransportError::malformed(format!(
                "{} is not an onion multiaddr",
                addr
            ))),
        }
    }
}

impl From<&OnionAddr> for Multiaddr {
    fn from(addr: &OnionAddr) -> Self {
        addr.to_multiaddr()
    }
}

/// Check whether a string is a valid onion address.
///
/// Accepts both `host:port` and `/onion/host:port`. Never fails.
pub fn validate(address: &str) -> bool {
    address.parse::<OnionAddr>().is_ok()
}

/// Extract the lower-cased host and the port from an onion address string
pub fn parse(address: &str) -> Result<(String, u16)> {
    let addr: OnionAddr = address.parse()?;
    Ok((addr.host, addr.port))
}

/// Check whether a multiaddr is exactly one valid onion component
pub fn is_valid_onion_multiaddr(addr: &Multiaddr) -> bool {
    OnionAddr::try_from(addr).is_ok()
}

/// Render a conventional TCP multiaddr as `host:port`.
///
/// Returns `None` for anything other than `/{ip4,ip6,dns,dns4,dns6}/<host>/tcp/<port>`.
pub fn tcp_target(addr: &Multiaddr) -> Option<String> {
    let mut components = addr.iter();

    let host = match components.next()? {
        Protocol::Ip4(ip) => ip.to_string(),
        Protocol::Ip6(ip) => format!("[{}]", ip),
        Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name) => name.to_string(),
        _ => return None,
    };

    let port = match components.next()? {
        Protocol::Tcp(port) => port,
        _ => return None,
    };

    if components.next().is_some() {
        return None;
    }

    Some(format!("{}:{}", host, port))
}

/// Multiaddr of a peer's TCP socket address
pub fn socket_multiaddr(addr: SocketAddr) -> Multiaddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) => Protocol::Ip4(ip),
        IpAddr::V6(ip) => Protocol::Ip6(ip),
    };
    Multiaddr::empty().with(ip).with(Protocol::Tcp(addr.port()))
}

fn strip_scheme(s: &str) -> Result<&str> {
    if let Some(rest) = s.strip_prefix(ONION_SCHEME) {
        if rest.contains('/') {
            return Err(TransportError::malformed(format!(
                "{:?} has more than one component",
                s
            )));
        }
        Ok(rest)
    } else if s.starts_with('/') {
        Err(TransportError::malformed(format!("{:?} is not an onion multiaddr", s)))
    } else {
        Ok(s)
    }
}

fn decode_host(host: &str) -> Result<[u8; ONION_ID_BYTES]> {
    if host.len() != ONION_HOST_LEN {
        return Err(TransportError::malformed(format!(
            "onion host {:?} must be {} characters",
            host, ONION_HOST_LEN
        )));
    }

    let bytes = data_encoding::BASE32
        .decode(host.to_ascii_uppercase().as_bytes())
        .map_err(|_| TransportError::malformed(format!("onion host {:?} is not base32", host)))?;

    let mut id = [0u8; ONION_ID_BYTES];
    if bytes.len() != id.len() {
        return Err(TransportError::malformed(format!(
            "onion host {:?} decodes to {} bytes",
            host,
            bytes.len()
        )));
    }
    id.copy_from_slice(&bytes);
    Ok(id)
}

fn parse_port(port: &str) -> Result<u16> {
    let value: u64 = port
        .parse()
        .map_err(|_| TransportError::invalid_port(format!("{:?} is not a number", port)))?;

    match u16::try_from(value) {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(TransportError::invalid_port(format!(
            "{} is outside 1..=65535",
            value
        ))),
    }
}
