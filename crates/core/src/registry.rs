//! Process-wide registration of the address protocols the transport speaks
//!
//! The onion and TCP protocol descriptors are installed once per process.
//! Registration is idempotent; the transport refuses to start before it.

use once_cell::sync::OnceCell;
use onionlink_common::config::protocol::{ONION_CODE, TCP_CODE};
use tracing::debug;

/// Name and multiaddr code of a protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolDescriptor {
    pub name: &'static str,
    pub code: u32,
}

/// `/onion/<host>:<port>`
pub const ONION: ProtocolDescriptor = ProtocolDescriptor {
    name: "onion",
    code: ONION_CODE,
};

/// `/tcp/<port>`
pub const TCP: ProtocolDescriptor = ProtocolDescriptor {
    name: "tcp",
    code: TCP_CODE,
};

#[derive(Debug)]
struct ProtocolTable {
    onion: ProtocolDescriptor,
    tcp: ProtocolDescriptor,
}

static REGISTRY: OnceCell<ProtocolTable> = OnceCell::new();

/// Install the onion and TCP protocol descriptors.
///
/// Returns `true` if this call performed the registration, `false` if it
/// had already happened.
pub fn register_protocols() -> bool {
    let mut installed = false;
    REGISTRY.get_or_init(|| {
        installed = true;
        debug!(
            "Registered protocols {}={} and {}={}",
            ONION.name, ONION.code, TCP.name, TCP.code
        );
        ProtocolTable {
            onion: ONION,
            tcp: TCP,
        }
    });
    installed
}

pub fn is_registered() -> bool {
    REGISTRY.get().is_some()
}

/// Protocols a transport handles, given whether it is onion-only.
///
/// Empty until [`register_protocols`] has run.
pub fn handled_protocols(only_onion: bool) -> Vec<ProtocolDescriptor> {
    match REGISTRY.get() {
        Some(table) if only_onion => vec![table.onion],
        Some(table) => vec![table.onion, table.tcp],
        None => Vec::new(),
    }
}

/// Look up a registered protocol by name
pub fn lookup(name: &str) -> Option<ProtocolDescriptor> {
    let table = REGISTRY.get()?;
    [table.onion, table.tcp]
        .into_iter()
        .find(|protocol| protocol.name == name)
}
