use std::net::IpAddr;

use serde::Serialize;
use shared::error::*;
use std::fmt;

/// Indicates the type of network in use: UDP over IPv4 or IPv6.
///
/// TCP candidates are out of scope for this agent (UDP/DTLS only), so only the
/// two UDP variants are ever produced; the enum still distinguishes the address
/// family since priority/local-preference computation is address-family aware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum NetworkType {
    #[serde(rename = "udp4")]
    Udp4,
    #[serde(rename = "udp6")]
    Udp6,
}

impl Default for NetworkType {
    fn default() -> Self {
        Self::Udp4
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Udp4 => "udp4",
            Self::Udp6 => "udp6",
        };
        write!(f, "{s}")
    }
}

impl NetworkType {
    /// Returns whether this network type is IPv4.
    #[must_use]
    pub const fn is_ipv4(self) -> bool {
        matches!(self, Self::Udp4)
    }

    /// Returns whether this network type is IPv6.
    #[must_use]
    pub const fn is_ipv6(self) -> bool {
        matches!(self, Self::Udp6)
    }

    /// Local preference per RFC 8445 section 4.1.2.2 for the "only one
    /// interface" case: 40000 for IPv4 bases, 50000 for IPv6 bases.
    #[must_use]
    pub const fn default_local_preference(self) -> u16 {
        match self {
            Self::Udp4 => 40_000,
            Self::Udp6 => 50_000,
        }
    }
}

/// Determines the `NetworkType` for a network/address pair. `network` is
/// expected to be `"udp"`, `"udp4"`, or `"udp6"`; anything else is rejected
/// since TCP ICE transports are out of scope.
pub fn determine_network_type(network: &str, ip: &IpAddr) -> Result<NetworkType> {
    let net = network.to_lowercase();
    if net != "udp" && net != "udp4" && net != "udp6" {
        return Err(Error::ErrDetermineNetworkType);
    }
    Ok(match ip {
        IpAddr::V4(_) => NetworkType::Udp4,
        IpAddr::V6(_) => NetworkType::Udp6,
    })
}
