//! Network address utilities
//!
//! Helpers for parsing the listen/divert/return/target address pairs used by
//! proxyspec declarations. Addresses are given as separate host and port
//! strings in the configuration grammar, so this module works on those rather
//! than on `host:port` combos.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use super::error::{ProxyError, Result};

/// Address family of a parsed endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddrFamily {
    /// Either family is acceptable
    #[default]
    Unspec,
    /// IPv4
    Inet,
    /// IPv6
    Inet6,
}

impl AddrFamily {
    fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddrFamily::Inet,
            IpAddr::V6(_) => AddrFamily::Inet6,
        }
    }
}

/// Determine the address family of a textual address
///
/// Returns `Unspec` for strings that do not parse as a literal IP address.
pub fn get_af(addr: &str) -> AddrFamily {
    match IpAddr::from_str(addr) {
        Ok(ip) => AddrFamily::of(&ip),
        Err(_) => AddrFamily::Unspec,
    }
}

/// Parse a host and port string pair into a socket address
///
/// `af` constrains the accepted family; `Unspec` accepts both. The detected
/// family is returned together with the address so callers can propagate it
/// to dependent addresses (e.g. a listener's explicit target address).
pub fn parse_sockaddr(addr: &str, port: &str, af: AddrFamily) -> Result<(SocketAddr, AddrFamily)> {
    let ip = IpAddr::from_str(addr).map_err(|e| {
        ProxyError::Addr(format!("cannot parse address '{}': {}", addr, e))
    })?;
    let port: u16 = port.parse().map_err(|_| {
        ProxyError::Addr(format!("invalid port '{}'", port))
    })?;

    let found = AddrFamily::of(&ip);
    if af != AddrFamily::Unspec && af != found {
        return Err(ProxyError::Addr(format!(
            "address '{}' does not match the expected address family",
            addr
        )));
    }
    Ok((SocketAddr::new(ip, port), found))
}
