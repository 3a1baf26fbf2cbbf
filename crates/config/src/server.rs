use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
};

use crate::error::{ConfigError, ConfigResult};

/// Identity of one backend.
///
/// Two configs are the same backend when address and port match; every
/// strategy attaches, detaches and signals by this equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerConfig {
    address: String,
    ip: Ipv4Addr,
    port: u16,
}

impl ServerConfig {
    pub fn new(address: impl Into<String>, port: u16) -> ConfigResult<Self> {
        let address = address.into();
        let ip = parse_ipv4(&address).ok_or_else(|| ConfigError::InvalidAddress(address.clone()))?;
        Ok(Self { address, ip, port })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip, self.port))
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Strict dotted-quad parsing: four non-empty decimal parts in 0..=255,
/// no sign, no whitespace, and no leading zero unless the part is "0".
pub fn parse_ipv4(address: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = address.split('.');

    for octet in octets.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if part.len() > 1 && part.starts_with('0') {
            return None;
        }
        *octet = part.parse::<u8>().ok()?;
    }

    if parts.next().is_some() {
        return None;
    }

    Some(Ipv4Addr::from(octets))
}

pub fn is_valid_ipv4(address: &str) -> bool {
    parse_ipv4(address).is_some()
}
