//! IPv4 address validation and server endpoints.
//!
//! Every server and client constructor validates its address here before
//! touching a socket. Only IPv4 is accepted.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use crate::error::{BindError, ConfigError};

/// Highest port of the well-known range. Ports `0..=RESERVED_PORT_MAX` are
/// rejected by servers.
pub const RESERVED_PORT_MAX: u16 = 1024;

/// Parse `input` as an IPv4 address.
///
/// Surrounding whitespace is ignored. IPv6 literals fail with
/// [`ConfigError::NotIpv4`], anything else unparsable with
/// [`ConfigError::InvalidAddress`].
pub fn parse_ipv4(input: &str) -> Result<Ipv4Addr, ConfigError> {
    let trimmed = input.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(addr) => ensure_ipv4(addr),
        Err(_) => Err(ConfigError::InvalidAddress(input.to_string())),
    }
}

/// Accept an already-parsed address only if it is IPv4.
pub fn ensure_ipv4(addr: IpAddr) -> Result<Ipv4Addr, ConfigError> {
    match addr {
        IpAddr::V4(v4) => Ok(v4),
        IpAddr::V6(_) => Err(ConfigError::NotIpv4(addr)),
    }
}

/// Whether `input` parses as an IPv4 address.
pub fn is_ipv4(input: &str) -> bool {
    parse_ipv4(input).is_ok()
}

/// Whether `port` lies in the reserved well-known range.
pub fn is_reserved_port(port: u16) -> bool {
    port <= RESERVED_PORT_MAX
}

/// The address and port a server listens on.
///
/// Construction enforces the IPv4 and port rules, so every `ServerEndpoint`
/// is bindable as far as validation can tell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServerEndpoint {
    address: Ipv4Addr,
    port: u16,
}

impl ServerEndpoint {
    /// Create an endpoint, rejecting reserved ports.
    pub fn new(address: Ipv4Addr, port: u16) -> Result<Self, BindError> {
        if is_reserved_port(port) {
            return Err(BindError::PortReserved(port));
        }
        Ok(Self { address, port })
    }

    /// Create an endpoint from an address string and port.
    pub fn parse(address: &str, port: u16) -> Result<Self, BindError> {
        let address = parse_ipv4(address)?;
        Self::new(address, port)
    }

    /// Create an endpoint on the loopback address.
    pub fn loopback(port: u16) -> Result<Self, BindError> {
        Self::new(Ipv4Addr::LOCALHOST, port)
    }

    /// The IPv4 address.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The endpoint as a socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }
}

impl TryFrom<SocketAddr> for ServerEndpoint {
    type Error = BindError;

    fn try_from(addr: SocketAddr) -> Result<Self, Self::Error> {
        let address = ensure_ipv4(addr.ip())?;
        Self::new(address, addr.port())
    }
}

impl FromStr for ServerEndpoint {
    type Err = BindError;

    /// Parse `<ipv4>:<port>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEndpoint(s.to_string()))?;
        Self::try_from(addr)
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
