//! Normalized dual-stack address value.
//!
//! # Responsibilities
//! - Store IPv4 and IPv6 endpoints in one 128-bit form (IPv4 is IPv4-mapped)
//! - Render canonical text forms with optional port and brackets
//! - Classify the address into a [`NetworkType`], memoized until mutation
//! - Enumerate addresses bound to local interfaces
//!
//! # Design Decisions
//! - Equality and hashing use the binary form only; port, protocol and
//!   interface name never take part
//! - Interface enumeration failures surface as an empty list from
//!   [`Address::local_addresses`] but as an error from
//!   [`Address::is_local_interface_address`]

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};
use crate::net::endpoint;

/// Transport protocol tag carried by an [`Address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(NetError::Parameter(format!("unknown protocol '{}'", other))),
        }
    }
}

/// Network classification of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkType {
    /// The unspecified address (`0.0.0.0` or `::`).
    Any,
    Loopback,
    /// RFC 1918, carrier-grade NAT and IPv6 unique-local ranges.
    Private,
    /// Link-local unicast and link-scoped multicast.
    LinkLocal,
    Multicast,
    Public,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkType::Any => "any",
            NetworkType::Loopback => "loopback",
            NetworkType::Private => "private",
            NetworkType::LinkLocal => "link-local",
            NetworkType::Multicast => "multicast",
            NetworkType::Public => "public",
        };
        f.write_str(name)
    }
}

/// An IPv4 or IPv6 endpoint in canonical 128-bit form.
#[derive(Debug, Clone)]
pub struct Address {
    octets: [u8; 16],
    port: u16,
    protocol: Protocol,
    interface: Option<String>,
    network: OnceLock<NetworkType>,
}

impl Address {
    /// Build an address from an IP, port and protocol.
    pub fn new(ip: IpAddr, port: u16, protocol: Protocol) -> Self {
        Self {
            octets: to_octets(ip),
            port,
            protocol,
            interface: None,
            network: OnceLock::new(),
        }
    }

    pub fn from_ipv4(addr: SocketAddrV4) -> Self {
        Self::new(IpAddr::V4(*addr.ip()), addr.port(), Protocol::Tcp)
    }

    pub fn from_ipv6(addr: SocketAddrV6) -> Self {
        Self::new(IpAddr::V6(*addr.ip()), addr.port(), Protocol::Tcp)
    }

    /// Parse and resolve `text` (`host`, `host:port`, `:port`, `[v6]:port`).
    ///
    /// Missing parts fall back to `default_address` / `default_port`. When the
    /// host resolves to several addresses the first one is returned.
    pub fn parse(
        text: &str,
        default_address: &str,
        default_port: Option<u16>,
        protocol: Option<Protocol>,
    ) -> NetResult<Self> {
        endpoint::resolve(text, default_address, default_port, protocol)?
            .into_iter()
            .next()
            .ok_or_else(|| NetError::InvalidArgument(format!("'{}' resolved to no address", text)))
    }

    /// `true` iff the high 80 bits are zero and bits 80..96 are all ones.
    pub fn is_ipv4(&self) -> bool {
        self.octets[..10].iter().all(|b| *b == 0) && self.octets[10] == 0xff && self.octets[11] == 0xff
    }

    pub fn is_ipv6(&self) -> bool {
        !self.is_ipv4()
    }

    /// The raw 128-bit form.
    pub fn octets(&self) -> [u8; 16] {
        self.octets
    }

    pub fn ip(&self) -> IpAddr {
        let v6 = Ipv6Addr::from(self.octets);
        match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Interface name, set only for addresses from [`Address::local_addresses`].
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn set_ip(&mut self, ip: IpAddr) {
        self.octets = to_octets(ip);
        self.network = OnceLock::new();
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
        self.network = OnceLock::new();
    }

    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.protocol = protocol;
        self.network = OnceLock::new();
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip(), self.port)
    }

    /// Dotted-quad form. Fails for addresses that are not IPv4.
    pub fn to_ipv4_string(&self, include_port: bool) -> NetResult<String> {
        let IpAddr::V4(v4) = self.ip() else {
            return Err(NetError::InvalidArgument(format!(
                "{} is not an IPv4 address",
                Ipv6Addr::from(self.octets)
            )));
        };
        Ok(if include_port {
            format!("{}:{}", v4, self.port)
        } else {
            v4.to_string()
        })
    }

    /// IPv6 form; IPv4 addresses render as `::ffff:a.b.c.d`.
    ///
    /// A port without brackets would be ambiguous and is rejected.
    pub fn to_ipv6_string(&self, include_port: bool, include_brackets: bool) -> NetResult<String> {
        if include_port && !include_brackets {
            return Err(NetError::InvalidArgument(
                "an IPv6 address with a port requires brackets".to_string(),
            ));
        }
        let v6 = Ipv6Addr::from(self.octets);
        Ok(match (include_brackets, include_port) {
            (true, true) => format!("[{}]:{}", v6, self.port),
            (true, false) => format!("[{}]", v6),
            (false, _) => v6.to_string(),
        })
    }

    /// Canonical text: dotted quad for IPv4, IPv6 text otherwise.
    pub fn format(&self, include_port: bool, include_brackets: bool) -> NetResult<String> {
        if self.is_ipv4() {
            self.to_ipv4_string(include_port)
        } else {
            self.to_ipv6_string(include_port, include_brackets)
        }
    }

    /// Classify the address. Memoized until the next setter call.
    pub fn classify(&self) -> NetworkType {
        *self.network.get_or_init(|| classify_octets(&self.octets))
    }

    /// The memoized classification, if [`Address::classify`] already ran.
    pub fn cached_network_type(&self) -> Option<NetworkType> {
        self.network.get().copied()
    }

    /// Every address on every local interface. Empty if enumeration fails.
    pub fn local_addresses() -> Vec<Address> {
        match Self::try_local_addresses() {
            Ok(addresses) => addresses,
            Err(e) => {
                tracing::warn!(error = %e, "Interface enumeration failed");
                Vec::new()
            }
        }
    }

    /// Interface enumeration that reports failure instead of hiding it.
    pub fn try_local_addresses() -> NetResult<Vec<Address>> {
        let interfaces = nix::ifaddrs::getifaddrs()
            .map_err(|errno| NetError::runtime("getifaddrs", errno.into()))?;

        let mut found = Vec::new();
        for ifaddr in interfaces {
            let Some(storage) = ifaddr.address else {
                continue;
            };
            let ip = if let Some(sin) = storage.as_sockaddr_in() {
                IpAddr::V4(*SocketAddrV4::from(*sin).ip())
            } else if let Some(sin6) = storage.as_sockaddr_in6() {
                IpAddr::V6(*SocketAddrV6::from(*sin6).ip())
            } else {
                // AF_PACKET and friends
                continue;
            };
            let mut address = Address::new(ip, 0, Protocol::Tcp);
            address.interface = Some(ifaddr.interface_name.clone());
            found.push(address);
        }
        Ok(found)
    }

    /// Whether this address is bound to a local interface.
    ///
    /// Enumeration is repeated on every call and its failure is reported as
    /// an error, independent of whether `self` is a valid address.
    pub fn is_local_interface_address(&self) -> NetResult<bool> {
        let local = Self::try_local_addresses()?;
        Ok(local.iter().any(|candidate| candidate.octets == self.octets))
    }
}

fn to_octets(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

fn classify_octets(octets: &[u8; 16]) -> NetworkType {
    let v6 = Ipv6Addr::from(*octets);
    match v6.to_ipv4_mapped() {
        Some(v4) => classify_v4(u32::from(v4)),
        None => classify_v6(u128::from(v6)),
    }
}

fn classify_v4(ip: u32) -> NetworkType {
    const fn net(a: u8, b: u8) -> u32 {
        ((a as u32) << 24) | ((b as u32) << 16)
    }
    let in_net = |base: u32, prefix: u32| ip & (u32::MAX << (32 - prefix)) == base;

    if ip == 0 {
        NetworkType::Any
    } else if in_net(net(127, 0), 8) {
        NetworkType::Loopback
    } else if in_net(net(10, 0), 8)
        || in_net(net(172, 16), 12)
        || in_net(net(192, 168), 16)
        || in_net(net(100, 64), 10)
    {
        NetworkType::Private
    } else if in_net(net(169, 254), 16) {
        NetworkType::LinkLocal
    } else if in_net(net(224, 0), 4) {
        NetworkType::Multicast
    } else {
        NetworkType::Public
    }
}

fn classify_v6(ip: u128) -> NetworkType {
    let in_net = |base: u128, prefix: u32| ip & (u128::MAX << (128 - prefix)) == base;

    if ip == 0 {
        NetworkType::Any
    } else if ip == 1 {
        NetworkType::Loopback
    } else if in_net(0xfd << 120, 8) {
        NetworkType::Private
    } else if in_net(0xfe80 << 112, 10) {
        NetworkType::LinkLocal
    } else if ip >> 120 == 0xff && (ip >> 112) & 0x0f == 0x02 {
        // ffx2::/16, link-scoped multicast
        NetworkType::LinkLocal
    } else if in_net(0xff << 120, 8) {
        NetworkType::Multicast
    } else {
        NetworkType::Public
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.octets == other.octets
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.octets.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ip = self.ip();
        match (ip, self.port) {
            (_, 0) => write!(f, "{}", ip),
            (IpAddr::V4(v4), port) => write!(f, "{}:{}", v4, port),
            (IpAddr::V6(v6), port) => write!(f, "[{}]:{}", v6, port),
        }
    }
}

impl FromStr for Address {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s, "", None, None)
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address::new(IpAddr::V4(ip), 0, Protocol::Tcp)
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Address::new(IpAddr::V6(ip), 0, Protocol::Tcp)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Address::new(ip, 0, Protocol::Tcp)
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Address::from_ipv4(addr)
    }
}

impl From<SocketAddrV6> for Address {
    fn from(addr: SocketAddrV6) -> Self {
        Address::from_ipv6(addr)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::new(addr.ip(), addr.port(), Protocol::Tcp)
    }
}
