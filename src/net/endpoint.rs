//! Endpoint spec parsing and resolution.
//!
//! Accepted forms: `host`, `host:port`, `:port`, `[v6]`, `[v6]:port`. The
//! port may be numeric or a service name from `/etc/services`.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::OnceLock;

use crate::error::{NetError, NetResult};
use crate::net::address::{Address, Protocol};

const SERVICES_PATH: &str = "/etc/services";

const TCP: &[Protocol] = &[Protocol::Tcp];
const UDP: &[Protocol] = &[Protocol::Udp];
const BOTH: &[Protocol] = &[Protocol::Tcp, Protocol::Udp];

/// Used when `/etc/services` is missing, which is common in containers.
const WELL_KNOWN_SERVICES: &[(&str, u16, &[Protocol])] = &[
    ("echo", 7, BOTH),
    ("ftp-data", 20, TCP),
    ("ftp", 21, TCP),
    ("ssh", 22, TCP),
    ("telnet", 23, TCP),
    ("smtp", 25, TCP),
    ("domain", 53, BOTH),
    ("http", 80, TCP),
    ("www", 80, TCP),
    ("pop3", 110, TCP),
    ("ntp", 123, UDP),
    ("imap", 143, TCP),
    ("snmp", 161, UDP),
    ("ldap", 389, BOTH),
    ("https", 443, TCP),
    ("submission", 587, TCP),
    ("ldaps", 636, TCP),
    ("imaps", 993, TCP),
    ("pop3s", 995, TCP),
    ("mysql", 3306, TCP),
    ("postgresql", 5432, TCP),
    ("http-alt", 8080, TCP),
];

/// Split an endpoint spec into optional host and port parts.
///
/// An unbracketed spec with more than one colon is taken as a bare IPv6
/// literal with no port.
pub fn split_endpoint(text: &str) -> NetResult<(Option<&str>, Option<&str>)> {
    if text.contains('@') {
        return Err(NetError::InvalidArgument(format!(
            "ambiguous '@' in endpoint '{}'",
            text
        )));
    }

    if let Some(rest) = text.strip_prefix('[') {
        let close = rest.find(']').ok_or_else(|| {
            NetError::InvalidArgument(format!("unterminated '[' in endpoint '{}'", text))
        })?;
        let host = &rest[..close];
        if host.is_empty() {
            return Err(NetError::InvalidArgument(format!("empty brackets in '{}'", text)));
        }
        let tail = &rest[close + 1..];
        let port = match tail {
            "" => None,
            _ => match tail.strip_prefix(':') {
                Some(port) if !port.contains(':') => non_empty(port),
                _ => {
                    return Err(NetError::InvalidArgument(format!(
                        "unexpected '{}' after ']' in '{}'",
                        tail, text
                    )))
                }
            },
        };
        return Ok((Some(host), port));
    }

    if text.contains(']') {
        return Err(NetError::InvalidArgument(format!("stray ']' in endpoint '{}'", text)));
    }

    match text.matches(':').count() {
        0 => Ok((non_empty(text), None)),
        1 => {
            let (host, port) = text.split_once(':').unwrap_or((text, ""));
            Ok((non_empty(host), non_empty(port)))
        }
        _ => Ok((Some(text), None)),
    }
}

fn non_empty(part: &str) -> Option<&str> {
    if part.is_empty() {
        None
    } else {
        Some(part)
    }
}

/// Resolve an endpoint spec into one or more addresses.
///
/// The host falls back to `default_address` and the port to `default_port`
/// (port `0` when neither is given). Never returns an empty list.
pub fn resolve(
    text: &str,
    default_address: &str,
    default_port: Option<u16>,
    protocol: Option<Protocol>,
) -> NetResult<Vec<Address>> {
    let protocol = protocol.unwrap_or_default();
    let (host, port) = split_endpoint(text)?;

    let host = host
        .or_else(|| non_empty(default_address))
        .ok_or_else(|| NetError::InvalidArgument(format!("no address in endpoint '{}'", text)))?;

    let port = match port {
        Some(port) => parse_port(port, protocol)?,
        None => default_port.unwrap_or(0),
    };

    let addresses = lookup_host(host, port, protocol)?;
    if addresses.is_empty() {
        return Err(NetError::InvalidArgument(format!(
            "'{}' resolved to no address",
            host
        )));
    }

    tracing::trace!(
        endpoint = text,
        count = addresses.len(),
        protocol = %protocol,
        "Endpoint resolved"
    );
    Ok(addresses)
}

fn parse_port(port: &str, protocol: Protocol) -> NetResult<u16> {
    if port.bytes().all(|b| b.is_ascii_digit()) {
        return port
            .parse::<u64>()
            .ok()
            .and_then(|value| u16::try_from(value).ok())
            .ok_or_else(|| NetError::InvalidArgument(format!("port '{}' out of range 0-65535", port)));
    }
    lookup_service(port, protocol)
        .ok_or_else(|| NetError::InvalidArgument(format!("unknown {} service '{}'", protocol, port)))
}

fn lookup_host(host: &str, port: u16, protocol: Protocol) -> NetResult<Vec<Address>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![Address::new(ip, port, protocol)]);
    }

    let resolved = (host, port)
        .to_socket_addrs()
        .map_err(|e| NetError::InvalidArgument(format!("cannot resolve '{}': {}", host, e)))?;

    let mut addresses: Vec<Address> = Vec::new();
    for socket_addr in resolved {
        let mut address = Address::from(socket_addr);
        address.set_protocol(protocol);
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    Ok(addresses)
}

/// Look up a service name for `protocol`, e.g. `("http", Tcp) -> 80`.
pub fn lookup_service(name: &str, protocol: Protocol) -> Option<u16> {
    static TABLE: OnceLock<HashMap<(String, Protocol), u16>> = OnceLock::new();

    let table = TABLE.get_or_init(|| match fs::read_to_string(SERVICES_PATH) {
        Ok(content) => parse_services(&content),
        Err(e) => {
            tracing::debug!(path = SERVICES_PATH, error = %e, "Using built-in service table");
            HashMap::new()
        }
    });

    let name = name.to_ascii_lowercase();
    table
        .get(&(name.clone(), protocol))
        .copied()
        .or_else(|| well_known_service(&name, protocol))
}

fn well_known_service(name: &str, protocol: Protocol) -> Option<u16> {
    WELL_KNOWN_SERVICES
        .iter()
        .find(|(known, _, protocols)| *known == name && protocols.contains(&protocol))
        .map(|(_, port, _)| *port)
}

/// Parse `/etc/services` content: `name port/proto [aliases...] [# comment]`.
fn parse_services(content: &str) -> HashMap<(String, Protocol), u16> {
    let mut table = HashMap::new();
    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        let (Some(name), Some(port_proto)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((port, proto)) = port_proto.split_once('/') else {
            continue;
        };
        let (Ok(port), Ok(proto)) = (port.parse::<u16>(), proto.parse::<Protocol>()) else {
            continue;
        };
        for alias in std::iter::once(name).chain(fields) {
            table
                .entry((alias.to_ascii_lowercase(), proto))
                .or_insert(port);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_forms() {
        assert_eq!(split_endpoint("host").unwrap(), (Some("host"), None));
        assert_eq!(split_endpoint("host:80").unwrap(), (Some("host"), Some("80")));
        assert_eq!(split_endpoint(":4040").unwrap(), (None, Some("4040")));
        assert_eq!(split_endpoint("[::1]").unwrap(), (Some("::1"), None));
        assert_eq!(split_endpoint("[::1]:8080").unwrap(), (Some("::1"), Some("8080")));
        assert_eq!(split_endpoint("fe80::1").unwrap(), (Some("fe80::1"), None));
    }

    #[test]
    fn test_split_rejects_ambiguous() {
        assert!(split_endpoint("user@host:80").is_err());
        assert!(split_endpoint("[::1").is_err());
        assert!(split_endpoint("[::1]x").is_err());
        assert!(split_endpoint("[::1]:80:90").is_err());
        assert!(split_endpoint("[]:80").is_err());
        assert!(split_endpoint("::1]").is_err());
    }

    #[test]
    fn test_resolve_bracketed_v6() {
        let addrs = resolve("[::1]:8080", "", None, None).unwrap();
        assert_eq!(addrs[0].ip(), "::1".parse::<IpAddr>().unwrap());
        assert_eq!(addrs[0].port(), 8080);
    }

    #[test]
    fn test_resolve_port_only_uses_default_address() {
        let addrs = resolve(":8080", "0.0.0.0", None, None).unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].to_ipv4_string(false).unwrap(), "0.0.0.0");
        assert_eq!(addrs[0].port(), 8080);
    }

    #[test]
    fn test_resolve_default_port() {
        let addrs = resolve("127.0.0.1", "", Some(4040), Some(Protocol::Udp)).unwrap();
        assert_eq!(addrs[0].port(), 4040);
        assert_eq!(addrs[0].protocol(), Protocol::Udp);
    }

    #[test]
    fn test_resolve_service_name() {
        let addrs = resolve("localhost:http", "", None, Some(Protocol::Tcp)).unwrap();
        assert!(addrs.iter().all(|a| a.port() == 80));
        assert_eq!(lookup_service("https", Protocol::Tcp), Some(443));
        assert_eq!(lookup_service("no-such-service-xyz", Protocol::Tcp), None);
    }

    #[test]
    fn test_resolve_errors() {
        assert!(resolve(":8080", "", None, None).is_err());
        assert!(resolve("", "", Some(80), None).is_err());
        assert!(resolve("127.0.0.1:65536", "", None, None).is_err());
        assert!(resolve("127.0.0.1:no-such-service-xyz", "", None, None).is_err());
        assert!(resolve("host.invalid", "", Some(80), None).is_err());
    }

    #[test]
    fn test_builtin_services_respect_protocol() {
        assert_eq!(well_known_service("http", Protocol::Tcp), Some(80));
        assert_eq!(well_known_service("http", Protocol::Udp), None);
        assert_eq!(well_known_service("ntp", Protocol::Udp), Some(123));
        assert_eq!(well_known_service("ntp", Protocol::Tcp), None);
        assert_eq!(well_known_service("domain", Protocol::Tcp), Some(53));
        assert_eq!(well_known_service("domain", Protocol::Udp), Some(53));
    }

    #[test]
    fn test_parse_services() {
        let table = parse_services(
            "# comment\nhttp\t80/tcp www # World Wide Web\nhttp 80/udp\nbogus line\nntp 123/udp\n",
        );
        assert_eq!(table.get(&("http".to_string(), Protocol::Tcp)), Some(&80));
        assert_eq!(table.get(&("www".to_string(), Protocol::Tcp)), Some(&80));
        assert_eq!(table.get(&("ntp".to_string(), Protocol::Udp)), Some(&123));
        assert_eq!(table.get(&("ntp".to_string(), Protocol::Tcp)), None);
    }
}
