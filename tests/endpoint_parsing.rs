//! Endpoint parsing through the public API.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use netcore::net::endpoint::{lookup_service, resolve, split_endpoint};
use netcore::{Address, ErrorKind, NetworkType, Protocol};

#[test]
fn test_bracketed_ipv6_with_port() {
    let addresses = resolve("[::1]:8080", "", None, None).unwrap();
    assert_eq!(addresses.len(), 1);
    assert_eq!(addresses[0].ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));
    assert_eq!(addresses[0].port(), 8080);
    assert_eq!(addresses[0].classify(), NetworkType::Loopback);
}

#[test]
fn test_port_only_fills_default_address() {
    let addresses = resolve(":8080", "0.0.0.0", None, None).unwrap();
    assert_eq!(addresses[0].ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    assert_eq!(addresses[0].port(), 8080);
    assert_eq!(addresses[0].classify(), NetworkType::Any);
}

#[test]
fn test_service_name_port() {
    let addresses = resolve("127.0.0.1:http", "", None, Some(Protocol::Tcp)).unwrap();
    assert_eq!(addresses[0].port(), 80);
    assert_eq!(lookup_service("https", Protocol::Tcp), Some(443));
}

#[test]
fn test_address_parse_matches_resolve() {
    let parsed = Address::parse("10.1.2.3:22", "", None, None).unwrap();
    assert_eq!(parsed.to_ipv4_string(true).unwrap(), "10.1.2.3:22");
    assert_eq!(parsed.classify(), NetworkType::Private);

    let from_str: Address = "[fe80::1]:9".parse().unwrap();
    assert_eq!(from_str.port(), 9);
    assert_eq!(from_str.classify(), NetworkType::LinkLocal);
}

#[test]
fn test_never_resolves_to_no_address() {
    for bad in [":8080", "", "[]:80", "host@example:80", "[::1", "::1]:80", "127.0.0.1:70000"] {
        let err = resolve(bad, "", None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "endpoint {:?}", bad);
    }
}

#[test]
fn test_split_keeps_bare_ipv6_literal() {
    assert_eq!(split_endpoint("2001:db8::1").unwrap(), (Some("2001:db8::1"), None));
    assert_eq!(split_endpoint("[2001:db8::1]:443").unwrap(), (Some("2001:db8::1"), Some("443")));
    assert_eq!(split_endpoint("host").unwrap(), (Some("host"), None));
}
