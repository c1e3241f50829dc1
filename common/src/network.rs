//! Network classification of peer addresses.
//!
//! Addresses are grouped by network block so that a single operator with many
//! addresses in the same range can't take over the address tables.
use std::net;

use crate::asmap::Asmap;

/// Network class of an address.
///
/// The discriminant is part of an address's group, and hence of the bucket
/// placement of every address. It must not change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Network {
    /// Addresses that aren't reachable on the public internet.
    Unroutable = 0,
    /// IPv4.
    Ipv4 = 1,
    /// IPv6.
    Ipv6 = 2,
}

impl Network {
    /// Classify an IP address.
    pub fn of(ip: &net::IpAddr) -> Self {
        match canonical(ip) {
            ip if !is_routable(&ip) => Self::Unroutable,
            net::IpAddr::V4(_) => Self::Ipv4,
            net::IpAddr::V6(_) => Self::Ipv6,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unroutable => write!(f, "unroutable"),
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipv4" => Ok(Self::Ipv4),
            "ipv6" => Ok(Self::Ipv6),
            "unroutable" => Ok(Self::Unroutable),
            _ => Err(format!("unknown network `{}`", s)),
        }
    }
}

/// Return the canonical form of an IP address: IPv4-mapped IPv6 addresses are
/// converted to IPv4.
pub fn canonical(ip: &net::IpAddr) -> net::IpAddr {
    match ip {
        net::IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => net::IpAddr::V4(v4),
            None => *ip,
        },
        net::IpAddr::V4(_) => *ip,
    }
}

/// Return the canonical form of a socket address.
pub fn canonical_socket(addr: &net::SocketAddr) -> net::SocketAddr {
    net::SocketAddr::new(canonical(&addr.ip()), addr.port())
}

/// The 16-byte representation of an IP address. IPv4 addresses are mapped.
pub fn ip_bytes(ip: &net::IpAddr) -> [u8; 16] {
    match canonical(ip) {
        net::IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        net::IpAddr::V6(v6) => v6.octets(),
    }
}

/// Parse the 16-byte representation of an IP address.
pub fn ip_from_bytes(bytes: [u8; 16]) -> net::IpAddr {
    canonical(&net::IpAddr::V6(net::Ipv6Addr::from(bytes)))
}

/// Check whether an IP address is valid, ie. could be anything but a placeholder.
pub fn is_valid(ip: &net::IpAddr) -> bool {
    match canonical(ip) {
        net::IpAddr::V4(v4) => !v4.is_unspecified() && !v4.is_broadcast(),
        net::IpAddr::V6(v6) => {
            let segments = v6.segments();
            // RFC3849: documentation.
            !v6.is_unspecified() && !(segments[0] == 0x2001 && segments[1] == 0x0db8)
        }
    }
}

/// Check whether an IP address is local to this host.
pub fn is_local(ip: &net::IpAddr) -> bool {
    match canonical(ip) {
        net::IpAddr::V4(v4) => v4.is_loopback() || v4.octets()[0] == 0,
        net::IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Check whether an IP address is globally routable.
pub fn is_routable(ip: &net::IpAddr) -> bool {
    if !is_valid(ip) || is_local(ip) {
        return false;
    }
    match canonical(ip) {
        net::IpAddr::V4(v4) => ipv4_is_routable(&v4),
        net::IpAddr::V6(v6) => ipv6_is_routable(&v6),
    }
}

/// Map an IP address to its autonomous system number. Returns `0` if no map is
/// given, or the address is not mapped.
pub fn mapped_as(ip: &net::IpAddr, asmap: Option<&Asmap>) -> u32 {
    let asmap = match asmap {
        Some(asmap) if !asmap.is_empty() => asmap,
        _ => return 0,
    };
    if Network::of(ip) == Network::Unroutable {
        return 0;
    }
    let bytes = ip_bytes(ip);
    let bits = bytes
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1 == 1))
        .collect::<Vec<_>>();

    asmap.interpret(&bits)
}

/// Get the group of an IP address. Addresses in the same group are assumed to be
/// under the control of the same operator.
///
/// IPv4 addresses are grouped by /16, IPv6 addresses by /32 (or /36 for
/// Hurricane Electric). If an AS map is supplied, addresses are grouped by AS
/// instead, where mapped.
pub fn group(ip: &net::IpAddr, asmap: Option<&Asmap>) -> Vec<u8> {
    let asn = mapped_as(ip, asmap);
    if asn != 0 {
        // IPv4 and IPv6 addresses in the same AS share a group.
        let mut group = vec![Network::Ipv6 as u8];
        group.extend_from_slice(&asn.to_le_bytes());

        return group;
    }

    let class = Network::of(ip);
    let mut group = vec![class as u8];

    if class == Network::Unroutable {
        return group;
    }
    match canonical(ip) {
        net::IpAddr::V4(v4) => {
            let octets = v4.octets();
            group.extend_from_slice(&octets[..2]);
        }
        net::IpAddr::V6(v6) => {
            let octets = v6.octets();
            let segments = v6.segments();

            group.extend_from_slice(&octets[..4]);

            // Hurricane Electric hands out /36s.
            if segments[0] == 0x2001 && segments[1] == 0x0470 {
                group.push(octets[4] | 0x0f);
            }
        }
    }
    group
}

/// Check whether an IPv4 address is globally routable, given that it is valid
/// and not local.
fn ipv4_is_routable(addr: &net::Ipv4Addr) -> bool {
    let octets = addr.octets();

    !addr.is_private()
        && !addr.is_link_local()
        && !addr.is_documentation()
        // RFC2544: benchmarking, 198.18.0.0/15.
        && !(octets[0] == 198 && (octets[1] & 0xfe) == 18)
        // RFC6598: shared address space, 100.64.0.0/10.
        && !(octets[0] == 100 && (octets[1] & 0xc0) == 64)
}

/// Check whether an IPv6 address is globally routable, given that it is valid
/// and not local.
fn ipv6_is_routable(addr: &net::Ipv6Addr) -> bool {
    let segments = addr.segments();

    // RFC4193: unique local, fc00::/7.
    !((segments[0] & 0xfe00) == 0xfc00)
        // RFC4862: link local, fe80::/64.
        && !(segments[0] == 0xfe80 && segments[1] == 0 && segments[2] == 0 && segments[3] == 0)
        // RFC4843: ORCHID, 2001:10::/28.
        && !(segments[0] == 0x2001 && (segments[1] & 0xfff0) == 0x0010)
        // RFC7343: ORCHIDv2, 2001:20::/28.
        && !(segments[0] == 0x2001 && (segments[1] & 0xfff0) == 0x0020)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn ip(s: &str) -> net::IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_is_routable() {
        assert!(is_routable(&ip("250.1.1.1")));
        assert!(is_routable(&ip("8.8.8.8")));
        assert!(is_routable(&ip("2a00:1450::1")));
        assert!(is_routable(&ip("::ffff:8.8.8.8")));

        assert!(!is_routable(&ip("0.0.0.0")));
        assert!(!is_routable(&ip("255.255.255.255")));
        assert!(!is_routable(&ip("127.0.0.1")));
        assert!(!is_routable(&ip("10.1.2.3")));
        assert!(!is_routable(&ip("192.168.0.1")));
        assert!(!is_routable(&ip("169.254.1.1")));
        assert!(!is_routable(&ip("198.19.0.1")));
        assert!(!is_routable(&ip("100.100.0.1")));
        assert!(!is_routable(&ip("192.0.2.1")));
        assert!(!is_routable(&ip("::1")));
        assert!(!is_routable(&ip("::")));
        assert!(!is_routable(&ip("2001:db8::1")));
        assert!(!is_routable(&ip("fd00::1")));
        assert!(!is_routable(&ip("fe80::1")));
        assert!(!is_routable(&ip("2001:10::1")));
        assert!(!is_routable(&ip("2001:20::1")));
    }

    #[test]
    fn test_network_of() {
        assert_eq!(Network::of(&ip("250.1.1.1")), Network::Ipv4);
        assert_eq!(Network::of(&ip("::ffff:250.1.1.1")), Network::Ipv4);
        assert_eq!(Network::of(&ip("2a00:1450::1")), Network::Ipv6);
        assert_eq!(Network::of(&ip("127.0.0.1")), Network::Unroutable);
    }

    #[test]
    fn test_group() {
        assert_eq!(group(&ip("250.1.2.3"), None), vec![1, 250, 1]);
        assert_eq!(group(&ip("::ffff:250.1.2.3"), None), vec![1, 250, 1]);
        assert_eq!(group(&ip("127.0.0.1"), None), vec![0]);
        assert_eq!(group(&ip("10.0.0.1"), None), vec![0]);
        assert_eq!(
            group(&ip("2a00:1450:4001::1"), None),
            vec![2, 0x2a, 0x00, 0x14, 0x50]
        );
        assert_eq!(
            group(&ip("2001:470:abcd::1"), None),
            vec![2, 0x20, 0x01, 0x04, 0x70, 0xaf]
        );
        // Tunnelled IPv4 is grouped by the IPv6 prefix, not the embedded address.
        assert_eq!(
            group(&ip("2002:fa01:0203::1"), None),
            vec![2, 0x20, 0x02, 0xfa, 0x01]
        );
        assert_eq!(
            group(&ip("2001:0:4136:e378::1"), None),
            vec![2, 0x20, 0x01, 0x00, 0x00]
        );
        assert_eq!(group(&ip("::1"), None), vec![0]);
    }

    #[test]
    fn test_ip_bytes() {
        let v4 = ip("1.2.3.4");

        assert_eq!(
            ip_bytes(&v4),
            [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 1, 2, 3, 4]
        );
        assert_eq!(ip_from_bytes(ip_bytes(&v4)), v4);
    }

    #[quickcheck]
    fn prop_mapped_ipv4(octets: (u8, u8, u8, u8)) -> bool {
        let (a, b, c, d) = octets;
        let v4 = net::IpAddr::from([a, b, c, d]);
        let mapped = net::IpAddr::V6(net::Ipv4Addr::new(a, b, c, d).to_ipv6_mapped());

        Network::of(&v4) == Network::of(&mapped)
            && group(&v4, None) == group(&mapped, None)
            && ip_from_bytes(ip_bytes(&mapped)) == v4
    }
}
