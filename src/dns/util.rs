//! Hostname heuristics shared by the resolver fast paths.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Longest hostname accepted by the resolver.
pub const MAX_HOST_LENGTH: usize = 4096;

const MAX_LABEL_LENGTH: usize = 63;
const MAX_DOMAIN_LENGTH: usize = 253;

/// Parse `host` as an IP literal, accepting bracketed IPv6.
pub fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    let trimmed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    trimmed.parse().ok()
}

/// Syntactic check of a DNS name: letters, digits, `-` and `_` in labels of
/// at most 63 characters, one optional trailing dot.
pub fn is_valid_hostname(host: &str) -> bool {
    let name = host.strip_suffix('.').unwrap_or(host);
    if name.is_empty() || name.len() > MAX_DOMAIN_LENGTH {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LENGTH
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}

/// Loopback addresses for localhost-class names, IPv6 first.
pub fn localhost_addresses(host: &str) -> Option<&'static [IpAddr]> {
    const BOTH: &[IpAddr] = &[
        IpAddr::V6(Ipv6Addr::LOCALHOST),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
    ];
    const V6_ONLY: &[IpAddr] = &[IpAddr::V6(Ipv6Addr::LOCALHOST)];

    let name = host.strip_suffix('.').unwrap_or(host).to_ascii_lowercase();
    match name.as_str() {
        "localhost" | "localhost.localdomain" => Some(BOTH),
        "localhost6" | "localhost6.localdomain6" => Some(V6_ONLY),
        _ if name.ends_with(".localhost") => Some(BOTH),
        _ => None,
    }
}

/// Names under `.local` belong to multicast DNS, which the DNS client
/// cannot answer.
pub fn resembles_multicast_dns_name(host: &str) -> bool {
    const SUFFIX: &str = ".local";
    let name = host.strip_suffix('.').unwrap_or(host);
    name.len() > SUFFIX.len()
        && name
            .get(name.len() - SUFFIX.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(SUFFIX))
}

/// Short dotless names are often NetBIOS names. Only used to annotate logs.
pub fn resembles_netbios_name(host: &str) -> bool {
    host.len() < 16 && !host.contains('.')
}
