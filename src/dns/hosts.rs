//! Hosts-file data source.
//!
//! Chromium mapping: net/dns/dns_hosts.h

use crate::dns::address_list::AddressList;
use crate::dns::key::{AddressFamily, ResolutionKey};
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::path::Path;

/// Default location of the platform hosts file.
#[cfg(windows)]
pub const DEFAULT_HOSTS_PATH: &str = r"C:\Windows\System32\drivers\etc\hosts";
#[cfg(not(windows))]
pub const DEFAULT_HOSTS_PATH: &str = "/etc/hosts";

/// A static name-to-address table consulted before any network lookup.
pub trait HostsSource: Send + Sync {
    /// Addresses for `key`, matched case-insensitively. IPv6 entries come
    /// first when the family is unspecified. Ports are zero.
    fn lookup(&self, key: &ResolutionKey) -> Option<AddressList>;
}

/// Parsed hosts table: one address per (name, family), first mapping wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsHosts {
    entries: HashMap<(String, AddressFamily), IpAddr>,
}

impl DnsHosts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `hosts(5)` syntax. Malformed lines are skipped.
    pub fn parse(contents: &str) -> Self {
        let mut hosts = Self::new();
        for line in contents.lines() {
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };
            let mut tokens = line.split_whitespace();
            let Some(ip) = tokens.next().and_then(parse_address) else {
                continue;
            };
            for name in tokens {
                hosts.insert_if_absent(name, ip);
            }
        }
        tracing::debug!(entries = hosts.len(), "parsed hosts table");
        hosts
    }

    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    /// Add a mapping unless one already exists for the name and family.
    pub fn insert(&mut self, name: &str, ip: IpAddr) -> &mut Self {
        self.insert_if_absent(name, ip);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert_if_absent(&mut self, name: &str, ip: IpAddr) {
        let name = name.trim_end_matches('.').to_ascii_lowercase();
        if name.is_empty() {
            return;
        }
        self.entries.entry((name, AddressFamily::of(&ip))).or_insert(ip);
    }

    fn get(&self, name: &str, family: AddressFamily) -> Option<IpAddr> {
        self.entries.get(&(name.to_string(), family)).copied()
    }
}

fn parse_address(token: &str) -> Option<IpAddr> {
    // Scoped IPv6 literals (fe80::1%eth0) are not usable as a host mapping.
    if token.contains('%') {
        return None;
    }
    token.parse().ok()
}

impl HostsSource for DnsHosts {
    fn lookup(&self, key: &ResolutionKey) -> Option<AddressList> {
        let name = key.hostname.trim_end_matches('.').to_ascii_lowercase();
        let mut list = AddressList::new();
        if matches!(key.address_family, AddressFamily::Unspecified | AddressFamily::Ipv6) {
            if let Some(ip) = self.get(&name, AddressFamily::Ipv6) {
                list.push(std::net::SocketAddr::new(ip, 0));
            }
        }
        if matches!(key.address_family, AddressFamily::Unspecified | AddressFamily::Ipv4) {
            if let Some(ip) = self.get(&name, AddressFamily::Ipv4) {
                list.push(std::net::SocketAddr::new(ip, 0));
            }
        }
        (!list.is_empty()).then_some(list)
    }
}
