//! Ordered list of resolved socket addresses.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// ICANN answers with this loopback address for names colliding with new gTLDs.
pub const ICANN_NAME_COLLISION_IP: Ipv4Addr = Ipv4Addr::new(127, 0, 53, 53);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressList {
    addrs: Vec<SocketAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    canonical_name: Option<String>,
}

impl AddressList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ips(ips: impl IntoIterator<Item = IpAddr>, port: u16) -> Self {
        ips.into_iter().map(|ip| SocketAddr::new(ip, port)).collect()
    }

    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        Self::from_ips([ip], port)
    }

    pub fn push(&mut self, addr: SocketAddr) {
        self.addrs.push(addr);
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn first(&self) -> Option<&SocketAddr> {
        self.addrs.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SocketAddr> {
        self.addrs.iter()
    }

    pub fn as_slice(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn ips(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.addrs.iter().map(SocketAddr::ip)
    }

    pub fn canonical_name(&self) -> Option<&str> {
        self.canonical_name.as_deref()
    }

    pub fn set_canonical_name(&mut self, name: impl Into<String>) {
        self.canonical_name = Some(name.into());
    }

    /// Copy of the list with every address rewritten to `port`.
    ///
    /// Lists are cached port-less; each request gets its own port.
    pub fn with_port(&self, port: u16) -> Self {
        let mut list = self.clone();
        for addr in &mut list.addrs {
            addr.set_port(port);
        }
        list
    }

    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.addrs.iter().any(|a| a.ip() == ip)
    }

    pub fn contains_icann_name_collision(&self) -> bool {
        self.contains_ip(IpAddr::V4(ICANN_NAME_COLLISION_IP))
    }

    /// True when every address is an IPv4 loopback address.
    pub fn is_all_ipv4_loopback(&self) -> bool {
        !self.is_empty()
            && self
                .addrs
                .iter()
                .all(|a| matches!(a.ip(), IpAddr::V4(v4) if v4.is_loopback()))
    }

    pub fn retain(&mut self, f: impl FnMut(&SocketAddr) -> bool) {
        self.addrs.retain(f);
    }
}

impl FromIterator<SocketAddr> for AddressList {
    fn from_iter<I: IntoIterator<Item = SocketAddr>>(iter: I) -> Self {
        Self {
            addrs: iter.into_iter().collect(),
            canonical_name: None,
        }
    }
}

impl IntoIterator for AddressList {
    type Item = SocketAddr;
    type IntoIter = std::vec::IntoIter<SocketAddr>;

    fn into_iter(self) -> Self::IntoIter {
        self.addrs.into_iter()
    }
}

impl<'a> IntoIterator for &'a AddressList {
    type Item = &'a SocketAddr;
    type IntoIter = std::slice::Iter<'a, SocketAddr>;

    fn into_iter(self) -> Self::IntoIter {
        self.addrs.iter()
    }
}
