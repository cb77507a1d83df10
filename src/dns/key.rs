//! Value types identifying what must be resolved and under which constraints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::ops::{BitOr, BitOrAssign};

/// Address family restriction for a lookup.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum AddressFamily {
    #[default]
    Unspecified,
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Whether an address of this family satisfies the restriction.
    pub fn allows(self, ip: &IpAddr) -> bool {
        self == AddressFamily::Unspecified || self == Self::of(ip)
    }
}

/// Resolver flags (a small bitset, see Chromium's `HostResolverFlags`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct HostResolverFlags(u32);

impl HostResolverFlags {
    /// Ask for the canonical name along with the addresses.
    pub const CANONNAME: Self = Self(1 << 0);
    /// Only resolve if the host has no non-loopback addresses configured.
    pub const LOOPBACK_ONLY: Self = Self(1 << 1);
    /// Set by the resolver when the family was narrowed to IPv4 because IPv6
    /// looked unreachable.
    pub const DEFAULT_FAMILY_SET_DUE_TO_NO_IPV6: Self = Self(1 << 2);
    /// Never use the asynchronous DNS client for this lookup.
    pub const SYSTEM_ONLY: Self = Self(1 << 3);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for HostResolverFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for HostResolverFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Identity of a resolution: one job and one cache entry per distinct key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolutionKey {
    pub hostname: String,
    pub address_family: AddressFamily,
    pub flags: HostResolverFlags,
}

impl ResolutionKey {
    pub fn new(hostname: impl Into<String>, address_family: AddressFamily, flags: HostResolverFlags) -> Self {
        Self {
            hostname: hostname.into(),
            address_family,
            flags,
        }
    }

    /// The key this one was narrowed from because IPv6 looked unreachable.
    pub fn widened(&self) -> Option<Self> {
        if !self.flags.contains(HostResolverFlags::DEFAULT_FAMILY_SET_DUE_TO_NO_IPV6) {
            return None;
        }
        let mut flags = self.flags;
        flags.remove(HostResolverFlags::DEFAULT_FAMILY_SET_DUE_TO_NO_IPV6);
        Some(Self::new(self.hostname.clone(), AddressFamily::Unspecified, flags))
    }
}

impl fmt::Display for ResolutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, flags={:#x})", self.hostname, self.address_family, self.flags.bits())
    }
}

/// A host name paired with the port the caller wants to reach.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPortPair {
    pub host: String,
    pub port: u16,
}

impl HostPortPair {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Caller-supplied parameters of one resolve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub host_port: HostPortPair,
    pub address_family: AddressFamily,
    pub flags: HostResolverFlags,
    /// Speculative requests only warm the cache; they are logged separately.
    pub is_speculative: bool,
    pub allow_cached_response: bool,
}

impl RequestInfo {
    pub fn new(host_port: HostPortPair) -> Self {
        Self {
            host_port,
            address_family: AddressFamily::Unspecified,
            flags: HostResolverFlags::empty(),
            is_speculative: false,
            allow_cached_response: true,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.host_port.host
    }

    pub fn port(&self) -> u16 {
        self.host_port.port
    }

    pub fn address_family(mut self, family: AddressFamily) -> Self {
        self.address_family = family;
        self
    }

    pub fn flags(mut self, flags: HostResolverFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn speculative(mut self, speculative: bool) -> Self {
        self.is_speculative = speculative;
        self
    }

    pub fn allow_cached_response(mut self, allow: bool) -> Self {
        self.allow_cached_response = allow;
        self
    }
}
