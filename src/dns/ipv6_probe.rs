//! IPv6 reachability probe.
//!
//! Connecting a UDP socket sends nothing but makes the OS pick a source
//! address, which tells us whether a usable IPv6 route exists. The answer
//! is cached for a short period and dropped on address changes.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use tokio::time::Instant;

/// Public resolver address used only to pick a route.
const PROBE_DESTINATION: SocketAddr = SocketAddr::new(
    IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)),
    53,
);

pub trait ReachabilityProbe: Send + Sync {
    /// Whether a global IPv6 route appears to exist.
    fn probe(&self) -> bool;
}

impl<F> ReachabilityProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn probe(&self) -> bool {
        self()
    }
}

/// Probe using a connected UDP socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpReachabilityProbe;

impl UdpReachabilityProbe {
    /// Link-local and Teredo sources do not count as IPv6 connectivity.
    fn is_usable_source(addr: &Ipv6Addr) -> bool {
        let segments = addr.segments();
        let link_local = segments[0] & 0xffc0 == 0xfe80;
        let teredo = segments[0] == 0x2001 && segments[1] == 0;
        !link_local && !teredo && !addr.is_unspecified() && !addr.is_loopback()
    }
}

impl ReachabilityProbe for UdpReachabilityProbe {
    fn probe(&self) -> bool {
        let socket = match UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::debug!(error = %e, "IPv6 probe: bind failed");
                return false;
            }
        };
        if let Err(e) = socket.connect(PROBE_DESTINATION) {
            tracing::debug!(error = %e, "IPv6 probe: no route");
            return false;
        }
        match socket.local_addr() {
            Ok(SocketAddr::V6(local)) => Self::is_usable_source(local.ip()),
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(error = %e, "IPv6 probe: no local address");
                false
            }
        }
    }
}

/// Cached probe result.
pub(crate) struct Ipv6Probe {
    probe: Box<dyn ReachabilityProbe>,
    period: Duration,
    enabled: bool,
    last: Option<(Instant, bool)>,
}

impl Ipv6Probe {
    pub(crate) fn new(probe: Box<dyn ReachabilityProbe>, period: Duration, enabled: bool) -> Self {
        Self {
            probe,
            period,
            enabled,
            last: None,
        }
    }

    /// Disabled probes always report IPv6 reachable. `assume_unreachable`
    /// short-circuits without probing.
    pub(crate) fn is_reachable(&mut self, now: Instant, assume_unreachable: bool) -> bool {
        if !self.enabled {
            return true;
        }
        if assume_unreachable {
            return false;
        }
        if let Some((at, reachable)) = self.last {
            if now.saturating_duration_since(at) < self.period {
                return reachable;
            }
        }
        let reachable = self.probe.probe();
        tracing::debug!(reachable, "IPv6 reachability probed");
        self.last = Some((now, reachable));
        reachable
    }

    pub(crate) fn invalidate(&mut self) {
        self.last = None;
    }
}

impl fmt::Debug for Ipv6Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ipv6Probe")
            .field("period", &self.period)
            .field("enabled", &self.enabled)
            .field("last", &self.last.map(|(_, reachable)| reachable))
            .finish()
    }
}
