//! System resolver procedure using `getaddrinfo`.
//!
//! Wraps the standard library's `ToSocketAddrs`, which calls the platform
//! resolver. Always invoked from a blocking worker thread by `ProcTask`.

use crate::base::context::{os_error_code, IoResultExt};
use crate::dns::address_list::AddressList;
use crate::dns::key::{AddressFamily, HostResolverFlags};
use crate::dns::proc_task::{HostResolverProc, ProcError};
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolves through the operating system's configured resolver.
///
/// `ToSocketAddrs` cannot request a single family, so answers are filtered
/// after the call. Canonical names are not available through this path;
/// with `CANONNAME` the hostname itself is recorded.
#[derive(Clone, Debug, Default)]
pub struct SystemHostResolverProc;

impl SystemHostResolverProc {
    pub fn new() -> Self {
        Self
    }

    fn lookup(host: &str) -> Result<Vec<SocketAddr>, ProcError> {
        tracing::debug!(host = %host, "resolving via getaddrinfo");
        let result = (host, 0u16).to_socket_addrs();
        let os_error = result.as_ref().err().map_or(0, os_error_code);
        let addrs = result
            .dns_context(host)
            .map_err(|error| ProcError { error, os_error })?;
        Ok(addrs.collect())
    }
}

impl HostResolverProc for SystemHostResolverProc {
    fn resolve(
        &self,
        host: &str,
        family: AddressFamily,
        flags: HostResolverFlags,
    ) -> Result<AddressList, ProcError> {
        let addrs = Self::lookup(host)?;
        let mut list: AddressList = addrs
            .into_iter()
            .filter(|addr| family.allows(&addr.ip()))
            .collect();

        // IPv4 was forced because IPv6 looked unreachable, but a name that
        // only maps to IPv4 loopback is local; answer with both families.
        if flags.contains(HostResolverFlags::DEFAULT_FAMILY_SET_DUE_TO_NO_IPV6)
            && list.is_all_ipv4_loopback()
        {
            let mut flags = flags;
            flags.remove(HostResolverFlags::DEFAULT_FAMILY_SET_DUE_TO_NO_IPV6);
            return self.resolve(host, AddressFamily::Unspecified, flags);
        }

        if flags.contains(HostResolverFlags::CANONNAME) && !list.is_empty() {
            list.set_canonical_name(host);
        }
        tracing::debug!(host = %host, count = list.len(), "getaddrinfo complete");
        Ok(list)
    }
}
