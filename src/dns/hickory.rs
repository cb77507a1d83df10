//! DNS transaction client backed by hickory-dns.
//!
//! Each transaction is a single A or AAAA lookup on a shared
//! `TokioResolver`. hickory's own answer cache is disabled; caching is done
//! by `HostCache` with the TTL carried in [`DnsAnswer`].

use crate::base::neterror::NetError;
use crate::dns::config::DnsConfig;
use crate::dns::dns_task::{
    DnsAnswer, DnsRecordType, DnsTransaction, DnsTransactionClient, DnsTransactionFuture,
};
use futures::FutureExt;
use hickory_resolver::{
    config::{NameServerConfig, ResolverConfig},
    name_server::TokioConnectionProvider,
    proto::{rr::Name, xfer::Protocol},
    ResolveError, TokioResolver,
};
use std::fmt;
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

fn build_resolver(config: &DnsConfig) -> TokioResolver {
    let mut resolver_config = ResolverConfig::new();
    for addr in &config.nameservers {
        resolver_config.add_name_server(NameServerConfig::new(*addr, Protocol::Udp));
    }
    for domain in &config.search {
        match Name::from_ascii(domain) {
            Ok(name) => resolver_config.add_search(name),
            Err(e) => tracing::debug!(domain = %domain, error = %e, "skipping search domain"),
        }
    }

    let mut builder =
        TokioResolver::builder_with_config(resolver_config, TokioConnectionProvider::default());
    let opts = builder.options_mut();
    opts.ndots = config.ndots;
    opts.timeout = config.timeout;
    opts.attempts = config.attempts;
    opts.cache_size = 0;
    builder.build()
}

fn map_resolve_error(hostname: &str, error: &ResolveError) -> Result<DnsAnswer, NetError> {
    if error.is_nx_domain() {
        return Err(NetError::NameNotResolved);
    }
    if error.is_no_records_found() {
        return Ok(DnsAnswer::default());
    }
    tracing::debug!(host = %hostname, error = %error, "hickory-dns lookup failed");
    Err(NetError::DnsServerFailed)
}

/// Creates hickory-backed transactions for the current [`DnsConfig`].
pub struct HickoryTransactionClient {
    resolver: RwLock<TokioResolver>,
}

impl HickoryTransactionClient {
    pub fn new(config: &DnsConfig) -> Self {
        Self {
            resolver: RwLock::new(build_resolver(config)),
        }
    }

    /// Client configured from the platform resolver settings.
    pub fn from_system() -> Result<Self, NetError> {
        Ok(Self::new(&DnsConfig::from_system()?))
    }
}

impl fmt::Debug for HickoryTransactionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HickoryTransactionClient").finish_non_exhaustive()
    }
}

impl DnsTransactionClient for HickoryTransactionClient {
    fn create_transaction(&self, hostname: &str, record_type: DnsRecordType) -> Box<dyn DnsTransaction> {
        let resolver = self
            .resolver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::new(HickoryTransaction {
            resolver,
            hostname: hostname.to_string(),
            record_type,
        })
    }

    fn on_config_changed(&self, config: Option<&DnsConfig>) {
        let Some(config) = config.filter(|c| c.is_valid()) else {
            return;
        };
        tracing::debug!(nameservers = ?config.nameservers, "rebuilding hickory resolver");
        *self.resolver.write().unwrap_or_else(PoisonError::into_inner) = build_resolver(config);
    }
}

struct HickoryTransaction {
    resolver: TokioResolver,
    hostname: String,
    record_type: DnsRecordType,
}

impl DnsTransaction for HickoryTransaction {
    fn record_type(&self) -> DnsRecordType {
        self.record_type
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn start(&self) -> DnsTransactionFuture {
        let resolver = self.resolver.clone();
        let hostname = self.hostname.clone();
        let record_type = self.record_type;
        async move {
            tracing::trace!(host = %hostname, %record_type, "hickory-dns query");
            let (addresses, valid_until) = match record_type {
                DnsRecordType::A => match resolver.ipv4_lookup(hostname.as_str()).await {
                    Ok(lookup) => (
                        lookup.iter().map(|a| IpAddr::V4(a.0)).collect::<Vec<_>>(),
                        lookup.valid_until(),
                    ),
                    Err(e) => return map_resolve_error(&hostname, &e),
                },
                DnsRecordType::Aaaa => match resolver.ipv6_lookup(hostname.as_str()).await {
                    Ok(lookup) => (
                        lookup.iter().map(|aaaa| IpAddr::V6(aaaa.0)).collect::<Vec<_>>(),
                        lookup.valid_until(),
                    ),
                    Err(e) => return map_resolve_error(&hostname, &e),
                },
            };
            let ttl = valid_until.saturating_duration_since(Instant::now());
            Ok(DnsAnswer::new(addresses, ttl))
        }
        .boxed()
    }
}
