//! Resolver configuration.
//!
//! Everything that tunes resolver behaviour is passed in explicitly at build
//! time ([`HostResolverConfig`]) or pushed at runtime through
//! `HostResolver::update_config` ([`ResolverSettings`]) and
//! `HostResolver::on_dns_config_changed` ([`DnsConfig`]).

use crate::base::neterror::NetError;
use crate::dns::hosts::{DnsHosts, DEFAULT_HOSTS_PATH};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default number of resolutions running at once.
pub const DEFAULT_MAX_CONCURRENT_RESOLVES: usize = 6;

/// Queue bound is this multiple of the concurrency limit.
pub const QUEUED_JOBS_PER_SLOT: usize = 100;

/// Retry parameters of the system resolver task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcTaskParams {
    /// Wait this long for an attempt before starting another one.
    pub unresponsive_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub retry_factor: u32,
    /// Total attempts, the first one included.
    pub max_retry_attempts: usize,
    /// Blocking lookups allowed to run at once across all tasks.
    pub worker_pool_size: usize,
}

impl Default for ProcTaskParams {
    fn default() -> Self {
        Self {
            unresponsive_delay: Duration::from_millis(6000),
            retry_factor: 2,
            max_retry_attempts: 4,
            worker_pool_size: 8,
        }
    }
}

impl ProcTaskParams {
    pub fn unresponsive_delay(mut self, delay: Duration) -> Self {
        self.unresponsive_delay = delay;
        self
    }

    pub fn retry_factor(mut self, factor: u32) -> Self {
        self.retry_factor = factor;
        self
    }

    pub fn max_retry_attempts(mut self, attempts: usize) -> Self {
        self.max_retry_attempts = attempts.max(1);
        self
    }

    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size.max(1);
        self
    }
}

/// Runtime toggles, replaceable through `HostResolver::update_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Use the asynchronous DNS client when a valid config is available.
    pub dns_client_enabled: bool,
    /// Retry with the system resolver when the DNS client fails.
    pub fallback_to_proc: bool,
    /// Treat IPv6 as unreachable on Wi-Fi without probing.
    pub assume_ipv6_fails_on_wifi: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            dns_client_enabled: true,
            fallback_to_proc: true,
            assume_ipv6_fails_on_wifi: false,
        }
    }
}

/// DNS client configuration (nameservers, search list, hosts table).
#[derive(Clone, PartialEq, Eq)]
pub struct DnsConfig {
    pub nameservers: Vec<SocketAddr>,
    pub search: Vec<String>,
    pub ndots: usize,
    pub timeout: Duration,
    pub attempts: usize,
    pub hosts: DnsHosts,
    /// The local machine has IPv6 configured; skip the reachability probe.
    pub use_local_ipv6: bool,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            search: Vec::new(),
            ndots: 1,
            timeout: Duration::from_secs(1),
            attempts: 2,
            hosts: DnsHosts::new(),
            use_local_ipv6: false,
        }
    }
}

impl fmt::Debug for DnsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsConfig")
            .field("nameservers", &self.nameservers)
            .field("search", &self.search)
            .field("ndots", &self.ndots)
            .field("timeout", &self.timeout)
            .field("attempts", &self.attempts)
            .field("hosts", &self.hosts.len())
            .field("use_local_ipv6", &self.use_local_ipv6)
            .finish()
    }
}

impl DnsConfig {
    pub fn new(nameservers: Vec<SocketAddr>) -> Self {
        Self {
            nameservers,
            ..Self::default()
        }
    }

    /// A config is usable once it names at least one server.
    pub fn is_valid(&self) -> bool {
        !self.nameservers.is_empty()
    }

    pub fn hosts(mut self, hosts: DnsHosts) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn use_local_ipv6(mut self, enabled: bool) -> Self {
        self.use_local_ipv6 = enabled;
        self
    }

    /// Read the platform resolver configuration and hosts file.
    pub fn from_system() -> Result<Self, NetError> {
        let (config, opts) = hickory_resolver::system_conf::read_system_conf().map_err(|e| {
            tracing::warn!(error = %e, "failed to read system DNS configuration");
            NetError::DnsServerFailed
        })?;

        let mut nameservers: Vec<SocketAddr> = Vec::new();
        for ns in config.name_servers() {
            if !nameservers.contains(&ns.socket_addr) {
                nameservers.push(ns.socket_addr);
            }
        }

        let hosts = DnsHosts::from_file(DEFAULT_HOSTS_PATH).unwrap_or_else(|e| {
            tracing::debug!(error = %e, path = DEFAULT_HOSTS_PATH, "no hosts file");
            DnsHosts::new()
        });

        let dns_config = Self {
            nameservers,
            search: config.search().iter().map(|name| name.to_string()).collect(),
            ndots: opts.ndots,
            timeout: opts.timeout,
            attempts: opts.attempts,
            hosts,
            use_local_ipv6: false,
        };
        tracing::debug!(config = ?dns_config, "read system DNS configuration");
        Ok(dns_config)
    }
}

/// Construction-time configuration of a `HostResolver`.
#[derive(Debug, Clone)]
pub struct HostResolverConfig {
    /// Resolutions allowed to run at once.
    pub max_concurrent_resolves: usize,
    /// Queued-job bound; `None` means `max_concurrent_resolves * 100`.
    pub max_queued_jobs: Option<usize>,
    pub proc_params: ProcTaskParams,
    /// Zero disables caching.
    pub cache_max_entries: usize,
    pub settings: ResolverSettings,
    pub ipv6_probe_enabled: bool,
    pub ipv6_probe_period: Duration,
    /// Where to persist the cache and latency table, if anywhere.
    pub persist_path: Option<PathBuf>,
    pub persist_interval: Duration,
}

impl Default for HostResolverConfig {
    fn default() -> Self {
        Self {
            max_concurrent_resolves: DEFAULT_MAX_CONCURRENT_RESOLVES,
            max_queued_jobs: None,
            proc_params: ProcTaskParams::default(),
            cache_max_entries: crate::dns::host_cache::DEFAULT_MAX_ENTRIES,
            settings: ResolverSettings::default(),
            ipv6_probe_enabled: true,
            ipv6_probe_period: Duration::from_millis(1000),
            persist_path: None,
            persist_interval: Duration::from_secs(300),
        }
    }
}

impl HostResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queued_job_limit(&self) -> usize {
        self.max_queued_jobs
            .unwrap_or(self.max_concurrent_resolves * QUEUED_JOBS_PER_SLOT)
    }

    pub fn max_concurrent_resolves(mut self, max: usize) -> Self {
        self.max_concurrent_resolves = max.max(1);
        self
    }

    pub fn max_queued_jobs(mut self, max: usize) -> Self {
        self.max_queued_jobs = Some(max);
        self
    }

    pub fn proc_params(mut self, params: ProcTaskParams) -> Self {
        self.proc_params = params;
        self
    }

    pub fn cache_max_entries(mut self, max: usize) -> Self {
        self.cache_max_entries = max;
        self
    }

    pub fn settings(mut self, settings: ResolverSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn ipv6_probe(mut self, enabled: bool) -> Self {
        self.ipv6_probe_enabled = enabled;
        self
    }

    pub fn persist_to(mut self, path: impl Into<PathBuf>, interval: Duration) -> Self {
        self.persist_path = Some(path.into());
        self.persist_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostResolverConfig::default();
        assert_eq!(config.max_concurrent_resolves, 6);
        assert_eq!(config.queued_job_limit(), 600);
        assert_eq!(config.cache_max_entries, 1000);
        assert_eq!(config.proc_params.unresponsive_delay, Duration::from_secs(6));
        assert_eq!(config.proc_params.retry_factor, 2);
        assert_eq!(config.proc_params.max_retry_attempts, 4);
        assert!(config.settings.fallback_to_proc);
        assert!(config.persist_path.is_none());
    }

    #[test]
    fn test_queue_limit_follows_capacity() {
        let config = HostResolverConfig::new().max_concurrent_resolves(2);
        assert_eq!(config.queued_job_limit(), 200);
        let config = config.max_queued_jobs(3);
        assert_eq!(config.queued_job_limit(), 3);
    }

    #[test]
    fn test_proc_params_clamp() {
        let params = ProcTaskParams::default().max_retry_attempts(0).worker_pool_size(0);
        assert_eq!(params.max_retry_attempts, 1);
        assert_eq!(params.worker_pool_size, 1);
    }

    #[test]
    fn test_dns_config_validity() {
        assert!(!DnsConfig::default().is_valid());
        let config = DnsConfig::new(vec!["8.8.8.8:53".parse().unwrap()]);
        assert!(config.is_valid());
        let debug = format!("{:?}", config);
        assert!(debug.contains("8.8.8.8:53"));
    }
}
