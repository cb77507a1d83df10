//! Host resolution.
//!
//! Mirrors Chromium's `HostResolverImpl`: identical lookups share one job,
//! jobs run through a bounded priority dispatcher, and each job resolves
//! through the asynchronous DNS client when one is configured, falling back
//! to the blocking system resolver.
//!
//! # Architecture
//!
//! - [`HostResolver`] is the public handle; [`manager`] owns all state in one
//!   tokio task.
//! - [`job`] holds per-key jobs and their requests.
//! - [`proc_task`] and [`dns_task`] drive the two resolution paths.
//! - [`host_cache`], [`hosts`], localhost and literal handling answer
//!   without a job.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostresolver::dns::{HostPortPair, HostResolver, RequestInfo};
//! use hostresolver::base::priority::RequestPriority;
//!
//! let resolver = HostResolver::builder().system_dns().build();
//! let info = RequestInfo::new(HostPortPair::new("example.com", 443));
//! match resolver.resolve(info, RequestPriority::Highest).await {
//!     Resolution::Complete(result) => println!("immediate: {:?}", result),
//!     Resolution::Pending(request) => println!("resolved: {:?}", request.await),
//! }
//! ```

pub mod address_list;
pub mod config;
pub mod dns_task;
mod gai;
mod hickory;
pub mod host_cache;
mod host_resolver;
pub mod hosts;
mod ipv6_probe;
pub mod job;
pub mod key;
pub mod manager;
pub mod persist;
pub mod proc_task;
mod resolve;
pub mod util;

pub use address_list::AddressList;
pub use config::{DnsConfig, HostResolverConfig, ProcTaskParams, ResolverSettings};
pub use dns_task::{
    AddressSorter, DnsAnswer, DnsRecordType, DnsTransaction, DnsTransactionClient,
    DnsTransactionFuture, PrecedenceAddressSorter,
};
pub use gai::SystemHostResolverProc;
pub use hickory::HickoryTransactionClient;
pub use host_cache::{CacheEntry, EntryStaleness, HostCache};
pub use host_resolver::{HostResolver, HostResolverBuilder, Resolution, ResolveRequest};
pub use hosts::{DnsHosts, HostsSource};
pub use ipv6_probe::{ReachabilityProbe, UdpReachabilityProbe};
pub use job::RequestId;
pub use key::{AddressFamily, HostPortPair, HostResolverFlags, RequestInfo, ResolutionKey};
pub use manager::{ResolverStats, MAXIMUM_DNS_FAILURES};
pub use persist::{LatencyTable, ResolutionSource, ResolverSnapshot};
pub use proc_task::{HostResolverProc, ProcError};
pub use resolve::{Addrs, Name, Resolve, Resolving};
