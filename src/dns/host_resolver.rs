//! Public handle to the resolver.
//!
//! [`HostResolver`] is a cheap, cloneable handle. All state lives in a
//! single background task spawned by [`HostResolverBuilder::build`]; the
//! handle only sends it messages. The task stops once every handle is
//! dropped, failing any outstanding requests with `NetError::Aborted`.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostresolver::dns::{HostPortPair, HostResolver, RequestInfo};
//! use hostresolver::base::priority::RequestPriority;
//!
//! let resolver = HostResolver::builder().system_dns().build();
//! let info = RequestInfo::new(HostPortPair::new("example.com", 443));
//! let addrs = resolver.resolve(info, RequestPriority::Medium).await.into_result().await?;
//! ```

use crate::base::network_change::ConnectionType;
use crate::base::neterror::NetError;
use crate::base::priority::RequestPriority;
use crate::dns::address_list::AddressList;
use crate::dns::config::{DnsConfig, HostResolverConfig, ResolverSettings};
use crate::dns::dns_task::{AddressSorter, DnsTransactionClient, PrecedenceAddressSorter};
use crate::dns::gai::SystemHostResolverProc;
use crate::dns::hickory::HickoryTransactionClient;
use crate::dns::host_cache::EntryStaleness;
use crate::dns::hosts::HostsSource;
use crate::dns::ipv6_probe::{Ipv6Probe, ReachabilityProbe, UdpReachabilityProbe};
use crate::dns::job::RequestId;
use crate::dns::key::RequestInfo;
use crate::dns::manager::{Command, Manager, Parts, ResolveReply, ResolverStats};
use crate::dns::proc_task::HostResolverProc;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// Handle to a running resolver.
#[derive(Clone)]
pub struct HostResolver {
    commands: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for HostResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostResolver")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

/// Outcome of [`HostResolver::resolve`].
#[derive(Debug)]
pub enum Resolution {
    /// Answered without creating a request: literal, localhost, cache,
    /// hosts table, or an immediate failure.
    Complete(Result<AddressList, NetError>),
    /// Attached to a job; await the request for the result.
    Pending(ResolveRequest),
}

impl Resolution {
    pub fn is_pending(&self) -> bool {
        matches!(self, Resolution::Pending(_))
    }

    /// Wait for the final result either way.
    pub async fn into_result(self) -> Result<AddressList, NetError> {
        match self {
            Resolution::Complete(result) => result,
            Resolution::Pending(request) => request.await,
        }
    }
}

/// A request waiting on a resolution job.
///
/// Dropping it before it completes cancels the request. When it was the
/// last request on its job, the job is cancelled too.
pub struct ResolveRequest {
    id: RequestId,
    rx: oneshot::Receiver<Result<AddressList, NetError>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    done: bool,
}

impl ResolveRequest {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Move the request to a new priority, which may reorder its job.
    pub fn set_priority(&self, priority: RequestPriority) {
        if self.done {
            return;
        }
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::ChangePriority {
                id: self.id,
                priority,
            });
        }
    }

    /// Cancel explicitly; same as dropping the request.
    pub fn cancel(self) {}
}

impl Future for ResolveRequest {
    type Output = Result<AddressList, NetError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.done {
            return Poll::Ready(Err(NetError::Aborted));
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.done = true;
                Poll::Ready(result.unwrap_or(Err(NetError::Aborted)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResolveRequest {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Cancel { id: self.id });
        }
    }
}

impl fmt::Debug for ResolveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveRequest")
            .field("id", &self.id)
            .field("done", &self.done)
            .finish()
    }
}

/// Reply slot of an in-flight `resolve` call.
///
/// Dropped before the reply was taken, it cancels a request the manager
/// already attached to a job.
struct PendingReply {
    rx: Option<oneshot::Receiver<ResolveReply>>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl PendingReply {
    async fn recv(&mut self) -> Result<ResolveReply, NetError> {
        let rx = self.rx.as_mut().ok_or(NetError::Aborted)?;
        let reply = rx.await.map_err(|_| NetError::Aborted);
        self.rx = None;
        reply
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();
        if let Ok(ResolveReply::Pending { id, .. }) = rx.try_recv() {
            tracing::debug!(request = id.0, "resolve dropped before reply, cancelling");
            if let Some(commands) = self.commands.upgrade() {
                let _ = commands.send(Command::Cancel { id });
            }
        }
    }
}

impl HostResolver {
    pub fn builder() -> HostResolverBuilder {
        HostResolverBuilder::default()
    }

    /// Resolve `info`. Literal addresses, localhost names, cache hits and
    /// hosts-table hits complete immediately; everything else attaches to
    /// the job for the effective key.
    pub async fn resolve(&self, info: RequestInfo, priority: RequestPriority) -> Resolution {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Resolve {
                info,
                priority,
                reply,
            })
            .is_err()
        {
            return Resolution::Complete(Err(NetError::Aborted));
        }
        let mut pending = PendingReply {
            rx: Some(rx),
            commands: self.commands.downgrade(),
        };
        match pending.recv().await {
            Ok(ResolveReply::Complete(result)) => Resolution::Complete(result),
            Ok(ResolveReply::Pending { id, rx }) => Resolution::Pending(ResolveRequest {
                id,
                rx,
                commands: self.commands.downgrade(),
                done: false,
            }),
            Err(_) => Resolution::Complete(Err(NetError::Aborted)),
        }
    }

    /// Answer from literals, localhost, the cache and the hosts table only.
    /// Fails with `DnsCacheMiss` when none of them has the name.
    pub async fn resolve_from_cache(&self, info: RequestInfo) -> Result<AddressList, NetError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ResolveFromCache { info, reply })?;
        rx.await.unwrap_or(Err(NetError::Aborted))
    }

    /// Like [`resolve_from_cache`](Self::resolve_from_cache) but also serves
    /// expired entries, reporting how stale the answer is.
    pub async fn resolve_stale(
        &self,
        info: RequestInfo,
    ) -> (Result<AddressList, NetError>, Option<EntryStaleness>) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::ResolveStale { info, reply }).is_err() {
            return (Err(NetError::Aborted), None);
        }
        rx.await.unwrap_or((Err(NetError::Aborted), None))
    }

    pub fn change_request_priority(&self, request: &ResolveRequest, priority: RequestPriority) {
        request.set_priority(priority);
    }

    pub fn on_ip_address_changed(&self) {
        let _ = self.send(Command::IpAddressChanged);
    }

    pub fn on_dns_config_changed(&self, config: Option<DnsConfig>) {
        let _ = self.send(Command::DnsConfigChanged(config));
    }

    pub fn on_connection_type_changed(&self, connection_type: ConnectionType) {
        let _ = self.send(Command::ConnectionTypeChanged(connection_type));
    }

    /// Replace the DNS transaction client; running DNS tasks restart on it.
    pub fn set_dns_client(&self, client: Option<Arc<dyn DnsTransactionClient>>) {
        let _ = self.send(Command::SetDnsClient(client));
    }

    pub fn update_config(&self, settings: ResolverSettings) {
        let _ = self.send(Command::UpdateSettings(settings));
    }

    /// Write the cache and latency table to the configured persist path.
    pub async fn persist_now(&self) -> io::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::PersistNow { reply })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "resolver is gone"))?;
        rx.await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "resolver is gone"))?
    }

    pub async fn stats(&self) -> Result<ResolverStats, NetError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply })?;
        rx.await.map_err(|_| NetError::Aborted)
    }

    fn send(&self, command: Command) -> Result<(), NetError> {
        self.commands.send(command).map_err(|_| NetError::Aborted)
    }
}

/// Builder for a [`HostResolver`].
#[derive(Default)]
pub struct HostResolverBuilder {
    config: HostResolverConfig,
    resolver_proc: Option<Arc<dyn HostResolverProc>>,
    dns_client: Option<Arc<dyn DnsTransactionClient>>,
    dns_config: Option<DnsConfig>,
    address_sorter: Option<Arc<dyn AddressSorter>>,
    ipv6_probe: Option<Box<dyn ReachabilityProbe>>,
    hosts: Option<Arc<dyn HostsSource>>,
}

impl HostResolverBuilder {
    pub fn config(mut self, config: HostResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Procedure used by system resolver tasks. Defaults to the platform
    /// resolver.
    pub fn system_resolver(mut self, resolver_proc: Arc<dyn HostResolverProc>) -> Self {
        self.resolver_proc = Some(resolver_proc);
        self
    }

    pub fn dns_client(mut self, client: Arc<dyn DnsTransactionClient>) -> Self {
        self.dns_client = Some(client);
        self
    }

    pub fn dns_config(mut self, config: DnsConfig) -> Self {
        self.dns_config = Some(config);
        self
    }

    pub fn address_sorter(mut self, sorter: Arc<dyn AddressSorter>) -> Self {
        self.address_sorter = Some(sorter);
        self
    }

    pub fn ipv6_probe(mut self, probe: Box<dyn ReachabilityProbe>) -> Self {
        self.ipv6_probe = Some(probe);
        self
    }

    /// Hosts table consulted instead of the one carried by the DNS config.
    pub fn hosts_source(mut self, hosts: Arc<dyn HostsSource>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    /// Use the platform DNS configuration with a hickory-backed client.
    /// Leaves the DNS client unset if the configuration cannot be read.
    pub fn system_dns(mut self) -> Self {
        match DnsConfig::from_system() {
            Ok(config) => {
                self.dns_client = Some(Arc::new(HickoryTransactionClient::new(&config)));
                self.dns_config = Some(config);
            }
            Err(e) => tracing::warn!(error = %e, "system DNS unavailable, using system resolver only"),
        }
        self
    }

    /// Spawn the resolver task. Must be called within a tokio runtime.
    pub fn build(self) -> HostResolver {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let probe = self
            .ipv6_probe
            .unwrap_or_else(|| Box::new(UdpReachabilityProbe));
        let ipv6_probe = Ipv6Probe::new(
            probe,
            self.config.ipv6_probe_period,
            self.config.ipv6_probe_enabled,
        );
        let parts = Parts {
            resolver_proc: self
                .resolver_proc
                .unwrap_or_else(|| Arc::new(SystemHostResolverProc::new())),
            dns_client: self.dns_client,
            dns_config: self.dns_config,
            address_sorter: self
                .address_sorter
                .unwrap_or_else(|| Arc::new(PrecedenceAddressSorter)),
            hosts: self.hosts,
            ipv6_probe,
            config: self.config,
        };

        let manager = Manager::new(parts, events_tx);
        tokio::spawn(manager.run(commands_rx, events_rx));
        HostResolver {
            commands: commands_tx,
        }
    }
}
