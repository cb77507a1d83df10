//! The resolver actor.
//!
//! One tokio task owns the job table, the cache, the dispatcher and every
//! task. `HostResolver` handles talk to it through [`Command`]s; tasks
//! report back through [`TaskEvent`]s. Neither side ever shares mutable
//! state, so no locks guard any of it.
//!
//! Jobs granted a dispatcher slot are not started inside the call that
//! granted them. They are queued in `pending_starts` and started once the
//! current command or event has been fully handled, which keeps every
//! state transition free of re-entrancy.

use crate::base::dispatcher::{Dispatch, Limits, PrioritizedDispatcher};
use crate::base::network_change::ConnectionType;
use crate::base::neterror::NetError;
use crate::base::priority::RequestPriority;
use crate::dns::address_list::AddressList;
use crate::dns::config::{DnsConfig, HostResolverConfig, ResolverSettings};
use crate::dns::dns_task::{AddressSorter, DnsStep, DnsTask, DnsTransactionClient};
use crate::dns::host_cache::{CacheEntry, EntryStaleness, HostCache};
use crate::dns::hosts::HostsSource;
use crate::dns::ipv6_probe::Ipv6Probe;
use crate::dns::job::{
    decide_next_state, Job, JobId, JobRef, NextStep, Request, RequestId, TaskEvent, TaskId,
    TaskOutcome,
};
use crate::dns::key::{AddressFamily, HostResolverFlags, RequestInfo, ResolutionKey};
use crate::dns::persist::{LatencyTable, ResolutionSource, ResolverSnapshot};
use crate::dns::proc_task::{HostResolverProc, ProcTask};
use crate::dns::util::{
    is_valid_hostname, localhost_addresses, parse_ip_literal, resembles_multicast_dns_name,
    resembles_netbios_name, MAX_HOST_LENGTH,
};
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::{Instant, Interval};

/// Consecutive rescued DNS failures after which the DNS client is disabled.
pub const MAXIMUM_DNS_FAILURES: u32 = 16;

pub(crate) type Completion = oneshot::Sender<Result<AddressList, NetError>>;

pub(crate) enum ResolveReply {
    Complete(Result<AddressList, NetError>),
    Pending {
        id: RequestId,
        rx: oneshot::Receiver<Result<AddressList, NetError>>,
    },
}

pub(crate) enum Command {
    Resolve {
        info: RequestInfo,
        priority: RequestPriority,
        reply: oneshot::Sender<ResolveReply>,
    },
    ResolveFromCache {
        info: RequestInfo,
        reply: Completion,
    },
    ResolveStale {
        info: RequestInfo,
        reply: oneshot::Sender<(Result<AddressList, NetError>, Option<EntryStaleness>)>,
    },
    ChangePriority {
        id: RequestId,
        priority: RequestPriority,
    },
    Cancel {
        id: RequestId,
    },
    IpAddressChanged,
    DnsConfigChanged(Option<DnsConfig>),
    ConnectionTypeChanged(ConnectionType),
    SetDnsClient(Option<Arc<dyn DnsTransactionClient>>),
    UpdateSettings(ResolverSettings),
    PersistNow {
        reply: oneshot::Sender<io::Result<()>>,
    },
    Stats {
        reply: oneshot::Sender<ResolverStats>,
    },
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolverStats {
    pub num_jobs: usize,
    pub num_running_jobs: usize,
    pub num_queued_jobs: usize,
    pub cache_size: usize,
    pub dns_client_enabled: bool,
}

/// Outcome of the synchronous fast paths.
enum Local {
    Done {
        result: Result<AddressList, NetError>,
        staleness: Option<EntryStaleness>,
    },
    Miss(ResolutionKey),
}

impl Local {
    fn done(result: Result<AddressList, NetError>) -> Self {
        Local::Done {
            result,
            staleness: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheUse {
    Fresh,
    Stale,
}

/// Collaborators handed over by the builder.
pub(crate) struct Parts {
    pub(crate) config: HostResolverConfig,
    pub(crate) resolver_proc: Arc<dyn HostResolverProc>,
    pub(crate) dns_client: Option<Arc<dyn DnsTransactionClient>>,
    pub(crate) dns_config: Option<DnsConfig>,
    pub(crate) address_sorter: Arc<dyn AddressSorter>,
    pub(crate) hosts: Option<Arc<dyn HostsSource>>,
    pub(crate) ipv6_probe: Ipv6Probe,
}

pub(crate) struct Manager {
    config: HostResolverConfig,
    settings: ResolverSettings,
    jobs: HashMap<ResolutionKey, Job>,
    request_index: HashMap<RequestId, ResolutionKey>,
    dispatcher: PrioritizedDispatcher<JobRef>,
    pending_starts: Vec<JobRef>,
    cache: HostCache,
    latencies: LatencyTable,
    resolver_proc: Arc<dyn HostResolverProc>,
    worker_pool: Arc<Semaphore>,
    dns_client: Option<Arc<dyn DnsTransactionClient>>,
    dns_config: Option<DnsConfig>,
    address_sorter: Arc<dyn AddressSorter>,
    hosts_override: Option<Arc<dyn HostsSource>>,
    ipv6_probe: Ipv6Probe,
    use_local_ipv6: bool,
    connection_type: ConnectionType,
    num_dns_failures: u32,
    dns_disabled_by_failures: bool,
    events: mpsc::UnboundedSender<TaskEvent>,
    next_job_id: JobId,
    next_task_id: TaskId,
    next_request_id: u64,
}

impl Manager {
    pub(crate) fn new(parts: Parts, events: mpsc::UnboundedSender<TaskEvent>) -> Self {
        let Parts {
            config,
            resolver_proc,
            dns_client,
            dns_config,
            address_sorter,
            hosts,
            ipv6_probe,
        } = parts;

        let limits = Limits::new(config.max_concurrent_resolves);
        let worker_pool = Arc::new(Semaphore::new(config.proc_params.worker_pool_size));
        let use_local_ipv6 = dns_config
            .as_ref()
            .is_some_and(|c| c.is_valid() && c.use_local_ipv6);
        if let (Some(client), Some(dns_config)) = (&dns_client, &dns_config) {
            client.on_config_changed(Some(dns_config));
        }

        let mut manager = Self {
            settings: config.settings,
            jobs: HashMap::new(),
            request_index: HashMap::new(),
            dispatcher: PrioritizedDispatcher::new(limits),
            pending_starts: Vec::new(),
            cache: HostCache::new(config.cache_max_entries),
            latencies: LatencyTable::new(),
            resolver_proc,
            worker_pool,
            dns_client,
            dns_config,
            address_sorter,
            hosts_override: hosts,
            ipv6_probe,
            use_local_ipv6,
            connection_type: ConnectionType::Unknown,
            num_dns_failures: 0,
            dns_disabled_by_failures: false,
            events,
            next_job_id: 0,
            next_task_id: 0,
            next_request_id: 0,
            config,
        };
        manager.load_snapshot();
        manager
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TaskEvent>,
    ) {
        let period = self.config.persist_interval;
        let mut persist_timer = self
            .config
            .persist_path
            .as_ref()
            .filter(|_| !period.is_zero())
            .map(|_| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event),
                _ = tick(&mut persist_timer) => {
                    if let Err(e) = self.persist() {
                        tracing::warn!(error = %e, "periodic persist failed");
                    }
                }
            }
            self.drain_pending_starts();
        }

        tracing::debug!(jobs = self.jobs.len(), "resolver shutting down");
        if self.config.persist_path.is_some() {
            if let Err(e) = self.persist() {
                tracing::warn!(error = %e, "final persist failed");
            }
        }
        // Dropping the jobs drops their completion senders; waiting callers
        // observe `NetError::Aborted`.
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Resolve {
                info,
                priority,
                reply,
            } => self.resolve(info, priority, reply),
            Command::ResolveFromCache { info, reply } => {
                let result = match self.resolve_locally(&info, CacheUse::Fresh) {
                    Local::Done { result, .. } => result,
                    Local::Miss(_) => Err(NetError::DnsCacheMiss),
                };
                let _ = reply.send(result);
            }
            Command::ResolveStale { info, reply } => {
                let answer = match self.resolve_locally(&info, CacheUse::Stale) {
                    Local::Done { result, staleness } => (result, staleness),
                    Local::Miss(_) => (Err(NetError::DnsCacheMiss), None),
                };
                let _ = reply.send(answer);
            }
            Command::ChangePriority { id, priority } => self.change_request_priority(id, priority),
            Command::Cancel { id } => self.cancel_request(id),
            Command::IpAddressChanged => self.on_ip_address_changed(),
            Command::DnsConfigChanged(config) => self.on_dns_config_changed(config),
            Command::ConnectionTypeChanged(connection_type) => {
                tracing::debug!(?connection_type, "connection type changed");
                self.connection_type = connection_type;
            }
            Command::SetDnsClient(client) => self.set_dns_client(client),
            Command::UpdateSettings(settings) => self.update_settings(settings),
            Command::PersistNow { reply } => {
                let _ = reply.send(self.persist());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn handle_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::ProcAttemptComplete {
                key,
                task,
                attempt,
                result,
            } => {
                let offline = self.connection_type.is_offline();
                let Some(proc_task) = self.proc_task_mut(&key, task) else {
                    return;
                };
                if let Some(result) = proc_task.on_lookup_complete(attempt, result, offline) {
                    self.on_proc_task_complete(&key, result);
                }
            }
            TaskEvent::ProcRetryCheck { key, task } => {
                if let Some(proc_task) = self.proc_task_mut(&key, task) {
                    proc_task.retry_if_not_complete();
                }
            }
            TaskEvent::DnsTransactionComplete {
                key,
                task,
                record_type,
                result,
            } => {
                let Some(dns_task) = self
                    .jobs
                    .get_mut(&key)
                    .and_then(|job| job.dns_task.as_mut())
                    .filter(|t| t.id() == task)
                else {
                    return;
                };
                match dns_task.on_transaction_complete(record_type, result) {
                    DnsStep::Pending => {}
                    DnsStep::FirstTransactionComplete => self.on_first_dns_transaction_complete(&key),
                    DnsStep::Complete(outcome) => self.on_dns_task_complete(&key, outcome),
                }
            }
        }
    }

    fn proc_task_mut(&mut self, key: &ResolutionKey, task: TaskId) -> Option<&mut ProcTask> {
        self.jobs
            .get_mut(key)
            .and_then(|job| job.proc_task.as_mut())
            .filter(|t| t.id() == task)
    }

    // Fast paths

    fn resolve_locally(&mut self, info: &RequestInfo, cache_use: CacheUse) -> Local {
        let host = info.hostname();
        let port = info.port();

        if let Some(ip) = parse_ip_literal(host) {
            if !info.address_family.allows(&ip) {
                return Local::done(Err(NetError::NameNotResolved));
            }
            let mut list = AddressList::from_ip(ip, port);
            if info.flags.contains(HostResolverFlags::CANONNAME) {
                list.set_canonical_name(host);
            }
            return Local::done(Ok(list));
        }

        if host.is_empty() || host.len() > MAX_HOST_LENGTH {
            return Local::done(Err(NetError::InvalidArgument));
        }
        if !is_valid_hostname(host) {
            tracing::debug!(host = %host, "rejecting malformed hostname");
            return Local::done(Err(NetError::NameNotResolved));
        }

        let key = self.effective_key(info);

        if let Some(addresses) = localhost_addresses(&key.hostname) {
            return Local::done(serve_localhost(&key, addresses, port));
        }

        if info.allow_cached_response {
            let now = Instant::now();
            match cache_use {
                CacheUse::Fresh => {
                    if let Some(entry) = self.cache.lookup(&key, now) {
                        tracing::trace!(host = %key.hostname, "cache hit");
                        return Local::done(entry.result().map(|list| list.with_port(port)));
                    }
                }
                CacheUse::Stale => {
                    if let Some((entry, staleness)) = self.cache.lookup_stale(&key, now) {
                        tracing::trace!(host = %key.hostname, stale = staleness.is_stale(), "cache hit");
                        return Local::Done {
                            result: entry.result().map(|list| list.with_port(port)),
                            staleness: Some(staleness),
                        };
                    }
                }
            }
        }

        if let Some(list) = self.serve_from_hosts(&key) {
            tracing::trace!(host = %key.hostname, "hosts hit");
            return Local::done(Ok(list.with_port(port)));
        }

        Local::Miss(key)
    }

    fn effective_key(&mut self, info: &RequestInfo) -> ResolutionKey {
        let mut family = info.address_family;
        let mut flags = info.flags;
        if family == AddressFamily::Unspecified && !self.use_local_ipv6 {
            let assume_unreachable = self.settings.assume_ipv6_fails_on_wifi
                && self.connection_type == ConnectionType::Wifi;
            if !self.ipv6_probe.is_reachable(Instant::now(), assume_unreachable) {
                family = AddressFamily::Ipv4;
                flags |= HostResolverFlags::DEFAULT_FAMILY_SET_DUE_TO_NO_IPV6;
            }
        }
        ResolutionKey::new(info.hostname().to_ascii_lowercase(), family, flags)
    }

    /// Hosts entries are consulted only while a usable DNS config exists.
    fn serve_from_hosts(&self, key: &ResolutionKey) -> Option<AddressList> {
        let config = self.dns_config.as_ref().filter(|c| c.is_valid())?;
        let hosts: &dyn HostsSource = match &self.hosts_override {
            Some(hosts) => hosts.as_ref(),
            None => &config.hosts,
        };
        let list = hosts.lookup(key)?;
        if list.is_all_ipv4_loopback() {
            if let Some(widened) = key.widened() {
                return self.serve_from_hosts(&widened);
            }
        }
        Some(list)
    }

    // Requests

    fn resolve(
        &mut self,
        info: RequestInfo,
        priority: RequestPriority,
        reply: oneshot::Sender<ResolveReply>,
    ) {
        let key = match self.resolve_locally(&info, CacheUse::Fresh) {
            Local::Done { result, .. } => {
                let _ = reply.send(ResolveReply::Complete(result));
                return;
            }
            Local::Miss(key) => key,
        };

        self.next_request_id += 1;
        let id = RequestId(self.next_request_id);
        let (sender, rx) = oneshot::channel();
        let request = Request {
            id,
            info,
            priority,
            sender,
        };
        match self.jobs.get_mut(&key) {
            Some(job) => {
                job.add_request(request);
                tracing::trace!(host = %key.hostname, request = id.0, requests = job.requests.len(), "request attached");
                self.update_priority(&key);
            }
            None => {
                if !self.create_job(&key, request) {
                    let _ = reply.send(ResolveReply::Complete(Err(NetError::HostResolverQueueTooLarge)));
                    return;
                }
            }
        }
        self.request_index.insert(id, key.clone());

        if reply.send(ResolveReply::Pending { id, rx }).is_err() {
            // The caller went away before it saw the handle.
            self.cancel_request(id);
        }
    }

    /// Create a job for its first request and schedule it. Returns `false`
    /// if the job was evicted straight away because the queue is full.
    fn create_job(&mut self, key: &ResolutionKey, request: Request) -> bool {
        self.next_job_id += 1;
        let priority = request.priority;
        let mut job = Job::new(self.next_job_id, key.clone(), Instant::now());
        job.add_request(request);
        let new_job = job.job_ref();
        tracing::debug!(
            host = %key.hostname,
            family = ?key.address_family,
            ?priority,
            netbios_like = resembles_netbios_name(&key.hostname),
            "creating job"
        );
        self.jobs.insert(key.clone(), job);
        self.schedule(key, false);

        if self.dispatcher.queued_job_count() <= self.config.queued_job_limit() {
            return true;
        }
        let Some(evicted) = self.dispatcher.evict_oldest_lowest() else {
            return true;
        };
        if evicted == new_job {
            tracing::debug!(host = %key.hostname, "new job evicted, queue is full");
            self.jobs.remove(key);
            return false;
        }
        match self.jobs.get_mut(&evicted.key) {
            Some(job) if job.id == evicted.id => {
                tracing::debug!(host = %evicted.key.hostname, "evicting queued job");
                job.handle = None;
                self.complete_job(&evicted.key, Err(NetError::HostResolverQueueTooLarge), Duration::ZERO, None);
            }
            _ => tracing::warn!(host = %evicted.key.hostname, "evicted job is gone"),
        }
        true
    }

    fn change_request_priority(&mut self, id: RequestId, priority: RequestPriority) {
        let Some(key) = self.request_index.get(&id).cloned() else {
            return;
        };
        if let Some(job) = self.jobs.get_mut(&key) {
            job.change_request_priority(id, priority);
        }
        self.update_priority(&key);
    }

    fn cancel_request(&mut self, id: RequestId) {
        let Some(key) = self.request_index.remove(&id) else {
            return;
        };
        let Some(job) = self.jobs.get_mut(&key) else {
            return;
        };
        job.remove_request(id);
        tracing::trace!(host = %key.hostname, request = id.0, queued = job.is_queued(), "request cancelled");
        if job.requests.is_empty() {
            self.complete_job(&key, Err(NetError::Aborted), Duration::ZERO, None);
        } else {
            self.update_priority(&key);
        }
    }

    // Dispatcher plumbing

    fn schedule(&mut self, key: &ResolutionKey, at_head: bool) {
        let Some(job) = self.jobs.get(key) else {
            return;
        };
        let job_ref = job.job_ref();
        let priority = job.priority();
        let dispatch = if at_head {
            self.dispatcher.add_at_head(job_ref, priority)
        } else {
            self.dispatcher.add(job_ref, priority)
        };
        self.on_dispatch(key, dispatch);
    }

    fn on_dispatch(&mut self, key: &ResolutionKey, dispatch: Dispatch<JobRef>) {
        match dispatch {
            Dispatch::Started(job_ref) => self.grant(job_ref),
            Dispatch::Queued(handle) => {
                if let Some(job) = self.jobs.get_mut(key) {
                    job.handle = Some(handle);
                }
            }
        }
    }

    /// The dispatcher handed a slot to `job_ref`.
    fn grant(&mut self, job_ref: JobRef) {
        match self.jobs.get_mut(&job_ref.key) {
            Some(job) if job.id == job_ref.id => {
                job.handle = None;
                job.num_occupied_slots += 1;
                self.pending_starts.push(job_ref);
            }
            _ => {
                tracing::warn!(host = %job_ref.key.hostname, "slot granted to a finished job");
                self.release_slot();
            }
        }
    }

    fn release_slot(&mut self) {
        if let Some(next) = self.dispatcher.on_job_finished() {
            self.grant(next);
        }
    }

    fn update_priority(&mut self, key: &ResolutionKey) {
        let Some(job) = self.jobs.get_mut(key) else {
            return;
        };
        let priority = job.priority();
        let Some(handle) = job.handle.filter(|h| h.priority() != priority) else {
            return;
        };
        job.handle = None;
        let dispatch = self.dispatcher.change_priority(handle, priority);
        self.on_dispatch(key, dispatch);
    }

    fn with_dispatcher_paused(&mut self, f: impl FnOnce(&mut Self)) {
        let limits = self.dispatcher.limits().clone();
        for job_ref in self.dispatcher.set_limits(Limits::paused()) {
            self.grant(job_ref);
        }
        f(self);
        for job_ref in self.dispatcher.set_limits(limits) {
            self.grant(job_ref);
        }
    }

    fn drain_pending_starts(&mut self) {
        while !self.pending_starts.is_empty() {
            for job_ref in std::mem::take(&mut self.pending_starts) {
                self.start_job(job_ref);
            }
        }
    }

    fn start_job(&mut self, job_ref: JobRef) {
        let Some(job) = self.jobs.get_mut(&job_ref.key) else {
            return;
        };
        if job.id != job_ref.id {
            return;
        }
        if let Some(dns_task) = job.dns_task.as_mut() {
            if job.num_occupied_slots >= 2 && dns_task.needs_another_transaction() {
                dns_task.start_second_transaction();
            }
            return;
        }
        if job.has_tasks() {
            return;
        }
        let now = Instant::now();
        job.started_at = Some(now);
        tracing::debug!(
            host = %job.key.hostname,
            priority = ?job.priority(),
            queue_time = ?now.saturating_duration_since(job.created_at),
            "job started"
        );
        self.run_next_task(&job_ref.key);
    }

    // Tasks

    fn have_dns_config(&self) -> bool {
        self.settings.dns_client_enabled
            && !self.dns_disabled_by_failures
            && self.dns_client.is_some()
            && self.dns_config.as_ref().is_some_and(DnsConfig::is_valid)
    }

    fn run_next_task(&mut self, key: &ResolutionKey) {
        let use_dns = self.have_dns_config()
            && !key.flags.contains(HostResolverFlags::SYSTEM_ONLY)
            && !resembles_multicast_dns_name(&key.hostname);
        if use_dns {
            self.start_dns_task(key);
        } else {
            self.start_proc_task(key);
        }
    }

    fn start_proc_task(&mut self, key: &ResolutionKey) {
        self.next_task_id += 1;
        let mut task = ProcTask::new(
            self.next_task_id,
            key.clone(),
            self.config.proc_params.clone(),
            Arc::clone(&self.resolver_proc),
            Arc::clone(&self.worker_pool),
            self.events.clone(),
        );
        let Some(job) = self.jobs.get_mut(key) else {
            return;
        };
        tracing::debug!(host = %key.hostname, "starting system resolver task");
        task.start();
        job.proc_task = Some(task);
    }

    fn start_dns_task(&mut self, key: &ResolutionKey) {
        let Some(client) = self.dns_client.clone() else {
            self.start_proc_task(key);
            return;
        };
        self.next_task_id += 1;
        let mut task = DnsTask::new(
            self.next_task_id,
            key.clone(),
            client,
            Arc::clone(&self.address_sorter),
            self.events.clone(),
        );
        let Some(job) = self.jobs.get_mut(key) else {
            return;
        };
        tracing::debug!(host = %key.hostname, "starting DNS task");
        task.start_first_transaction();
        let needs_two = task.needs_two_transactions();
        job.dns_task = Some(task);
        if needs_two {
            self.schedule(key, true);
        }
    }

    /// Give back the second slot, or withdraw the request for it.
    fn reduce_to_one_slot(&mut self, key: &ResolutionKey) {
        let Some(job) = self.jobs.get_mut(key) else {
            return;
        };
        if let Some(handle) = job.handle.take() {
            self.dispatcher.cancel(handle);
        } else if job.num_occupied_slots > 1 {
            job.num_occupied_slots -= 1;
            self.release_slot();
        }
    }

    fn kill_dns_task(&mut self, key: &ResolutionKey) {
        if self.jobs.get(key).is_some_and(|job| job.dns_task.is_some()) {
            self.reduce_to_one_slot(key);
            if let Some(job) = self.jobs.get_mut(key) {
                job.dns_task = None;
            }
        }
    }

    fn on_first_dns_transaction_complete(&mut self, key: &ResolutionKey) {
        self.reduce_to_one_slot(key);
        if let Some(dns_task) = self.jobs.get_mut(key).and_then(|job| job.dns_task.as_mut()) {
            if dns_task.needs_another_transaction() {
                dns_task.start_second_transaction();
            }
        }
    }

    fn on_dns_task_complete(
        &mut self,
        key: &ResolutionKey,
        outcome: Result<(AddressList, Duration), NetError>,
    ) {
        if outcome.is_ok() {
            self.on_dns_task_resolve(None);
        }
        match decide_next_state(TaskOutcome::Dns(outcome), self.settings.fallback_to_proc) {
            NextStep::Complete {
                result,
                ttl,
                source,
            } => self.complete_job(key, result, ttl, Some(source)),
            NextStep::FallbackToProc { dns_error } => {
                tracing::debug!(host = %key.hostname, error = %dns_error, "DNS task failed, falling back to system resolver");
                self.kill_dns_task(key);
                if let Some(job) = self.jobs.get_mut(key) {
                    job.dns_task_error = Some(dns_error);
                }
                self.start_proc_task(key);
            }
        }
    }

    fn on_proc_task_complete(&mut self, key: &ResolutionKey, result: Result<AddressList, NetError>) {
        let dns_error = self.jobs.get(key).and_then(|job| job.dns_task_error);
        if let (Some(dns_error), Ok(_)) = (dns_error, &result) {
            tracing::debug!(
                host = %key.hostname,
                dns_error = %dns_error,
                netbios_like = dns_error == NetError::NameNotResolved && resembles_netbios_name(&key.hostname),
                "system resolver rescued a DNS failure"
            );
            self.on_dns_task_resolve(Some(dns_error));
        }
        match decide_next_state(TaskOutcome::Proc(result), self.settings.fallback_to_proc) {
            NextStep::Complete {
                result,
                ttl,
                source,
            } => self.complete_job(key, result, ttl, Some(source)),
            NextStep::FallbackToProc { .. } => {
                tracing::error!(host = %key.hostname, "system resolver result asked for a fallback");
                self.complete_job(key, Err(NetError::Unexpected), Duration::ZERO, None);
            }
        }
    }

    /// Track consecutive DNS failures that the system resolver recovered
    /// from; too many of them disable the DNS client.
    fn on_dns_task_resolve(&mut self, error: Option<NetError>) {
        let Some(error) = error else {
            self.num_dns_failures = 0;
            return;
        };
        self.num_dns_failures += 1;
        if self.num_dns_failures < MAXIMUM_DNS_FAILURES || self.dns_disabled_by_failures {
            return;
        }
        tracing::warn!(
            failures = self.num_dns_failures,
            error = %error,
            "disabling DNS client until the next DNS config change"
        );
        self.dns_disabled_by_failures = true;
        self.restart_dns_tasks();
    }

    /// Tear down every DNS task and rerun its job's task selection.
    fn restart_dns_tasks(&mut self) {
        self.with_dispatcher_paused(|this| {
            let keys: Vec<ResolutionKey> = this
                .jobs
                .iter()
                .filter(|(_, job)| job.dns_task.is_some())
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                this.restart_dns_job(&key);
            }
        });
    }

    fn restart_dns_job(&mut self, key: &ResolutionKey) {
        tracing::debug!(host = %key.hostname, "restarting DNS task");
        self.kill_dns_task(key);
        if let Some(job) = self.jobs.get_mut(key) {
            job.dns_task_error = None;
        }
        self.run_next_task(key);
    }

    // Completion

    /// Finish the job for `key`: detach it, release its slots, cache the
    /// result and notify every attached request in order.
    fn complete_job(
        &mut self,
        key: &ResolutionKey,
        result: Result<AddressList, NetError>,
        ttl: Duration,
        source: Option<ResolutionSource>,
    ) {
        let Some(mut job) = self.jobs.remove(key) else {
            return;
        };
        for request in &job.requests {
            self.request_index.remove(&request.id);
        }
        let proc_attempts = job.proc_task.as_ref().map_or(0, ProcTask::attempts_started);
        job.proc_task = None;
        job.dns_task = None;
        if let Some(handle) = job.handle.take() {
            self.dispatcher.cancel(handle);
        }
        for _ in 0..std::mem::take(&mut job.num_occupied_slots) {
            self.release_slot();
        }

        if job.requests.is_empty() {
            tracing::debug!(host = %key.hostname, "job cancelled");
            return;
        }

        let now = Instant::now();
        let result = result.map(|list| list.with_port(0));
        let did_complete = !matches!(
            result,
            Err(NetError::NetworkChanged) | Err(NetError::HostResolverQueueTooLarge)
        );
        if did_complete {
            if !ttl.is_zero() {
                self.cache
                    .set(key.clone(), CacheEntry::new(result.clone(), ttl), now, ttl);
            }
            if let (Some(source), Some(started)) = (source, job.started_at) {
                self.latencies
                    .record(source, now.saturating_duration_since(started));
            }
        }

        tracing::debug!(
            host = %key.hostname,
            ok = result.is_ok(),
            error = result.as_ref().err().map(NetError::as_i32),
            count = result.as_ref().map_or(0, AddressList::len),
            ttl = ?ttl,
            requests = job.requests.len(),
            proc_attempts,
            speculative_only = !job.had_non_speculative_request,
            "job complete"
        );

        for request in job.requests.drain(..) {
            let port = request.info.port();
            let reply = result.as_ref().map(|list| list.with_port(port)).map_err(|e| *e);
            let _ = request.sender.send(reply);
        }
    }

    // Network changes

    fn on_ip_address_changed(&mut self) {
        tracing::info!(jobs = self.jobs.len(), "IP address changed");
        self.ipv6_probe.invalidate();
        self.cache.on_network_change();
        self.with_dispatcher_paused(|this| {
            for key in this.running_job_keys() {
                this.complete_job(&key, Err(NetError::NetworkChanged), Duration::ZERO, None);
            }
        });
        self.try_serving_all_jobs_from_hosts();
    }

    fn on_dns_config_changed(&mut self, config: Option<DnsConfig>) {
        let valid = config.as_ref().is_some_and(DnsConfig::is_valid);
        tracing::info!(valid, "DNS config changed");
        self.use_local_ipv6 = !valid || config.as_ref().is_some_and(|c| c.use_local_ipv6);
        self.dns_config = config;
        self.num_dns_failures = 0;
        self.dns_disabled_by_failures = false;
        if let Some(client) = &self.dns_client {
            client.on_config_changed(self.dns_config.as_ref());
        }
        self.cache.on_network_change();

        self.with_dispatcher_paused(|this| {
            for key in this.running_job_keys() {
                let has_dns_task = this.jobs.get(&key).is_some_and(|job| job.dns_task.is_some());
                if has_dns_task {
                    this.restart_dns_job(&key);
                } else {
                    this.complete_job(&key, Err(NetError::NetworkChanged), Duration::ZERO, None);
                }
            }
        });
        self.try_serving_all_jobs_from_hosts();
    }

    fn set_dns_client(&mut self, client: Option<Arc<dyn DnsTransactionClient>>) {
        tracing::debug!(enabled = client.is_some(), "DNS client replaced");
        if let Some(client) = &client {
            client.on_config_changed(self.dns_config.as_ref());
        }
        self.dns_client = client;
        self.num_dns_failures = 0;
        self.dns_disabled_by_failures = false;
        self.restart_dns_tasks();
    }

    fn update_settings(&mut self, settings: ResolverSettings) {
        let previous = std::mem::replace(&mut self.settings, settings);
        tracing::debug!(?settings, "resolver settings updated");
        if previous.dns_client_enabled != settings.dns_client_enabled {
            self.restart_dns_tasks();
        }
    }

    fn running_job_keys(&self) -> Vec<ResolutionKey> {
        self.jobs
            .iter()
            .filter(|(_, job)| job.is_running())
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn try_serving_all_jobs_from_hosts(&mut self) {
        if !self.dns_config.as_ref().is_some_and(DnsConfig::is_valid) {
            return;
        }
        let keys: Vec<ResolutionKey> = self.jobs.keys().cloned().collect();
        for key in keys {
            if let Some(list) = self.serve_from_hosts(&key) {
                tracing::debug!(host = %key.hostname, "job served from hosts");
                self.complete_job(&key, Ok(list), Duration::ZERO, Some(ResolutionSource::Hosts));
            }
        }
    }

    // Persistence and diagnostics

    fn load_snapshot(&mut self) {
        let Some(path) = self.config.persist_path.clone() else {
            return;
        };
        match ResolverSnapshot::load(&path) {
            Ok(snapshot) => {
                let restored = self.cache.restore(snapshot.entries, Instant::now());
                self.latencies = snapshot.latencies;
                tracing::debug!(path = %path.display(), restored, "loaded resolver snapshot");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable snapshot"),
        }
    }

    fn persist(&self) -> io::Result<()> {
        let Some(path) = &self.config.persist_path else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no persist path configured",
            ));
        };
        let snapshot = ResolverSnapshot {
            entries: self.cache.export(Instant::now()),
            latencies: self.latencies.clone(),
        };
        snapshot.save(path)?;
        tracing::debug!(path = %path.display(), entries = snapshot.entries.len(), "persisted resolver snapshot");
        Ok(())
    }

    fn stats(&self) -> ResolverStats {
        ResolverStats {
            num_jobs: self.jobs.len(),
            num_running_jobs: self.dispatcher.num_running_jobs(),
            num_queued_jobs: self.dispatcher.queued_job_count(),
            cache_size: self.cache.size(),
            dns_client_enabled: self.have_dns_config(),
        }
    }
}

/// Loopback answer for a localhost-class name, filtered by the key's family.
/// IPv6 loopback stays when IPv4 was forced only by the reachability probe.
fn serve_localhost(
    key: &ResolutionKey,
    addresses: &[IpAddr],
    port: u16,
) -> Result<AddressList, NetError> {
    let narrowed = key
        .flags
        .contains(HostResolverFlags::DEFAULT_FAMILY_SET_DUE_TO_NO_IPV6);
    let list = AddressList::from_ips(
        addresses
            .iter()
            .copied()
            .filter(|ip| key.address_family.allows(ip) || (narrowed && ip.is_ipv6())),
        port,
    );
    if list.is_empty() {
        return Err(NetError::NameNotResolved);
    }
    Ok(list)
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
