//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use hostresolver::base::neterror::NetError;
use hostresolver::dns::{
    AddressFamily, AddressList, DnsAnswer, DnsConfig, DnsRecordType, DnsTransaction,
    DnsTransactionClient, DnsTransactionFuture, HostPortPair, HostResolverFlags, HostResolverProc,
    ProcError, RequestInfo,
};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn info(host: &str, port: u16) -> RequestInfo {
    RequestInfo::new(HostPortPair::new(host, port))
}

pub fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

pub fn v6(s: &str) -> IpAddr {
    IpAddr::V6(s.parse::<Ipv6Addr>().unwrap())
}

pub fn ips(list: &AddressList) -> Vec<IpAddr> {
    list.ips().collect()
}

pub fn valid_dns_config() -> DnsConfig {
    DnsConfig::new(vec!["192.0.2.53:53".parse().unwrap()])
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// System resolver answering from a fixed table, recording every call.
#[derive(Default)]
pub struct StaticProc {
    answers: Mutex<HashMap<String, Result<AddressList, ProcError>>>,
    calls: Mutex<Vec<(String, AddressFamily, HostResolverFlags)>>,
}

impl StaticProc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, host: &str, ips: &[IpAddr]) -> Self {
        self.set(host, Ok(AddressList::from_ips(ips.iter().copied(), 0)));
        self
    }

    pub fn failing(self, host: &str, error: NetError) -> Self {
        self.set(host, Err(ProcError::new(error)));
        self
    }

    pub fn set(&self, host: &str, answer: Result<AddressList, ProcError>) {
        self.answers.lock().unwrap().insert(host.to_string(), answer);
    }

    pub fn num_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(String, AddressFamily, HostResolverFlags)> {
        self.calls.lock().unwrap().clone()
    }
}

impl HostResolverProc for StaticProc {
    fn resolve(
        &self,
        host: &str,
        family: AddressFamily,
        flags: HostResolverFlags,
    ) -> Result<AddressList, ProcError> {
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), family, flags));
        self.answers
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or(Err(ProcError::new(NetError::NameNotResolved)))
    }
}

#[derive(Default)]
struct GateState {
    started: Vec<String>,
    released: HashSet<String>,
    all_released: bool,
}

/// System resolver whose lookups block until the test releases them.
///
/// Every lookup answers `10.0.0.1`. A lookup left unreleased gives up after
/// a few seconds so runtime shutdown never hangs.
#[derive(Default)]
pub struct GatedProc {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl GatedProc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn release(&self, host: &str) {
        self.state.lock().unwrap().released.insert(host.to_string());
        self.cond.notify_all();
    }

    pub fn release_all(&self) {
        self.state.lock().unwrap().all_released = true;
        self.cond.notify_all();
    }
}

impl HostResolverProc for GatedProc {
    fn resolve(
        &self,
        host: &str,
        _family: AddressFamily,
        _flags: HostResolverFlags,
    ) -> Result<AddressList, ProcError> {
        let mut state = self.state.lock().unwrap();
        state.started.push(host.to_string());
        self.cond.notify_all();
        let (state, timeout) = self
            .cond
            .wait_timeout_while(state, Duration::from_secs(5), |s| {
                !s.all_released && !s.released.contains(host)
            })
            .unwrap();
        drop(state);
        if timeout.timed_out() {
            return Err(ProcError::new(NetError::Aborted));
        }
        Ok(AddressList::from_ip(v4(10, 0, 0, 1), 0))
    }
}

#[derive(Default)]
struct AttemptState {
    attempts: usize,
    released: bool,
}

/// System resolver scripted per attempt. Attempts given an answer return it
/// at once; every other attempt blocks until `release_all`. Each attempt
/// reports its 1-based number on the channel returned by `new`, so tests
/// on a paused clock can wait for it without sleeping.
pub struct AttemptProc {
    answers: HashMap<usize, IpAddr>,
    state: Mutex<AttemptState>,
    cond: Condvar,
    attempts_tx: mpsc::UnboundedSender<usize>,
}

impl AttemptProc {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<usize>) {
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        let proc = Self {
            answers: HashMap::new(),
            state: Mutex::new(AttemptState::default()),
            cond: Condvar::new(),
            attempts_tx,
        };
        (proc, attempts_rx)
    }

    pub fn answering(mut self, attempt: usize, ip: IpAddr) -> Self {
        self.answers.insert(attempt, ip);
        self
    }

    pub fn num_attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn release_all(&self) {
        self.state.lock().unwrap().released = true;
        self.cond.notify_all();
    }
}

impl HostResolverProc for AttemptProc {
    fn resolve(
        &self,
        _host: &str,
        _family: AddressFamily,
        _flags: HostResolverFlags,
    ) -> Result<AddressList, ProcError> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        let attempt = state.attempts;
        let _ = self.attempts_tx.send(attempt);
        if let Some(ip) = self.answers.get(&attempt) {
            return Ok(AddressList::from_ip(*ip, 0));
        }
        let (_state, timeout) = self
            .cond
            .wait_timeout_while(state, Duration::from_secs(5), |s| !s.released)
            .unwrap();
        if timeout.timed_out() {
            return Err(ProcError::new(NetError::Aborted));
        }
        Err(ProcError::new(NetError::NameNotResolved))
    }
}

/// DNS client answering from a table. Queries with no answer configured
/// when they start never complete.
#[derive(Default)]
pub struct MockDnsClient {
    answers: Mutex<HashMap<(String, DnsRecordType), Result<DnsAnswer, NetError>>>,
    transactions: Mutex<Vec<(String, DnsRecordType)>>,
    config_changes: AtomicUsize,
}

impl MockDnsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, host: &str, record_type: DnsRecordType, ips: &[IpAddr], ttl: Duration) {
        self.answers.lock().unwrap().insert(
            (host.to_string(), record_type),
            Ok(DnsAnswer::new(ips.to_vec(), ttl)),
        );
    }

    pub fn fail(&self, host: &str, record_type: DnsRecordType, error: NetError) {
        self.answers
            .lock()
            .unwrap()
            .insert((host.to_string(), record_type), Err(error));
    }

    pub fn transactions(&self) -> Vec<(String, DnsRecordType)> {
        self.transactions.lock().unwrap().clone()
    }

    pub fn num_transactions(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }

    pub fn num_config_changes(&self) -> usize {
        self.config_changes.load(Ordering::SeqCst)
    }
}

struct MockTransaction {
    hostname: String,
    record_type: DnsRecordType,
    answer: Option<Result<DnsAnswer, NetError>>,
}

impl DnsTransaction for MockTransaction {
    fn record_type(&self) -> DnsRecordType {
        self.record_type
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn start(&self) -> DnsTransactionFuture {
        match self.answer.clone() {
            Some(answer) => Box::pin(async move { answer }),
            None => Box::pin(std::future::pending()),
        }
    }
}

impl DnsTransactionClient for MockDnsClient {
    fn create_transaction(&self, hostname: &str, record_type: DnsRecordType) -> Box<dyn DnsTransaction> {
        self.transactions
            .lock()
            .unwrap()
            .push((hostname.to_string(), record_type));
        let answer = self
            .answers
            .lock()
            .unwrap()
            .get(&(hostname.to_string(), record_type))
            .cloned();
        Box::new(MockTransaction {
            hostname: hostname.to_string(),
            record_type,
            answer,
        })
    }

    fn on_config_changed(&self, _config: Option<&DnsConfig>) {
        self.config_changes.fetch_add(1, Ordering::SeqCst);
    }
}
