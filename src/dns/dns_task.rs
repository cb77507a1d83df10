//! Asynchronous DNS task: one A and/or one AAAA transaction.
//!
//! Transactions come from a pluggable [`DnsTransactionClient`]; the default
//! one is backed by hickory (see `dns::hickory`). Answers are merged with
//! IPv6 first, sorted through an [`AddressSorter`] and reported with the
//! minimum TTL seen.

use crate::base::neterror::NetError;
use crate::dns::address_list::AddressList;
use crate::dns::config::DnsConfig;
use crate::dns::job::{TaskEvent, TaskId};
use crate::dns::key::{AddressFamily, ResolutionKey};
use futures::future::BoxFuture;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsRecordType {
    A,
    Aaaa,
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsRecordType::A => f.write_str("A"),
            DnsRecordType::Aaaa => f.write_str("AAAA"),
        }
    }
}

/// Parsed answer of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DnsAnswer {
    pub addresses: Vec<IpAddr>,
    pub ttl: Duration,
}

impl DnsAnswer {
    pub fn new(addresses: Vec<IpAddr>, ttl: Duration) -> Self {
        Self { addresses, ttl }
    }
}

pub type DnsTransactionFuture = BoxFuture<'static, Result<DnsAnswer, NetError>>;

/// A single query for one record type.
pub trait DnsTransaction: Send + Sync {
    fn record_type(&self) -> DnsRecordType;
    fn hostname(&self) -> &str;
    /// Run the query. The returned future must not borrow the transaction.
    fn start(&self) -> DnsTransactionFuture;
}

/// Factory for [`DnsTransaction`]s, rebuilt when the DNS config changes.
pub trait DnsTransactionClient: Send + Sync {
    fn create_transaction(&self, hostname: &str, record_type: DnsRecordType) -> Box<dyn DnsTransaction>;

    fn on_config_changed(&self, _config: Option<&DnsConfig>) {}
}

/// Orders a merged list by destination preference.
pub trait AddressSorter: Send + Sync {
    fn sort(&self, list: AddressList) -> Result<AddressList, NetError>;
}

/// Sorts by the RFC 6724 default policy table precedence; equal
/// precedences keep their order.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrecedenceAddressSorter;

impl PrecedenceAddressSorter {
    fn precedence(ip: &IpAddr) -> u8 {
        let v6 = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => *v6,
        };
        let segments = v6.segments();
        if v6 == Ipv6Addr::LOCALHOST {
            50
        } else if v6.to_ipv4_mapped().is_some() {
            35
        } else if segments[0] == 0x2002 {
            30
        } else if segments[0] == 0x2001 && segments[1] == 0 {
            5
        } else if segments[0] & 0xfe00 == 0xfc00 {
            3
        } else {
            40
        }
    }
}

impl AddressSorter for PrecedenceAddressSorter {
    fn sort(&self, list: AddressList) -> Result<AddressList, NetError> {
        let canonical = list.canonical_name().map(str::to_owned);
        let mut addrs: Vec<_> = list.into_iter().collect();
        addrs.sort_by_key(|a| std::cmp::Reverse(Self::precedence(&a.ip())));
        let mut sorted: AddressList = addrs.into_iter().collect();
        if let Some(name) = canonical {
            sorted.set_canonical_name(name);
        }
        Ok(sorted)
    }
}

/// Progress reported after each transaction completes.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DnsStep {
    /// Waiting on a transaction that is already running.
    Pending,
    /// The first of two transactions succeeded; the job may release its
    /// second slot and start the other transaction itself.
    FirstTransactionComplete,
    Complete(Result<(AddressList, Duration), NetError>),
}

pub(crate) struct DnsTask {
    id: TaskId,
    key: ResolutionKey,
    client: Arc<dyn DnsTransactionClient>,
    sorter: Arc<dyn AddressSorter>,
    events: mpsc::UnboundedSender<TaskEvent>,
    transactions: Vec<JoinHandle<()>>,
    num_started: usize,
    num_completed: usize,
    ipv4: Vec<IpAddr>,
    ipv6: Vec<IpAddr>,
    ttl: Option<Duration>,
}

impl DnsTask {
    pub(crate) fn new(
        id: TaskId,
        key: ResolutionKey,
        client: Arc<dyn DnsTransactionClient>,
        sorter: Arc<dyn AddressSorter>,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> Self {
        Self {
            id,
            key,
            client,
            sorter,
            events,
            transactions: Vec::new(),
            num_started: 0,
            num_completed: 0,
            ipv4: Vec::new(),
            ipv6: Vec::new(),
            ttl: None,
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn needs_two_transactions(&self) -> bool {
        self.key.address_family == AddressFamily::Unspecified
    }

    pub(crate) fn needs_another_transaction(&self) -> bool {
        self.needs_two_transactions() && self.num_started < 2
    }

    pub(crate) fn start_first_transaction(&mut self) {
        debug_assert_eq!(self.num_started, 0);
        let record_type = if self.key.address_family == AddressFamily::Ipv6 {
            DnsRecordType::Aaaa
        } else {
            DnsRecordType::A
        };
        self.start_transaction(record_type);
    }

    pub(crate) fn start_second_transaction(&mut self) {
        debug_assert!(self.needs_another_transaction());
        self.start_transaction(DnsRecordType::Aaaa);
    }

    fn start_transaction(&mut self, record_type: DnsRecordType) {
        self.num_started += 1;
        tracing::debug!(host = %self.key.hostname, %record_type, "starting DNS transaction");

        let transaction = self.client.create_transaction(&self.key.hostname, record_type);
        let query = transaction.start();
        let key = self.key.clone();
        let task = self.id;
        let events = self.events.clone();
        self.transactions.push(tokio::spawn(async move {
            let result = query.await;
            let _ = events.send(TaskEvent::DnsTransactionComplete {
                key,
                task,
                record_type,
                result,
            });
        }));
    }

    pub(crate) fn on_transaction_complete(
        &mut self,
        record_type: DnsRecordType,
        result: Result<DnsAnswer, NetError>,
    ) -> DnsStep {
        self.num_completed += 1;
        let answer = match result {
            Ok(answer) => answer,
            Err(error) => {
                tracing::debug!(
                    host = %self.key.hostname,
                    %record_type,
                    error = %error,
                    "DNS transaction failed"
                );
                return DnsStep::Complete(Err(error));
            }
        };

        if !answer.addresses.is_empty() {
            self.ttl = Some(self.ttl.map_or(answer.ttl, |ttl| ttl.min(answer.ttl)));
        }
        match record_type {
            DnsRecordType::A => self.ipv4.extend(answer.addresses),
            DnsRecordType::Aaaa => self.ipv6.extend(answer.addresses),
        }

        if self.needs_two_transactions() && self.num_completed == 1 {
            return DnsStep::FirstTransactionComplete;
        }
        if self.num_completed < self.num_started {
            return DnsStep::Pending;
        }
        DnsStep::Complete(self.finish())
    }

    fn finish(&mut self) -> Result<(AddressList, Duration), NetError> {
        let mut list = AddressList::from_ips(self.ipv6.drain(..).chain(self.ipv4.drain(..)), 0);
        if list.is_empty() {
            return Err(NetError::NameNotResolved);
        }

        if list.len() > 1 && list.first().is_some_and(|a| a.is_ipv6()) {
            list = self.sorter.sort(list).map_err(|e| {
                tracing::warn!(host = %self.key.hostname, error = %e, "address sort failed");
                NetError::DnsSortError
            })?;
            if list.is_empty() {
                return Err(NetError::NameNotResolved);
            }
        }

        let ttl = self.ttl.unwrap_or(Duration::ZERO);
        tracing::debug!(host = %self.key.hostname, count = list.len(), ttl = ?ttl, "DNS task complete");
        Ok((list, ttl))
    }
}

impl Drop for DnsTask {
    fn drop(&mut self) {
        for transaction in self.transactions.drain(..) {
            transaction.abort();
        }
    }
}
