//! Resolution jobs: the unit of deduplication.
//!
//! A job exists per distinct [`ResolutionKey`] while work for that key is
//! outstanding. It owns at most one system resolver task and at most one DNS
//! task, and the requests waiting on it. State transitions are driven by
//! the manager, which feeds task results through [`decide_next_state`].

use crate::base::dispatcher::Handle;
use crate::base::neterror::NetError;
use crate::base::priority::{PriorityTracker, RequestPriority};
use crate::dns::address_list::AddressList;
use crate::dns::dns_task::{DnsAnswer, DnsRecordType, DnsTask};
use crate::dns::key::{RequestInfo, ResolutionKey};
use crate::dns::persist::ResolutionSource;
use crate::dns::proc_task::{ProcError, ProcTask};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub(crate) type JobId = u64;
pub(crate) type TaskId = u64;

/// System resolver results are cached this long.
pub const CACHE_ENTRY_TTL: Duration = Duration::from_secs(60);
/// Failures are not cached.
pub const NEGATIVE_CACHE_ENTRY_TTL: Duration = Duration::ZERO;
/// Floor applied to DNS answer TTLs.
pub const MINIMUM_TTL: Duration = CACHE_ENTRY_TTL;

/// Identifies a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

/// Completion messages from tasks back to the manager.
#[derive(Debug)]
pub(crate) enum TaskEvent {
    ProcAttemptComplete {
        key: ResolutionKey,
        task: TaskId,
        attempt: usize,
        result: Result<AddressList, ProcError>,
    },
    ProcRetryCheck {
        key: ResolutionKey,
        task: TaskId,
    },
    DnsTransactionComplete {
        key: ResolutionKey,
        task: TaskId,
        record_type: DnsRecordType,
        result: Result<DnsAnswer, NetError>,
    },
}

/// What the dispatcher queues: enough to find the job again, and to notice
/// when the key has since been taken by a newer job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JobRef {
    pub(crate) id: JobId,
    pub(crate) key: ResolutionKey,
}

pub(crate) struct Request {
    pub(crate) id: RequestId,
    pub(crate) info: RequestInfo,
    pub(crate) priority: RequestPriority,
    pub(crate) sender: oneshot::Sender<Result<AddressList, NetError>>,
}

pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) key: ResolutionKey,
    /// Attached requests in attachment order.
    pub(crate) requests: Vec<Request>,
    pub(crate) priority_tracker: PriorityTracker,
    /// Set while waiting in the dispatcher queue.
    pub(crate) handle: Option<Handle>,
    /// Dispatcher slots held: one while running, two while both DNS
    /// transactions run.
    pub(crate) num_occupied_slots: usize,
    pub(crate) had_non_speculative_request: bool,
    pub(crate) proc_task: Option<ProcTask>,
    pub(crate) dns_task: Option<DnsTask>,
    /// Error of a DNS task this job fell back from.
    pub(crate) dns_task_error: Option<NetError>,
    pub(crate) created_at: Instant,
    pub(crate) started_at: Option<Instant>,
}

impl Job {
    pub(crate) fn new(id: JobId, key: ResolutionKey, now: Instant) -> Self {
        Self {
            id,
            key,
            requests: Vec::new(),
            priority_tracker: PriorityTracker::new(),
            handle: None,
            num_occupied_slots: 0,
            had_non_speculative_request: false,
            proc_task: None,
            dns_task: None,
            dns_task_error: None,
            created_at: now,
            started_at: None,
        }
    }

    pub(crate) fn job_ref(&self) -> JobRef {
        JobRef {
            id: self.id,
            key: self.key.clone(),
        }
    }

    pub(crate) fn priority(&self) -> RequestPriority {
        self.priority_tracker.highest()
    }

    /// Holding a dispatcher slot, whether or not its tasks have started yet.
    pub(crate) fn is_running(&self) -> bool {
        self.num_occupied_slots > 0
    }

    pub(crate) fn is_queued(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn has_tasks(&self) -> bool {
        self.proc_task.is_some() || self.dns_task.is_some()
    }

    pub(crate) fn add_request(&mut self, request: Request) {
        self.priority_tracker.add(request.priority);
        if !request.info.is_speculative {
            self.had_non_speculative_request = true;
        }
        self.requests.push(request);
    }

    /// Detach a request; returns it if it was attached.
    pub(crate) fn remove_request(&mut self, id: RequestId) -> Option<Request> {
        let position = self.requests.iter().position(|r| r.id == id)?;
        let request = self.requests.remove(position);
        self.priority_tracker.remove(request.priority);
        Some(request)
    }

    pub(crate) fn change_request_priority(&mut self, id: RequestId, priority: RequestPriority) -> bool {
        let Some(request) = self.requests.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        self.priority_tracker.remove(request.priority);
        request.priority = priority;
        self.priority_tracker.add(priority);
        true
    }
}

/// Result of a finished task, as seen by its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Dns(Result<(AddressList, Duration), NetError>),
    Proc(Result<AddressList, NetError>),
}

/// What a job does after a task finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NextStep {
    Complete {
        result: Result<AddressList, NetError>,
        ttl: Duration,
        source: ResolutionSource,
    },
    FallbackToProc {
        dns_error: NetError,
    },
}

/// The single transition function for task results.
///
/// DNS answers get their TTL floored to [`MINIMUM_TTL`]; system answers use
/// [`CACHE_ENTRY_TTL`]. A name-collision address anywhere in a successful
/// answer turns it into [`NetError::IcannNameCollision`], which is final.
pub(crate) fn decide_next_state(outcome: TaskOutcome, fallback_to_proc: bool) -> NextStep {
    match outcome {
        TaskOutcome::Dns(Ok((list, _))) if list.contains_icann_name_collision() => NextStep::Complete {
            result: Err(NetError::IcannNameCollision),
            ttl: NEGATIVE_CACHE_ENTRY_TTL,
            source: ResolutionSource::Dns,
        },
        TaskOutcome::Dns(Ok((list, ttl))) => NextStep::Complete {
            result: Ok(list),
            ttl: ttl.max(MINIMUM_TTL),
            source: ResolutionSource::Dns,
        },
        TaskOutcome::Dns(Err(dns_error)) if fallback_to_proc => NextStep::FallbackToProc { dns_error },
        TaskOutcome::Dns(Err(error)) => NextStep::Complete {
            result: Err(error),
            ttl: NEGATIVE_CACHE_ENTRY_TTL,
            source: ResolutionSource::Dns,
        },
        TaskOutcome::Proc(Ok(list)) if list.contains_icann_name_collision() => NextStep::Complete {
            result: Err(NetError::IcannNameCollision),
            ttl: NEGATIVE_CACHE_ENTRY_TTL,
            source: ResolutionSource::Proc,
        },
        TaskOutcome::Proc(Ok(list)) => NextStep::Complete {
            result: Ok(list),
            ttl: CACHE_ENTRY_TTL,
            source: ResolutionSource::Proc,
        },
        TaskOutcome::Proc(Err(error)) => NextStep::Complete {
            result: Err(error),
            ttl: NEGATIVE_CACHE_ENTRY_TTL,
            source: ResolutionSource::Proc,
        },
    }
}
