//! System resolver task.
//!
//! Runs the blocking system lookup on a bounded worker pool. If no attempt
//! answers within `unresponsive_delay` another attempt is started, with the
//! delay multiplied by `retry_factor` each time, up to `max_retry_attempts`
//! attempts in total. The first attempt to answer decides the result; late
//! answers are discarded. Attempts already running on a worker thread are
//! never interrupted.

use crate::base::neterror::NetError;
use crate::dns::address_list::AddressList;
use crate::dns::config::ProcTaskParams;
use crate::dns::job::{TaskEvent, TaskId};
use crate::dns::key::{AddressFamily, HostResolverFlags, ResolutionKey};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

/// Failure of one system lookup, with the raw OS error for diagnostics.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{error} (os error {os_error})")]
pub struct ProcError {
    pub error: NetError,
    pub os_error: i32,
}

impl ProcError {
    pub fn new(error: NetError) -> Self {
        Self { error, os_error: 0 }
    }
}

impl From<NetError> for ProcError {
    fn from(error: NetError) -> Self {
        Self::new(error)
    }
}

/// A blocking, `getaddrinfo`-style lookup procedure.
///
/// Called from worker threads, possibly several times at once for the same
/// name, so implementations must not rely on per-call mutable state.
pub trait HostResolverProc: Send + Sync + 'static {
    fn resolve(
        &self,
        host: &str,
        family: AddressFamily,
        flags: HostResolverFlags,
    ) -> Result<AddressList, ProcError>;
}

pub(crate) struct ProcTask {
    id: TaskId,
    key: ResolutionKey,
    params: ProcTaskParams,
    resolver_proc: Arc<dyn HostResolverProc>,
    worker_pool: Arc<Semaphore>,
    events: mpsc::UnboundedSender<TaskEvent>,
    unresponsive_delay: Duration,
    attempts_started: usize,
    attempts_completed: usize,
    completed: bool,
    attempts: Vec<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
}

impl ProcTask {
    pub(crate) fn new(
        id: TaskId,
        key: ResolutionKey,
        params: ProcTaskParams,
        resolver_proc: Arc<dyn HostResolverProc>,
        worker_pool: Arc<Semaphore>,
        events: mpsc::UnboundedSender<TaskEvent>,
    ) -> Self {
        let unresponsive_delay = params.unresponsive_delay;
        Self {
            id,
            key,
            params,
            resolver_proc,
            worker_pool,
            events,
            unresponsive_delay,
            attempts_started: 0,
            attempts_completed: 0,
            completed: false,
            attempts: Vec::new(),
            retry_timer: None,
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn attempts_started(&self) -> usize {
        self.attempts_started
    }

    pub(crate) fn start(&mut self) {
        self.start_lookup_attempt();
    }

    /// Retry timer fired: start another attempt unless one already answered.
    pub(crate) fn retry_if_not_complete(&mut self) {
        if self.completed || self.attempts_started >= self.params.max_retry_attempts {
            return;
        }
        self.unresponsive_delay = self
            .unresponsive_delay
            .saturating_mul(self.params.retry_factor);
        self.start_lookup_attempt();
    }

    /// Record an attempt's answer. Returns the task result for the first
    /// answer and `None` for every later one.
    pub(crate) fn on_lookup_complete(
        &mut self,
        attempt: usize,
        result: Result<AddressList, ProcError>,
        offline: bool,
    ) -> Option<Result<AddressList, NetError>> {
        self.attempts_completed += 1;
        if self.completed {
            tracing::debug!(
                host = %self.key.hostname,
                attempt,
                ok = result.is_ok(),
                "discarding late system lookup attempt"
            );
            return None;
        }
        self.completed = true;
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }

        let result = match result {
            Ok(list) if list.is_empty() => Err(NetError::NameNotResolved),
            Ok(list) => Ok(list),
            Err(e) => {
                tracing::debug!(
                    host = %self.key.hostname,
                    attempt,
                    error = %e.error,
                    os_error = e.os_error,
                    "system lookup failed"
                );
                Err(e.error)
            }
        };
        let result = match result {
            Err(_) if offline => Err(NetError::InternetDisconnected),
            other => other,
        };

        tracing::debug!(
            host = %self.key.hostname,
            attempt,
            attempts_started = self.attempts_started,
            ok = result.is_ok(),
            "system lookup complete"
        );
        Some(result)
    }

    fn start_lookup_attempt(&mut self) {
        self.attempts_started += 1;
        let attempt = self.attempts_started;
        tracing::trace!(host = %self.key.hostname, attempt, "starting system lookup attempt");

        let key = self.key.clone();
        let task = self.id;
        let resolver_proc = Arc::clone(&self.resolver_proc);
        let worker_pool = Arc::clone(&self.worker_pool);
        let events = self.events.clone();
        self.attempts.push(tokio::spawn(async move {
            let result = match worker_pool.acquire_owned().await {
                Ok(permit) => {
                    let host = key.hostname.clone();
                    let (family, flags) = (key.address_family, key.flags);
                    tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        resolver_proc.resolve(&host, family, flags)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(error = %e, "system lookup worker failed");
                        Err(ProcError::new(NetError::Unexpected))
                    })
                }
                Err(_) => Err(ProcError::new(NetError::Aborted)),
            };
            let _ = events.send(TaskEvent::ProcAttemptComplete {
                key,
                task,
                attempt,
                result,
            });
        }));

        if attempt < self.params.max_retry_attempts {
            let delay = self.unresponsive_delay;
            let key = self.key.clone();
            let events = self.events.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(TaskEvent::ProcRetryCheck { key, task });
            });
            if let Some(previous) = self.retry_timer.replace(timer) {
                previous.abort();
            }
        }
    }
}

impl Drop for ProcTask {
    fn drop(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        // Attempts waiting for a worker are dropped; ones already on a
        // worker thread finish there and their answer goes nowhere.
        for attempt in self.attempts.drain(..) {
            attempt.abort();
        }
        if !self.completed {
            tracing::trace!(
                host = %self.key.hostname,
                attempts_started = self.attempts_started,
                attempts_completed = self.attempts_completed,
                "system lookup task cancelled"
            );
        }
    }
}
