//! Priority-ordered job dispatcher.
//!
//! Mirrors Chromium's `PrioritizedDispatcher`: a bounded number of jobs run at
//! once, the rest wait in per-priority FIFO queues. Slots can be reserved for
//! higher priorities so a flood of idle work never starves urgent work.
//!
//! Unlike the Chromium version the dispatcher never calls back into a job.
//! Every operation that may start a job hands the started job back to the
//! caller, which then runs it.

use crate::base::priority::{RequestPriority, NUM_PRIORITIES};
use std::collections::VecDeque;

/// Concurrency limits for a [`PrioritizedDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Slots usable only by jobs at this priority or higher.
    pub reserved_slots: [usize; NUM_PRIORITIES],
    /// Total number of jobs allowed to run at once.
    pub total_jobs: usize,
}

impl Limits {
    pub fn new(total_jobs: usize) -> Self {
        Self {
            reserved_slots: [0; NUM_PRIORITIES],
            total_jobs,
        }
    }

    /// Limits that let nothing run.
    pub fn paused() -> Self {
        Self::new(0)
    }

    /// Reserve `slots` for jobs at `priority` or above.
    pub fn reserve(mut self, priority: RequestPriority, slots: usize) -> Self {
        self.reserved_slots[priority.index()] = slots;
        self
    }
}

/// Identifies a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: u64,
    priority: RequestPriority,
}

impl Handle {
    pub fn priority(&self) -> RequestPriority {
        self.priority
    }
}

/// Outcome of submitting a job.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch<T> {
    /// The job got a slot and must be started by the caller.
    Started(T),
    /// The job waits in the queue.
    Queued(Handle),
}

#[derive(Debug)]
struct QueuedJob<T> {
    id: u64,
    job: T,
}

#[derive(Debug)]
pub struct PrioritizedDispatcher<T> {
    queues: Vec<VecDeque<QueuedJob<T>>>,
    max_running_jobs: [usize; NUM_PRIORITIES],
    limits: Limits,
    num_running_jobs: usize,
    next_id: u64,
}

impl<T> PrioritizedDispatcher<T> {
    pub fn new(limits: Limits) -> Self {
        let mut dispatcher = Self {
            queues: (0..NUM_PRIORITIES).map(|_| VecDeque::new()).collect(),
            max_running_jobs: [0; NUM_PRIORITIES],
            limits: Limits::paused(),
            num_running_jobs: 0,
            next_id: 0,
        };
        dispatcher.apply_limits(limits);
        dispatcher
    }

    pub fn num_running_jobs(&self) -> usize {
        self.num_running_jobs
    }

    pub fn queued_job_count(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Add `job` at the back of its priority queue, or start it right away.
    pub fn add(&mut self, job: T, priority: RequestPriority) -> Dispatch<T> {
        if self.has_slot_for(priority) {
            self.num_running_jobs += 1;
            return Dispatch::Started(job);
        }
        Dispatch::Queued(self.insert(job, priority, false))
    }

    /// Like [`add`](Self::add) but queues ahead of jobs of equal priority.
    pub fn add_at_head(&mut self, job: T, priority: RequestPriority) -> Dispatch<T> {
        if self.has_slot_for(priority) {
            self.num_running_jobs += 1;
            return Dispatch::Started(job);
        }
        Dispatch::Queued(self.insert(job, priority, true))
    }

    /// Remove a queued job.
    pub fn cancel(&mut self, handle: Handle) -> Option<T> {
        self.erase(handle)
    }

    /// Move a queued job to `priority`. The job may start as a result.
    pub fn change_priority(&mut self, handle: Handle, priority: RequestPriority) -> Dispatch<T> {
        if handle.priority == priority {
            return Dispatch::Queued(handle);
        }
        let Some(job) = self.erase(handle) else {
            tracing::warn!(?priority, "priority change for a job that is not queued");
            return Dispatch::Queued(handle);
        };
        if self.has_slot_for(priority) {
            self.num_running_jobs += 1;
            return Dispatch::Started(job);
        }
        Dispatch::Queued(self.insert(job, priority, false))
    }

    /// Remove the oldest job at the lowest non-empty priority.
    pub fn evict_oldest_lowest(&mut self) -> Option<T> {
        self.queues
            .iter_mut()
            .find(|queue| !queue.is_empty())
            .and_then(VecDeque::pop_front)
            .map(|queued| queued.job)
    }

    /// Release a running slot and start the next job if one fits.
    pub fn on_job_finished(&mut self) -> Option<T> {
        if self.num_running_jobs == 0 {
            tracing::warn!("job finished while nothing was running");
        } else {
            self.num_running_jobs -= 1;
        }
        self.dispatch_next()
    }

    /// Replace the limits and start every job the new limits allow.
    pub fn set_limits(&mut self, limits: Limits) -> Vec<T> {
        self.apply_limits(limits);
        let mut started = Vec::new();
        while let Some(job) = self.dispatch_next() {
            started.push(job);
        }
        started
    }

    fn apply_limits(&mut self, limits: Limits) {
        let reserved: usize = limits.reserved_slots.iter().sum();
        if reserved > limits.total_jobs {
            tracing::warn!(reserved, total = limits.total_jobs, "reserved slots exceed total");
        }
        let spare = limits.total_jobs.saturating_sub(reserved);
        let mut total = 0;
        for (i, slots) in limits.reserved_slots.iter().enumerate() {
            total += slots;
            self.max_running_jobs[i] = (total + spare).min(limits.total_jobs);
        }
        self.limits = limits;
    }

    fn has_slot_for(&self, priority: RequestPriority) -> bool {
        self.num_running_jobs < self.max_running_jobs[priority.index()]
    }

    fn dispatch_next(&mut self) -> Option<T> {
        let index = self.queues.iter().rposition(|queue| !queue.is_empty())?;
        let priority = RequestPriority::from_index(index)?;
        if !self.has_slot_for(priority) {
            return None;
        }
        let queued = self.queues[index].pop_front()?;
        self.num_running_jobs += 1;
        Some(queued.job)
    }

    fn insert(&mut self, job: T, priority: RequestPriority, at_head: bool) -> Handle {
        let id = self.next_id;
        self.next_id += 1;
        let queue = &mut self.queues[priority.index()];
        if at_head {
            queue.push_front(QueuedJob { id, job });
        } else {
            queue.push_back(QueuedJob { id, job });
        }
        Handle { id, priority }
    }

    fn erase(&mut self, handle: Handle) -> Option<T> {
        let queue = &mut self.queues[handle.priority.index()];
        let position = queue.iter().position(|queued| queued.id == handle.id)?;
        queue.remove(position).map(|queued| queued.job)
    }
}
