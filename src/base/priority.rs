//! Request priorities and per-job priority bookkeeping.

/// Request priority (matches Chromium's RequestPriority).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RequestPriority {
    Throttled = 0,
    Idle = 1,
    Lowest = 2,
    Low = 3,
    #[default]
    Medium = 4,
    Highest = 5,
}

/// Number of distinct priority levels.
pub const NUM_PRIORITIES: usize = 6;

impl RequestPriority {
    pub const MINIMUM: RequestPriority = RequestPriority::Throttled;
    pub const MAXIMUM: RequestPriority = RequestPriority::Highest;

    /// All priorities, lowest first.
    pub const ALL: [RequestPriority; NUM_PRIORITIES] = [
        RequestPriority::Throttled,
        RequestPriority::Idle,
        RequestPriority::Lowest,
        RequestPriority::Low,
        RequestPriority::Medium,
        RequestPriority::Highest,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Tracks the highest priority among a set of attached requests.
///
/// Counts are kept per level so removing a request is O(levels) rather than
/// a scan over every request. An empty tracker reports
/// [`RequestPriority::MINIMUM`].
#[derive(Debug, Clone)]
pub struct PriorityTracker {
    counts: [usize; NUM_PRIORITIES],
    total: usize,
    highest: RequestPriority,
}

impl Default for PriorityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityTracker {
    pub fn new() -> Self {
        Self {
            counts: [0; NUM_PRIORITIES],
            total: 0,
            highest: RequestPriority::MINIMUM,
        }
    }

    pub fn highest(&self) -> RequestPriority {
        self.highest
    }

    pub fn total_count(&self) -> usize {
        self.total
    }

    pub fn count(&self, priority: RequestPriority) -> usize {
        self.counts[priority.index()]
    }

    pub fn add(&mut self, priority: RequestPriority) {
        self.counts[priority.index()] += 1;
        self.total += 1;
        if priority > self.highest {
            self.highest = priority;
        }
    }

    pub fn remove(&mut self, priority: RequestPriority) {
        let slot = &mut self.counts[priority.index()];
        if *slot == 0 {
            tracing::warn!(?priority, "removing untracked priority");
            return;
        }
        *slot -= 1;
        self.total -= 1;
        if *slot == 0 && priority == self.highest {
            self.highest = RequestPriority::ALL
                .iter()
                .rev()
                .copied()
                .find(|p| self.counts[p.index()] > 0)
                .unwrap_or(RequestPriority::MINIMUM);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority() {
        assert_eq!(RequestPriority::default(), RequestPriority::Medium);
        assert!(RequestPriority::Highest > RequestPriority::Idle);
    }

    #[test]
    fn test_index_roundtrip() {
        for p in RequestPriority::ALL {
            assert_eq!(RequestPriority::from_index(p.index()), Some(p));
        }
        assert_eq!(RequestPriority::from_index(NUM_PRIORITIES), None);
    }

    #[test]
    fn test_empty_tracker_reports_minimum() {
        let tracker = PriorityTracker::new();
        assert_eq!(tracker.highest(), RequestPriority::MINIMUM);
        assert_eq!(tracker.total_count(), 0);
    }

    #[test]
    fn test_tracker_follows_maximum() {
        let mut tracker = PriorityTracker::new();
        tracker.add(RequestPriority::Low);
        assert_eq!(tracker.highest(), RequestPriority::Low);

        tracker.add(RequestPriority::Highest);
        tracker.add(RequestPriority::Idle);
        assert_eq!(tracker.highest(), RequestPriority::Highest);

        tracker.remove(RequestPriority::Highest);
        assert_eq!(tracker.highest(), RequestPriority::Low);

        tracker.remove(RequestPriority::Low);
        assert_eq!(tracker.highest(), RequestPriority::Idle);

        tracker.remove(RequestPriority::Idle);
        assert_eq!(tracker.highest(), RequestPriority::MINIMUM);
        assert_eq!(tracker.total_count(), 0);
    }

    #[test]
    fn test_tracker_duplicate_levels() {
        let mut tracker = PriorityTracker::default();
        tracker.add(RequestPriority::Medium);
        tracker.add(RequestPriority::Medium);
        tracker.remove(RequestPriority::Medium);
        assert_eq!(tracker.highest(), RequestPriority::Medium);
        assert_eq!(tracker.count(RequestPriority::Medium), 1);
    }

    #[test]
    fn test_tracker_remove_untracked_is_ignored() {
        let mut tracker = PriorityTracker::default();
        tracker.remove(RequestPriority::Highest);
        assert_eq!(tracker.total_count(), 0);
    }
}
