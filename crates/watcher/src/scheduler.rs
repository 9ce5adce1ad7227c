//! Rescan timers
//!
//! Two deadlines drive rescan passes:
//! - A repeating poll tick for Stat-mode entries, at the smallest polling
//!   period among them; off when there are none
//! - A single-shot settle deadline armed by event-driven backends, so a burst
//!   of kernel events costs one pass instead of one per event

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Which timers were due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Due {
    pub poll: bool,
    pub settle: bool,
}

impl Due {
    pub fn any(&self) -> bool {
        self.poll || self.settle
    }
}

#[derive(Debug)]
pub struct RescanScheduler {
    poll_interval: Option<Duration>,
    next_poll: Option<Instant>,
    settle_delay: Duration,
    settle_at: Option<Instant>,
}

impl RescanScheduler {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            poll_interval: None,
            next_poll: None,
            settle_delay,
            settle_at: None,
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }

    /// Set the poll period; `None` stops the poll timer
    pub fn set_poll_interval(&mut self, interval: Option<Duration>) {
        if interval == self.poll_interval {
            return;
        }
        match interval {
            Some(interval) => {
                if self.poll_interval.is_none() {
                    debug!("Started polling timer, every {:?}", interval);
                } else {
                    debug!("Poll interval now {:?}", interval);
                }
                self.next_poll = Some(Instant::now() + interval);
            }
            None => {
                debug!("Stopped polling timer");
                self.next_poll = None;
            }
        }
        self.poll_interval = interval;
    }

    /// Arm the settle timer unless it is already running
    pub fn arm_settle(&mut self) {
        if self.settle_at.is_none() {
            self.settle_at = Some(Instant::now() + self.settle_delay);
        }
    }

    /// Run the next pass as soon as possible
    pub fn settle_now(&mut self) {
        self.settle_at = Some(Instant::now());
    }

    pub fn is_settling(&self) -> bool {
        self.settle_at.is_some()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.next_poll, self.settle_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Consume the timers due at `now`
    pub fn take_due(&mut self, now: Instant) -> Due {
        let mut due = Due::default();

        if let (Some(at), Some(interval)) = (self.next_poll, self.poll_interval) {
            if at <= now {
                due.poll = true;
                // Skip missed ticks rather than bursting to catch up
                let mut next = at + interval;
                if next <= now {
                    next = now + interval;
                }
                self.next_poll = Some(next);
            }
        }

        if matches!(self.settle_at, Some(at) if at <= now) {
            due.settle = true;
            self.settle_at = None;
        }

        due
    }

    /// A pass ran for another reason; the settle timer has nothing left to do
    pub fn clear_settle(&mut self) {
        self.settle_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_deadline_when_idle() {
        let scheduler = RescanScheduler::new(Duration::from_millis(100));
        assert_eq!(scheduler.next_deadline(), None);
        assert_eq!(scheduler.poll_interval(), None);
    }

    #[test]
    fn test_poll_timer_repeats() {
        let mut scheduler = RescanScheduler::new(Duration::from_millis(100));
        scheduler.set_poll_interval(Some(Duration::from_millis(500)));
        let first = scheduler.next_deadline().unwrap();

        assert!(!scheduler.take_due(first - Duration::from_millis(1)).any());

        let due = scheduler.take_due(first);
        assert!(due.poll);
        assert!(!due.settle);
        assert_eq!(scheduler.next_deadline(), Some(first + Duration::from_millis(500)));

        // Far behind: next tick is rebased on now
        let late = first + Duration::from_secs(10);
        assert!(scheduler.take_due(late).poll);
        assert_eq!(scheduler.next_deadline(), Some(late + Duration::from_millis(500)));
    }

    #[test]
    fn test_stopping_poll_timer() {
        let mut scheduler = RescanScheduler::new(Duration::from_millis(100));
        scheduler.set_poll_interval(Some(Duration::from_millis(500)));
        scheduler.set_poll_interval(None);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_settle_is_single_shot_and_not_extended() {
        let mut scheduler = RescanScheduler::new(Duration::from_millis(100));
        scheduler.arm_settle();
        let at = scheduler.next_deadline().unwrap();

        // Re-arming while pending keeps the first deadline
        scheduler.arm_settle();
        assert_eq!(scheduler.next_deadline(), Some(at));

        let due = scheduler.take_due(at);
        assert!(due.settle);
        assert!(!scheduler.is_settling());
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_settle_now_preempts_pending_settle() {
        let mut scheduler = RescanScheduler::new(Duration::from_secs(60));
        scheduler.arm_settle();
        scheduler.settle_now();
        assert!(scheduler.take_due(Instant::now()).settle);
    }
}
