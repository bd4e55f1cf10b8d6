use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

/// Dispatch timestamps inside a trailing window of fixed span.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    capacity: u32,
    span: Duration,
    dispatched: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(capacity: u32, span: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            span,
            dispatched: VecDeque::new(),
        }
    }

    pub fn per_minute(capacity: u32) -> Self {
        Self::new(capacity, Duration::from_secs(60))
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.dispatched.front() {
            if oldest + self.span <= now {
                self.dispatched.pop_front();
            } else {
                break;
            }
        }
    }

    /// Zero when a dispatch is admissible at `now`, otherwise the time until the oldest entry expires.
    pub fn delay_until_admit(&mut self, now: Instant) -> Duration {
        self.evict(now);
        if (self.dispatched.len() as u32) < self.capacity {
            return Duration::ZERO;
        }
        match self.dispatched.front() {
            Some(&oldest) => (oldest + self.span).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.dispatched.push_back(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_until_capacity_then_waits_for_oldest() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(3, Duration::from_secs(60));

        for i in 0..3 {
            let at = start + Duration::from_secs(i * 10);
            assert_eq!(window.delay_until_admit(at), Duration::ZERO);
            window.record(at);
        }

        let at = start + Duration::from_secs(30);
        assert_eq!(window.delay_until_admit(at), Duration::from_secs(30));

        // first entry leaves the window at t=60
        let at = start + Duration::from_secs(60);
        assert_eq!(window.delay_until_admit(at), Duration::ZERO);
        window.record(at);
        assert_eq!(window.delay_until_admit(at), Duration::from_secs(10));
    }
}
