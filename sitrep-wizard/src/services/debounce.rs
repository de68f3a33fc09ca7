//! Quiet-period timer for autosave
//!
//! Every edit re-arms the timer; it fires once the quiet period has elapsed
//! without a further edit. The timer holds no thread or task of its own. The
//! owner passes in the current instant (from a [`Clock`]) and polls
//! [`DebounceTimer::fire`].
//!
//! [`Clock`]: sitrep_common::time::Clock

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DebounceTimer {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    /// (Re)start the quiet period at `now`
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiet);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Disarm and return true if the deadline has passed at `now`
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_after_quiet_period() {
        let t0 = Instant::now();
        let mut timer = DebounceTimer::new(Duration::from_secs(10));
        timer.arm(t0);

        assert!(!timer.fire(t0 + Duration::from_secs(9)));
        assert!(timer.fire(t0 + Duration::from_secs(10)));
        assert!(!timer.fire(t0 + Duration::from_secs(11)));
        assert!(!timer.fire(t0 + Duration::from_secs(60)));
    }

    #[test]
    fn test_rearm_extends_deadline() {
        let t0 = Instant::now();
        let mut timer = DebounceTimer::new(Duration::from_secs(10));
        timer.arm(t0);
        timer.arm(t0 + Duration::from_secs(8));

        assert!(!timer.fire(t0 + Duration::from_secs(12)));
        assert!(timer.fire(t0 + Duration::from_secs(18)));
    }

    #[test]
    fn test_cancel() {
        let t0 = Instant::now();
        let mut timer = DebounceTimer::new(Duration::from_millis(500));
        timer.arm(t0);
        timer.cancel();
        assert!(!timer.fire(t0 + Duration::from_secs(1)));
    }
}
