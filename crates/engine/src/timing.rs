//! Turn wall-clock tracking with an optional soft duration cap.

use std::time::{Duration, Instant};

/// Started at the top of a turn; the controller polls [`TurnClock::exceeded`]
/// at each loop iteration.
pub struct TurnClock {
    started: Instant,
    cap: Option<Duration>,
}

impl TurnClock {
    pub fn start(cap_minutes: Option<u64>) -> Self {
        Self {
            started: Instant::now(),
            cap: cap_minutes.map(|m| Duration::from_secs(m * 60)),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Whether the soft cap has been crossed. Always false without a cap.
    pub fn exceeded(&self) -> bool {
        self.cap.is_some_and(|cap| self.started.elapsed() >= cap)
    }
}
