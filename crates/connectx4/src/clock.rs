//! Pluggable clock for the command-interface polling loop, so tests can
//! drive time deterministically instead of sleeping for real.

use std::time::Duration;

pub trait Clock {
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps on the host's real clock. Used by production bring-up.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
