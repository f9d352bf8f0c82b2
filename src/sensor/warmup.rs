//! Warm-up gate for sensors that need to settle after power-on
//!
//! Time is a `u32` millisecond tick that wraps after ~49.7 days. Elapsed time
//! is always computed with `wrapping_sub`, so the gate stays correct across
//! the wrap as long as the duration itself fits in the counter.

use std::time::Instant;

/// Monotonic millisecond tick source
pub trait Clock: Send {
    fn now_ms(&self) -> u32;
}

/// Tick counter starting at zero when the clock is created
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // truncation is the wrap
        self.origin.elapsed().as_millis() as u32
    }
}

/// Where a warm-up timer stands after a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupStatus {
    Warming { remaining_ms: u32 },
    /// Returned exactly once, on the poll that completes the warm-up
    BecameReady,
    Ready,
}

#[derive(Debug, Clone)]
pub struct WarmupTimer {
    started_at: u32,
    duration_ms: u32,
    ready: bool,
}

impl WarmupTimer {
    pub fn new(started_at: u32, duration_ms: u32) -> Self {
        Self {
            started_at,
            duration_ms,
            ready: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Begin warming again from `now`
    pub fn restart(&mut self, now: u32) {
        self.started_at = now;
        self.ready = false;
    }

    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    pub fn poll(&mut self, now: u32) -> WarmupStatus {
        if self.ready {
            return WarmupStatus::Ready;
        }

        let elapsed = now.wrapping_sub(self.started_at);
        if elapsed >= self.duration_ms {
            self.ready = true;
            WarmupStatus::BecameReady
        } else {
            WarmupStatus::Warming {
                remaining_ms: self.duration_ms - elapsed,
            }
        }
    }
}
