//! Time keeping and the retransmission countdown.
//!
//! The client supplies a millisecond clock through the [`Timer`] trait. On top
//! of it, [`RetransmitTimer`] is a single-shot countdown: arming it restarts
//! the countdown, and the waiting loop polls [`RetransmitTimer::remaining`]
//! which clears the armed flag once the countdown has run out. Only one
//! countdown exists per connection, so handshakes and data transfer never
//! wait on overlapping timers.

/// A monotonic millisecond clock.
pub trait Timer {
    /// Get the current timestamp in milliseconds. The value may wrap around.
    fn get_timestamp_ms(&mut self) -> u32;
}

/// [`Timer`] backed by [`std::time::Instant`].
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdTimer {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdTimer {
    /// Create a clock counting from now.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Timer for StdTimer {
    fn get_timestamp_ms(&mut self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}

/// Single-shot retransmission countdown.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetransmitTimer {
    duration_ms: u32,
    armed_at: u32,
    armed: bool,
}

impl RetransmitTimer {
    /// Create a disarmed countdown lasting `duration_ms` once armed.
    pub(crate) const fn new(duration_ms: u32) -> Self {
        Self {
            duration_ms,
            armed_at: 0,
            armed: false,
        }
    }

    /// Start, or restart, the countdown.
    pub(crate) fn arm<T: Timer>(&mut self, timer: &mut T) {
        self.armed_at = timer.get_timestamp_ms();
        self.armed = true;
    }

    /// Stop the countdown without firing it.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }

    pub(crate) const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Return the milliseconds left before the countdown fires.
    ///
    /// # Returns
    /// - `Some(u32)`: Remaining time, never zero.
    /// - `None`: The countdown is not armed, or it has just fired. Firing
    ///   disarms it.
    pub(crate) fn remaining<T: Timer>(&mut self, timer: &mut T) -> Option<u32> {
        if !self.armed {
            return None;
        }

        let elapsed = timer.get_timestamp_ms().wrapping_sub(self.armed_at);
        let remaining = self.duration_ms.saturating_sub(elapsed);

        if remaining == 0 {
            self.armed = false;
            None
        } else {
            Some(remaining)
        }
    }
}
