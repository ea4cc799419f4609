//! Simulated time for the I/O arbiter.

use std::time::Duration;

/// Clock is a simulated clock.  In virtual timing mode the arbiter
/// keeps one of these and moves it forward only while the engine
/// waits for a peripheral's handshake, so peripheral delays cost no
/// wall-clock time and complete in a repeatable order.
pub trait Clock {
    /// Retrieves the current (simulated) time.
    fn now(&self) -> Duration;

    /// The caller calls `consume` to simulate the passing of a
    /// duration `interval`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use cpu::Clock;
    ///
    /// fn g<C: Clock>(clk: &mut C) {
    ///   // The printer hammer takes 8 milliseconds to fire.
    ///   clk.consume(&Duration::from_millis(8));
    /// }
    /// ```
    fn consume(&mut self, interval: &Duration);

    /// Moves the clock forward to `t`.  A clock never runs backwards,
    /// so a `t` in the past is ignored.
    fn advance_to(&mut self, t: Duration) {
        if let Some(delta) = t.checked_sub(self.now()) {
            self.consume(&delta);
        }
    }
}

/// BasicClock provides a simulated clock.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use cpu::BasicClock;
/// use cpu::Clock;
/// let mut clk = BasicClock::new();
/// clk.consume(&Duration::from_micros(12));
/// clk.advance_to(Duration::from_micros(10));
/// assert_eq!(clk.now(), Duration::from_micros(12));
/// ```
#[derive(Debug, Clone)]
pub struct BasicClock {
    elapsed: Duration,
}

impl BasicClock {
    pub fn new() -> BasicClock {
        BasicClock {
            elapsed: Duration::ZERO,
        }
    }

    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
    }
}

impl Default for BasicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for BasicClock {
    fn now(&self) -> Duration {
        self.elapsed
    }

    fn consume(&mut self, interval: &Duration) {
        self.elapsed += *interval;
    }
}

#[test]
fn test_advance_to_is_monotonic() {
    let mut clk = BasicClock::new();
    clk.advance_to(Duration::from_millis(3));
    assert_eq!(clk.now(), Duration::from_millis(3));
    clk.advance_to(Duration::from_millis(1));
    assert_eq!(clk.now(), Duration::from_millis(3));
    clk.reset();
    assert_eq!(clk.now(), Duration::ZERO);
}
