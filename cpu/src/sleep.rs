use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{event, Level};

use crate::timing::CancelToken;

/// Longest single sleep.  Cancellation is noticed within this long.
const SLICE: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SignedDuration {
    negative: bool,
    magnitude: Duration,
}

impl SignedDuration {
    pub const ZERO: SignedDuration = SignedDuration {
        negative: false,
        magnitude: Duration::ZERO,
    };

    fn sub(&self, d: Duration) -> SignedDuration {
        if self.negative {
            SignedDuration {
                negative: true,
                magnitude: self.magnitude.saturating_add(d),
            }
        } else {
            match self.magnitude.checked_sub(d) {
                Some(diff) => SignedDuration {
                    negative: false,
                    magnitude: diff,
                },
                None => SignedDuration {
                    negative: true,
                    magnitude: d - self.magnitude,
                },
            }
        }
    }

    fn add(&self, d: Duration) -> SignedDuration {
        if self.negative {
            match d.checked_sub(self.magnitude) {
                Some(diff) => SignedDuration {
                    negative: false,
                    magnitude: diff,
                },
                None => SignedDuration {
                    negative: true,
                    magnitude: self.magnitude - d,
                },
            }
        } else {
            SignedDuration {
                negative: false,
                magnitude: self.magnitude.saturating_add(d),
            }
        }
    }
}

/// MinimalSleeper paces a peripheral worker so that, on average, it
/// sleeps for the requested amount of time even though the host only
/// sleeps in coarse steps.  Requests shorter than the minimum are
/// saved up as sleep debt; oversleeping is paid back by sleeping less
/// next time.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use cpu::{CancelToken, MinimalSleeper};
/// let mut s = MinimalSleeper::new(Duration::from_millis(1), 1.0);
/// s.sleep(&Duration::from_micros(200), &CancelToken::new());
/// ```
#[derive(Debug)]
pub struct MinimalSleeper {
    /// Minimum period for which we will try to sleep.
    min_sleep: Duration,

    /// Requests are scaled by this to compensate for the host's
    /// measured oversleep.
    correction: f64,

    sleep_owed: SignedDuration,

    total_cumulative_sleep: Duration,
}

impl MinimalSleeper {
    pub fn new(min_sleep: Duration, correction: f64) -> MinimalSleeper {
        MinimalSleeper {
            min_sleep,
            correction,
            sleep_owed: SignedDuration::ZERO,
            total_cumulative_sleep: Duration::ZERO,
        }
    }

    /// Pays off the sleep debt, in slices so that `cancel` is noticed
    /// promptly.  Returns false if cancelled.  An early wake-up just
    /// goes round the loop again.
    fn really_sleep(&mut self, cancel: &CancelToken) -> bool {
        while !self.sleep_owed.negative && self.sleep_owed.magnitude > Duration::ZERO {
            if cancel.is_cancelled() {
                return false;
            }
            let slice = self.sleep_owed.magnitude.min(SLICE);
            let then = Instant::now();
            sleep(slice.mul_f64(self.correction));
            let slept_for = then.elapsed();
            self.total_cumulative_sleep += slept_for;
            self.sleep_owed = self.sleep_owed.sub(slept_for);
            event!(
                Level::TRACE,
                "MinimalSleeper: asked for {:?}, slept for {:?}, debt now {:?}",
                slice,
                slept_for,
                self.sleep_owed
            );
        }
        true
    }

    /// Sleeps for `duration` on average.  Returns false if `cancel`
    /// was set before the sleep completed.
    pub fn sleep(&mut self, duration: &Duration, cancel: &CancelToken) -> bool {
        self.sleep_owed = self.sleep_owed.add(*duration);
        match self.sleep_owed {
            SignedDuration {
                negative: false,
                magnitude,
            } if magnitude >= self.min_sleep => self.really_sleep(cancel),
            _ => {
                // Not enough debt to be worth a system call yet, or
                // we overslept last time.
                !cancel.is_cancelled()
            }
        }
    }

    /// Sleeps off whatever debt remains, however small.
    pub fn settle(&mut self, cancel: &CancelToken) -> bool {
        self.really_sleep(cancel)
    }

    pub fn total_sleep(&self) -> Duration {
        self.total_cumulative_sleep
    }
}

impl Drop for MinimalSleeper {
    fn drop(&mut self) {
        event!(
            Level::DEBUG,
            "MinimalSleeper: drop: total cumulative sleep is {:?}",
            self.total_cumulative_sleep
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_duration_arithmetic() {
        let d = SignedDuration::ZERO.add(Duration::from_millis(2));
        let d = d.sub(Duration::from_millis(5));
        assert_eq!(
            d,
            SignedDuration {
                negative: true,
                magnitude: Duration::from_millis(3)
            }
        );
        let d = d.add(Duration::from_millis(4));
        assert_eq!(
            d,
            SignedDuration {
                negative: false,
                magnitude: Duration::from_millis(1)
            }
        );
    }

    #[test]
    fn test_small_requests_accumulate_without_sleeping() {
        let mut s = MinimalSleeper::new(Duration::from_secs(1), 1.0);
        let cancel = CancelToken::new();
        for _ in 0..10 {
            assert!(s.sleep(&Duration::from_micros(1), &cancel));
        }
        assert_eq!(s.total_sleep(), Duration::ZERO);
    }

    #[test]
    fn test_cancelled_sleep_returns_promptly() {
        let mut s = MinimalSleeper::new(Duration::ZERO, 1.0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let start = Instant::now();
        assert!(!s.sleep(&Duration::from_secs(60), &cancel));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_settle_pays_off_debt() {
        let mut s = MinimalSleeper::new(Duration::from_secs(1), 1.0);
        let cancel = CancelToken::new();
        s.sleep(&Duration::from_millis(2), &cancel);
        assert!(s.settle(&cancel));
        assert!(s.total_sleep() >= Duration::from_millis(2));
    }
}
