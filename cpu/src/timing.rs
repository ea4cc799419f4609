//! How peripheral delays relate to wall-clock time.
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{event, Level};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TimingMode {
    /// Handshake delays run on a simulated clock which only moves
    /// while the engine waits for a peripheral.  Repeatable; no
    /// threads.
    #[default]
    Virtual,
    /// Each peripheral paces itself in real time on its own thread.
    Calibrated,
}

impl Display for TimingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimingMode::Virtual => "virtual",
            TimingMode::Calibrated => "calibrated",
        })
    }
}

impl FromStr for TimingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<TimingMode, ConfigError> {
        match s {
            "virtual" => Ok(TimingMode::Virtual),
            "calibrated" => Ok(TimingMode::Calibrated),
            _ => Err(ConfigError::BadTimingMode(s.to_string())),
        }
    }
}

/// A shared stop flag.  Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What we learned about the host's sleep granularity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepCalibration {
    /// Requests shorter than this are saved up rather than slept.
    pub min_sleep: Duration,
    /// Multiplier applied to each requested sleep to cancel out
    /// systematic oversleep.
    pub correction: f64,
}

impl Default for SleepCalibration {
    fn default() -> Self {
        SleepCalibration {
            min_sleep: Duration::from_millis(1),
            correction: 1.0,
        }
    }
}

const CALIBRATION_REQUEST: Duration = Duration::from_millis(1);
const CALIBRATION_ROUNDS: u32 = 8;

/// Measures how long a short sleep really takes on this host.  Takes
/// a few milliseconds.
pub fn calibrate() -> SleepCalibration {
    let mut samples: Vec<Duration> = (0..CALIBRATION_ROUNDS)
        .map(|_| {
            let then = Instant::now();
            sleep(CALIBRATION_REQUEST);
            then.elapsed()
        })
        .collect();
    samples.sort();
    let median = samples[samples.len() / 2];
    let result = calibration_from_median(median);
    event!(
        Level::INFO,
        "sleep calibration: asked for {:?}, median sleep {:?}, using {:?}",
        CALIBRATION_REQUEST,
        median,
        result
    );
    result
}

fn calibration_from_median(median: Duration) -> SleepCalibration {
    if median.is_zero() {
        return SleepCalibration::default();
    }
    let ratio = CALIBRATION_REQUEST.as_secs_f64() / median.as_secs_f64();
    SleepCalibration {
        min_sleep: median.max(CALIBRATION_REQUEST),
        correction: ratio.clamp(0.25, 1.0),
    }
}
