//! Peripheral pacing threads for calibrated timing.
//!
//! Each attached device gets one worker.  When the device holds its
//! busy line the arbiter sends the worker the handshake delay; the
//! worker sleeps that long (on average) and then completes the
//! handshake under the bus lock, waking anybody waiting for it.
use std::io;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{event, Level};

use super::arbiter::Shared;
use super::DeviceId;
use crate::sleep::MinimalSleeper;
use crate::timing::{CancelToken, SleepCalibration};

/// How often an idle worker looks at its stop flag.
const IDLE_POLL: Duration = Duration::from_millis(50);

pub(super) struct Worker {
    id: DeviceId,
    jobs: Option<Sender<Duration>>,
    stop: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(super) fn spawn(
        id: DeviceId,
        name: &str,
        shared: Arc<Shared>,
        calibration: SleepCalibration,
    ) -> io::Result<Worker> {
        let (tx, rx) = channel::<Duration>();
        let stop = CancelToken::new();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(format!("io-{name}-{id}"))
            .spawn(move || {
                let mut sleeper = MinimalSleeper::new(calibration.min_sleep, calibration.correction);
                loop {
                    if thread_stop.is_cancelled() {
                        break;
                    }
                    match rx.recv_timeout(IDLE_POLL) {
                        Ok(delay) => {
                            if !sleeper.sleep(&delay, &thread_stop) {
                                break;
                            }
                            shared.complete(id);
                        }
                        Err(RecvTimeoutError::Timeout) => (),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                event!(Level::DEBUG, "worker for device {} has stopped", id);
            })?;
        Ok(Worker {
            id,
            jobs: Some(tx),
            stop,
            handle: Some(handle),
        })
    }

    /// Asks the worker to complete the current handshake after
    /// `delay`.  Returns false if the worker has gone away.
    pub(super) fn schedule(&self, delay: Duration) -> bool {
        match &self.jobs {
            Some(tx) => tx.send(delay).is_ok(),
            None => false,
        }
    }

    pub(super) fn stop(&mut self) {
        self.stop.cancel();
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                event!(Level::ERROR, "worker for device {} panicked", self.id);
            }
        }
    }

    pub(super) fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
