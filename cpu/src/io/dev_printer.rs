//! A strip printer.  Each byte written to it is printed after a fixed
//! per-character delay, during which the printer holds its busy line.
use std::sync::mpsc::Sender;
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use super::{BusLines, Device};
use crate::event::OutputEvent;

/// Roughly the speed of the thermal strip printer: 120 characters
/// per second.
pub const CHAR_PRINT_TIME: Duration = Duration::from_micros(8333);

pub struct Printer {
    select_code: SelectCode,
    events: Sender<OutputEvent>,
    char_time: Duration,
    pending: Option<u8>,
}

impl Printer {
    pub fn new(select_code: SelectCode, events: Sender<OutputEvent>) -> Printer {
        Printer::with_char_time(select_code, events, CHAR_PRINT_TIME)
    }

    pub fn with_char_time(
        select_code: SelectCode,
        events: Sender<OutputEvent>,
        char_time: Duration,
    ) -> Printer {
        Printer {
            select_code,
            events,
            char_time,
            pending: None,
        }
    }
}

impl Device for Printer {
    fn name(&self) -> &str {
        "printer"
    }

    fn output(&mut self, bus: &mut BusLines) -> bool {
        // The printer listens to the low byte only.
        let byte = (bus.data & 0xFF) as u8;
        if self.char_time.is_zero() {
            self.pending = Some(byte);
            self.complete(bus);
            false
        } else {
            self.pending = Some(byte);
            true
        }
    }

    fn input(&mut self, bus: &mut BusLines) -> bool {
        // Reads back as ready with nothing to say.
        bus.data = 0;
        false
    }

    fn handshake_delay(&self) -> Duration {
        self.char_time
    }

    fn complete(&mut self, _bus: &mut BusLines) {
        if let Some(byte) = self.pending.take() {
            let ev = OutputEvent::Printed {
                select_code: self.select_code,
                byte,
            };
            if self.events.send(ev).is_err() {
                event!(Level::DEBUG, "printer output {:#04x} dropped", byte);
            }
        }
    }

    fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_prints_on_completion() {
        let (tx, rx) = channel();
        let mut p = Printer::new(SelectCode::masked(15), tx);
        let mut bus = BusLines {
            data: 0x1241,
            ..BusLines::default()
        };
        assert!(p.output(&mut bus));
        assert!(rx.try_recv().is_err());
        p.complete(&mut bus);
        assert_eq!(
            rx.try_recv(),
            Ok(OutputEvent::Printed {
                select_code: SelectCode::masked(15),
                byte: 0x41
            })
        );
        // A second completion prints nothing.
        p.complete(&mut bus);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_instant_printer_is_never_busy() {
        let (tx, rx) = channel();
        let mut p = Printer::with_char_time(SelectCode::masked(15), tx, Duration::ZERO);
        let mut bus = BusLines {
            data: 0x42,
            ..BusLines::default()
        };
        assert!(!p.output(&mut bus));
        assert!(matches!(rx.try_recv(), Ok(OutputEvent::Printed { byte: 0x42, .. })));
    }
}
