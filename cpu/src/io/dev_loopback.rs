use super::{BusLines, Device};

/// Echoes the last word output to it back on input.  Never busy.
#[derive(Debug, Default)]
pub struct Loopback {
    last: u16,
}

impl Loopback {
    pub fn new() -> Loopback {
        Loopback::default()
    }
}

impl Device for Loopback {
    fn name(&self) -> &str {
        "loopback"
    }

    fn output(&mut self, bus: &mut BusLines) -> bool {
        self.last = bus.data;
        false
    }

    fn input(&mut self, bus: &mut BusLines) -> bool {
        bus.data = self.last;
        false
    }

    fn reset(&mut self) {
        self.last = 0;
    }
}

#[test]
fn test_echo() {
    let mut dev = Loopback::new();
    let mut bus = BusLines {
        data: 0o123,
        ..BusLines::default()
    };
    assert!(!dev.output(&mut bus));
    bus.data = 0;
    assert!(!dev.input(&mut bus));
    assert_eq!(bus.data, 0o123);
    dev.reset();
    dev.input(&mut bus);
    assert_eq!(bus.data, 0);
}
