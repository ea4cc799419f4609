use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base::prelude::*;

use super::*;
use crate::alu::{Alu, AluTables};
use crate::config::MachineConfig;
use crate::event::OutputEvent;
use crate::registers::{Reg, Registers, HOLD_QUALIFIER};
use crate::timing::{CancelToken, TimingMode};

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn push(&self, s: String) {
        self.0.lock().expect("log lock").push(s);
    }

    fn lines(&self) -> Vec<String> {
        self.0.lock().expect("log lock").clone()
    }
}

/// A peripheral which records what happens to it.
struct Recorder {
    name: &'static str,
    log: Log,
    delay: Duration,
    reply: u16,
    raise_flag: bool,
}

impl Recorder {
    fn new(name: &'static str, log: &Log) -> Recorder {
        Recorder {
            name,
            log: log.clone(),
            delay: Duration::ZERO,
            reply: 0,
            raise_flag: false,
        }
    }

    fn slow(mut self, delay: Duration) -> Recorder {
        self.delay = delay;
        self
    }
}

impl Device for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn output(&mut self, bus: &mut BusLines) -> bool {
        self.log.push(format!("{} out {:04X}", self.name, bus.data));
        !self.delay.is_zero()
    }

    fn input(&mut self, bus: &mut BusLines) -> bool {
        self.log.push(format!("{} in", self.name));
        bus.data = self.reply;
        !self.delay.is_zero()
    }

    fn handshake_delay(&self) -> Duration {
        self.delay
    }

    fn complete(&mut self, bus: &mut BusLines) {
        self.log.push(format!("{} done", self.name));
        if self.raise_flag {
            bus.flag = true;
        }
    }

    fn reset(&mut self) {
        self.log.push(format!("{} reset", self.name));
    }
}

struct Rig {
    io: IoUnit,
    events: Receiver<OutputEvent>,
    regs: Registers,
    alu: Alu,
}

impl Rig {
    fn new(model: Model) -> Rig {
        Rig::with_config(MachineConfig {
            model,
            ..MachineConfig::default()
        })
    }

    fn with_config(config: MachineConfig) -> Rig {
        let (tx, rx) = channel();
        Rig {
            io: IoUnit::new(&config, CancelToken::new(), tx),
            events: rx,
            regs: Registers::new(),
            alu: Alu::new(AluTables::reference()),
        }
    }

    /// Loads an I/O micro-instruction into Q and runs IOS.
    fn run(&mut self, op: IoOp, sc: u8) {
        self.run_q(q(op, sc));
    }

    fn run_q(&mut self, q: u16) {
        self.regs.set(Reg::Q, q);
        self.retry();
    }

    /// Runs IOS again without touching Q.
    fn retry(&mut self) {
        self.io.exec(&mut self.regs, &mut self.alu);
    }

    fn held(&self) -> bool {
        self.regs.q_bit(HOLD_QUALIFIER)
    }

    fn events(&self) -> Vec<OutputEvent> {
        self.events.try_iter().collect()
    }
}

fn q(op: IoOp, sc: u8) -> u16 {
    IoInstruction {
        op,
        select_code: SelectCode::masked(sc),
        hold_clear: false,
        enable: true,
    }
    .to_q()
}

fn sc(n: u8) -> SelectCode {
    SelectCode::masked(n)
}

#[test]
fn test_power_on_preset_clears_latches() {
    let mut rig = Rig::new(Model::Hp9820);
    let log = Log::default();
    rig.io.attach(sc(4), Box::new(Recorder::new("r", &log)));
    rig.io.handle().request_service(sc(4));
    rig.run(IoOp::Stf, 4);
    rig.run(IoOp::Stc, 4);
    assert!(rig.io.latches().ready);
    assert!(rig.io.latches().enable);
    rig.io.power_on_preset();
    assert_eq!(rig.io.latches(), Latches::default());
    assert_eq!(rig.io.strobes(), 0);
    assert_eq!(rig.io.select_code(), SelectCode::NONE);
    assert!(log.lines().contains(&"r reset".to_string()));
}

#[test]
fn test_acknowledge_then_input_presents_strobes() {
    let rig = Rig::new(Model::Hp9820);
    let h = rig.io.handle();
    h.request_service(sc(3));
    h.request_service(sc(12));
    assert!(rig.io.service_requested());
    rig.io.acknowledge();
    let latches = rig.io.latches();
    assert!(latches.single_service);
    assert!(latches.inhibit);
    assert_eq!(rig.io.input(), 0b1000_0000_0100);
    assert_eq!(rig.io.io_register(), 0b1000_0000_0100);
    assert!(!rig.io.service_requested());
}

#[test]
fn test_acknowledge_masks_strobes_into_io_register() {
    let rig = Rig::new(Model::Hp9830);
    rig.io.handle().request_service(sc(15));
    rig.io.acknowledge();
    assert_eq!(rig.io.input(), 1 << 14);
    // The I/O register is only 12 bits wide.
    assert_eq!(rig.io.io_register(), 0);
}

#[test]
fn test_9810_does_not_identify_requester() {
    let rig = Rig::new(Model::Hp9810);
    rig.io.handle().request_service(sc(3));
    rig.io.acknowledge();
    assert_eq!(rig.io.input(), 0);
    assert!(rig.io.latches().single_service);
}

#[test]
fn test_disabled_exec_only_acknowledges() {
    let mut rig = Rig::new(Model::Hp9820);
    rig.run(IoOp::Stf, 5);
    rig.io.handle().request_service(sc(2));
    let before = rig.io.snapshot();
    let regs_before = rig.regs.snapshot();
    // Enable clear; the op and select code fields must be ignored.
    rig.run_q(q(IoOp::Clc, 9) & !Q_ENABLE);
    let after = rig.io.snapshot();
    assert_eq!(
        after.latches,
        Latches {
            single_service: true,
            inhibit: true,
            ..before.latches
        }
    );
    assert_eq!(after.select_code, SelectCode::NONE);
    assert_eq!(after.strobes, before.strobes);
    assert_eq!(after.bus.data, 0b10);
    assert_eq!(after.io, 0b10);
    let regs_after = rig.regs.snapshot();
    assert_eq!(regs_after.carry, regs_before.carry);
    assert_eq!(regs_after.a, regs_before.a);
    assert!(rig.events().is_empty());
}

#[test]
fn test_disabled_exec_without_request_does_nothing() {
    let mut rig = Rig::new(Model::Hp9820);
    let before = rig.io.snapshot();
    rig.run_q(0);
    assert_eq!(rig.io.snapshot(), before);
}

#[test]
fn test_service_request_logic() {
    let rig = Rig::new(Model::Hp9820);
    let h = rig.io.handle();
    assert!(!h.service_requested());
    h.request_service(sc(1));
    assert!(h.service_requested());
    h.withdraw_service(sc(1));
    assert!(!h.service_requested());
    // Stop is honoured even while inhibited, but not while a request
    // is being serviced.
    h.set_stop(true);
    assert!(h.service_requested());
    rig.io.acknowledge();
    assert!(!h.service_requested());
}

#[test]
fn test_flag_ops() {
    let mut rig = Rig::new(Model::Hp9810);
    rig.run(IoOp::Sfs, 3);
    assert!(!rig.regs.carry);
    rig.run(IoOp::Sfc, 3);
    assert!(rig.regs.carry);
    rig.run(IoOp::Stf, 3);
    assert!(rig.io.latches().ready);
    rig.run(IoOp::Sfs, 3);
    assert!(rig.regs.carry);
    rig.run(IoOp::Sfc, 3);
    assert!(!rig.regs.carry);
    // Hold/clear drops the flag afterwards.
    rig.run_q(q(IoOp::Sfs, 3) | Q_HOLD_CLEAR);
    assert!(rig.regs.carry);
    assert!(!rig.io.latches().ready);
}

#[test]
fn test_status_line_is_seen_by_flag_ops() {
    let mut rig = Rig::new(Model::Hp9810);
    let h = rig.io.handle();
    h.set_status(true);
    rig.run(IoOp::Sfs, 3);
    assert!(rig.regs.carry);
    rig.run(IoOp::Sfc, 3);
    assert!(!rig.regs.carry);
    // Hold/clear drops the flag flip-flop, not the peripheral's line.
    rig.run_q(q(IoOp::Sfs, 3) | Q_HOLD_CLEAR);
    assert!(rig.regs.carry);
    rig.run(IoOp::Sfs, 3);
    assert!(rig.regs.carry);

    h.set_status(false);
    rig.run(IoOp::Sfs, 3);
    assert!(!rig.regs.carry);
    rig.run(IoOp::Sfc, 3);
    assert!(rig.regs.carry);
}

#[test]
fn test_stc_runs_output_handshake() {
    let mut rig = Rig::new(Model::Hp9810);
    let log = Log::default();
    rig.io.attach(sc(4), Box::new(Recorder::new("r", &log)));
    rig.run(IoOp::Stc, 4);
    assert!(rig.io.latches().enable);
    assert!(rig.io.latches().ready);
    assert_eq!(log.lines(), vec!["r out 0000"]);
    rig.run(IoOp::Clc, 4);
    assert!(!rig.io.latches().enable);
    assert_eq!(log.lines().len(), 1);
}

#[test]
fn test_keyboard_quirks_replace_handshake() {
    for (model, stc, clc) in [
        (Model::Hp9810, OutputEvent::Beep, None),
        (Model::Hp9820, OutputEvent::DisplayBlank, None),
        (
            Model::Hp9830,
            OutputEvent::Beep,
            Some(OutputEvent::KeyboardReleased),
        ),
    ] {
        let mut rig = Rig::new(model);
        let log = Log::default();
        rig.io.attach(sc(12), Box::new(Recorder::new("kbd", &log)));
        rig.run(IoOp::Stc, 12);
        assert!(rig.io.latches().enable);
        assert_eq!(rig.events(), vec![stc]);
        rig.run(IoOp::Clc, 12);
        assert!(!rig.io.latches().enable);
        assert_eq!(rig.events(), clc.into_iter().collect::<Vec<_>>());
        assert!(log.lines().is_empty(), "{model}: {:?}", log.lines());
    }
}

#[test]
fn test_absent_device_reads_ready_zero() {
    let mut rig = Rig::new(Model::Hp9830);
    rig.regs.set(Reg::A, 0xBEEF);
    rig.run(IoOp::Li16, 7);
    assert_eq!(rig.regs.get(Reg::A), 0);
    assert_eq!(rig.io.input(), 0);
    let latches = rig.io.latches();
    assert!(latches.ready);
    assert!(!latches.busy);
    assert!(!rig.held());
}

#[test]
fn test_ot8_sends_low_byte() {
    let mut rig = Rig::new(Model::Hp9810);
    let log = Log::default();
    rig.io.attach(sc(5), Box::new(Recorder::new("r", &log)));
    rig.regs.set(Reg::A, 0x1234);
    rig.run(IoOp::Ot8, 5);
    assert_eq!(log.lines(), vec!["r out 0034"]);
    assert_eq!(rig.io.io_register(), 0x34);
    // The accumulator took the old I/O register byte at the top.
    assert_eq!(rig.regs.get(Reg::A), 0x0012);
}

#[test]
fn test_ot8_uses_active_accumulator() {
    let mut rig = Rig::new(Model::Hp9810);
    let log = Log::default();
    rig.io.attach(sc(5), Box::new(Recorder::new("r", &log)));
    rig.regs.set(Reg::A, 0x1111);
    rig.regs.set(Reg::B, 0x2299);
    rig.regs.b_selected = true;
    rig.run(IoOp::Ot8, 5);
    assert_eq!(log.lines(), vec!["r out 0099"]);
    assert_eq!(rig.regs.get(Reg::A), 0x1111);
}

#[test]
fn test_li8_brings_byte_into_top_of_accumulator() {
    let mut rig = Rig::new(Model::Hp9810);
    let log = Log::default();
    let mut dev = Recorder::new("r", &log);
    dev.reply = 0x0FAB;
    rig.io.attach(sc(5), Box::new(dev));
    rig.regs.set(Reg::A, 0x1234);
    rig.run(IoOp::Li8, 5);
    assert_eq!(log.lines(), vec!["r in"]);
    assert_eq!(rig.regs.get(Reg::A), 0xAB12);
    assert_eq!(rig.io.io_register(), 0xF34);
}

#[test]
fn test_li16_loads_word() {
    let mut rig = Rig::new(Model::Hp9810);
    let log = Log::default();
    let mut dev = Recorder::new("r", &log);
    dev.reply = 0xCAFE;
    rig.io.attach(sc(6), Box::new(dev));
    rig.run(IoOp::Li16, 6);
    assert_eq!(rig.regs.get(Reg::A), 0xCAFE);
    assert_eq!(rig.io.io_register(), 0xAFE);
}

#[test]
fn test_loopback_round_trip() {
    let mut rig = Rig::new(Model::Hp9810);
    rig.io.attach(sc(3), Box::new(Loopback::new()));
    rig.regs.set(Reg::A, 0x5A5A);
    rig.run(IoOp::Ot16, 3);
    rig.regs.set(Reg::A, 0);
    rig.run(IoOp::Li16, 3);
    assert_eq!(rig.regs.get(Reg::A), 0x5A5A);
}

#[test]
fn test_ot16_plotter_goes_through_aux() {
    let mut rig = Rig::new(Model::Hp9830);
    let log = Log::default();
    rig.io.attach(sc(14), Box::new(Recorder::new("plotter", &log)));
    rig.regs.set(Reg::A, 0xABCD);
    rig.run(IoOp::Ot16, 14);
    assert_eq!(rig.io.io_register(), 0xABC);
    assert_eq!(rig.io.aux_register(), 0xD0);
    assert_eq!(log.lines(), vec!["plotter out BCD0"]);
    assert_eq!(rig.regs.get(Reg::A), 0xD000);
}

#[test]
fn test_ot16_printer_sends_two_bytes() {
    let mut rig = Rig::new(Model::Hp9810);
    let log = Log::default();
    rig.io.attach(sc(15), Box::new(Recorder::new("printer", &log)));
    rig.regs.set(Reg::A, 0x4142);
    rig.run(IoOp::Ot16, 15);
    assert_eq!(log.lines(), vec!["printer out 0041", "printer out 0042"]);
    assert_eq!(rig.regs.get(Reg::A), 0x4142);
}

#[test]
fn test_ot16_general_sends_word() {
    let mut rig = Rig::new(Model::Hp9810);
    let log = Log::default();
    rig.io.attach(sc(12), Box::new(Recorder::new("display", &log)));
    rig.regs.set(Reg::A, 0x4142);
    rig.run(IoOp::Ot16, 12);
    assert_eq!(log.lines(), vec!["display out 4142"]);
}

#[test]
fn test_eow_ends_service() {
    let mut rig = Rig::new(Model::Hp9820);
    rig.io.handle().request_service(sc(2));
    rig.run_q(0);
    assert!(rig.io.latches().single_service);
    rig.run(IoOp::Eow, 2);
    let latches = rig.io.latches();
    assert!(!latches.single_service);
    assert!(!latches.inhibit);
    assert_eq!(rig.io.select_code(), SelectCode::NONE);
    // The request was never answered by a handshake, so it is still
    // pending.
    assert!(rig.io.service_requested());
}

#[test]
fn test_nop_codes_change_nothing() {
    let mut rig = Rig::new(Model::Hp9820);
    for code in 10..16 {
        let before = rig.io.latches();
        rig.run(IoOp::from_code(code), 4);
        assert_eq!(rig.io.latches(), before);
    }
}

#[test]
fn test_shared_select_code_calls_every_device_in_order() {
    let mut rig = Rig::new(Model::Hp9810);
    let log = Log::default();
    rig.io.attach(sc(4), Box::new(Recorder::new("first", &log)));
    rig.io.attach(sc(4), Box::new(Recorder::new("second", &log)));
    rig.io.attach(sc(9), Box::new(Recorder::new("other", &log)));
    rig.regs.set(Reg::A, 0x0077);
    rig.run(IoOp::Ot16, 4);
    assert_eq!(log.lines(), vec!["first out 0077", "second out 0077"]);
}

#[test]
fn test_directory_ordering_and_detach() {
    let log = Log::default();
    let mut dir = DeviceDirectory::new();
    dir.attach(sc(9), Box::new(Recorder::new("c", &log)));
    dir.attach(sc(3), Box::new(Recorder::new("a", &log)));
    dir.attach(sc(3), Box::new(Recorder::new("b", &log)));
    let order: Vec<(u8, String)> = dir
        .iter()
        .map(|(sc, d)| (sc.value(), d.name.clone()))
        .collect();
    assert_eq!(
        order,
        vec![
            (3, "a".to_string()),
            (3, "b".to_string()),
            (9, "c".to_string())
        ]
    );
    assert_eq!(dir.len(), 3);
    assert_eq!(dir.detach("a").len(), 1);
    assert_eq!(dir.at(sc(3)).len(), 1);
    assert_eq!(dir.detach("c").len(), 1);
    assert!(dir.at(sc(9)).is_empty());
    assert_eq!(dir.detach("nonesuch").len(), 0);
    assert_eq!(dir.len(), 1);
}

#[test]
fn test_device_flag_raises_service_request() {
    let mut rig = Rig::new(Model::Hp9820);
    let log = Log::default();
    let mut dev = Recorder::new("r", &log).slow(Duration::from_millis(1));
    dev.raise_flag = true;
    rig.io.attach(sc(6), Box::new(dev));
    rig.io.handle().request_service(sc(6));
    rig.run(IoOp::Ot16, 6);
    assert!(!rig.held());
    // The old request was answered and the completion raised a new one.
    assert_eq!(rig.io.strobes(), 1 << 5);
}

#[test]
fn test_virtual_handshake_within_timeout() {
    let mut rig = Rig::new(Model::Hp9810);
    let log = Log::default();
    rig.io.attach(
        sc(4),
        Box::new(Recorder::new("r", &log).slow(Duration::from_millis(2))),
    );
    rig.run(IoOp::Stc, 4);
    assert!(!rig.held());
    assert_eq!(log.lines(), vec!["r out 0000", "r done"]);
    assert_eq!(rig.io.virtual_now(), Duration::from_millis(2));
}

#[test]
fn test_virtual_hold_and_retry() {
    let mut rig = Rig::with_config(MachineConfig {
        handshake_timeout: Duration::from_millis(5),
        ..MachineConfig::default()
    });
    let log = Log::default();
    let mut dev = Recorder::new("r", &log).slow(Duration::from_millis(12));
    dev.reply = 0x1357;
    rig.io.attach(sc(4), Box::new(dev));
    rig.run(IoOp::Li16, 4);
    assert!(rig.held());
    assert!(rig.io.latches().busy);
    assert_eq!(rig.regs.get(Reg::A), 0);
    assert_eq!(rig.io.virtual_now(), Duration::from_millis(5));

    rig.retry();
    assert!(rig.held());
    assert_eq!(rig.io.virtual_now(), Duration::from_millis(10));

    rig.retry();
    assert!(!rig.held());
    assert!(!rig.io.latches().busy);
    assert!(rig.io.latches().ready);
    assert_eq!(rig.io.virtual_now(), Duration::from_millis(12));
    // The input finished on the retry.
    assert_eq!(rig.regs.get(Reg::A), 0x1357);
    assert_eq!(log.lines(), vec!["r in", "r done"]);
}

#[test]
fn test_held_printer_finishes_both_bytes() {
    let mut rig = Rig::new(Model::Hp9810);
    let (tx, _rx) = channel();
    rig.io.attach(sc(15), Box::new(Printer::new(sc(15), tx)));
    rig.regs.set(Reg::A, 0x4F4B);

    rig.run(IoOp::Ot16, 15);
    assert!(rig.held());
    assert!(rig.events().is_empty());

    rig.retry();
    // First byte done, second byte now held.
    assert!(rig.held());
    rig.retry();
    assert!(!rig.held());
    assert_eq!(
        rig.io.virtual_now(),
        dev_printer::CHAR_PRINT_TIME * 2,
    );
}

#[test]
fn test_printer_events_arrive_in_order() {
    let (tx, rx) = channel();
    let config = MachineConfig {
        handshake_timeout: Duration::from_millis(20),
        ..MachineConfig::default()
    };
    let mut io = IoUnit::new(&config, CancelToken::new(), tx.clone());
    io.attach(sc(15), Box::new(Printer::new(sc(15), tx)));
    let mut regs = Registers::new();
    let mut alu = Alu::new(AluTables::reference());
    regs.set(Reg::A, 0x4F4B);
    regs.set(Reg::Q, q(IoOp::Ot16, 15));
    io.exec(&mut regs, &mut alu);
    let printed: Vec<u8> = rx
        .try_iter()
        .filter_map(|ev| match ev {
            OutputEvent::Printed { byte, .. } => Some(byte),
            _ => None,
        })
        .collect();
    assert_eq!(printed, vec![0x4F, 0x4B]);
}

#[test]
fn test_calibrated_worker_completes_and_shuts_down() {
    let (tx, rx) = channel();
    let config = MachineConfig {
        timing: TimingMode::Calibrated,
        handshake_timeout: Duration::from_secs(2),
        ..MachineConfig::default()
    };
    let mut io = IoUnit::new(&config, CancelToken::new(), tx.clone());
    io.attach(
        sc(15),
        Box::new(Printer::with_char_time(sc(15), tx, Duration::from_millis(2))),
    );
    assert_eq!(io.worker_count(), 1);
    let mut regs = Registers::new();
    let mut alu = Alu::new(AluTables::reference());
    regs.set(Reg::A, 0x21);
    regs.set(Reg::Q, q(IoOp::Ot8, 15));
    io.exec(&mut regs, &mut alu);
    assert!(!regs.q_bit(HOLD_QUALIFIER));
    assert!(matches!(
        rx.try_recv(),
        Ok(OutputEvent::Printed { byte: 0x21, .. })
    ));

    let start = Instant::now();
    drop(io);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_detach_stops_worker() {
    let (tx, _rx) = channel();
    let config = MachineConfig {
        timing: TimingMode::Calibrated,
        ..MachineConfig::default()
    };
    let mut io = IoUnit::new(&config, CancelToken::new(), tx);
    io.attach(sc(3), Box::new(Loopback::new()));
    assert_eq!(io.worker_count(), 1);
    assert_eq!(io.detach("loopback"), 1);
    assert_eq!(io.worker_count(), 0);
    assert!(io.devices().is_empty());
}
