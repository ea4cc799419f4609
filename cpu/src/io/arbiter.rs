//! The I/O bus arbiter.
//!
//! All of the arbiter's state lives in one [`BusState`] behind one
//! lock, shared by the engine thread, peripheral workers and the
//! host (through [`IoHandle`]).  This mirrors the single shared
//! electrical bus; any read-modify-write of more than one field
//! happens with the lock held.
//!
//! The engine reaches the arbiter through the IOS micro-operation,
//! which calls [`IoUnit::exec`].  If the I/O enable bit of Q is clear,
//! `exec` services a pending request (if any) and does nothing else.
//! Otherwise it runs the I/O micro-instruction held in Q.
//!
//! Handshakes ("CEO cycles") are bounded by the configured handshake
//! timeout.  When a peripheral is still busy at the timeout, the hold
//! qualifier (Q6) is set and the microcode issues IOS again; the
//! retry waits for the same handshake and then finishes whatever the
//! micro-instruction had left to do.
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{event, span, Level};

use base::collections::deadline::DeadlineQueue;
use base::prelude::*;

use super::directory::{DeviceDirectory, DeviceId};
use super::quirks::{DeviceClass, ModelProfile};
use super::worker::Worker;
use super::{BusLines, Device, IoInstruction, IoOp, STROBE_MASK};
use crate::alu::{Alu, AluOp};
use crate::clock::{BasicClock, Clock};
use crate::config::MachineConfig;
use crate::event::OutputEvent;
use crate::registers::{Reg, Registers, Source, HOLD_QUALIFIER};
use crate::timing::{calibrate, CancelToken, SleepCalibration, TimingMode};

/// Width of the I/O register.
const IO_BITS: u32 = 12;
/// Width of the auxiliary output buffer.
const AUX_BITS: u32 = 8;

/// The control and status flip-flops of the I/O board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Latches {
    /// The flag flip-flop tested by SFS and SFC.
    pub ready: bool,
    /// Service requests are ignored while this is set.
    pub inhibit: bool,
    /// The control flip-flop set by STC.
    pub enable: bool,
    /// A handshake is in progress.
    pub busy: bool,
    /// A service request has been acknowledged and not yet ended
    /// by EOW.
    pub single_service: bool,
    /// The hard stop line (the STOP key).
    pub stop: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Output,
    Input,
}

/// What a held micro-instruction still has to do once its handshake
/// completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    LatchInput { wide: bool },
    SecondByte(u16),
}

pub(super) struct BusState {
    latches: Latches,
    /// Bit n - 1 is set while select code n wants service.
    strobes: u16,
    select_code: SelectCode,
    io: ShiftRegister,
    aux: ShiftRegister,
    bus: BusLines,
    directory: DeviceDirectory,
    /// Virtual timing: when each busy device completes.
    pending: DeadlineQueue<DeviceId>,
    clock: BasicClock,
    resume: Option<Resume>,
}

impl BusState {
    fn new() -> BusState {
        BusState {
            latches: Latches::default(),
            strobes: 0,
            select_code: SelectCode::NONE,
            io: ShiftRegister::low_byte("IO", IO_BITS),
            aux: ShiftRegister::new("AUX", AUX_BITS),
            bus: BusLines::default(),
            directory: DeviceDirectory::new(),
            pending: DeadlineQueue::new(),
            clock: BasicClock::new(),
            resume: None,
        }
    }

    fn requested(&self) -> bool {
        !self.latches.single_service
            && ((!self.latches.inhibit && self.strobes != 0) || self.latches.stop)
    }

    /// A device raised its flag line: that is a service request from
    /// its select code.
    fn collect_flag(&mut self, sc: SelectCode) {
        if self.bus.flag {
            self.bus.flag = false;
            if let Some(bit) = sc.strobe_bit() {
                self.strobes |= bit;
            }
        }
    }

    fn complete(&mut self, id: DeviceId) {
        self.pending.remove(&id);
        if let Some((sc, dev)) = self.directory.find_mut(id) {
            if dev.busy {
                dev.device.complete(&mut self.bus);
                dev.busy = false;
                event!(Level::TRACE, "{} at select code {} completed its handshake", dev.name, sc);
            }
            self.collect_flag(sc);
        }
    }

    /// Completes every virtual-time handshake which is due.
    fn fire_due(&mut self) {
        let now = self.clock.now();
        while let Some((id, _)) = self.pending.pop_due(now) {
            self.complete(id);
        }
    }

    /// The flag as SFS and SFC see it: the flag flip-flop or a
    /// peripheral holding the status line.
    fn flag_set(&self) -> bool {
        self.latches.ready || self.bus.status
    }

    fn latch_input(&mut self) {
        self.io.set(self.bus.data);
    }
}

impl Debug for BusState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusState")
            .field("latches", &self.latches)
            .field("strobes", &format_args!("{:015b}", self.strobes))
            .field("select_code", &self.select_code)
            .field("io", &self.io)
            .field("aux", &self.aux)
            .field("bus", &self.bus)
            .field("directory", &self.directory)
            .finish()
    }
}

pub(super) struct Shared {
    state: Mutex<BusState>,
    changed: Condvar,
}

type Guard<'a> = MutexGuard<'a, BusState>;

impl Shared {
    fn lock(&self) -> Guard<'_> {
        // A panicking peripheral does not make the bus unusable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn complete(&self, id: DeviceId) {
        let mut st = self.lock();
        st.complete(id);
        self.changed.notify_all();
    }
}

/// The view of the arbiter given to the host side: front panel keys
/// and anything else which raises service requests asynchronously.
#[derive(Clone)]
pub struct IoHandle {
    shared: Arc<Shared>,
}

impl IoHandle {
    pub fn request_service(&self, sc: SelectCode) {
        let mut st = self.shared.lock();
        if let Some(bit) = sc.strobe_bit() {
            st.strobes |= bit;
        }
        self.shared.changed.notify_all();
    }

    pub fn withdraw_service(&self, sc: SelectCode) {
        let mut st = self.shared.lock();
        if let Some(bit) = sc.strobe_bit() {
            st.strobes &= !bit;
        }
        self.shared.changed.notify_all();
    }

    pub fn set_stop(&self, on: bool) {
        let mut st = self.shared.lock();
        st.latches.stop = on;
        self.shared.changed.notify_all();
    }

    pub fn set_status(&self, on: bool) {
        let mut st = self.shared.lock();
        st.bus.status = on;
        self.shared.changed.notify_all();
    }

    pub fn service_requested(&self) -> bool {
        self.shared.lock().requested()
    }
}

impl Debug for IoHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("IoHandle")
    }
}

/// The state of the I/O board, for state dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IoSnapshot {
    pub latches: Latches,
    pub strobes: u16,
    pub select_code: SelectCode,
    pub io: u16,
    pub aux: u16,
    pub bus: BusLines,
}

pub struct IoUnit {
    shared: Arc<Shared>,
    profile: &'static ModelProfile,
    timing: TimingMode,
    handshake_timeout: Duration,
    calibration: SleepCalibration,
    cancel: CancelToken,
    workers: BTreeMap<DeviceId, Worker>,
    events: Sender<OutputEvent>,
}

impl IoUnit {
    pub fn new(config: &MachineConfig, cancel: CancelToken, events: Sender<OutputEvent>) -> IoUnit {
        let calibration = match config.timing {
            TimingMode::Virtual => SleepCalibration::default(),
            TimingMode::Calibrated => calibrate(),
        };
        IoUnit {
            shared: Arc::new(Shared {
                state: Mutex::new(BusState::new()),
                changed: Condvar::new(),
            }),
            profile: config.model.profile(),
            timing: config.timing,
            handshake_timeout: config.handshake_timeout,
            calibration,
            cancel,
            workers: BTreeMap::new(),
            events,
        }
    }

    pub fn profile(&self) -> &'static ModelProfile {
        self.profile
    }

    pub fn handle(&self) -> IoHandle {
        IoHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn attach(&mut self, sc: SelectCode, device: Box<dyn Device>) -> DeviceId {
        let name = device.name().to_string();
        let id = self.shared.lock().directory.attach(sc, device);
        if self.timing == TimingMode::Calibrated {
            match Worker::spawn(id, &name, Arc::clone(&self.shared), self.calibration) {
                Ok(worker) => {
                    self.workers.insert(id, worker);
                }
                Err(e) => {
                    event!(
                        Level::ERROR,
                        "failed to start a worker for {}; its handshakes will complete at once: {}",
                        name,
                        e
                    );
                }
            }
        }
        id
    }

    /// Removes every device called `name`.  Returns how many there
    /// were.
    pub fn detach(&mut self, name: &str) -> usize {
        let removed = {
            let mut st = self.shared.lock();
            let removed = st.directory.detach(name);
            for id in removed.iter() {
                st.pending.remove(id);
            }
            removed
        };
        for id in removed.iter() {
            self.workers.remove(id);
        }
        removed.len()
    }

    /// Attached devices in select code order.
    pub fn devices(&self) -> Vec<(SelectCode, String)> {
        self.shared
            .lock()
            .directory
            .iter()
            .map(|(sc, d)| (sc, d.name.clone()))
            .collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.values().filter(|w| w.is_running()).count()
    }

    pub fn power_on_preset(&self) {
        let mut st = self.shared.lock();
        st.latches = Latches::default();
        st.strobes = 0;
        st.select_code = SelectCode::NONE;
        st.io.set(0);
        st.aux.set(0);
        st.bus = BusLines::default();
        st.pending.clear();
        st.clock.reset();
        st.resume = None;
        st.directory.reset_all();
        self.shared.changed.notify_all();
    }

    pub fn service_requested(&self) -> bool {
        self.shared.lock().requested()
    }

    /// Acknowledges a service request: single-service and inhibit
    /// are set, nothing is addressed, and the bus (carrying the
    /// strobe vector on models which identify the requester) is
    /// latched into the I/O register.
    pub fn acknowledge(&self) {
        let mut st = self.shared.lock();
        self.acknowledge_locked(&mut st);
    }

    fn acknowledge_locked(&self, st: &mut BusState) {
        st.latches.single_service = true;
        st.latches.inhibit = true;
        st.select_code = SelectCode::NONE;
        if self.profile.identify_requester {
            st.bus.data = st.strobes & STROBE_MASK;
        }
        st.latch_input();
        event!(
            Level::DEBUG,
            "service request acknowledged, strobes {:015b}",
            st.strobes
        );
    }

    /// The word on the data lines.
    pub fn input(&self) -> u16 {
        self.shared.lock().bus.data
    }

    pub fn latches(&self) -> Latches {
        self.shared.lock().latches
    }

    pub fn strobes(&self) -> u16 {
        self.shared.lock().strobes
    }

    pub fn io_register(&self) -> u16 {
        self.shared.lock().io.value()
    }

    pub fn aux_register(&self) -> u16 {
        self.shared.lock().aux.value()
    }

    pub fn select_code(&self) -> SelectCode {
        self.shared.lock().select_code
    }

    /// Current virtual bus time.  Only moves in virtual timing mode.
    pub fn virtual_now(&self) -> Duration {
        self.shared.lock().clock.now()
    }

    pub fn snapshot(&self) -> IoSnapshot {
        let st = self.shared.lock();
        IoSnapshot {
            latches: st.latches,
            strobes: st.strobes,
            select_code: st.select_code,
            io: st.io.value(),
            aux: st.aux.value(),
            bus: st.bus,
        }
    }

    fn emit(&self, ev: OutputEvent) {
        if self.events.send(ev).is_err() {
            event!(Level::DEBUG, "output event dropped: nobody is listening");
        }
    }

    /// Runs the I/O micro-instruction in Q.  Called by the engine's
    /// IOS operation with the buses already wired.
    pub fn exec(&self, regs: &mut Registers, alu: &mut Alu) {
        let ins = IoInstruction::from_q(regs.get(Reg::Q));
        let span = span!(Level::TRACE, "ios", ins = %ins);
        let _enter = span.enter();

        let mut st = self.shared.lock();
        if !ins.enable {
            if st.requested() {
                self.acknowledge_locked(&mut st);
            }
            return;
        }

        if st.latches.busy {
            let sc = st.select_code;
            st = self.await_handshake(st, sc);
            if st.directory.is_busy(sc) {
                regs.set_q_bit(HOLD_QUALIFIER, true);
                return;
            }
            self.finish_ceo(&mut st, regs);
            if let Some(resume) = st.resume.take() {
                st = self.resume(st, resume, regs, alu);
            }
        } else {
            st = self.dispatch(st, ins, regs, alu);
        }

        if ins.hold_clear && !st.latches.busy {
            st.latches.ready = false;
        }
    }

    fn dispatch<'a>(
        &'a self,
        mut st: Guard<'a>,
        ins: IoInstruction,
        regs: &mut Registers,
        alu: &mut Alu,
    ) -> Guard<'a> {
        let sc = ins.select_code;
        st.select_code = sc;
        event!(Level::TRACE, "dispatching {}", ins);
        match ins.op {
            IoOp::Stf => st.latches.ready = true,
            IoOp::Sfc => regs.carry = !st.flag_set(),
            IoOp::Stc => {
                st.latches.enable = true;
                match self.profile.quirk(sc, IoOp::Stc) {
                    Some(action) => self.emit(action.event()),
                    None => st = self.set_ceo(st, regs, Direction::Output).0,
                }
            }
            IoOp::Clc => {
                st.latches.enable = false;
                if let Some(action) = self.profile.quirk(sc, IoOp::Clc) {
                    self.emit(action.event());
                }
            }
            IoOp::Sfs => regs.carry = st.flag_set(),
            IoOp::Li8 => st = self.load_input(st, regs, alu, false),
            IoOp::Li16 => st = self.load_input(st, regs, alu, true),
            IoOp::Ot8 => {
                shift(&mut st, regs, alu, 8, true, false);
                st.bus.data = st.io.value() & 0xFF;
                st = self.set_ceo(st, regs, Direction::Output).0;
            }
            IoOp::Ot16 => st = self.output_word(st, sc, regs, alu),
            IoOp::Eow => {
                st.latches.single_service = false;
                st.latches.inhibit = false;
                st.select_code = SelectCode::NONE;
            }
            IoOp::Nop(_) => (),
        }
        st
    }

    fn output_word<'a>(
        &'a self,
        mut st: Guard<'a>,
        sc: SelectCode,
        regs: &mut Registers,
        alu: &mut Alu,
    ) -> Guard<'a> {
        match self.profile.class_of(sc) {
            DeviceClass::Plotter => {
                shift(&mut st, regs, alu, 16, false, true);
                st.bus.data = ((st.io.value() & 0xFF) << 8) | st.aux.value();
                self.set_ceo(st, regs, Direction::Output).0
            }
            DeviceClass::Printer => {
                let word = regs.get(regs.active());
                st.bus.data = word >> 8;
                let (mut st, done) = self.set_ceo(st, regs, Direction::Output);
                if done {
                    st.bus.data = word & 0xFF;
                    self.set_ceo(st, regs, Direction::Output).0
                } else {
                    st.resume = Some(Resume::SecondByte(word & 0xFF));
                    st
                }
            }
            DeviceClass::KeyboardDisplay | DeviceClass::General => {
                st.bus.data = regs.get(regs.active());
                self.set_ceo(st, regs, Direction::Output).0
            }
        }
    }

    fn load_input<'a>(
        &'a self,
        st: Guard<'a>,
        regs: &mut Registers,
        alu: &mut Alu,
        wide: bool,
    ) -> Guard<'a> {
        let (mut st, done) = self.set_ceo(st, regs, Direction::Input);
        if done {
            finish_input(&mut st, regs, alu, wide);
        } else {
            st.resume = Some(Resume::LatchInput { wide });
        }
        st
    }

    fn resume<'a>(
        &'a self,
        mut st: Guard<'a>,
        resume: Resume,
        regs: &mut Registers,
        alu: &mut Alu,
    ) -> Guard<'a> {
        match resume {
            Resume::LatchInput { wide } => {
                finish_input(&mut st, regs, alu, wide);
                st
            }
            Resume::SecondByte(byte) => {
                st.bus.data = byte;
                self.set_ceo(st, regs, Direction::Output).0
            }
        }
    }

    /// One request/acknowledge cycle with every device at the
    /// addressed select code.  Returns true if the handshake
    /// completed; otherwise the hold qualifier has been set.
    fn set_ceo<'a>(
        &'a self,
        mut st: Guard<'a>,
        regs: &mut Registers,
        direction: Direction,
    ) -> (Guard<'a>, bool) {
        let sc = st.select_code;
        st.latches.busy = true;
        // Addressing a peripheral answers its service request; it may
        // raise its flag again during the handshake.
        if let Some(bit) = sc.strobe_bit() {
            st.strobes &= !bit;
        }
        if st.directory.at(sc).is_empty() {
            // Nothing answers: the lines float to ready, zero.
            st.bus.data = 0;
            self.finish_ceo(&mut st, regs);
            return (st, true);
        }

        let mut any_busy = false;
        {
            let state: &mut BusState = &mut st;
            let now = state.clock.now();
            let mut immediate = Vec::new();
            for dev in state.directory.at_mut(sc).iter_mut() {
                let busy = match direction {
                    Direction::Output => dev.device.output(&mut state.bus),
                    Direction::Input => dev.device.input(&mut state.bus),
                };
                dev.busy = busy;
                if !busy {
                    continue;
                }
                let delay = dev.device.handshake_delay();
                let scheduled = !delay.is_zero()
                    && match self.timing {
                        TimingMode::Virtual => {
                            state.pending.push(dev.id, now + delay);
                            true
                        }
                        TimingMode::Calibrated => self
                            .workers
                            .get(&dev.id)
                            .map(|w| w.schedule(delay))
                            .unwrap_or(false),
                    };
                if scheduled {
                    any_busy = true;
                } else {
                    immediate.push(dev.id);
                }
            }
            state.collect_flag(sc);
            for id in immediate {
                state.complete(id);
            }
        }

        if any_busy {
            st = self.await_handshake(st, sc);
        }
        if st.directory.is_busy(sc) {
            event!(Level::DEBUG, "select code {} still busy; holding", sc);
            regs.set_q_bit(HOLD_QUALIFIER, true);
            (st, false)
        } else {
            self.finish_ceo(&mut st, regs);
            (st, true)
        }
    }

    fn finish_ceo(&self, st: &mut BusState, regs: &mut Registers) {
        st.latches.busy = false;
        st.latches.ready = true;
        regs.set_q_bit(HOLD_QUALIFIER, false);
    }

    /// Waits, for at most the handshake timeout, until no device at
    /// `sc` is busy.
    fn await_handshake<'a>(&'a self, mut st: Guard<'a>, sc: SelectCode) -> Guard<'a> {
        match self.timing {
            TimingMode::Virtual => {
                let limit = st.clock.now() + self.handshake_timeout;
                while st.directory.is_busy(sc) {
                    match st.pending.next_due() {
                        Some(due) if due <= limit => {
                            st.clock.advance_to(due);
                            st.fire_due();
                        }
                        _ => {
                            st.clock.advance_to(limit);
                            break;
                        }
                    }
                }
                st
            }
            TimingMode::Calibrated => {
                let deadline = Instant::now() + self.handshake_timeout;
                while st.directory.is_busy(sc) && !self.cancel.is_cancelled() {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    // Spurious wake-ups just go round again.
                    st = self
                        .shared
                        .changed
                        .wait_timeout(st, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                st
            }
        }
    }
}

impl Debug for IoUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoUnit")
            .field("model", &self.profile.model)
            .field("timing", &self.timing)
            .field("state", &*self.shared.lock())
            .finish()
    }
}

impl Drop for IoUnit {
    fn drop(&mut self) {
        // Dropping a worker stops and joins its thread.
        self.workers.clear();
    }
}

/// Shifts `count` bits between the I/O register and the active
/// accumulator through the ALU.  The accumulator takes the I/O
/// register's output, the I/O register takes the accumulator's, and
/// when `aux` is set the AUX buffer takes the I/O register's.
fn shift(st: &mut BusState, regs: &mut Registers, alu: &mut Alu, count: u32, byte_mode: bool, aux: bool) {
    let acc = regs.active();
    let saved = regs.shift_control(acc);
    regs.arm(acc, Source::TBus);
    st.io.set_byte_mode(byte_mode);
    st.io.shift_enable(true);
    st.aux.shift_enable(aux);
    alu.init(false, false, false);
    for _ in 0..count {
        let out = alu.exec(AluOp::Ior, st.io.output_bit(), false);
        let acc_bit = regs.reg(acc).output_bit();
        let io_bit = st.io.output_bit();
        regs.reg_mut(acc).load_input(out.bit);
        st.io.load_input(acc_bit);
        st.aux.load_input(io_bit);
        regs.reg_mut(acc).shift();
        st.io.shift();
        st.aux.shift();
        alu.clock();
    }
    st.io.release();
    st.aux.release();
    st.io.set_byte_mode(false);
    regs.restore_shift_control(acc, saved);
}

/// Latches the bus into the I/O register and moves the data into the
/// active accumulator.  A byte arrives in the top half of the
/// accumulator; a word is loaded in parallel.
fn finish_input(st: &mut BusState, regs: &mut Registers, alu: &mut Alu, wide: bool) {
    st.latch_input();
    if wide {
        let acc = regs.active();
        regs.set(acc, st.bus.data);
    } else {
        shift(st, regs, alu, 8, true, false);
    }
}
