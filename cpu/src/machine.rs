//! Assembles the engine, memory and the I/O board into a calculator.
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use serde::Serialize;
use tracing::{event, span, Level};

use base::prelude::*;

use crate::alu::{AluTables, ALU_ROM_WIDTH, BCD_ROM_WIDTH};
use crate::config::MachineConfig;
use crate::control::{ControlUnit, Cycle, TraceSink};
use crate::decode::{ControlStore, WORD_BITS};
use crate::error::{ConfigError, LoadError};
use crate::event::OutputEvent;
use crate::io::{Device, DeviceContext, DeviceId, DeviceRegistry, DeviceSpec, IoHandle, IoSnapshot, IoUnit, Model};
use crate::memory::MemoryUnit;
use crate::registers::{Reg, RegisterSnapshot};
use crate::timing::CancelToken;

/// The run loop gives up its time slice this often (in
/// micro-instructions) so that peripheral threads get to run.
pub const YIELD_INTERVAL: u64 = 4096;

/// Width of a memory word.
const MEMORY_WORD_BITS: u32 = 16;

/// A memory image and where it goes, written `FILE@OCTALADDRESS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomSpec {
    pub path: PathBuf,
    pub base: Address,
}

impl FromStr for RomSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<RomSpec, ConfigError> {
        let bad = || ConfigError::BadRomSpec(s.to_string());
        let (path, base) = s.rsplit_once('@').ok_or_else(bad)?;
        if path.is_empty() {
            return Err(bad());
        }
        let base = u16::from_str_radix(base, 8).map_err(|_| bad())?;
        if base > Address::MASK {
            return Err(bad());
        }
        Ok(RomSpec {
            path: PathBuf::from(path),
            base: Address::masked(base),
        })
    }
}

impl Display for RomSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:o}", self.path.display(), self.base)
    }
}

/// Read-only memory contents, loaded at `base`.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    pub path: PathBuf,
    pub base: Address,
    pub words: Vec<u16>,
}

/// Everything the machine needs from ROM.
#[derive(Debug, Clone)]
pub struct RomSet {
    pub control_store: RomDump,
    pub alu: RomDump,
    pub bcd: RomDump,
    pub images: Vec<MemoryImage>,
}

fn read_text(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|error| LoadError::Io {
        path: path.to_path_buf(),
        error,
    })
}

fn read_dump(path: &Path, width: u32) -> Result<RomDump, LoadError> {
    parse_dump(&read_text(path)?, width).map_err(|error| LoadError::Dump {
        path: path.to_path_buf(),
        error,
    })
}

impl RomSet {
    /// Reads the three CPU board ROM dumps.
    pub fn load(control_store: &Path, alu: &Path, bcd: &Path) -> Result<RomSet, LoadError> {
        Ok(RomSet {
            control_store: read_dump(control_store, WORD_BITS)?,
            alu: read_dump(alu, ALU_ROM_WIDTH)?,
            bcd: read_dump(bcd, BCD_ROM_WIDTH)?,
            images: Vec::new(),
        })
    }

    /// A ROM set with the given control store and ALU tables burned
    /// from arithmetic.
    pub fn with_reference_tables(control_store: RomDump) -> RomSet {
        RomSet {
            control_store,
            alu: crate::alu::reference_alu_dump(),
            bcd: crate::alu::reference_bcd_dump(),
            images: Vec::new(),
        }
    }

    /// Reads a memory image.  Unlike the board ROMs, an image may be
    /// any length that fits in memory.
    pub fn add_image(&mut self, spec: &RomSpec) -> Result<(), LoadError> {
        let words = parse_words(&read_text(&spec.path)?, MEMORY_WORD_BITS).map_err(|error| {
            LoadError::Dump {
                path: spec.path.clone(),
                error,
            }
        })?;
        self.images.push(MemoryImage {
            path: spec.path.clone(),
            base: spec.base,
            // Parsing limited each word to 16 bits.
            words: words.into_iter().map(|w| w as u16).collect(),
        });
        Ok(())
    }
}

/// Why [`Calculator::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Cancelled,
    CycleLimit,
    /// A machine instruction at this address was about to start.
    Breakpoint(Address),
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::CycleLimit => f.write_str("cycle limit reached"),
            StopReason::Breakpoint(addr) => write!(f, "breakpoint at {addr}"),
        }
    }
}

/// The machine state, for `--dump-state` and for tests.
#[derive(Debug, Clone, Serialize)]
pub struct MachineSnapshot {
    pub model: Model,
    pub address: u8,
    pub cycles: u64,
    pub registers: RegisterSnapshot,
    pub io: IoSnapshot,
}

pub struct Calculator {
    control: ControlUnit,
    mem: MemoryUnit,
    io: IoUnit,
    registry: DeviceRegistry,
    config: MachineConfig,
    cancel: CancelToken,
    events: Sender<OutputEvent>,
}

impl Calculator {
    /// Builds a calculator from its ROMs.  Output events from the
    /// engine, the arbiter and the peripherals arrive on the returned
    /// receiver.
    pub fn new(
        roms: &RomSet,
        config: MachineConfig,
        cancel: CancelToken,
    ) -> Result<(Calculator, Receiver<OutputEvent>), LoadError> {
        let tables = AluTables::from_dumps(&roms.alu, &roms.bcd)?;
        let store = ControlStore::from_dump(&roms.control_store);
        event!(Level::DEBUG, "control store decoded: {:?}", store);
        let mut mem = MemoryUnit::new();
        for image in roms.images.iter() {
            mem.load_rom(image.base, &image.words)
                .map_err(|error| LoadError::Memory {
                    path: image.path.clone(),
                    error,
                })?;
        }
        let (tx, rx) = channel();
        let io = IoUnit::new(&config, cancel.clone(), tx.clone());
        let control = ControlUnit::new(store, tables, config.shift_skip);
        event!(
            Level::INFO,
            "HP {} ready ({} timing, shift-skip {})",
            config.model,
            config.timing,
            if config.shift_skip { "on" } else { "off" }
        );
        Ok((
            Calculator {
                control,
                mem,
                io,
                registry: DeviceRegistry::builtin(),
                config,
                cancel,
                events: tx,
            },
            rx,
        ))
    }

    pub fn set_registry(&mut self, registry: DeviceRegistry) {
        self.registry = registry;
    }

    /// Creates a device from the registry and attaches it.
    pub fn attach(&mut self, spec: &DeviceSpec) -> Result<DeviceId, ConfigError> {
        let ctx = DeviceContext {
            select_code: spec.select_code,
            model: self.config.model,
            events: self.events.clone(),
        };
        let device = self.registry.create(&spec.tag, &ctx)?;
        Ok(self.io.attach(spec.select_code, device))
    }

    pub fn attach_device(&mut self, sc: SelectCode, device: Box<dyn Device>) -> DeviceId {
        self.io.attach(sc, device)
    }

    pub fn detach(&mut self, name: &str) -> usize {
        self.io.detach(name)
    }

    pub fn power_on_preset(&mut self) {
        self.control.power_on_preset();
        self.io.power_on_preset();
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn control(&self) -> &ControlUnit {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut ControlUnit {
        &mut self.control
    }

    pub fn memory(&self) -> &MemoryUnit {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut MemoryUnit {
        &mut self.mem
    }

    pub fn io(&self) -> &IoUnit {
        &self.io
    }

    /// A handle peripherals running elsewhere can use to request
    /// service.
    pub fn io_handle(&self) -> IoHandle {
        self.io.handle()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn emit(&self, ev: OutputEvent) {
        if self.events.send(ev).is_err() {
            event!(Level::DEBUG, "output event dropped: nobody is listening");
        }
    }

    /// Executes one micro-instruction.
    pub fn step(&mut self, trace: Option<&mut dyn TraceSink>) -> Cycle {
        let cycle = self.control.step(&mut self.mem, &self.io, trace);
        if let Some(on) = cycle.blanking {
            self.emit(OutputEvent::Blanking(on));
        }
        if let Some((address, value)) = cycle.watched {
            self.emit(OutputEvent::MemoryWatch { address, value });
        }
        cycle
    }

    /// Runs until cancelled, until `limit` micro-instructions have
    /// executed, or until a machine instruction at a breakpoint is
    /// about to start.  A breakpoint at the very first instruction is
    /// ignored, so that a stopped machine can be resumed.
    pub fn run(&mut self, limit: Option<u64>, mut trace: Option<&mut dyn TraceSink>) -> StopReason {
        let span = span!(Level::INFO, "run", limit = ?limit);
        let _enter = span.enter();
        let mut executed: u64 = 0;
        let reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if limit.is_some_and(|n| executed >= n) {
                break StopReason::CycleLimit;
            }
            if executed > 0 && self.control.at_fetch_boundary() {
                let p = Address::masked(self.control.registers().get(Reg::P));
                if self.mem.is_breakpoint(p) {
                    break StopReason::Breakpoint(p);
                }
            }
            match trace {
                Some(ref mut sink) => self.step(Some(&mut **sink)),
                None => self.step(None),
            };
            executed += 1;
            if executed % YIELD_INTERVAL == 0 {
                thread::yield_now();
            }
        };
        event!(
            Level::INFO,
            "stopped after {} micro-instructions: {}",
            executed,
            reason
        );
        reason
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            model: self.config.model,
            address: self.control.address(),
            cycles: self.control.cycles(),
            registers: self.control.snapshot(),
            io: self.io.snapshot(),
        }
    }
}

impl fmt::Debug for Calculator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calculator")
            .field("control", &self.control)
            .field("io", &self.io)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::TraceLine;
    use crate::decode::{Fields, MicroInstruction, FETCH_BOUNDARY, POWER_ON_ADDRESS};

    fn encode(f: &Fields) -> u32 {
        crate::decode::tests::encode(f)
    }

    /// A control store in which every word is `word`.
    fn uniform(word: u32) -> RomSet {
        RomSet::with_reference_tables(RomDump::from_words(WORD_BITS, vec![word; ROM_WORDS]))
    }

    fn machine(roms: &RomSet) -> (Calculator, Receiver<OutputEvent>) {
        Calculator::new(roms, MachineConfig::default(), CancelToken::new())
            .expect("reference tables pass their self-check")
    }

    #[test]
    fn test_parse_rom_spec() {
        assert_eq!(
            "mainframe.rom@40000".parse::<RomSpec>(),
            Ok(RomSpec {
                path: PathBuf::from("mainframe.rom"),
                base: Address::masked(0o40000),
            })
        );
        for bad in ["mainframe.rom", "x@9", "@100", "x@100000"] {
            assert_eq!(
                bad.parse::<RomSpec>(),
                Err(ConfigError::BadRomSpec(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_power_on_preset() {
        let (mut calc, _rx) = machine(&uniform(0));
        calc.control_mut().set_address(0x12);
        calc.power_on_preset();
        assert_eq!(calc.control().address(), POWER_ON_ADDRESS);
        assert_eq!(calc.io().latches(), Default::default());
    }

    #[test]
    fn test_run_stops_at_cycle_limit() {
        // Jumps to the successor: addr ^ 1.
        let word = encode(&Fields {
            secondary: 1,
            ..Fields::default()
        });
        let (mut calc, _rx) = machine(&uniform(word));
        calc.power_on_preset();
        assert_eq!(calc.run(Some(3), None), StopReason::CycleLimit);
        assert_eq!(calc.control().cycles(), 3);
        assert_eq!(calc.control().address(), POWER_ON_ADDRESS ^ 1);
    }

    #[derive(Default)]
    struct Addresses(Vec<u8>);

    impl TraceSink for Addresses {
        fn micro(&mut self, line: &TraceLine<'_>) {
            self.0.push(line.address);
        }
    }

    #[test]
    fn test_run_traces_every_step() {
        let word = encode(&Fields {
            secondary: 1,
            ..Fields::default()
        });
        let (mut calc, _rx) = machine(&uniform(word));
        calc.power_on_preset();
        let mut sink = Addresses::default();
        assert_eq!(calc.run(Some(4), Some(&mut sink)), StopReason::CycleLimit);
        let a = POWER_ON_ADDRESS;
        assert_eq!(sink.0, vec![a, a ^ 1, a, a ^ 1]);
    }

    #[test]
    fn test_run_stops_when_cancelled() {
        let (mut calc, _rx) = machine(&uniform(0));
        calc.cancel_token().cancel();
        assert_eq!(calc.run(None, None), StopReason::Cancelled);
        assert_eq!(calc.control().cycles(), 0);
    }

    #[test]
    fn test_breakpoint_at_fetch_boundary() {
        // Every instruction jumps to the fetch boundary.
        let word = encode(&Fields {
            primary: FETCH_BOUNDARY >> 4,
            secondary: FETCH_BOUNDARY & 0xF,
            ..Fields::default()
        });
        let mut words = vec![0; ROM_WORDS];
        words[0] = word;
        let (mut calc, _rx) = machine(&RomSet::with_reference_tables(RomDump::from_words(
            WORD_BITS, words,
        )));
        calc.control_mut().set_address(0);
        calc.control_mut()
            .registers_mut()
            .set(Reg::P, 0o1234);
        calc.memory_mut()
            .set_breakpoint(Address::masked(0o1234), true);
        assert_eq!(
            calc.run(Some(100), None),
            StopReason::Breakpoint(Address::masked(0o1234))
        );
        assert_eq!(calc.control().address(), FETCH_BOUNDARY);
        // Resuming steps over the breakpoint.  Word zero at the fetch
        // boundary leaves the address where it is.
        assert_eq!(
            calc.run(Some(1), None),
            StopReason::CycleLimit
        );
    }

    #[test]
    fn test_watched_write_is_reported() {
        let wtm = MicroInstruction::decode(encode(&Fields {
            x_code: 6,
            ..Fields::default()
        }));
        assert!(wtm.skip_shift);
        let (mut calc, rx) = machine(&uniform(wtm.word));
        calc.memory_mut().set_watch(Address::masked(0o100), true);
        let regs = calc.control_mut().registers_mut();
        regs.set(Reg::M, 0o100);
        regs.set(Reg::T, 0o7777);
        let cycle = calc.step(None);
        assert_eq!(cycle.watched, Some((Address::masked(0o100), 0o7777)));
        assert_eq!(
            rx.try_recv(),
            Ok(OutputEvent::MemoryWatch {
                address: Address::masked(0o100),
                value: 0o7777
            })
        );
        assert_eq!(calc.memory().read(Address::masked(0o100)), 0o7777);
    }

    #[test]
    fn test_memory_images_are_read_only() {
        let mut roms = uniform(0);
        roms.images.push(MemoryImage {
            path: PathBuf::from("test.rom"),
            base: Address::masked(0o2000),
            words: vec![1, 2, 3],
        });
        let (mut calc, _rx) = machine(&roms);
        assert_eq!(calc.memory().read(Address::masked(0o2002)), 3);
        calc.memory_mut().write(Address::masked(0o2002), 7);
        assert_eq!(calc.memory().read(Address::masked(0o2002)), 3);
    }

    #[test]
    fn test_oversized_image_is_a_load_error() {
        let mut roms = uniform(0);
        roms.images.push(MemoryImage {
            path: PathBuf::from("big.rom"),
            base: Address::MAX,
            words: vec![0; 2],
        });
        assert!(matches!(
            Calculator::new(&roms, MachineConfig::default(), CancelToken::new()),
            Err(LoadError::Memory { .. })
        ));
    }

    #[test]
    fn test_attach_unknown_device() {
        let (mut calc, _rx) = machine(&uniform(0));
        let spec: DeviceSpec = "teletype@3".parse().expect("well formed");
        assert_eq!(
            calc.attach(&spec),
            Err(ConfigError::UnknownDevice("teletype".to_string()))
        );
        let spec: DeviceSpec = "printer@15".parse().expect("well formed");
        assert!(calc.attach(&spec).is_ok());
        assert_eq!(
            calc.io().devices(),
            vec![(SelectCode::masked(15), "printer".to_string())]
        );
    }

    #[test]
    fn test_snapshot_of_fresh_machine() {
        let (calc, _rx) = machine(&uniform(0));
        let snap = calc.snapshot();
        assert_eq!(snap.address, POWER_ON_ADDRESS);
        assert_eq!(snap.cycles, 0);
        assert_eq!(snap.registers, crate::registers::Registers::new().snapshot());
        assert_eq!(snap.io.select_code, SelectCode::NONE);
    }
}
