use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use cpu::io::{DeviceSpec, Model};
use cpu::{
    reference_alu_dump, reference_bcd_dump, Calculator, CancelToken, MachineConfig, RomSet,
    RomSpec, StopReason, TimingMode, TraceLevel, TraceSink, ALU_ROM_WIDTH, BCD_ROM_WIDTH,
};

mod output;

use output::{EventWriter, TraceWriter};

/// Simulate the CPU board of the HP 9810, 9820 and 9830 calculators.
#[derive(Parser, Debug)]
#[command(name = "calc98", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the microcode in the control store ROM
    Run(RunArgs),
    /// Print the ALU or BCD ROM as it should read, in dump format
    ReferenceRom {
        #[arg(value_enum)]
        table: Table,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Table {
    Alu,
    Bcd,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Dump of the 256-word control store ROM
    #[arg(long, value_name = "FILE")]
    control_store: PathBuf,

    /// Dump of the ALU ROM
    #[arg(long, value_name = "FILE")]
    alu: PathBuf,

    /// Dump of the BCD correction ROM
    #[arg(long, value_name = "FILE")]
    bcd: PathBuf,

    /// Load a read-only memory image at an octal address
    #[arg(long = "rom", value_name = "FILE@OCTAL")]
    roms: Vec<RomSpec>,

    #[arg(long, default_value = "9810")]
    model: Model,

    /// 'virtual' runs peripherals on simulated time; 'calibrated'
    /// paces them against the wall clock
    #[arg(long, default_value = "virtual")]
    timing: TimingMode,

    /// Always run the bit-serial loop, even when it can't change
    /// anything
    #[arg(long)]
    no_shift_skip: bool,

    /// off, micro or instruction
    #[arg(long, default_value = "off")]
    trace: TraceLevel,

    /// Attach a peripheral, for example printer@15
    #[arg(long = "device", value_name = "TAG@SC")]
    devices: Vec<DeviceSpec>,

    /// Stop after this many micro-instructions
    #[arg(long, value_name = "N")]
    max_cycles: Option<u64>,

    /// How long an I/O handshake may take before the microcode holds
    #[arg(long, value_name = "MS", default_value_t = 5)]
    handshake_timeout_ms: u64,

    /// Write the final machine state here, as JSON
    #[arg(long, value_name = "FILE")]
    dump_state: Option<PathBuf>,
}

fn init_logging() -> Result<(), Box<dyn Error>> {
    // See
    // https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Box::new(e));
        }
        Ok(layer) => layer,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
    Ok(())
}

fn reference_rom(table: Table) {
    let (dump, width) = match table {
        Table::Alu => (reference_alu_dump(), ALU_ROM_WIDTH),
        Table::Bcd => (reference_bcd_dump(), BCD_ROM_WIDTH),
    };
    print!("{}", format_dump(dump.words(), width));
}

fn run_calculator(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let mut roms = RomSet::load(&args.control_store, &args.alu, &args.bcd)?;
    for spec in args.roms.iter() {
        roms.add_image(spec)?;
    }
    let config = MachineConfig {
        model: args.model,
        timing: args.timing,
        shift_skip: !args.no_shift_skip,
        handshake_timeout: Duration::from_millis(args.handshake_timeout_ms),
        trace: args.trace,
    };
    event!(Level::DEBUG, "machine configuration: {:?}", config);

    let cancel = CancelToken::new();
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || {
        handler_cancel.cancel();
    })?;

    let (mut calc, events) = Calculator::new(&roms, config, cancel)?;
    for spec in args.devices.iter() {
        let id = calc.attach(spec)?;
        event!(Level::DEBUG, "attached {} as device {}", spec, id);
    }

    let trace_level = args.trace;
    let max_cycles = args.max_cycles;
    let engine = thread::Builder::new()
        .name("engine".to_string())
        .spawn(move || {
            calc.power_on_preset();
            let mut writer = TraceWriter::new(trace_level);
            let sink: Option<&mut dyn TraceSink> = match trace_level {
                TraceLevel::Off => None,
                TraceLevel::Micro | TraceLevel::Instruction => Some(&mut writer),
            };
            let reason = calc.run(max_cycles, sink);
            (reason, calc.snapshot())
        })?;

    // The loop ends when the engine thread has dropped the calculator
    // and with it every sender.
    let mut out = EventWriter::new();
    for ev in events.iter() {
        out.write(&ev)?;
    }
    out.disconnect();

    let (reason, snapshot) = engine
        .join()
        .map_err(|_| "the engine thread panicked".to_string())?;
    match reason {
        StopReason::Cancelled => event!(Level::INFO, "interrupted"),
        StopReason::CycleLimit | StopReason::Breakpoint(_) => {
            event!(Level::INFO, "{}", reason);
        }
    }
    if let Some(path) = args.dump_state {
        fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
        event!(Level::INFO, "machine state written to {}", path.display());
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging()?;
    match cli.command {
        Command::Run(args) => run_calculator(args),
        Command::ReferenceRom { table } => {
            reference_rom(table);
            Ok(())
        }
    }
}

fn main() {
    match run() {
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
