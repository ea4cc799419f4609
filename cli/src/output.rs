use std::io::Write;

use termcolor::{self, Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{event, Level};

use cpu::{OutputEvent, TraceLevel, TraceLine, TraceSink};

fn get_colour_choice(stream: atty::Stream) -> ColorChoice {
    if atty::is(stream) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

/// Shows output events on the terminal.  Printer output goes to
/// stdout as text; everything else is a coloured note.
pub struct EventWriter {
    stream: StandardStream,
    mid_line: bool,
}

impl EventWriter {
    pub fn new() -> EventWriter {
        EventWriter {
            stream: StandardStream::stdout(get_colour_choice(atty::Stream::Stdout)),
            mid_line: false,
        }
    }

    fn set_colour(&mut self, col: Option<Color>) {
        let mut spec = ColorSpec::new();
        spec.set_fg(col).set_bold(col.is_some());
        if let Err(e) = self.stream.set_color(&spec) {
            event!(Level::ERROR, "Failed to select colour {:?}: {}", spec, e);
        }
    }

    fn note(&mut self, colour: Color, text: &str) -> Result<(), std::io::Error> {
        if self.mid_line {
            writeln!(self.stream)?;
            self.mid_line = false;
        }
        self.set_colour(Some(colour));
        write!(self.stream, "[{text}]")?;
        self.set_colour(None);
        writeln!(self.stream)
    }

    pub fn write(&mut self, ev: &OutputEvent) -> Result<(), std::io::Error> {
        match ev {
            OutputEvent::Printed { byte, .. } => {
                match byte {
                    b'\r' | b'\n' => {
                        writeln!(self.stream)?;
                        self.mid_line = false;
                    }
                    0x20..=0x7E => {
                        write!(self.stream, "{}", char::from(*byte))?;
                        self.mid_line = true;
                    }
                    // The printer has no glyph for anything else.
                    _ => (),
                }
                self.stream.flush()
            }
            OutputEvent::Beep => self.note(Color::Yellow, "beep"),
            OutputEvent::Blanking(_) => {
                event!(Level::DEBUG, "{}", ev);
                Ok(())
            }
            OutputEvent::MemoryWatch { .. } => self.note(Color::Magenta, &ev.to_string()),
            OutputEvent::DisplayBlank | OutputEvent::KeyboardReleased => {
                self.note(Color::Cyan, &ev.to_string())
            }
        }
    }

    pub fn disconnect(&mut self) {
        if self.mid_line {
            let _ = writeln!(self.stream);
        }
        if let Err(e) = self.stream.reset() {
            event!(Level::ERROR, "Failed to reset terminal: {}", e);
        }
    }
}

/// Writes engine trace lines to stderr, at the level the user asked
/// for.
pub struct TraceWriter {
    level: TraceLevel,
    stream: StandardStream,
    failed: bool,
}

impl TraceWriter {
    pub fn new(level: TraceLevel) -> TraceWriter {
        TraceWriter {
            level,
            stream: StandardStream::stderr(get_colour_choice(atty::Stream::Stderr)),
            failed: false,
        }
    }

    fn write_line(&mut self, colour: Color, text: std::fmt::Arguments<'_>) -> Result<(), std::io::Error> {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(colour));
        self.stream.set_color(&spec)?;
        self.stream.write_fmt(text)?;
        self.stream.reset()?;
        writeln!(self.stream)
    }

    fn emit(&mut self, colour: Color, text: std::fmt::Arguments<'_>) {
        if self.failed {
            return;
        }
        if let Err(e) = self.write_line(colour, text) {
            event!(Level::ERROR, "Failed to write trace output, tracing stops: {}", e);
            self.failed = true;
        }
    }
}

impl TraceSink for TraceWriter {
    fn micro(&mut self, line: &TraceLine<'_>) {
        if self.level == TraceLevel::Micro {
            self.emit(Color::Green, format_args!("{line}"));
        }
    }

    fn instruction(&mut self, p: u16, q: u16) {
        if self.level != TraceLevel::Off {
            self.emit(Color::Blue, format_args!("P={p:06o} Q={q:06o}"));
        }
    }
}
