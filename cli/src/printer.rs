use std::io::Write;

use termcolor::{self, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{event, Level};

use sim::OutputEvent;

/// Shows what the console typewriter prints, on standard output.
pub struct ConsolePrinter {
    stream: StandardStream,
    at_line_start: bool,
}

fn get_colour_choice() -> termcolor::ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

impl ConsolePrinter {
    pub fn new() -> ConsolePrinter {
        ConsolePrinter {
            stream: StandardStream::stdout(get_colour_choice()),
            at_line_start: true,
        }
    }

    fn set_colour(&mut self, colour: Option<termcolor::Color>) {
        let mut spec = ColorSpec::new();
        spec.set_fg(colour);
        if let Err(e) = self.stream.set_color(&spec) {
            event!(Level::ERROR, "Failed to select colour {:?}: {}", spec, e);
        }
    }

    fn print_byte(&mut self, byte: u8) -> Result<(), std::io::Error> {
        let ch = match byte {
            b'\n' => '\n',
            0x20..=0x7E => char::from(byte),
            // Unprintable; the typewriter just moves on.
            _ => '\u{00B7}',
        };
        self.at_line_start = ch == '\n';
        write!(self.stream, "{ch}")
    }

    fn alarm(&mut self) -> Result<(), std::io::Error> {
        self.set_colour(Some(termcolor::Color::Red));
        if !self.at_line_start {
            writeln!(self.stream)?;
        }
        writeln!(self.stream, "*** console alarm ***")?;
        self.at_line_start = true;
        self.set_colour(None);
        Ok(())
    }

    pub fn show(&mut self, output: &[OutputEvent]) -> Result<(), std::io::Error> {
        for item in output {
            match item {
                OutputEvent::ConsolePrint { byte, .. } => self.print_byte(*byte)?,
                OutputEvent::ConsoleAlarm { .. } => self.alarm()?,
                OutputEvent::CardStacked { card, .. } => {
                    event!(
                        Level::DEBUG,
                        "card stacked: {:?}",
                        String::from_utf8_lossy(card)
                    );
                }
            }
        }
        self.stream.flush()
    }

    /// Finishes the current line, if there is one.
    pub fn finish(&mut self) -> Result<(), std::io::Error> {
        if !self.at_line_start {
            writeln!(self.stream)?;
            self.at_line_start = true;
        }
        if let Err(e) = self.stream.reset() {
            event!(Level::ERROR, "Failed to reset terminal: {}", e);
        }
        self.stream.flush()
    }
}
