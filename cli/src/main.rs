mod printer;

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use sim::{
    CardReader, CardReaderTiming, Ccw, ChannelEvent, Console, ConsoleTiming, DeviceManager,
    InputEvent, Machine, SchedulerConfig, StatusKind, CARD_COLUMNS,
};

use printer::ConsolePrinter;

const READ_CARD: u8 = 0x02;
const WRITE_AUTO_CR: u8 = 0x01;
const READ_INQUIRY: u8 = 0x0A;
const ALARM: u8 = 0x0B;

fn parse_address(s: &str) -> Result<u8, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|e| format!("'{s}' is not a hex unit address: {e}"))
}

/// Reads a card deck through a simulated card reader and lists it on
/// the simulated console typewriter.
#[derive(Parser, Debug)]
#[command(name = "s360io", version)]
struct Cli {
    /// Text file holding the card deck, one card per line
    deck: PathBuf,

    /// Address of the card reader (hex)
    #[arg(long, default_value = "12", value_parser = parse_address)]
    reader: u8,

    /// Address of the console (hex)
    #[arg(long, default_value = "1F", value_parser = parse_address)]
    console: u8,

    /// Give up on a channel program which takes more cycles than this
    #[arg(long, default_value_t = 1_000_000)]
    max_cycles: u64,

    /// Ticks the reader takes to feed one card
    #[arg(long)]
    feed_ticks: Option<u64>,

    /// Ticks the console takes to print one character
    #[arg(long)]
    print_ticks: Option<u64>,

    /// After listing the deck, type this at the console keyboard and
    /// read it back with a read inquiry
    #[arg(long)]
    keyboard: Option<String>,

    /// Limit on pending device timers
    #[arg(long, default_value_t = SchedulerConfig::default().max_pending)]
    max_pending: usize,
}

#[derive(Debug)]
enum RunError {
    UnitNotOperational(u8),
    UnitBusy(u8),
    EquipmentCheck { address: u8, sense: u8 },
}

impl Display for RunError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            RunError::UnitNotOperational(address) => {
                write!(f, "unit {address:02X} is not operational")
            }
            RunError::UnitBusy(address) => write!(f, "unit {address:02X} is busy"),
            RunError::EquipmentCheck { address, sense } => {
                write!(f, "unit {address:02X} failed (sense {sense:02X})")
            }
        }
    }
}

impl Error for RunError {}

/// What one channel program produced.
#[derive(Debug, Default)]
struct Outcome {
    data: Vec<u8>,
    status: Status,
}

struct Session {
    machine: Machine,
    printer: ConsolePrinter,
    max_cycles: u64,
}

impl Session {
    fn execute(&mut self, address: u8, program: Vec<Ccw>) -> Result<Outcome, Box<dyn Error>> {
        self.machine.start_io(address, program)?;
        let cycles = self.machine.run_until_idle(self.max_cycles)?;
        event!(Level::TRACE, "unit {address:02X}: program took {cycles} cycles");
        self.printer.show(&self.machine.drain_output())?;

        let mut outcome = Outcome::default();
        for ev in self.machine.take_channel_events() {
            event!(Level::DEBUG, "channel: {ev:?}");
            match ev {
                ChannelEvent::ConditionCode { address, code } => match code {
                    sim::ConditionCode::NotOperational => {
                        return Err(Box::new(RunError::UnitNotOperational(address)));
                    }
                    sim::ConditionCode::Busy => {
                        return Err(Box::new(RunError::UnitBusy(address)));
                    }
                    sim::ConditionCode::Started | sim::ConditionCode::StatusStored => (),
                },
                ChannelEvent::Status {
                    address: from,
                    kind,
                    status,
                } => {
                    if from != address || kind == StatusKind::Interrupt {
                        event!(
                            Level::INFO,
                            "interrupt from unit {from:02X}: status {status:?}"
                        );
                    }
                    if from == address {
                        outcome.status |= status;
                    }
                }
                ChannelEvent::DataIn { data, .. } => outcome.data.extend(data),
            }
        }
        Ok(outcome)
    }

    fn sense(&mut self, address: u8) -> Result<u8, Box<dyn Error>> {
        let outcome = self.execute(address, vec![Ccw::read(Command::SENSE.0, 1)])?;
        Ok(outcome.data.first().copied().unwrap_or(0))
    }

    fn list_deck(&mut self, reader: u8, console: u8) -> Result<usize, Box<dyn Error>> {
        let mut cards = 0;
        let mut lost = 0;
        loop {
            let outcome = self.execute(reader, vec![Ccw::read(READ_CARD, CARD_COLUMNS)])?;
            if outcome.status.contains(Status::UNIT_CHECK) {
                let sense = self.sense(reader)?;
                let flags = Sense::from_bits_retain(sense);
                if flags.contains(Sense::INTERVENTION_REQUIRED) {
                    event!(Level::INFO, "card reader {reader:02X}: hopper empty");
                    break;
                }
                if flags.contains(Sense::EQUIPMENT_CHECK) {
                    return Err(Box::new(RunError::EquipmentCheck {
                        address: reader,
                        sense,
                    }));
                }
                // Any other check still took a card off the hopper.
                event!(
                    Level::WARN,
                    "card reader {reader:02X}: card {} lost, sense {sense:02X}",
                    cards + lost + 1
                );
                lost += 1;
                if outcome.status.contains(Status::UNIT_EXCEPTION) {
                    break;
                }
                continue;
            }
            if !outcome.data.is_empty() {
                cards += 1;
                let line = trim_card(&outcome.data);
                let written = self.execute(console, vec![Ccw::write(WRITE_AUTO_CR, line)])?;
                if written.status.contains(Status::UNIT_CHECK) {
                    let sense = self.sense(console)?;
                    event!(
                        Level::WARN,
                        "console {console:02X} reported unit check, sense {sense:02X}"
                    );
                }
            }
            if outcome.status.contains(Status::UNIT_EXCEPTION) {
                event!(Level::INFO, "last card read");
                break;
            }
        }
        Ok(cards)
    }

    fn inquire(&mut self, console: u8, typed: &str) -> Result<Vec<u8>, Box<dyn Error>> {
        self.machine.on_input_event(
            console,
            InputEvent::ConsoleKeyboard {
                data: typed.as_bytes().to_vec(),
            },
        )?;
        let outcome = self.execute(console, vec![Ccw::read(READ_INQUIRY, typed.len())])?;
        if outcome.status.contains(Status::UNIT_CHECK) {
            self.execute(console, vec![Ccw::control(ALARM)])?;
        }
        Ok(outcome.data)
    }
}

/// Trailing blanks are not worth printing.
fn trim_card(card: &[u8]) -> Vec<u8> {
    let end = card
        .iter()
        .rposition(|b| *b != b' ')
        .map_or(0, |pos| pos + 1);
    card[..end].to_vec()
}

fn load_deck(path: &Path) -> Result<Vec<Vec<u8>>, Box<dyn Error>> {
    let text = fs::read(path)?;
    let mut cards: Vec<Vec<u8>> = text
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
        .collect();
    while cards.last().is_some_and(|card| card.is_empty()) {
        cards.pop();
    }
    Ok(cards)
}

fn run_simulator() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // See
    // https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
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

    let mut reader_timing = CardReaderTiming::default();
    if let Some(ticks) = cli.feed_ticks {
        reader_timing.feed_ticks = ticks;
    }
    let mut console_timing = ConsoleTiming::default();
    if let Some(ticks) = cli.print_ticks {
        console_timing.print_ticks = ticks;
    }

    let mut devices = DeviceManager::new(SchedulerConfig {
        max_pending: cli.max_pending,
    });
    devices.attach(cli.reader, 0xFF, Box::new(CardReader::new(reader_timing)))?;
    devices.attach(cli.console, 0xFF, Box::new(Console::new(console_timing)))?;
    let mut machine = Machine::new(devices);

    let deck = load_deck(&cli.deck)?;
    event!(
        Level::INFO,
        "loading {} cards from {}",
        deck.len(),
        cli.deck.display()
    );
    machine.on_input_event(cli.reader, InputEvent::LoadCards { cards: deck })?;

    let mut session = Session {
        machine,
        printer: ConsolePrinter::new(),
        max_cycles: cli.max_cycles,
    };
    let cards = session.list_deck(cli.reader, cli.console)?;
    if let Some(typed) = cli.keyboard.as_deref() {
        let got = session.inquire(cli.console, typed)?;
        event!(
            Level::INFO,
            "read inquiry returned {:?}",
            String::from_utf8_lossy(&got)
        );
    }
    session.printer.finish()?;
    event!(
        Level::INFO,
        "listed {cards} cards in {} ticks",
        session.machine.now()
    );
    Ok(())
}

fn main() {
    match run_simulator() {
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}

#[test]
fn test_parse_address() {
    assert_eq!(parse_address("1F"), Ok(0x1F));
    assert_eq!(parse_address("0x12"), Ok(0x12));
    assert!(parse_address("100").is_err());
    assert!(parse_address("zz").is_err());
}

#[test]
fn test_trim_card() {
    assert_eq!(trim_card(b"HELLO   "), b"HELLO".to_vec());
    assert_eq!(trim_card(b"    "), Vec::<u8>::new());
    assert_eq!(trim_card(b" A B "), b" A B".to_vec());
}

#[cfg(test)]
fn test_session(config: SchedulerConfig, cards: &[&str]) -> Session {
    let mut devices = DeviceManager::new(config);
    devices
        .attach(0x12, 0xFF, Box::new(CardReader::new(CardReaderTiming::default())))
        .expect("reader should attach");
    devices
        .attach(0x1F, 0xFF, Box::new(Console::new(ConsoleTiming::default())))
        .expect("console should attach");
    let mut machine = Machine::new(devices);
    let cards = cards.iter().map(|card| card.as_bytes().to_vec()).collect();
    machine
        .on_input_event(0x12, InputEvent::LoadCards { cards })
        .expect("reader should take the deck");
    Session {
        machine,
        printer: ConsolePrinter::new(),
        max_cycles: 1_000_000,
    }
}

#[test]
fn test_list_deck() {
    let mut session = test_session(SchedulerConfig::default(), &["FIRST", "SECOND"]);
    assert_eq!(session.list_deck(0x12, 0x1F).expect("deck should list"), 2);
}

#[test]
fn test_reader_equipment_check_stops_listing() {
    // With no room for timers the reader cannot feed a card.
    let mut session = test_session(SchedulerConfig { max_pending: 0 }, &["FIRST", "SECOND"]);
    let err = session
        .list_deck(0x12, 0x1F)
        .expect_err("listing should fail");
    match err.downcast_ref::<RunError>() {
        Some(RunError::EquipmentCheck { address, sense }) => {
            assert_eq!(*address, 0x12);
            assert!(Sense::from_bits_retain(*sense).contains(Sense::EQUIPMENT_CHECK));
        }
        other => panic!("unexpected error {other:?}"),
    }
}
