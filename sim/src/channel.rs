//! A byte-mode selector channel: the other end of the interface.
//!
//! The channel runs a channel program (a list of [`Ccw`]s) against
//! one unit at a time.  It drives the outbound tags and bus-out, and
//! reacts to the inbound tags which the units drove in the previous
//! cycle.  This one-cycle lag is the only timing the handshake relies
//! on, so the protocol is correct whatever the relative speeds.
//!
//! When the channel has nothing else to do and some unit raises
//! request-in, the channel polls for it (select-out without
//! address-out) and accepts the status which the unit presents.  That
//! status is reported as an interrupt.
use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

/// A channel command word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ccw {
    pub command: u8,
    /// For output commands, the bytes to send.  Ignored otherwise.
    pub data: Vec<u8>,
    /// The number of bytes to transfer.
    pub count: usize,
    /// When the command ends with device end (and no unit check or
    /// unit exception), issue the next command without disconnecting.
    pub chain_command: bool,
    /// Send the command byte with bad parity.
    pub bad_parity: bool,
}

impl Ccw {
    #[must_use]
    pub fn read(command: u8, count: usize) -> Ccw {
        Ccw {
            command,
            data: Vec::new(),
            count,
            chain_command: false,
            bad_parity: false,
        }
    }

    #[must_use]
    pub fn write(command: u8, data: Vec<u8>) -> Ccw {
        Ccw {
            command,
            count: data.len(),
            data,
            chain_command: false,
            bad_parity: false,
        }
    }

    #[must_use]
    pub fn control(command: u8) -> Ccw {
        Ccw::read(command, 0)
    }

    #[must_use]
    pub fn chained(self) -> Ccw {
        Ccw {
            chain_command: true,
            ..self
        }
    }

    #[must_use]
    pub fn with_bad_parity(self) -> Ccw {
        Ccw {
            bad_parity: true,
            ..self
        }
    }

    fn is_input(&self) -> bool {
        Command(self.command).direction() == Some(Direction::Input)
    }
}

/// The outcome of initial selection, in the terms of the condition
/// code which the start I/O instruction would set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConditionCode {
    /// The command was accepted and the operation is under way.
    Started,
    /// The unit presented status at initial selection.
    StatusStored,
    Busy,
    NotOperational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusKind {
    Initial,
    Ending,
    /// Status which the unit asked to present while disconnected.
    Interrupt,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChannelEvent {
    ConditionCode {
        address: u8,
        code: ConditionCode,
    },
    Status {
        address: u8,
        kind: StatusKind,
        status: Status,
    },
    /// The bytes received by an input command.
    DataIn {
        address: u8,
        command: u8,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A channel program is already running.
    Busy,
    EmptyProgram,
    /// The channel program did not finish.
    Timeout { cycles: u64 },
}

impl Display for ChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ChannelError::Busy => f.write_str("channel is busy"),
            ChannelError::EmptyProgram => f.write_str("channel program is empty"),
            ChannelError::Timeout { cycles } => {
                write!(f, "channel program did not finish within {cycles} cycles")
            }
        }
    }
}

impl Error for ChannelError {}

/// What to do once the unit has seen our acceptance of its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
enum AfterAccept {
    Transfer,
    ChainNext,
    AwaitEnding,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Idle,
    /// Select-out and address-out are up; waiting for a unit to
    /// respond.
    Selecting,
    AwaitAddressIn,
    CommandOut,
    AwaitInitialStatus,
    StatusAccepted,
    Data,
    /// Service-out (or command-out, to stop) is up in answer to
    /// service-in.
    DataResponse,
    AwaitEndingStatus,
    Halting,
    Disconnecting,
    Polling,
    PollProceed,
    PollStatus,
    ResetPulse,
}

#[derive(Debug)]
pub struct SelectorChannel {
    state: ChannelState,
    after_accept: AfterAccept,
    /// Keep suppress-out up while accepting status (command chaining).
    suppress: bool,
    /// The unit we are connected to.
    address: u8,
    /// The unit the queued channel program is for.
    program_address: u8,
    program: VecDeque<Ccw>,
    current: Option<Ccw>,
    /// Bytes transferred so far by the current command.
    transferred: usize,
    received: Vec<u8>,
    /// The byte on bus-out while service-out is up.
    out_byte: BusByte,
    /// Command-out rather than service-out answers the pending
    /// service-in.
    stopping: bool,
    /// Channel end has arrived for a command with command chaining;
    /// the next command goes out once device end arrives.
    chain_pending: bool,
    halt_requested: bool,
    /// Select-out is up for a new program (as opposed to a chained
    /// command), so a condition code is due.
    initial_selection: bool,
    events: Vec<ChannelEvent>,
}

impl SelectorChannel {
    #[must_use]
    pub fn new() -> SelectorChannel {
        SelectorChannel {
            state: ChannelState::Idle,
            after_accept: AfterAccept::Disconnect,
            suppress: false,
            address: 0,
            program_address: 0,
            program: VecDeque::new(),
            current: None,
            transferred: 0,
            received: Vec::new(),
            out_byte: BusByte::ZERO,
            stopping: false,
            chain_pending: false,
            halt_requested: false,
            initial_selection: false,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// True when no channel program is running and the channel is not
    /// connected to any unit.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == ChannelState::Idle && self.program.is_empty() && self.current.is_none()
    }

    /// Queues a channel program for the unit at `address`.  Selection
    /// begins on the next cycle.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Busy`] if a program is already running, or
    /// [`ChannelError::EmptyProgram`] if `program` is empty.
    pub fn start_io(&mut self, address: u8, program: Vec<Ccw>) -> Result<(), ChannelError> {
        if !self.is_idle() {
            return Err(ChannelError::Busy);
        }
        if program.is_empty() {
            return Err(ChannelError::EmptyProgram);
        }
        event!(
            Level::DEBUG,
            "start I/O at {:02X}, {} command(s)",
            address,
            program.len()
        );
        self.program_address = address;
        self.program = program.into();
        Ok(())
    }

    /// Asks the unit which is transferring data to stop (halt I/O).
    pub fn halt_io(&mut self) {
        if matches!(
            self.state,
            ChannelState::Data | ChannelState::DataResponse | ChannelState::AwaitEndingStatus
        ) {
            self.halt_requested = true;
        }
    }

    /// Drops operational-out and suppress-out for a cycle, resetting
    /// every unit.  Any channel program is abandoned.
    pub fn system_reset(&mut self) {
        event!(Level::INFO, "system reset");
        self.program.clear();
        self.current = None;
        self.chain_pending = false;
        self.halt_requested = false;
        self.state = ChannelState::ResetPulse;
    }

    pub fn take_events(&mut self) -> Vec<ChannelEvent> {
        std::mem::take(&mut self.events)
    }

    fn set_state(&mut self, next: ChannelState) {
        if next != self.state {
            event!(Level::TRACE, "channel: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn load_next(&mut self) {
        self.current = self.program.pop_front();
        self.transferred = 0;
        self.received.clear();
        self.stopping = false;
    }

    /// Reports the data read by the current command, and forgets it.
    fn finish_command(&mut self) {
        if let Some(ccw) = self.current.take() {
            if ccw.is_input() {
                self.events.push(ChannelEvent::DataIn {
                    address: self.address,
                    command: ccw.command,
                    data: std::mem::take(&mut self.received),
                });
            }
        }
    }

    fn abandon_program(&mut self) {
        self.finish_command();
        self.chain_pending = false;
        if !self.program.is_empty() {
            event!(
                Level::DEBUG,
                "channel: abandoning {} chained command(s)",
                self.program.len()
            );
            self.program.clear();
        }
    }

    fn read_status(&self, bus: &Bus) -> Status {
        if !bus.bus_in.parity_ok() {
            event!(
                Level::WARN,
                "channel: status byte {} from {:02X} has bad parity",
                bus.bus_in,
                self.address
            );
        }
        Status::from_bits_retain(bus.bus_in.data())
    }

    fn accept(&mut self, after: AfterAccept, suppress: bool) -> (TagsOut, BusByte) {
        self.after_accept = after;
        self.suppress = suppress;
        self.set_state(ChannelState::StatusAccepted);
        (SelectorChannel::accept_tags(suppress), BusByte::ZERO)
    }

    fn accept_tags(suppress: bool) -> TagsOut {
        let tags = CONNECTED | TagsOut::SRV_OUT;
        if suppress {
            tags | TagsOut::SUP_OUT
        } else {
            tags
        }
    }

    fn status_event(&mut self, kind: StatusKind, status: Status) {
        event!(
            Level::DEBUG,
            "channel: {:?} status {:?} from {:02X}",
            kind,
            status,
            self.address
        );
        self.events.push(ChannelEvent::Status {
            address: self.address,
            kind,
            status,
        });
    }

    fn condition_code(&mut self, code: ConditionCode) {
        if self.initial_selection {
            self.initial_selection = false;
            event!(
                Level::DEBUG,
                "channel: start I/O at {:02X} gives {:?}",
                self.address,
                code
            );
            self.events.push(ChannelEvent::ConditionCode {
                address: self.address,
                code,
            });
        }
    }

    fn command_byte(&self) -> BusByte {
        match self.current.as_ref() {
            Some(ccw) if ccw.bad_parity => BusByte::with_bad_parity(ccw.command),
            Some(ccw) => BusByte::with_parity(ccw.command),
            None => BusByte::ZERO,
        }
    }

    fn initial_status(&mut self, status: Status) -> (TagsOut, BusByte) {
        if status.contains(Status::BUSY) {
            self.condition_code(ConditionCode::Busy);
            self.status_event(StatusKind::Busy, status);
            self.abandon_program();
            return self.accept(AfterAccept::Disconnect, false);
        }
        if status.is_empty() {
            self.condition_code(ConditionCode::Started);
            return self.accept(AfterAccept::Transfer, false);
        }
        let continues = status.contains(Status::CHANNEL_END)
            && !status.intersects(Status::UNIT_CHECK | Status::UNIT_EXCEPTION)
            && self.current.as_ref().is_some_and(|ccw| ccw.chain_command)
            && !self.program.is_empty();
        self.condition_code(if continues {
            ConditionCode::Started
        } else {
            ConditionCode::StatusStored
        });
        self.status_event(StatusKind::Initial, status);
        self.ending_or_initial(status)
    }

    /// Handles channel end and device end, which may arrive in the
    /// initial status or in the ending status.
    fn ending_or_initial(&mut self, status: Status) -> (TagsOut, BusByte) {
        if status.contains(Status::CHANNEL_END) {
            self.chain_pending = self.current.as_ref().is_some_and(|ccw| ccw.chain_command)
                && !self.program.is_empty();
            self.finish_command();
        }
        let chain = self.chain_pending
            && !status.intersects(Status::UNIT_CHECK | Status::UNIT_EXCEPTION);
        if status.contains(Status::DEVICE_END) {
            if chain {
                self.chain_pending = false;
                self.accept(AfterAccept::ChainNext, true)
            } else {
                self.abandon_program();
                self.accept(AfterAccept::Disconnect, false)
            }
        } else if chain {
            // Stay connected until device end.
            self.accept(AfterAccept::AwaitEnding, false)
        } else {
            self.abandon_program();
            self.accept(AfterAccept::Disconnect, false)
        }
    }

    /// Performs one cycle: looks at the inbound tags driven during the
    /// previous cycle and sets the outbound tags and bus-out for this
    /// one.
    pub fn step(&mut self, bus: &mut Bus) {
        let tags_in = bus.tags_in;
        let (tags_out, bus_out) = match self.state {
            ChannelState::ResetPulse => {
                self.set_state(ChannelState::Idle);
                (TagsOut::empty(), BusByte::ZERO)
            }
            ChannelState::Idle => self.idle(tags_in),
            ChannelState::Selecting => self.selecting(bus),
            ChannelState::AwaitAddressIn => {
                if tags_in.contains(TagsIn::ADR_IN) {
                    if let Some(ccw) = self.current.as_ref() {
                        event!(
                            Level::DEBUG,
                            "channel: command {} to {:02X}",
                            Command(ccw.command),
                            self.address
                        );
                    }
                    self.set_state(ChannelState::CommandOut);
                    (CONNECTED | TagsOut::CMD_OUT, self.command_byte())
                } else {
                    (CONNECTED, BusByte::ZERO)
                }
            }
            ChannelState::CommandOut => {
                if tags_in.contains(TagsIn::ADR_IN) {
                    (CONNECTED | TagsOut::CMD_OUT, self.command_byte())
                } else {
                    self.set_state(ChannelState::AwaitInitialStatus);
                    (CONNECTED, BusByte::ZERO)
                }
            }
            ChannelState::AwaitInitialStatus => {
                if tags_in.contains(TagsIn::STA_IN) {
                    let status = self.read_status(bus);
                    self.initial_status(status)
                } else {
                    (CONNECTED, BusByte::ZERO)
                }
            }
            ChannelState::StatusAccepted => self.status_accepted(tags_in),
            ChannelState::Data => self.data(bus),
            ChannelState::DataResponse => {
                if tags_in.contains(TagsIn::SRV_IN) {
                    let tag = if self.stopping {
                        TagsOut::CMD_OUT
                    } else {
                        TagsOut::SRV_OUT
                    };
                    (CONNECTED | tag, self.out_byte)
                } else {
                    self.set_state(ChannelState::Data);
                    (CONNECTED, BusByte::ZERO)
                }
            }
            ChannelState::AwaitEndingStatus => {
                if self.halt_requested {
                    self.halt()
                } else if tags_in.contains(TagsIn::STA_IN) {
                    let status = self.read_status(bus);
                    self.status_event(StatusKind::Ending, status);
                    self.ending_or_initial(status)
                } else {
                    (CONNECTED, BusByte::ZERO)
                }
            }
            ChannelState::Halting => {
                self.set_state(ChannelState::Disconnecting);
                (TagsOut::OPR_OUT, BusByte::ZERO)
            }
            ChannelState::Disconnecting => {
                if !tags_in.contains(TagsIn::OPR_IN) {
                    self.set_state(ChannelState::Idle);
                }
                (TagsOut::OPR_OUT, BusByte::ZERO)
            }
            ChannelState::Polling => {
                if tags_in.contains(TagsIn::SEL_IN) {
                    event!(Level::DEBUG, "channel: nobody answered the poll");
                    self.set_state(ChannelState::Disconnecting);
                    (TagsOut::OPR_OUT, BusByte::ZERO)
                } else if tags_in.contains(TagsIn::OPR_IN | TagsIn::ADR_IN) {
                    self.address = bus.bus_in.data();
                    self.set_state(ChannelState::PollProceed);
                    (CONNECTED | TagsOut::CMD_OUT, BusByte::ZERO)
                } else {
                    (CONNECTED, BusByte::ZERO)
                }
            }
            ChannelState::PollProceed => {
                if tags_in.contains(TagsIn::ADR_IN) {
                    (CONNECTED | TagsOut::CMD_OUT, BusByte::ZERO)
                } else {
                    self.set_state(ChannelState::PollStatus);
                    (CONNECTED, BusByte::ZERO)
                }
            }
            ChannelState::PollStatus => {
                if tags_in.contains(TagsIn::STA_IN) {
                    let status = self.read_status(bus);
                    self.status_event(StatusKind::Interrupt, status);
                    self.accept(AfterAccept::Disconnect, false)
                } else {
                    (CONNECTED, BusByte::ZERO)
                }
            }
        };
        bus.tags_out = tags_out;
        bus.bus_out = bus_out;
    }

    fn idle(&mut self, tags_in: TagsIn) -> (TagsOut, BusByte) {
        if tags_in.contains(TagsIn::OPR_IN) {
            // Wait for the last unit to get off the interface.
            return (TagsOut::OPR_OUT, BusByte::ZERO);
        }
        if tags_in.contains(TagsIn::REQ_IN) {
            event!(Level::DEBUG, "channel: polling for request-in");
            self.set_state(ChannelState::Polling);
            return (CONNECTED, BusByte::ZERO);
        }
        if !self.program.is_empty() {
            self.address = self.program_address;
            self.load_next();
            self.initial_selection = true;
            self.set_state(ChannelState::Selecting);
            return (
                CONNECTED | TagsOut::ADR_OUT,
                BusByte::with_parity(self.address),
            );
        }
        (TagsOut::OPR_OUT, BusByte::ZERO)
    }

    fn selecting(&mut self, bus: &Bus) -> (TagsOut, BusByte) {
        let tags_in = bus.tags_in;
        if tags_in.contains(TagsIn::SEL_IN) {
            event!(
                Level::INFO,
                "channel: no unit answers to address {:02X}",
                self.address
            );
            self.condition_code(ConditionCode::NotOperational);
            self.current = None;
            self.program.clear();
            self.set_state(ChannelState::Disconnecting);
            (TagsOut::OPR_OUT, BusByte::ZERO)
        } else if tags_in.contains(TagsIn::OPR_IN | TagsIn::STA_IN) {
            let status = self.read_status(bus);
            self.initial_status(status)
        } else if tags_in.contains(TagsIn::OPR_IN) {
            if bus.bus_in.data() != self.address {
                event!(
                    Level::WARN,
                    "channel: selected {:02X} but {} answered",
                    self.address,
                    bus.bus_in
                );
            }
            self.set_state(ChannelState::AwaitAddressIn);
            (CONNECTED, BusByte::ZERO)
        } else {
            (
                CONNECTED | TagsOut::ADR_OUT,
                BusByte::with_parity(self.address),
            )
        }
    }

    fn status_accepted(&mut self, tags_in: TagsIn) -> (TagsOut, BusByte) {
        if tags_in.contains(TagsIn::STA_IN) {
            return (SelectorChannel::accept_tags(self.suppress), BusByte::ZERO);
        }
        self.suppress = false;
        match self.after_accept {
            AfterAccept::Transfer => {
                self.set_state(ChannelState::Data);
                (CONNECTED, BusByte::ZERO)
            }
            AfterAccept::ChainNext => {
                self.load_next();
                self.set_state(ChannelState::AwaitAddressIn);
                (CONNECTED, BusByte::ZERO)
            }
            AfterAccept::AwaitEnding => {
                self.set_state(ChannelState::AwaitEndingStatus);
                (CONNECTED, BusByte::ZERO)
            }
            AfterAccept::Disconnect => {
                self.current = None;
                self.set_state(ChannelState::Disconnecting);
                (TagsOut::OPR_OUT, BusByte::ZERO)
            }
        }
    }

    fn data(&mut self, bus: &Bus) -> (TagsOut, BusByte) {
        let tags_in = bus.tags_in;
        if self.halt_requested {
            return self.halt();
        }
        if tags_in.contains(TagsIn::STA_IN) {
            let status = self.read_status(bus);
            self.status_event(StatusKind::Ending, status);
            return self.ending_or_initial(status);
        }
        if !tags_in.contains(TagsIn::SRV_IN) {
            return (CONNECTED, BusByte::ZERO);
        }
        let Some(ccw) = self.current.as_ref() else {
            self.stopping = true;
            self.out_byte = BusByte::ZERO;
            self.set_state(ChannelState::DataResponse);
            return (CONNECTED | TagsOut::CMD_OUT, BusByte::ZERO);
        };
        if self.transferred >= ccw.count {
            event!(
                Level::DEBUG,
                "channel: count exhausted after {} bytes, stopping",
                self.transferred
            );
            self.stopping = true;
            self.out_byte = BusByte::ZERO;
            self.set_state(ChannelState::DataResponse);
            return (CONNECTED | TagsOut::CMD_OUT, BusByte::ZERO);
        }
        self.out_byte = if ccw.is_input() {
            if !bus.bus_in.parity_ok() {
                event!(
                    Level::WARN,
                    "channel: data byte {} from {:02X} has bad parity",
                    bus.bus_in,
                    self.address
                );
            }
            self.received.push(bus.bus_in.data());
            BusByte::ZERO
        } else {
            BusByte::with_parity(ccw.data.get(self.transferred).copied().unwrap_or(0))
        };
        self.transferred += 1;
        self.set_state(ChannelState::DataResponse);
        (CONNECTED | TagsOut::SRV_OUT, self.out_byte)
    }

    fn halt(&mut self) -> (TagsOut, BusByte) {
        event!(Level::INFO, "channel: halt I/O at {:02X}", self.address);
        self.halt_requested = false;
        self.abandon_program();
        self.set_state(ChannelState::Halting);
        (
            CONNECTED | TagsOut::ADR_OUT,
            BusByte::with_parity(self.address),
        )
    }
}

impl Default for SelectorChannel {
    fn default() -> SelectorChannel {
        SelectorChannel::new()
    }
}

/// Outbound tags held while the channel is connected to a unit.
const CONNECTED: TagsOut = TagsOut::OPR_OUT
    .union(TagsOut::SEL_OUT)
    .union(TagsOut::HLD_OUT);
