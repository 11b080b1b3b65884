//! The control-unit side of the System/360 bus-and-tag handshake.
//!
//! Every attached unit owns a [`Controller`].  Once per simulated
//! cycle the device manager calls [`Controller::cycle`] with the
//! interface as the channel left it; the controller looks at the
//! outbound tags, drives whatever inbound tags and data its state
//! calls for, and moves to its next state.  Waiting is always done by
//! staying in the same state across cycles, never by blocking.
//!
//! ## Sequences
//!
//! Initial selection:
//!
//! | channel                   | unit                          | state       |
//! | ------------------------- | ----------------------------- | ----------- |
//! | select-out, address-out   | operational-in, address on bus-in | `InitSel` |
//! | drops address-out         | address-in                    | `Command`   |
//! | command-out, command byte | drops address-in              | `Status`    |
//! | drops command-out         | status-in, initial status     | `StatusAccept` |
//! | service-out (accept)      | drops status-in               | `Opr` / `StatusWait` / `WaitDevEnd` |
//!
//! Data transfer (each byte):
//!
//! | channel                    | unit                         | state   |
//! | -------------------------- | ---------------------------- | ------- |
//! |                            | (device raises `data_ready`) | `Data1` |
//! |                            | service-in, byte on bus-in   | `Data2` |
//! | service-out (or command-out to stop) | drops service-in   | `Opr`   |
//!
//! Ending status works like initial status (`EndStatus`,
//! `EndAccept`).  A unit with status to present while disconnected
//! raises request-in; the channel answers with select-out but without
//! address-out, and the unit reconnects through `EndStatus`, first
//! presenting its address.
//!
//! ## Priority rules
//!
//! Operational-out and suppress-out both down is a system reset and
//! overrides everything.  Operational-out down on its own makes a
//! connected unit drop off the interface.  Address-out while a unit
//! is transferring data is a halt, and is honoured in the cycle it
//! is seen.
#[cfg(test)]
mod tests;

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use crate::context::DeviceContext;
use crate::device::{CommandEffect, Device, DeviceFlags, DeviceTimer};
use crate::event::OutputEvent;
use crate::scheduler::{Scheduler, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProtocolState {
    Idle,
    Busy,
    InitSel,
    Command,
    Status,
    StatusAccept,
    StatusWait,
    EndStatus,
    EndAccept,
    WaitDevEnd,
    Opr,
    Data1,
    Data2,
}

/// Things outside a controller which a controller needs during a
/// cycle.  They belong to the device manager.
pub(crate) struct Services<'a> {
    pub(crate) scheduler: &'a mut Scheduler<DeviceTimer>,
    pub(crate) output: &'a mut Vec<OutputEvent>,
}

/// Per-unit protocol state.
#[derive(Debug, Clone, Serialize)]
pub struct Controller {
    unit: UnitId,
    address: u8,
    mask: u8,
    state: ProtocolState,
    /// This unit currently owns the interface.
    selected: bool,
    /// This unit is asking the channel for attention.
    request: bool,
    /// The channel declined to accept our status; it is held for
    /// presentation later.
    stacked: bool,
    /// Status being presented, or held pending presentation.
    status: Status,
    effect: Option<CommandEffect>,
    /// While reconnecting in `EndStatus`, the unit presents its address
    /// before its status.
    address_phase: bool,
    /// In `Busy`, the channel has responded to the busy status.
    busy_answered: bool,
    /// Reset has been applied and operational-out has not yet risen
    /// again.
    in_reset: bool,
    flags: DeviceFlags,
}

impl Controller {
    #[must_use]
    pub fn new(unit: UnitId, address: u8, mask: u8) -> Controller {
        Controller {
            unit,
            address,
            mask,
            state: ProtocolState::Idle,
            selected: false,
            request: false,
            stacked: false,
            status: Status::empty(),
            effect: None,
            address_phase: false,
            busy_answered: false,
            in_reset: false,
            flags: DeviceFlags::default(),
        }
    }

    #[must_use]
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    #[must_use]
    pub fn address(&self) -> u8 {
        self.address
    }

    #[must_use]
    pub fn mask(&self) -> u8 {
        self.mask
    }

    #[must_use]
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    #[must_use]
    pub fn is_requesting(&self) -> bool {
        self.request
    }

    #[must_use]
    pub fn is_stacked(&self) -> bool {
        self.stacked
    }

    /// The status byte being presented, or held for presentation.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn flags(&self) -> &DeviceFlags {
        &self.flags
    }

    /// True when `value` (taken from bus-out) addresses this unit.
    #[must_use]
    pub fn responds_to(&self, value: u8) -> bool {
        (value & self.mask) == (self.address & self.mask)
    }

    /// True when nothing is going on: not connected, no operation in
    /// progress and no status waiting to be presented.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.state == ProtocolState::Idle && !self.flags.busy && self.status.is_empty()
    }

    fn has_status_to_present(&self) -> bool {
        !self.status.is_empty() && !self.flags.busy
    }

    fn address_byte(&self) -> BusByte {
        BusByte::with_parity(self.address)
    }

    fn drive(bus: &mut Bus, tags: TagsIn, value: BusByte) {
        bus.tags_in |= tags;
        bus.bus_in = value;
    }

    fn set_state(&mut self, next: ProtocolState) {
        if next != self.state {
            event!(
                Level::TRACE,
                "unit {:02X}: {:?} -> {:?}",
                self.address,
                self.state,
                next
            );
            self.state = next;
        }
    }

    fn deselect(&mut self) {
        self.selected = false;
        self.address_phase = false;
        self.busy_answered = false;
        self.set_state(ProtocolState::Idle);
    }

    fn context<'a>(
        unit: UnitId,
        address: u8,
        flags: &'a mut DeviceFlags,
        services: &'a mut Services<'_>,
    ) -> DeviceContext<'a> {
        DeviceContext::new(unit, address, flags, services.scheduler, services.output)
    }

    /// Lets a device look at (and change) its latches outside of a
    /// protocol cycle, for example when a timer fires.
    pub(crate) fn with_device_context<R>(
        &mut self,
        services: &mut Services<'_>,
        f: impl FnOnce(&mut DeviceContext<'_>) -> R,
    ) -> R {
        let mut ctx = Controller::context(self.unit, self.address, &mut self.flags, services);
        f(&mut ctx)
    }

    /// Runs one protocol cycle.  `select_out` says whether select-out
    /// reached this unit along the chain, and `other_connected` whether
    /// some other unit on the interface is already connected to the
    /// channel.  The return value says whether select-out carries on to
    /// the next unit.
    pub(crate) fn cycle(
        &mut self,
        device: &mut dyn Device,
        services: &mut Services<'_>,
        bus: &mut Bus,
        select_out: bool,
        other_connected: bool,
    ) -> bool {
        let out = bus.tags_out;
        if out.is_reset() {
            if !self.in_reset {
                self.reset(device, services);
            }
            return select_out;
        }
        self.in_reset = false;
        if !out.contains(TagsOut::OPR_OUT) {
            self.interface_disconnect(device, services);
            return select_out;
        }

        self.merge_device_end();
        if !out.holding()
            && matches!(
                self.state,
                ProtocolState::Status
                    | ProtocolState::StatusAccept
                    | ProtocolState::EndStatus
                    | ProtocolState::EndAccept
            )
        {
            self.released(device, services);
        }

        let passes = match self.state {
            ProtocolState::Idle => self.idle(bus, select_out, other_connected),
            ProtocolState::Busy => {
                self.busy(bus);
                false
            }
            ProtocolState::InitSel => {
                self.init_sel(bus);
                false
            }
            ProtocolState::Command => {
                self.command(device, services, bus);
                false
            }
            ProtocolState::Status => {
                self.initial_status(bus);
                false
            }
            ProtocolState::StatusAccept => {
                self.status_accept(device, services, bus);
                false
            }
            ProtocolState::StatusWait => {
                self.status_wait(bus);
                false
            }
            ProtocolState::EndStatus => {
                self.end_status(bus);
                false
            }
            ProtocolState::EndAccept => {
                self.end_accept(bus);
                false
            }
            ProtocolState::WaitDevEnd => {
                self.wait_device_end(bus);
                false
            }
            ProtocolState::Opr => {
                self.opr(device, services, bus);
                false
            }
            ProtocolState::Data1 => {
                self.data_1(device, services, bus);
                false
            }
            ProtocolState::Data2 => {
                self.data_2(device, services, bus);
                false
            }
        };

        self.request = !self.selected && self.has_status_to_present();
        if self.request {
            bus.tags_in |= TagsIn::REQ_IN;
        }
        passes
    }

    /// System reset: everything returns to its initial state and the
    /// device forgets what it was doing.
    fn reset(&mut self, device: &mut dyn Device, services: &mut Services<'_>) {
        if self.state != ProtocolState::Idle || self.flags.busy || !self.status.is_empty() {
            event!(
                Level::INFO,
                "unit {:02X}: system reset in state {:?}",
                self.address,
                self.state
            );
        }
        self.flags = DeviceFlags::default();
        {
            let mut ctx = Controller::context(self.unit, self.address, &mut self.flags, services);
            ctx.cancel_all();
            device.reset(&mut ctx);
        }
        self.flags = DeviceFlags::default();
        self.status = Status::empty();
        self.effect = None;
        self.stacked = false;
        self.request = false;
        self.in_reset = true;
        self.deselect();
    }

    /// Operational-out fell while suppress-out is up.  A connected unit
    /// drops off the interface; an operation in progress carries on
    /// and its ending status is requested later.
    fn interface_disconnect(&mut self, device: &mut dyn Device, services: &mut Services<'_>) {
        if self.state == ProtocolState::Idle {
            self.request = false;
            return;
        }
        event!(
            Level::DEBUG,
            "unit {:02X}: operational-out dropped in state {:?}, disconnecting",
            self.address,
            self.state
        );
        if matches!(
            self.state,
            ProtocolState::Opr | ProtocolState::Data1 | ProtocolState::Data2
        ) {
            self.halt(device, services);
        }
        self.status.remove(Status::BUSY);
        self.request = false;
        self.deselect();
    }

    /// The channel let go of the unit while it was presenting status.
    /// The status is kept, to be presented later.
    fn released(&mut self, device: &mut dyn Device, services: &mut Services<'_>) {
        event!(
            Level::DEBUG,
            "unit {:02X}: channel released the unit in state {:?}",
            self.address,
            self.state
        );
        if self.status.is_empty() && self.flags.busy {
            self.halt(device, services);
        }
        self.stack_status();
        self.deselect();
    }

    /// Folds a device end which the device posted while the state
    /// machine was not looking for one into the pending status.
    fn merge_device_end(&mut self) {
        if !self.flags.cmd_done {
            return;
        }
        match self.state {
            ProtocolState::Opr
            | ProtocolState::Data1
            | ProtocolState::Data2
            | ProtocolState::WaitDevEnd => (),
            _ => {
                event!(
                    Level::DEBUG,
                    "unit {:02X}: device end posted in state {:?}",
                    self.address,
                    self.state
                );
                self.take_device_end();
            }
        }
    }

    fn take_device_end(&mut self) {
        self.flags.cmd_done = false;
        self.flags.busy = false;
        self.status |= Status::DEVICE_END | (self.flags.status & Status::DEVICE_CONDITIONS);
        self.flags.status = Status::empty();
    }

    fn idle(&mut self, bus: &mut Bus, select_out: bool, other_connected: bool) -> bool {
        // Units further down the chain have not driven the inbound
        // lines yet this cycle, so operational-in alone does not show
        // a connection to a unit below us.
        if other_connected || bus.tags_in.contains(TagsIn::OPR_IN) {
            return select_out;
        }
        if !select_out {
            return false;
        }
        let out = bus.tags_out;
        if out.contains(TagsOut::ADR_OUT) {
            if !self.responds_to(bus.bus_out.data()) {
                return true;
            }
            if !bus.bus_out.parity_ok() {
                event!(
                    Level::WARN,
                    "unit {:02X}: ignoring selection, address {} has bad parity",
                    self.address,
                    bus.bus_out
                );
                return true;
            }
            self.selected = true;
            if self.flags.busy || !self.status.is_empty() {
                event!(
                    Level::DEBUG,
                    "unit {:02X}: selected while busy, presenting busy status",
                    self.address
                );
                self.status |= Status::BUSY;
                self.busy_answered = false;
                Controller::drive(
                    bus,
                    TagsIn::OPR_IN | TagsIn::STA_IN,
                    BusByte::with_parity(self.status.bits()),
                );
                self.set_state(ProtocolState::Busy);
            } else {
                Controller::drive(bus, TagsIn::OPR_IN, self.address_byte());
                self.set_state(ProtocolState::InitSel);
            }
            false
        } else if self.has_status_to_present() {
            // The channel is polling for interrupts.
            event!(
                Level::DEBUG,
                "unit {:02X}: reconnecting to present status {:?}",
                self.address,
                self.status
            );
            self.selected = true;
            self.address_phase = true;
            Controller::drive(bus, TagsIn::OPR_IN | TagsIn::ADR_IN, self.address_byte());
            self.set_state(ProtocolState::EndStatus);
            false
        } else {
            true
        }
    }

    fn busy(&mut self, bus: &mut Bus) {
        let out = bus.tags_out;
        if !out.holding() {
            self.status.remove(Status::BUSY);
            self.stacked = !self.status.is_empty();
            self.deselect();
            return;
        }
        if !self.busy_answered {
            if out.contains(TagsOut::SRV_OUT) {
                // Any pending status went to the channel along with
                // the busy bit.
                self.status = Status::empty();
                self.stacked = false;
                self.busy_answered = true;
            } else if out.contains(TagsOut::CMD_OUT) {
                self.status.remove(Status::BUSY);
                self.stacked = !self.status.is_empty();
                self.busy_answered = true;
            } else {
                Controller::drive(
                    bus,
                    TagsIn::OPR_IN | TagsIn::STA_IN,
                    BusByte::with_parity(self.status.bits()),
                );
                return;
            }
        }
        Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
    }

    fn init_sel(&mut self, bus: &mut Bus) {
        if bus.tags_out.contains(TagsOut::ADR_OUT) {
            Controller::drive(bus, TagsIn::OPR_IN, self.address_byte());
        } else {
            Controller::drive(bus, TagsIn::OPR_IN | TagsIn::ADR_IN, self.address_byte());
            self.set_state(ProtocolState::Command);
        }
    }

    fn command(&mut self, device: &mut dyn Device, services: &mut Services<'_>, bus: &mut Bus) {
        let out = bus.tags_out;
        if out.contains(TagsOut::ADR_OUT) && !out.contains(TagsOut::HLD_OUT) {
            self.halt(device, services);
            Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
            return;
        }
        if !out.contains(TagsOut::CMD_OUT) {
            Controller::drive(bus, TagsIn::OPR_IN | TagsIn::ADR_IN, self.address_byte());
            return;
        }
        self.accept_command(device, services, bus.bus_out);
        Controller::drive(bus, TagsIn::OPR_IN, BusByte::with_parity(self.status.bits()));
        self.set_state(ProtocolState::Status);
    }

    fn accept_command(&mut self, device: &mut dyn Device, services: &mut Services<'_>, byte: BusByte) {
        let command = Command(byte.data());
        self.effect = None;
        if !byte.parity_ok() {
            event!(
                Level::WARN,
                "unit {:02X}: command byte {} has bad parity",
                self.address,
                byte
            );
            self.flags.sense = Sense::BUS_OUT_CHECK;
            self.status = Status::CE_DE_UC;
            return;
        }
        if self.flags.busy || self.stacked {
            event!(
                Level::DEBUG,
                "unit {:02X}: command {} while busy or holding status {:?}",
                self.address,
                command,
                self.status
            );
            self.status |= Status::BUSY;
            return;
        }
        if command.kind() == CommandKind::TestIo {
            // Test I/O gets whatever status is pending, which clears
            // it, or zero.
            event!(
                Level::DEBUG,
                "unit {:02X}: test I/O, status {:?}",
                self.address,
                self.status
            );
            self.effect = Some(CommandEffect::Immediate);
            return;
        }

        if command.kind() != CommandKind::Sense {
            self.flags.sense = Sense::empty();
        }
        self.flags.data_ready = false;
        self.flags.data_end = false;
        self.flags.cmd_done = false;
        self.flags.status = Status::empty();
        self.flags.busy = false;

        let effect = {
            let mut ctx = Controller::context(self.unit, self.address, &mut self.flags, services);
            device.decode_command(&mut ctx, command)
        };
        event!(
            Level::DEBUG,
            "unit {:02X}: command {} -> {:?}",
            self.address,
            command,
            effect
        );
        self.effect = Some(effect);
        let device_status = self.flags.status & Status::DEVICE_CONDITIONS;
        self.flags.status = Status::empty();
        match effect {
            CommandEffect::Immediate => {
                self.flags.busy = false;
                self.flags.cmd_done = false;
                self.status = Status::CE_DE | device_status;
            }
            CommandEffect::Transfer(_) => {
                self.flags.busy = true;
                self.flags.status = device_status;
                self.status = Status::empty();
            }
            CommandEffect::ChannelEnd => {
                self.flags.busy = true;
                self.status = Status::CHANNEL_END | device_status;
            }
            CommandEffect::Reject => {
                self.flags.busy = false;
                self.flags.sense |= Sense::COMMAND_REJECT;
                self.status = Status::CE_DE_UC;
            }
        }
    }

    fn initial_status(&mut self, bus: &mut Bus) {
        let out = bus.tags_out;
        let value = BusByte::with_parity(self.status.bits());
        if out.intersects(TagsOut::CMD_OUT | TagsOut::SRV_OUT) {
            Controller::drive(bus, TagsIn::OPR_IN, value);
        } else {
            Controller::drive(bus, TagsIn::OPR_IN | TagsIn::STA_IN, value);
            self.set_state(ProtocolState::StatusAccept);
        }
    }

    fn status_accept(&mut self, device: &mut dyn Device, services: &mut Services<'_>, bus: &mut Bus) {
        let out = bus.tags_out;
        if out.contains(TagsOut::SRV_OUT) {
            let presented = self.status;
            self.status = Status::empty();
            self.stacked = false;
            Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
            let next = if presented.is_empty()
                && matches!(self.effect, Some(CommandEffect::Transfer(_)))
            {
                ProtocolState::Opr
            } else if Controller::chaining(out, presented) {
                event!(
                    Level::DEBUG,
                    "unit {:02X}: command chaining after initial status",
                    self.address
                );
                self.effect = None;
                ProtocolState::Command
            } else if presented.contains(Status::BUSY)
                || presented.contains(Status::DEVICE_END)
                || !self.flags.busy
            {
                ProtocolState::StatusWait
            } else {
                ProtocolState::WaitDevEnd
            };
            self.set_state(next);
        } else if out.contains(TagsOut::CMD_OUT) {
            if self.status.is_empty() {
                // Command-out in answer to a zero initial status:
                // the channel wants no data after all.
                event!(
                    Level::DEBUG,
                    "unit {:02X}: channel stopped the operation at initial status",
                    self.address
                );
                self.halt(device, services);
            } else {
                self.stack_status();
                self.set_state(ProtocolState::StatusWait);
            }
            Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
        } else if out.contains(TagsOut::ADR_OUT) {
            if self.status.is_empty() {
                self.halt(device, services);
                Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
            } else {
                self.stack_status();
                Controller::drive(bus, TagsIn::OPR_IN, self.address_byte());
                self.set_state(ProtocolState::InitSel);
            }
        } else {
            Controller::drive(
                bus,
                TagsIn::OPR_IN | TagsIn::STA_IN,
                BusByte::with_parity(self.status.bits()),
            );
        }
    }

    /// Suppress-out along with service-out, in answer to a device end
    /// without unit check or busy, means another command follows.
    fn chaining(out: TagsOut, presented: Status) -> bool {
        out.contains(TagsOut::SUP_OUT)
            && presented.contains(Status::DEVICE_END)
            && !presented.intersects(Status::UNIT_CHECK | Status::BUSY)
    }

    fn stack_status(&mut self) {
        self.status.remove(Status::BUSY);
        event!(
            Level::DEBUG,
            "unit {:02X}: status {:?} stacked",
            self.address,
            self.status
        );
        self.stacked = !self.status.is_empty();
    }

    fn status_wait(&mut self, bus: &mut Bus) {
        if bus.tags_out.holding() {
            Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
        } else {
            self.deselect();
        }
    }

    fn wait_device_end(&mut self, bus: &mut Bus) {
        if self.flags.cmd_done {
            self.take_device_end();
            self.address_phase = false;
            Controller::drive(bus, TagsIn::OPR_IN, BusByte::with_parity(self.status.bits()));
            self.set_state(ProtocolState::EndStatus);
        } else if bus.tags_out.holding() {
            Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
        } else {
            self.deselect();
        }
    }

    /// Halt I/O: stop the transfer, force channel end, and get off
    /// the interface as soon as the channel lets us.
    fn halt(&mut self, device: &mut dyn Device, services: &mut Services<'_>) {
        event!(
            Level::INFO,
            "unit {:02X}: halt in state {:?}",
            self.address,
            self.state
        );
        let was_busy = self.flags.busy;
        if was_busy {
            let mut ctx = Controller::context(self.unit, self.address, &mut self.flags, services);
            device.halt(&mut ctx);
        }
        self.flags.data_ready = false;
        self.flags.data_end = true;
        if was_busy {
            self.status |= Status::CHANNEL_END;
            if self.flags.cmd_done {
                self.take_device_end();
            }
        }
        self.set_state(ProtocolState::StatusWait);
    }

    fn direction(&self) -> Direction {
        match self.effect {
            Some(CommandEffect::Transfer(direction)) => direction,
            _ => Direction::Input,
        }
    }

    fn data_value(&self) -> BusByte {
        match self.direction() {
            Direction::Input => BusByte::with_parity(self.flags.data),
            Direction::Output => BusByte::ZERO,
        }
    }

    fn opr(&mut self, device: &mut dyn Device, services: &mut Services<'_>, bus: &mut Bus) {
        let out = bus.tags_out;
        if out.contains(TagsOut::ADR_OUT) {
            self.halt(device, services);
        } else if self.flags.data_end || self.flags.cmd_done {
            self.flags.data_ready = false;
            self.flags.data_end = false;
            self.status = Status::CHANNEL_END;
            if self.flags.cmd_done {
                self.take_device_end();
            } else {
                self.status |= self.flags.status & Status::DEVICE_CONDITIONS;
                self.flags.status = Status::empty();
            }
            self.address_phase = false;
            self.set_state(ProtocolState::EndStatus);
            Controller::drive(bus, TagsIn::OPR_IN, BusByte::with_parity(self.status.bits()));
            return;
        } else if self.flags.data_ready && !out.intersects(TagsOut::SRV_OUT | TagsOut::CMD_OUT) {
            self.set_state(ProtocolState::Data1);
        }
        Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
    }

    fn data_1(&mut self, device: &mut dyn Device, services: &mut Services<'_>, bus: &mut Bus) {
        if bus.tags_out.contains(TagsOut::ADR_OUT) {
            self.halt(device, services);
            Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
            return;
        }
        Controller::drive(bus, TagsIn::OPR_IN | TagsIn::SRV_IN, self.data_value());
        self.set_state(ProtocolState::Data2);
    }

    fn data_2(&mut self, device: &mut dyn Device, services: &mut Services<'_>, bus: &mut Bus) {
        let out = bus.tags_out;
        if out.contains(TagsOut::ADR_OUT) {
            self.halt(device, services);
            Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
            return;
        }
        if !out.intersects(TagsOut::SRV_OUT | TagsOut::CMD_OUT) {
            Controller::drive(bus, TagsIn::OPR_IN | TagsIn::SRV_IN, self.data_value());
            return;
        }
        {
            let mut ctx = Controller::context(self.unit, self.address, &mut self.flags, services);
            if out.contains(TagsOut::CMD_OUT) {
                // Stop: the channel wants no more data, and no byte
                // changes hands.
                if !ctx.flags.data_end {
                    event!(
                        Level::DEBUG,
                        "unit {:02X}: channel signalled stop",
                        self.address
                    );
                    ctx.flags.data_end = true;
                    device.halt(&mut ctx);
                }
                ctx.flags.data_ready = false;
            } else {
                match self.effect {
                    Some(CommandEffect::Transfer(Direction::Output)) => {
                        let byte = bus.bus_out;
                        if byte.parity_ok() {
                            device.put_byte(&mut ctx, byte.data());
                        } else {
                            event!(
                                Level::WARN,
                                "unit {:02X}: data byte {} has bad parity",
                                self.address,
                                byte
                            );
                            ctx.flags.sense |= Sense::BUS_OUT_CHECK;
                            ctx.flags.status |= Status::UNIT_CHECK;
                            device.on_bus_check(&mut ctx);
                        }
                    }
                    _ => device.take_byte(&mut ctx),
                }
            }
        }
        Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
        self.set_state(ProtocolState::Opr);
    }

    fn end_status(&mut self, bus: &mut Bus) {
        let out = bus.tags_out;
        if self.address_phase {
            if out.contains(TagsOut::CMD_OUT) {
                // The channel says "proceed".
                self.address_phase = false;
                Controller::drive(bus, TagsIn::OPR_IN, BusByte::with_parity(self.status.bits()));
            } else {
                Controller::drive(bus, TagsIn::OPR_IN | TagsIn::ADR_IN, self.address_byte());
            }
            return;
        }
        let value = BusByte::with_parity(self.status.bits());
        if out.intersects(TagsOut::CMD_OUT | TagsOut::SRV_OUT) {
            Controller::drive(bus, TagsIn::OPR_IN, value);
        } else {
            Controller::drive(bus, TagsIn::OPR_IN | TagsIn::STA_IN, value);
            self.set_state(ProtocolState::EndAccept);
        }
    }

    fn end_accept(&mut self, bus: &mut Bus) {
        let out = bus.tags_out;
        if out.contains(TagsOut::SRV_OUT) {
            let presented = self.status;
            self.status = Status::empty();
            self.stacked = false;
            if presented.contains(Status::DEVICE_END) {
                if Controller::chaining(out, presented) {
                    // Command chaining: stay connected for the next
                    // command.
                    event!(
                        Level::DEBUG,
                        "unit {:02X}: command chaining, staying connected",
                        self.address
                    );
                    self.effect = None;
                    Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
                    self.set_state(ProtocolState::Command);
                } else {
                    Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
                    self.set_state(ProtocolState::StatusWait);
                }
            } else {
                Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
                self.set_state(ProtocolState::WaitDevEnd);
            }
        } else if out.intersects(TagsOut::CMD_OUT | TagsOut::ADR_OUT) {
            self.stack_status();
            Controller::drive(bus, TagsIn::OPR_IN, BusByte::ZERO);
            self.set_state(ProtocolState::StatusWait);
        } else {
            Controller::drive(
                bus,
                TagsIn::OPR_IN | TagsIn::STA_IN,
                BusByte::with_parity(self.status.bits()),
            );
        }
    }
}
