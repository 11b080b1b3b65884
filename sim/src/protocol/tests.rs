use std::collections::VecDeque;

use base::prelude::*;

use super::{Controller, ProtocolState, Services};
use crate::context::DeviceContext;
use crate::device::{CommandEffect, Device, DeviceTimer};
use crate::event::OutputEvent;
use crate::scheduler::{ScheduledEvent, Scheduler, UnitId};

const ADDRESS: u8 = 0x1F;

/// A device whose behaviour for each command is fixed in advance.
#[derive(Debug, Default)]
struct ScriptedDevice {
    commands: Vec<Command>,
    input: VecDeque<u8>,
    written: Vec<u8>,
    halts: usize,
    resets: usize,
    reject_all: bool,
}

impl Device for ScriptedDevice {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    fn decode_command(&mut self, ctx: &mut DeviceContext<'_>, command: Command) -> CommandEffect {
        self.commands.push(command);
        if self.reject_all {
            return CommandEffect::Reject;
        }
        match command.kind() {
            CommandKind::Read => match self.input.front() {
                Some(b) => {
                    ctx.flags.data = *b;
                    ctx.flags.data_ready = true;
                    // Something for a reset to cancel.
                    let _ = ctx.schedule(DeviceTimer::Mechanical, 1000, 0);
                    CommandEffect::Transfer(Direction::Input)
                }
                None => CommandEffect::Reject,
            },
            CommandKind::Write => {
                ctx.flags.data_ready = true;
                CommandEffect::Transfer(Direction::Output)
            }
            CommandKind::Control if command == Command::NOP => CommandEffect::Immediate,
            CommandKind::Control => CommandEffect::ChannelEnd,
            _ => CommandEffect::Reject,
        }
    }

    fn on_event(&mut self, _ctx: &mut DeviceContext<'_>, _event: ScheduledEvent<DeviceTimer>) {}

    fn take_byte(&mut self, ctx: &mut DeviceContext<'_>) {
        self.input.pop_front();
        match self.input.front() {
            Some(b) => {
                ctx.flags.data = *b;
            }
            None => {
                ctx.flags.data_ready = false;
                ctx.flags.data_end = true;
                ctx.flags.cmd_done = true;
            }
        }
    }

    fn put_byte(&mut self, _ctx: &mut DeviceContext<'_>, byte: u8) {
        self.written.push(byte);
    }

    fn halt(&mut self, ctx: &mut DeviceContext<'_>) {
        self.halts += 1;
        ctx.flags.cmd_done = true;
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {
        self.resets += 1;
        self.input.clear();
    }
}

struct Fixture {
    controller: Controller,
    device: ScriptedDevice,
    scheduler: Scheduler<DeviceTimer>,
    output: Vec<OutputEvent>,
    /// Pretend another unit on the interface is connected.
    other_connected: bool,
}

/// Outbound tags held by a channel which is connected to a unit.
const CONNECTED: TagsOut = TagsOut::OPR_OUT
    .union(TagsOut::SEL_OUT)
    .union(TagsOut::HLD_OUT);

impl Fixture {
    fn new() -> Fixture {
        Fixture {
            controller: Controller::new(UnitId(0), ADDRESS, 0xFF),
            device: ScriptedDevice::default(),
            scheduler: Scheduler::default(),
            output: Vec::new(),
            other_connected: false,
        }
    }

    /// Runs one cycle with the given outbound tags and bus-out value,
    /// returning the bus as the controller left it and whether
    /// select-out passed this unit.
    fn step_with(&mut self, tags: TagsOut, value: BusByte) -> (Bus, bool) {
        let mut bus = Bus {
            tags_out: tags,
            bus_out: value,
            ..Bus::default()
        };
        bus.clear_inbound();
        let mut services = Services {
            scheduler: &mut self.scheduler,
            output: &mut self.output,
        };
        let passed = self.controller.cycle(
            &mut self.device,
            &mut services,
            &mut bus,
            tags.contains(TagsOut::SEL_OUT),
            self.other_connected,
        );
        (bus, passed)
    }

    fn step(&mut self, tags: TagsOut, value: u8) -> Bus {
        self.step_with(tags, BusByte::with_parity(value)).0
    }

    fn state(&self) -> ProtocolState {
        self.controller.state()
    }

    /// Selects the unit and issues `command`, leaving the controller
    /// presenting initial status.
    fn issue(&mut self, command: u8) -> Bus {
        self.step(CONNECTED | TagsOut::ADR_OUT, ADDRESS);
        assert_eq!(self.state(), ProtocolState::InitSel);
        self.step(CONNECTED, 0);
        assert_eq!(self.state(), ProtocolState::Command);
        self.step(CONNECTED | TagsOut::CMD_OUT, command);
        assert_eq!(self.state(), ProtocolState::Status);
        let bus = self.step(CONNECTED, 0);
        assert_eq!(self.state(), ProtocolState::StatusAccept);
        bus
    }
}

#[test]
fn test_selection_presents_address_in_same_cycle() {
    let mut f = Fixture::new();
    let (bus, passed) = f.step_with(
        CONNECTED | TagsOut::ADR_OUT,
        BusByte::with_parity(ADDRESS),
    );
    assert!(!passed);
    assert_eq!(f.state(), ProtocolState::InitSel);
    assert!(f.controller.is_selected());
    assert!(bus.tags_in.contains(TagsIn::OPR_IN));
    assert_eq!(bus.bus_in, BusByte::with_parity(ADDRESS));
    assert!(bus.bus_in.parity_ok());
}

#[test]
fn test_other_address_passes_select_out() {
    let mut f = Fixture::new();
    let (bus, passed) = f.step_with(CONNECTED | TagsOut::ADR_OUT, BusByte::with_parity(0x12));
    assert!(passed);
    assert_eq!(f.state(), ProtocolState::Idle);
    assert!(bus.tags_in.is_empty());
}

#[test]
fn test_address_with_bad_parity_is_ignored() {
    let mut f = Fixture::new();
    let (bus, passed) = f.step_with(
        CONNECTED | TagsOut::ADR_OUT,
        BusByte::with_bad_parity(ADDRESS),
    );
    assert!(passed);
    assert_eq!(f.state(), ProtocolState::Idle);
    assert!(!bus.tags_in.contains(TagsIn::OPR_IN));
}

#[test]
fn test_masked_address_match() {
    let mut f = Fixture::new();
    f.controller = Controller::new(UnitId(0), 0x10, 0xF0);
    assert!(f.controller.responds_to(0x1F));
    assert!(f.controller.responds_to(0x13));
    assert!(!f.controller.responds_to(0x23));
    let (_, passed) = f.step_with(CONNECTED | TagsOut::ADR_OUT, BusByte::with_parity(0x17));
    assert!(!passed);
    assert_eq!(f.state(), ProtocolState::InitSel);
}

#[test]
fn test_immediate_command() {
    let mut f = Fixture::new();
    let bus = f.issue(Command::NOP.0);
    assert!(bus.tags_in.contains(TagsIn::OPR_IN | TagsIn::STA_IN));
    assert_eq!(bus.bus_in, BusByte::with_parity(Status::CE_DE.bits()));
    assert_eq!(f.device.commands, vec![Command::NOP]);

    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert_eq!(f.state(), ProtocolState::StatusWait);
    assert!(f.controller.status().is_empty());

    let bus = f.step(TagsOut::OPR_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Idle);
    assert!(!f.controller.is_selected());
    assert!(!bus.tags_in.contains(TagsIn::REQ_IN));
    assert!(f.controller.is_quiescent());
}

#[test]
fn test_command_with_bad_parity() {
    let mut f = Fixture::new();
    f.step(CONNECTED | TagsOut::ADR_OUT, ADDRESS);
    f.step(CONNECTED, 0);
    f.step_with(
        CONNECTED | TagsOut::CMD_OUT,
        BusByte::with_bad_parity(Command::NOP.0),
    );
    assert_eq!(f.state(), ProtocolState::Status);
    assert_eq!(f.controller.status(), Status::CE_DE_UC);
    assert_eq!(f.controller.flags().sense, Sense::BUS_OUT_CHECK);
    assert!(f.device.commands.is_empty());
}

#[test]
fn test_command_reject() {
    let mut f = Fixture::new();
    f.device.reject_all = true;
    let bus = f.issue(0x07);
    assert_eq!(bus.bus_in, BusByte::with_parity(Status::CE_DE_UC.bits()));
    assert!(f
        .controller
        .flags()
        .sense
        .contains(Sense::COMMAND_REJECT));
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert_eq!(f.state(), ProtocolState::StatusWait);
}

#[test]
fn test_test_io_when_idle_gives_zero_status() {
    let mut f = Fixture::new();
    let bus = f.issue(0x00);
    assert_eq!(bus.bus_in, BusByte::with_parity(0));
    assert!(f.device.commands.is_empty());
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert_eq!(f.state(), ProtocolState::StatusWait);
}

#[test]
fn test_reselect_while_busy() {
    let mut f = Fixture::new();
    f.controller.flags.busy = true;
    let (bus, passed) = f.step_with(
        CONNECTED | TagsOut::ADR_OUT,
        BusByte::with_parity(ADDRESS),
    );
    assert!(!passed);
    assert_eq!(f.state(), ProtocolState::Busy);
    assert!(bus.tags_in.contains(TagsIn::OPR_IN | TagsIn::STA_IN));
    assert_eq!(bus.bus_in, BusByte::with_parity(Status::BUSY.bits()));
    assert!(bus.bus_in.parity_ok());

    let bus = f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert!(!bus.tags_in.contains(TagsIn::STA_IN));
    assert!(bus.tags_in.contains(TagsIn::OPR_IN));
    f.step(TagsOut::OPR_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Idle);
    assert!(f.controller.status().is_empty());
}

#[test]
fn test_input_transfer() {
    let mut f = Fixture::new();
    f.device.input = VecDeque::from(vec![0xC1, 0xC2]);
    let bus = f.issue(0x02);
    assert_eq!(bus.bus_in, BusByte::with_parity(0));
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Opr);

    let mut received = Vec::new();
    for _ in 0..20 {
        let bus = f.step(CONNECTED, 0);
        if f.state() == ProtocolState::EndAccept {
            assert_eq!(bus.bus_in, BusByte::with_parity(Status::CE_DE.bits()));
            break;
        }
        if bus.tags_in.contains(TagsIn::SRV_IN) {
            assert!(bus.bus_in.parity_ok());
            received.push(bus.bus_in.data());
            f.step(CONNECTED | TagsOut::SRV_OUT, 0);
        }
    }
    assert_eq!(received, vec![0xC1, 0xC2]);
    assert_eq!(f.state(), ProtocolState::EndAccept);

    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert_eq!(f.state(), ProtocolState::StatusWait);
    f.step(TagsOut::OPR_OUT, 0);
    assert!(f.controller.is_quiescent());
}

#[test]
fn test_output_transfer_stopped_by_command_out() {
    let mut f = Fixture::new();
    f.issue(0x01);
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Opr);

    f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::Data1);
    let bus = f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::Data2);
    assert!(bus.tags_in.contains(TagsIn::SRV_IN));

    f.step(CONNECTED | TagsOut::SRV_OUT, 0x5A);
    assert_eq!(f.state(), ProtocolState::Opr);
    assert_eq!(f.device.written, vec![0x5A]);
    // Service-out is still up, so no new request yet.
    f.step(CONNECTED | TagsOut::SRV_OUT, 0x5A);
    assert_eq!(f.state(), ProtocolState::Opr);
    f.step(CONNECTED, 0);
    f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::Data2);

    // The channel has no more data: command-out instead of
    // service-out, and no byte is transferred.
    f.step(CONNECTED | TagsOut::CMD_OUT, 0x77);
    assert_eq!(f.state(), ProtocolState::Opr);
    assert_eq!(f.device.written, vec![0x5A]);
    assert_eq!(f.device.halts, 1);

    let bus = f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::EndStatus);
    assert_eq!(bus.bus_in, BusByte::with_parity(Status::CE_DE.bits()));
}

#[test]
fn test_output_byte_with_bad_parity() {
    let mut f = Fixture::new();
    f.issue(0x01);
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    f.step(CONNECTED, 0);
    f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::Data2);
    f.step_with(CONNECTED | TagsOut::SRV_OUT, BusByte::with_bad_parity(0x5A));
    assert!(f.device.written.is_empty());
    assert!(f.controller.flags().sense.contains(Sense::BUS_OUT_CHECK));

    f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::EndStatus);
    assert_eq!(
        f.controller.status(),
        Status::CE_DE | Status::UNIT_CHECK
    );
}

#[test]
fn test_halt_during_transfer() {
    let mut f = Fixture::new();
    f.device.input = VecDeque::from(vec![1, 2, 3]);
    f.issue(0x02);
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Opr);

    f.step(CONNECTED | TagsOut::ADR_OUT, ADDRESS);
    assert_eq!(f.state(), ProtocolState::StatusWait);
    assert_eq!(f.device.halts, 1);
    assert!(f.controller.flags().data_end);
    assert!(!f.controller.flags().data_ready);
    assert!(f.controller.status().contains(Status::CHANNEL_END));

    // Once the channel lets go, the unit asks to present the status.
    let bus = f.step(TagsOut::OPR_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Idle);
    assert!(f.controller.is_requesting());
    assert!(bus.tags_in.contains(TagsIn::REQ_IN));
}

#[test]
fn test_reset_from_transfer() {
    let mut f = Fixture::new();
    f.device.input = VecDeque::from(vec![1, 2, 3]);
    f.issue(0x02);
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::Data1);
    assert!(!f.scheduler.is_empty());

    let bus = f.step(TagsOut::empty(), 0);
    assert_eq!(f.state(), ProtocolState::Idle);
    assert!(bus.tags_in.is_empty());
    assert!(!f.controller.is_selected());
    assert!(f.controller.status().is_empty());
    assert_eq!(*f.controller.flags(), crate::device::DeviceFlags::default());
    assert!(f.scheduler.is_empty());
    assert_eq!(f.device.resets, 1);

    // Holding reset does not reset the device again.
    f.step(TagsOut::empty(), 0);
    assert_eq!(f.device.resets, 1);
}

/// Starts a read of three bytes and leaves the unit in `Opr`.
fn start_read(f: &mut Fixture) {
    f.device.input = VecDeque::from(vec![1, 2, 3]);
    f.issue(0x02);
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
}

/// Connects the unit through an interrupt poll, leaving it in
/// `EndStatus` with its address on the bus.
fn poll(f: &mut Fixture) {
    f.controller.status = Status::DEVICE_END;
    f.step_with(CONNECTED, BusByte::ZERO);
}

#[test]
fn test_reset_from_every_state_returns_to_idle() {
    let setups: [(ProtocolState, fn(&mut Fixture)); 14] = [
        (ProtocolState::Idle, |f| {
            f.controller.status = Status::DEVICE_END;
            f.scheduler
                .schedule(UnitId(0), DeviceTimer::Mechanical, 50, 0)
                .expect("room");
            f.step(TagsOut::OPR_OUT, 0);
            assert!(f.controller.is_requesting());
        }),
        (ProtocolState::Busy, |f| {
            f.controller.flags.busy = true;
            f.step(CONNECTED | TagsOut::ADR_OUT, ADDRESS);
        }),
        (ProtocolState::InitSel, |f| {
            f.step(CONNECTED | TagsOut::ADR_OUT, ADDRESS);
        }),
        (ProtocolState::Command, |f| {
            f.step(CONNECTED | TagsOut::ADR_OUT, ADDRESS);
            f.step(CONNECTED, 0);
        }),
        (ProtocolState::Status, |f| {
            f.step(CONNECTED | TagsOut::ADR_OUT, ADDRESS);
            f.step(CONNECTED, 0);
            f.step(CONNECTED | TagsOut::CMD_OUT, Command::NOP.0);
        }),
        (ProtocolState::StatusAccept, |f| {
            f.issue(Command::NOP.0);
        }),
        (ProtocolState::StatusWait, |f| {
            f.issue(Command::NOP.0);
            f.step(CONNECTED | TagsOut::SRV_OUT, 0);
        }),
        (ProtocolState::EndStatus, poll),
        (ProtocolState::EndStatus, |f| {
            f.device.input = VecDeque::from(vec![0x40]);
            f.issue(0x02);
            f.step(CONNECTED | TagsOut::SRV_OUT, 0);
            f.step(CONNECTED, 0);
            f.step(CONNECTED, 0);
            f.step(CONNECTED | TagsOut::SRV_OUT, 0);
            f.step(CONNECTED, 0);
        }),
        (ProtocolState::EndAccept, |f| {
            poll(f);
            f.step(CONNECTED | TagsOut::CMD_OUT, 0);
            f.step(CONNECTED, 0);
        }),
        (ProtocolState::WaitDevEnd, |f| {
            f.issue(0x07);
            f.step(CONNECTED | TagsOut::SRV_OUT, 0);
        }),
        (ProtocolState::Opr, start_read),
        (ProtocolState::Data1, |f| {
            start_read(f);
            f.step(CONNECTED, 0);
        }),
        (ProtocolState::Data2, |f| {
            start_read(f);
            f.step(CONNECTED, 0);
            f.step(CONNECTED, 0);
        }),
    ];

    let mut covered: Vec<ProtocolState> = Vec::new();
    for (expected, setup) in setups {
        let mut f = Fixture::new();
        setup(&mut f);
        assert_eq!(f.state(), expected);
        if !covered.contains(&expected) {
            covered.push(expected);
        }

        let bus = f.step(TagsOut::empty(), 0);
        assert_eq!(f.state(), ProtocolState::Idle, "reset from {expected:?}");
        assert!(bus.tags_in.is_empty(), "reset from {expected:?}");
        assert!(!f.controller.is_selected(), "reset from {expected:?}");
        assert!(!f.controller.is_requesting(), "reset from {expected:?}");
        assert!(!f.controller.is_stacked(), "reset from {expected:?}");
        assert!(f.controller.is_quiescent(), "reset from {expected:?}");
        assert!(f.scheduler.is_empty(), "reset from {expected:?}");
        assert_eq!(f.device.resets, 1, "reset from {expected:?}");
    }
    assert_eq!(covered.len(), 13);
}

#[test]
fn test_operational_out_drop_disconnects() {
    let mut f = Fixture::new();
    f.device.input = VecDeque::from(vec![1, 2, 3]);
    f.issue(0x02);
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Opr);

    let bus = f.step(TagsOut::SUP_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Idle);
    assert!(!f.controller.is_selected());
    assert!(bus.tags_in.is_empty());
    assert_eq!(f.device.halts, 1);
    assert_eq!(f.device.resets, 0);
}

#[test]
fn test_channel_end_then_device_end() {
    let mut f = Fixture::new();
    let bus = f.issue(0x07);
    assert_eq!(bus.bus_in, BusByte::with_parity(Status::CHANNEL_END.bits()));
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert_eq!(f.state(), ProtocolState::WaitDevEnd);

    f.step(TagsOut::OPR_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Idle);
    assert!(!f.controller.is_requesting());

    // The device finishes while the unit is disconnected.
    f.controller.flags.cmd_done = true;
    let bus = f.step(TagsOut::OPR_OUT, 0);
    assert!(bus.tags_in.contains(TagsIn::REQ_IN));
    assert_eq!(f.controller.status(), Status::DEVICE_END);
    assert!(!f.controller.flags().busy);
}

#[test]
fn test_interrupt_polling() {
    let mut f = Fixture::new();
    f.controller.status = Status::DEVICE_END;
    let bus = f.step(TagsOut::OPR_OUT, 0);
    assert!(bus.tags_in.contains(TagsIn::REQ_IN));

    // Select-out without address-out.
    let (bus, passed) = f.step_with(CONNECTED, BusByte::ZERO);
    assert!(!passed);
    assert_eq!(f.state(), ProtocolState::EndStatus);
    assert!(bus.tags_in.contains(TagsIn::OPR_IN | TagsIn::ADR_IN));
    assert_eq!(bus.bus_in, BusByte::with_parity(ADDRESS));
    assert!(!bus.tags_in.contains(TagsIn::REQ_IN));

    // Proceed.
    let bus = f.step(CONNECTED | TagsOut::CMD_OUT, 0);
    assert!(!bus.tags_in.contains(TagsIn::ADR_IN));
    let bus = f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::EndAccept);
    assert!(bus.tags_in.contains(TagsIn::STA_IN));
    assert_eq!(bus.bus_in, BusByte::with_parity(Status::DEVICE_END.bits()));

    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    assert_eq!(f.state(), ProtocolState::StatusWait);
    let bus = f.step(TagsOut::OPR_OUT, 0);
    assert!(f.controller.is_quiescent());
    assert!(!bus.tags_in.contains(TagsIn::REQ_IN));
}

#[test]
fn test_stacked_status_is_presented_later() {
    let mut f = Fixture::new();
    f.controller.status = Status::DEVICE_END;
    f.step_with(CONNECTED, BusByte::ZERO);
    f.step(CONNECTED | TagsOut::CMD_OUT, 0);
    f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::EndAccept);

    // The channel declines the status.
    f.step(CONNECTED | TagsOut::CMD_OUT, 0);
    assert_eq!(f.state(), ProtocolState::StatusWait);
    assert!(f.controller.is_stacked());
    let bus = f.step(TagsOut::OPR_OUT, 0);
    assert!(bus.tags_in.contains(TagsIn::REQ_IN));
    assert_eq!(f.controller.status(), Status::DEVICE_END);
}

#[test]
fn test_command_chaining() {
    let mut f = Fixture::new();
    f.device.input = VecDeque::from(vec![0x40]);
    f.issue(0x02);
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    f.step(CONNECTED, 0);
    f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::Data2);
    f.step(CONNECTED | TagsOut::SRV_OUT, 0);
    f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::EndStatus);
    f.step(CONNECTED, 0);
    assert_eq!(f.state(), ProtocolState::EndAccept);

    f.step(CONNECTED | TagsOut::SRV_OUT | TagsOut::SUP_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Command);
    assert!(f.controller.is_selected());

    f.step(CONNECTED | TagsOut::SUP_OUT | TagsOut::CMD_OUT, Command::NOP.0);
    assert_eq!(f.state(), ProtocolState::Status);
    assert_eq!(f.device.commands, vec![Command(0x02), Command::NOP]);
}

#[test]
fn test_chaining_after_immediate_command() {
    let mut f = Fixture::new();
    f.issue(Command::NOP.0);
    f.step(CONNECTED | TagsOut::SRV_OUT | TagsOut::SUP_OUT, 0);
    assert_eq!(f.state(), ProtocolState::Command);
}

#[test]
fn test_other_unit_on_interface_passes_select_out() {
    let mut f = Fixture::new();
    f.controller.status = Status::DEVICE_END;
    let mut bus = Bus {
        tags_out: CONNECTED,
        ..Bus::default()
    };
    bus.clear_inbound();
    bus.tags_in |= TagsIn::OPR_IN;
    let mut services = Services {
        scheduler: &mut f.scheduler,
        output: &mut f.output,
    };
    let passed = f
        .controller
        .cycle(&mut f.device, &mut services, &mut bus, true, false);
    assert!(passed);
    assert_eq!(f.controller.state(), ProtocolState::Idle);
}

#[test]
fn test_unit_above_a_connected_unit_does_not_answer_select_out() {
    let mut f = Fixture::new();
    f.controller.status = Status::DEVICE_END;
    f.other_connected = true;
    let (bus, passed) = f.step_with(CONNECTED, BusByte::ZERO);
    assert!(passed);
    assert_eq!(f.state(), ProtocolState::Idle);
    assert!(!f.controller.is_selected());
    assert!(!bus.tags_in.contains(TagsIn::OPR_IN));
    // It keeps asking for service instead.
    assert!(bus.tags_in.contains(TagsIn::REQ_IN));

    // Once the interface is free, the next poll reaches it.
    f.other_connected = false;
    f.step(TagsOut::OPR_OUT, 0);
    let (_, passed) = f.step_with(CONNECTED, BusByte::ZERO);
    assert!(!passed);
    assert_eq!(f.state(), ProtocolState::EndStatus);
}
