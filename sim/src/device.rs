//! The Device Command Layer.
//!
//! Each kind of peripheral implements [`Device`].  The protocol state
//! machine calls [`Device::decode_command`] exactly once for each
//! command it accepts, and afterwards watches the [`DeviceFlags`]
//! latches to find out when data is ready and when the operation is
//! over.  A device paces itself by scheduling [`DeviceTimer`] events;
//! when they fire, [`Device::on_event`] is called and the device
//! updates its latches.
//!
//! A device never touches the interface tags.  The state machine is
//! the only thing which drives the bus.
use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use crate::context::DeviceContext;
use crate::event::{InputEvent, InputEventError};
use crate::scheduler::{ScheduledEvent, Scheduling, Tick};

/// Latches shared between a device and its protocol state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceFlags {
    /// An operation is in progress; device end has not yet been
    /// posted.
    pub busy: bool,
    /// For input, `data` holds a byte for the channel.  For output,
    /// the device is ready to receive a byte.
    pub data_ready: bool,
    /// No more data will be transferred for the current command.
    pub data_end: bool,
    /// The device has finished the operation (device end).
    pub cmd_done: bool,
    /// Status bits the device wants included in its ending status
    /// (unit check, unit exception).
    pub status: Status,
    pub sense: Sense,
    /// The byte being transferred to the channel.
    pub data: u8,
}

/// What accepting a command meant for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandEffect {
    /// The command finished during initial selection; channel end
    /// and device end go in the initial status.
    Immediate,
    /// Data transfer follows.  The initial status is zero.
    Transfer(Direction),
    /// Channel end now, device end later (for example a mechanical
    /// motion which needs no data).
    ChannelEnd,
    /// The device does not implement the command.
    Reject,
}

/// The kinds of timed event a device may ask the scheduler for.  The
/// meaning of each (and of the event's argument) belongs to the
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceTimer {
    /// A mechanical motion (card feed, carriage return) has finished.
    Mechanical,
    /// The mechanism is ready for the next byte.
    DataService,
    /// The operation is over; post device end.
    DeviceEnd,
}

pub trait Device {
    fn name(&self) -> String;

    /// Begin executing `command`.  Called exactly once per accepted
    /// command, with `busy`, `data_ready`, `data_end`, `cmd_done` and
    /// `status` all clear.
    fn decode_command(&mut self, ctx: &mut DeviceContext<'_>, command: Command) -> CommandEffect;

    /// A timer which this device scheduled has fired.
    fn on_event(&mut self, ctx: &mut DeviceContext<'_>, event: ScheduledEvent<DeviceTimer>);

    /// The channel has taken `ctx.flags.data` (input operations).
    fn take_byte(&mut self, ctx: &mut DeviceContext<'_>);

    /// The channel has sent a byte (output operations).
    fn put_byte(&mut self, ctx: &mut DeviceContext<'_>, byte: u8);

    /// Stop the current operation as soon as possible.  The device
    /// must still post `cmd_done` once its mechanism has come to
    /// rest.
    fn halt(&mut self, ctx: &mut DeviceContext<'_>);

    /// System reset.  Pending timers have already been cancelled.
    fn reset(&mut self, ctx: &mut DeviceContext<'_>);

    /// A byte sent by the channel failed its parity check.  Sense and
    /// unit check have already been set.  By default the operation is
    /// abandoned.
    fn on_bus_check(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.flags.data_end = true;
        self.halt(ctx);
    }

    fn on_input_event(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        _event: InputEvent,
    ) -> Result<(), InputEventError> {
        Err(InputEventError::InputEventNotValidForDevice)
    }

    /// Human-readable description of the device's state, for a front
    /// panel.
    fn text_info(&self) -> String {
        String::new()
    }

    /// Schedules `timer` to fire after `delay` ticks, replacing any
    /// pending timer of the same kind.
    ///
    /// A zero delay runs [`Device::on_event`] straight away.  If the
    /// scheduler cannot take the event, the operation is ended with an
    /// equipment check so that the unit does not wait forever for a
    /// completion which will never come.
    fn start_timer(&mut self, ctx: &mut DeviceContext<'_>, timer: DeviceTimer, delay: Tick, arg: i64) {
        ctx.cancel(timer);
        match ctx.schedule(timer, delay, arg) {
            Ok(Scheduling::Immediate(ev)) => self.on_event(ctx, ev),
            Ok(Scheduling::Pending(_)) => (),
            Err(e) => {
                event!(
                    Level::ERROR,
                    "{}: could not schedule {timer:?}: {e}; abandoning the operation",
                    self.name()
                );
                ctx.flags.sense |= Sense::EQUIPMENT_CHECK;
                ctx.flags.status |= Status::UNIT_CHECK;
                ctx.flags.data_ready = false;
                ctx.flags.data_end = true;
                ctx.flags.cmd_done = true;
            }
        }
    }
}

/// A sense operation common to the unit-record devices: one byte of
/// sense data, then the operation is over.
pub(crate) fn begin_sense(ctx: &mut DeviceContext<'_>) -> CommandEffect {
    ctx.flags.data = ctx.flags.sense.bits();
    ctx.flags.data_ready = true;
    CommandEffect::Transfer(Direction::Input)
}

pub(crate) fn finish_sense(ctx: &mut DeviceContext<'_>) {
    ctx.flags.data_ready = false;
    ctx.flags.data_end = true;
    ctx.flags.cmd_done = true;
}
