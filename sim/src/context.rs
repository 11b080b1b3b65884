//! This module manages the context in which a device performs a
//! single operation.
//!
//! A device is handed a [`DeviceContext`] whenever the protocol state
//! machine or the scheduler calls into it.  The context gives the
//! device access to its own latches (the [`DeviceFlags`] which the
//! state machine polls), to the scheduler (but only on its own
//! behalf), and to the output event sink.  It gives no
//! access to the interface tags: only the protocol state machine
//! drives the bus.
use tracing::{event, Level};

use crate::device::{DeviceFlags, DeviceTimer};
use crate::event::OutputEvent;
use crate::scheduler::{ScheduleFailure, Scheduler, Scheduling, Tick, UnitId};

pub struct DeviceContext<'a> {
    unit: UnitId,
    address: u8,
    pub flags: &'a mut DeviceFlags,
    scheduler: &'a mut Scheduler<DeviceTimer>,
    output: &'a mut Vec<OutputEvent>,
}

impl<'a> DeviceContext<'a> {
    pub(crate) fn new(
        unit: UnitId,
        address: u8,
        flags: &'a mut DeviceFlags,
        scheduler: &'a mut Scheduler<DeviceTimer>,
        output: &'a mut Vec<OutputEvent>,
    ) -> DeviceContext<'a> {
        DeviceContext {
            unit,
            address,
            flags,
            scheduler,
            output,
        }
    }

    #[must_use]
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// The channel address of the unit.
    #[must_use]
    pub fn address(&self) -> u8 {
        self.address
    }

    #[must_use]
    pub fn now(&self) -> Tick {
        self.scheduler.now()
    }

    pub fn schedule(
        &mut self,
        timer: DeviceTimer,
        delay: Tick,
        arg: i64,
    ) -> Result<Scheduling<DeviceTimer>, ScheduleFailure> {
        self.scheduler.schedule(self.unit, timer, delay, arg)
    }

    /// Cancels this unit's earliest pending `timer`.  Returns true if
    /// there was one.
    pub fn cancel(&mut self, timer: DeviceTimer) -> bool {
        self.scheduler
            .cancel_matching(self.unit, &timer)
            .is_some()
    }

    /// Cancels everything this unit has scheduled.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.scheduler.cancel_owner(self.unit);
        if n > 0 {
            event!(Level::DEBUG, "cancelled {n} pending event(s) for {}", self.unit);
        }
        n
    }

    pub fn emit(&mut self, output: OutputEvent) {
        self.output.push(output);
    }
}
