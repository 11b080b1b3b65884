//! Attached units and the bus scan.
//!
//! Units are wired to the interface in the order in which they are
//! attached.  Select-out passes down that chain: each unit either
//! answers it or passes it on, so a unit earlier in the chain has
//! priority over units after it.  When select-out reaches the end of
//! the chain without any unit answering, it comes back to the channel
//! as select-in.
//!
//! Once per cycle the device manager first lets the scheduler deliver
//! any timer events which are now due (so that devices can update
//! their latches), and then runs one protocol cycle for each unit, in
//! chain order.  The inbound tags are rebuilt from scratch on every
//! cycle; a tag is up exactly when some unit drives it.
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};

use serde::Serialize;
use tracing::{event, span, Level};

use base::prelude::*;

use crate::device::{Device, DeviceTimer};
use crate::event::{InputEvent, InputEventError, OutputEvent};
use crate::protocol::{Controller, ProtocolState, Services};
use crate::scheduler::{Scheduler, SchedulerConfig, Tick, UnitId};

mod dev_card_reader;
mod dev_console;

pub use dev_card_reader::{CardReader, CardReaderTiming, CARD_COLUMNS};
pub use dev_console::{Console, ConsoleTiming};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// Some already-attached unit would also respond to the new
    /// unit's address.
    AddressInUse { address: u8, existing: u8 },
}

impl Display for AttachError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            AttachError::AddressInUse { address, existing } => write!(
                f,
                "cannot attach a unit at address {address:02X}, it conflicts with the unit at {existing:02X}"
            ),
        }
    }
}

impl Error for AttachError {}

/// A snapshot of one unit, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitSnapshot {
    pub address: u8,
    pub name: String,
    pub state: ProtocolState,
    pub selected: bool,
    pub request: bool,
    pub stacked: bool,
    pub busy: bool,
    pub status: Status,
    pub sense: Sense,
    pub text_info: String,
}

pub struct AttachedUnit {
    controller: Controller,
    device: Box<dyn Device>,
}

impl AttachedUnit {
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn name(&self) -> String {
        self.device.name()
    }

    fn snapshot(&self) -> UnitSnapshot {
        let flags = self.controller.flags();
        UnitSnapshot {
            address: self.controller.address(),
            name: self.device.name(),
            state: self.controller.state(),
            selected: self.controller.is_selected(),
            request: self.controller.is_requesting(),
            stacked: self.controller.is_stacked(),
            busy: flags.busy,
            status: self.controller.status(),
            sense: flags.sense,
            text_info: self.device.text_info(),
        }
    }
}

impl Debug for AttachedUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("AttachedUnit")
            .field("controller", &self.controller)
            .field("device", &self.device.name())
            .finish()
    }
}

/// Manages the collection of units attached to one channel
/// interface, along with the scheduler which paces them.
#[derive(Debug)]
pub struct DeviceManager {
    units: Vec<AttachedUnit>,
    scheduler: Scheduler<DeviceTimer>,
    output: Vec<OutputEvent>,
}

impl DeviceManager {
    pub fn new(config: SchedulerConfig) -> DeviceManager {
        DeviceManager {
            units: Vec::new(),
            scheduler: Scheduler::new(config),
            output: Vec::new(),
        }
    }

    /// Adds a unit to the end of the select-out chain.  The unit
    /// responds to any address `a` for which `a & mask == address & mask`.
    ///
    /// # Errors
    ///
    /// [`AttachError::AddressInUse`] if some address would select both
    /// the new unit and one which is already attached.
    pub fn attach(
        &mut self,
        address: u8,
        mask: u8,
        device: Box<dyn Device>,
    ) -> Result<UnitId, AttachError> {
        for existing in self.units.iter() {
            let c = &existing.controller;
            let common = mask & c.mask();
            if address & common == c.address() & common {
                return Err(AttachError::AddressInUse {
                    address,
                    existing: c.address(),
                });
            }
        }
        let unit = UnitId(self.units.len());
        event!(
            Level::INFO,
            "attached {} at address {:02X} (mask {:02X}) as {}",
            device.name(),
            address,
            mask,
            unit
        );
        self.units.push(AttachedUnit {
            controller: Controller::new(unit, address, mask),
            device,
        });
        Ok(unit)
    }

    #[must_use]
    pub fn now(&self) -> Tick {
        self.scheduler.now()
    }

    pub fn get(&self, unit: UnitId) -> Option<&AttachedUnit> {
        self.units.get(unit.0)
    }

    pub fn controller(&self, unit: UnitId) -> Option<&Controller> {
        self.get(unit).map(|attached| &attached.controller)
    }

    /// Finds the unit which responds to `address`.
    pub fn find(&self, address: u8) -> Option<UnitId> {
        self.units
            .iter()
            .find(|attached| attached.controller.responds_to(address))
            .map(|attached| attached.controller.unit())
    }

    /// True when no unit is doing anything or waiting to present
    /// status, and no timer is pending.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.scheduler.is_empty()
            && self
                .units
                .iter()
                .all(|attached| attached.controller.is_quiescent())
    }

    /// Runs one cycle: deliver the timer events which are due, then
    /// let each unit respond to the outbound tags.
    pub fn cycle(&mut self, bus: &mut Bus) {
        for ev in self.scheduler.advance_one_tick() {
            let owner = ev.owner;
            let Some(attached) = self.units.get_mut(owner.0) else {
                event!(
                    Level::ERROR,
                    "event {:?} is for {} which is not attached; ignoring it",
                    ev.action,
                    owner
                );
                continue;
            };
            let span = span!(Level::ERROR, "timer", unit=%owner);
            let _enter = span.enter();
            event!(Level::TRACE, "{:?} (arg {}) is due", ev.action, ev.arg);
            let mut services = Services {
                scheduler: &mut self.scheduler,
                output: &mut self.output,
            };
            let device = attached.device.as_mut();
            attached
                .controller
                .with_device_context(&mut services, |ctx| device.on_event(ctx, ev));
        }

        bus.clear_inbound();
        let mut select_out = bus.tags_out.contains(TagsOut::SEL_OUT);
        let mut services = Services {
            scheduler: &mut self.scheduler,
            output: &mut self.output,
        };
        let connected = self
            .units
            .iter()
            .position(|attached| attached.controller.is_selected());
        for (index, attached) in self.units.iter_mut().enumerate() {
            let span = span!(
                Level::ERROR,
                "cycle",
                address = attached.controller.address()
            );
            let _enter = span.enter();
            select_out = attached.controller.cycle(
                attached.device.as_mut(),
                &mut services,
                bus,
                select_out,
                connected.is_some_and(|unit| unit != index),
            );
        }
        if select_out {
            bus.tags_in |= TagsIn::SEL_IN;
        }
    }

    /// Delivers operator input (cards, keystrokes) to the unit at
    /// `address`.
    ///
    /// # Errors
    ///
    /// [`InputEventError::InputOnUnattachedUnit`] if there is no such
    /// unit, or whatever the device itself reports.
    pub fn on_input_event(&mut self, address: u8, input: InputEvent) -> Result<(), InputEventError> {
        let Some(unit) = self.find(address) else {
            return Err(InputEventError::InputOnUnattachedUnit(address));
        };
        let attached = &mut self.units[unit.0];
        let mut services = Services {
            scheduler: &mut self.scheduler,
            output: &mut self.output,
        };
        let device = attached.device.as_mut();
        attached
            .controller
            .with_device_context(&mut services, |ctx| device.on_input_event(ctx, input))
    }

    /// Removes and returns the output produced since the last call.
    pub fn drain_output(&mut self) -> Vec<OutputEvent> {
        std::mem::take(&mut self.output)
    }

    pub fn statuses(&self) -> Vec<UnitSnapshot> {
        self.units.iter().map(AttachedUnit::snapshot).collect()
    }
}

impl Default for DeviceManager {
    fn default() -> DeviceManager {
        Self::new(SchedulerConfig::default())
    }
}
