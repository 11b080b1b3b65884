//! A channel, its interface, and the units attached to it.
use base::prelude::*;
use tracing::{event, Level};

use crate::channel::{Ccw, ChannelError, ChannelEvent, SelectorChannel};
use crate::event::{InputEvent, InputEventError, OutputEvent};
use crate::io::DeviceManager;
use crate::scheduler::Tick;

#[derive(Debug)]
pub struct Machine {
    bus: Bus,
    channel: SelectorChannel,
    devices: DeviceManager,
}

impl Machine {
    pub fn new(devices: DeviceManager) -> Machine {
        Machine {
            bus: Bus::default(),
            channel: SelectorChannel::new(),
            devices,
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn channel(&self) -> &SelectorChannel {
        &self.channel
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut DeviceManager {
        &mut self.devices
    }

    #[must_use]
    pub fn now(&self) -> Tick {
        self.devices.now()
    }

    /// One cycle: the channel sets the outbound lines from what the
    /// units drove last cycle, then the units respond.
    pub fn cycle(&mut self) {
        self.channel.step(&mut self.bus);
        self.devices.cycle(&mut self.bus);
    }

    /// # Errors
    ///
    /// See [`SelectorChannel::start_io`].
    pub fn start_io(&mut self, address: u8, program: Vec<Ccw>) -> Result<(), ChannelError> {
        self.channel.start_io(address, program)
    }

    pub fn halt_io(&mut self) {
        self.channel.halt_io();
    }

    pub fn system_reset(&mut self) {
        self.channel.system_reset();
    }

    /// # Errors
    ///
    /// See [`DeviceManager::on_input_event`].
    pub fn on_input_event(&mut self, address: u8, input: InputEvent) -> Result<(), InputEventError> {
        self.devices.on_input_event(address, input)
    }

    /// True when the channel has nothing to do and every unit is at
    /// rest with no status to present.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.channel.is_idle()
            && self.devices.is_quiescent()
            && !self.bus.tags_in.intersects(TagsIn::OPR_IN | TagsIn::REQ_IN)
    }

    /// Runs until [`Machine::is_idle`], returning the number of cycles
    /// this took.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Timeout`] if the machine is still busy after
    /// `max_cycles` cycles.
    pub fn run_until_idle(&mut self, max_cycles: u64) -> Result<u64, ChannelError> {
        for n in 1..=max_cycles {
            self.cycle();
            if self.is_idle() {
                event!(Level::DEBUG, "idle after {n} cycles");
                return Ok(n);
            }
        }
        event!(
            Level::WARN,
            "still busy after {max_cycles} cycles; units: {:?}",
            self.devices.statuses()
        );
        Err(ChannelError::Timeout { cycles: max_cycles })
    }

    pub fn take_channel_events(&mut self) -> Vec<ChannelEvent> {
        self.channel.take_events()
    }

    pub fn drain_output(&mut self) -> Vec<OutputEvent> {
        self.devices.drain_output()
    }
}
