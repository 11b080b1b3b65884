//! Simulation of the System/360 channel interface ("bus and tag").
//!
//! The library contains the control-unit protocol state machine
//! ([`protocol`]), the discrete-event scheduler which paces the
//! devices ([`scheduler`]), a couple of unit-record devices
//! ([`io`]), and a selector channel ([`channel`]) to drive them.
//! [`Machine`] ties these together.
//!
//! Nothing here runs in real time.  Time is counted in scheduler
//! ticks and one tick passes per interface cycle.
mod context;
mod event;

pub mod channel;
pub mod device;
pub mod io;
pub mod machine;
pub mod protocol;
pub mod scheduler;

pub use channel::{Ccw, ChannelError, ChannelEvent, ConditionCode, SelectorChannel, StatusKind};
pub use context::DeviceContext;
pub use device::{CommandEffect, Device, DeviceFlags, DeviceTimer};
pub use event::{InputEvent, InputEventError, OutputEvent};
pub use io::{
    AttachError, CardReader, CardReaderTiming, Console, ConsoleTiming, DeviceManager,
    UnitSnapshot, CARD_COLUMNS,
};
pub use machine::Machine;
pub use protocol::{Controller, ProtocolState};
pub use scheduler::{
    EventId, ScheduleFailure, ScheduledEvent, Scheduler, SchedulerConfig, Scheduling, Tick, UnitId,
};
