//! Operator's console typewriter, after the 1052.
//!
//! The console prints what the channel writes to it, and when asked
//! to read ("read inquiry") it waits for the operator to type a line,
//! which it echoes on the printer as it sends it to the channel.
//!
//! Commands:
//!
//! | Code | Meaning                                          |
//! | ---- | ------------------------------------------------ |
//! | 01   | Write, then return the carriage                  |
//! | 09   | Write, leaving the carriage where it is           |
//! | 0A   | Read inquiry                                     |
//! | 03   | No-operation                                     |
//! | 0B   | Sound the audible alarm                          |
//! | 04   | Sense                                            |
//!
//! Printing and typing are much slower than the channel, so every
//! byte is paced by a timer.
use std::collections::VecDeque;

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use crate::context::DeviceContext;
use crate::device::{begin_sense, finish_sense, CommandEffect, Device, DeviceTimer};
use crate::event::{InputEvent, InputEventError, OutputEvent};
use crate::scheduler::{ScheduledEvent, Tick};

const WRITE_AUTO_CR: u8 = 0x01;
const WRITE_NO_CR: u8 = 0x09;
const READ_INQUIRY: u8 = 0x0A;
const ALARM: u8 = 0x0B;

/// How long the console's mechanisms take, in scheduler ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsoleTiming {
    /// Printing one character.
    pub print_ticks: Tick,
    /// The operator typing one character.
    pub key_ticks: Tick,
    /// Sounding the alarm.
    pub alarm_ticks: Tick,
    pub carriage_return_ticks: Tick,
}

impl Default for ConsoleTiming {
    fn default() -> ConsoleTiming {
        ConsoleTiming {
            print_ticks: 10,
            key_ticks: 5,
            alarm_ticks: 50,
            carriage_return_ticks: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Idle,
    Write { carriage_return: bool },
    /// Waiting for (or delivering) a line from the keyboard.
    Read { typing: bool },
    Alarm,
    Sense,
    /// Returning the carriage at the end of a write.
    CarriageReturn,
}

#[derive(Debug)]
pub struct Console {
    timing: ConsoleTiming,
    operation: Operation,
    /// Lines the operator has typed ahead.
    keyboard: VecDeque<Vec<u8>>,
    /// The rest of the line currently being read.
    line: VecDeque<u8>,
    column: usize,
    printed: u64,
}

impl Console {
    pub fn new(timing: ConsoleTiming) -> Console {
        Console {
            timing,
            operation: Operation::Idle,
            keyboard: VecDeque::new(),
            line: VecDeque::new(),
            column: 0,
            printed: 0,
        }
    }

    fn print(&mut self, ctx: &mut DeviceContext<'_>, byte: u8) {
        let address = ctx.address();
        ctx.emit(OutputEvent::ConsolePrint { address, byte });
        self.printed += 1;
        if byte == b'\n' {
            self.column = 0;
        } else {
            self.column += 1;
        }
    }

    /// Starts sending the next typed-ahead line, if there is one.
    fn start_typing(&mut self, ctx: &mut DeviceContext<'_>) {
        if let Some(line) = self.keyboard.pop_front() {
            event!(
                Level::DEBUG,
                "console: operator types a line of {} characters",
                line.len()
            );
            self.line = line.into();
            self.operation = Operation::Read { typing: true };
            self.start_timer(ctx, DeviceTimer::DataService, self.timing.key_ticks, 0);
        }
    }

    fn end_write(&mut self, ctx: &mut DeviceContext<'_>, carriage_return: bool) {
        ctx.cancel(DeviceTimer::DataService);
        ctx.flags.data_ready = false;
        if carriage_return {
            self.operation = Operation::CarriageReturn;
            self.start_timer(
                ctx,
                DeviceTimer::Mechanical,
                self.timing.carriage_return_ticks,
                0,
            );
        } else {
            self.operation = Operation::Idle;
            ctx.flags.cmd_done = true;
        }
    }

    fn end_read(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.cancel(DeviceTimer::DataService);
        self.line.clear();
        self.operation = Operation::Idle;
        ctx.flags.data_ready = false;
        ctx.flags.data_end = true;
        ctx.flags.cmd_done = true;
    }
}

impl Device for Console {
    fn name(&self) -> String {
        "console".to_string()
    }

    fn decode_command(&mut self, ctx: &mut DeviceContext<'_>, command: Command) -> CommandEffect {
        match command.0 {
            WRITE_AUTO_CR | WRITE_NO_CR => {
                self.operation = Operation::Write {
                    carriage_return: command.0 == WRITE_AUTO_CR,
                };
                ctx.flags.data_ready = true;
                CommandEffect::Transfer(Direction::Output)
            }
            READ_INQUIRY => {
                self.operation = Operation::Read { typing: false };
                self.start_typing(ctx);
                CommandEffect::Transfer(Direction::Input)
            }
            ALARM => {
                self.operation = Operation::Alarm;
                let address = ctx.address();
                ctx.emit(OutputEvent::ConsoleAlarm { address });
                self.start_timer(ctx, DeviceTimer::DeviceEnd, self.timing.alarm_ticks, 0);
                CommandEffect::ChannelEnd
            }
            _ if command == Command::NOP => CommandEffect::Immediate,
            _ if command == Command::SENSE => {
                self.operation = Operation::Sense;
                begin_sense(ctx)
            }
            _ => {
                event!(Level::DEBUG, "console: rejecting command {}", command);
                CommandEffect::Reject
            }
        }
    }

    fn on_event(&mut self, ctx: &mut DeviceContext<'_>, ev: ScheduledEvent<DeviceTimer>) {
        match (self.operation, ev.action) {
            (Operation::Write { .. }, DeviceTimer::DataService) => {
                // The print mechanism is ready for another character.
                ctx.flags.data_ready = true;
            }
            (Operation::Read { typing: true }, DeviceTimer::DataService) => {
                match self.line.pop_front() {
                    Some(byte) => {
                        self.print(ctx, byte);
                        ctx.flags.data = byte;
                        ctx.flags.data_ready = true;
                    }
                    None => self.end_read(ctx),
                }
            }
            (Operation::CarriageReturn, DeviceTimer::Mechanical) => {
                self.print(ctx, b'\n');
                self.operation = Operation::Idle;
                ctx.flags.cmd_done = true;
            }
            (Operation::Alarm, DeviceTimer::DeviceEnd) => {
                self.operation = Operation::Idle;
                ctx.flags.cmd_done = true;
            }
            (operation, action) => {
                event!(
                    Level::WARN,
                    "console: ignoring {:?} timer while {:?}",
                    action,
                    operation
                );
            }
        }
    }

    fn take_byte(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.flags.data_ready = false;
        match self.operation {
            Operation::Sense => {
                self.operation = Operation::Idle;
                finish_sense(ctx);
            }
            Operation::Read { typing: true } => {
                if self.line.is_empty() {
                    // That was the last character; the operator
                    // presses "end of message".
                    self.end_read(ctx);
                } else {
                    self.start_timer(ctx, DeviceTimer::DataService, self.timing.key_ticks, 0);
                }
            }
            operation => {
                event!(
                    Level::WARN,
                    "console: channel took a byte while {:?}",
                    operation
                );
            }
        }
    }

    fn put_byte(&mut self, ctx: &mut DeviceContext<'_>, byte: u8) {
        ctx.flags.data_ready = false;
        self.print(ctx, byte);
        self.start_timer(ctx, DeviceTimer::DataService, self.timing.print_ticks, 0);
    }

    fn halt(&mut self, ctx: &mut DeviceContext<'_>) {
        match self.operation {
            Operation::Write { carriage_return } => self.end_write(ctx, carriage_return),
            Operation::Read { .. } => self.end_read(ctx),
            Operation::Sense => {
                self.operation = Operation::Idle;
                finish_sense(ctx);
            }
            // These finish by themselves.
            Operation::Alarm | Operation::CarriageReturn => (),
            Operation::Idle => {
                ctx.flags.cmd_done = true;
            }
        }
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {
        self.operation = Operation::Idle;
        self.line.clear();
    }

    fn on_input_event(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        input: InputEvent,
    ) -> Result<(), InputEventError> {
        match input {
            InputEvent::ConsoleKeyboard { data } => {
                self.keyboard.push_back(data);
                if self.operation == (Operation::Read { typing: false }) {
                    self.start_typing(ctx);
                }
                Ok(())
            }
            _ => Err(InputEventError::InputEventNotValidForDevice),
        }
    }

    fn text_info(&self) -> String {
        format!(
            "{:?}, column {}, {} characters printed, {} lines typed ahead",
            self.operation,
            self.column,
            self.printed,
            self.keyboard.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceFlags;
    use crate::scheduler::{Scheduler, UnitId};

    struct Bench {
        console: Console,
        flags: DeviceFlags,
        scheduler: Scheduler<DeviceTimer>,
        output: Vec<OutputEvent>,
    }

    impl Bench {
        fn new() -> Bench {
            Bench {
                console: Console::new(ConsoleTiming::default()),
                flags: DeviceFlags::default(),
                scheduler: Scheduler::default(),
                output: Vec::new(),
            }
        }

        fn with<R>(&mut self, f: impl FnOnce(&mut Console, &mut DeviceContext<'_>) -> R) -> R {
            let mut ctx = DeviceContext::new(
                UnitId(0),
                0x1F,
                &mut self.flags,
                &mut self.scheduler,
                &mut self.output,
            );
            f(&mut self.console, &mut ctx)
        }

        /// Lets simulated time pass, delivering timer events.
        fn run(&mut self, ticks: Tick) {
            for _ in 0..ticks {
                for ev in self.scheduler.advance_one_tick() {
                    self.with(|console, ctx| console.on_event(ctx, ev));
                }
            }
        }

        fn printed(&self) -> Vec<u8> {
            self.output
                .iter()
                .filter_map(|out| match out {
                    OutputEvent::ConsolePrint { byte, .. } => Some(*byte),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn test_write_with_carriage_return() {
        let mut b = Bench::new();
        let effect = b.with(|c, ctx| c.decode_command(ctx, Command(WRITE_AUTO_CR)));
        assert_eq!(effect, CommandEffect::Transfer(Direction::Output));
        assert!(b.flags.data_ready);

        b.with(|c, ctx| c.put_byte(ctx, b'H'));
        assert!(!b.flags.data_ready);
        b.run(ConsoleTiming::default().print_ticks);
        assert!(b.flags.data_ready);
        b.with(|c, ctx| c.put_byte(ctx, b'I'));

        // The channel's count runs out.
        b.with(|c, ctx| c.halt(ctx));
        assert!(!b.flags.cmd_done);
        assert!(!b.flags.data_ready);
        b.run(ConsoleTiming::default().carriage_return_ticks);
        assert!(b.flags.cmd_done);
        assert_eq!(b.printed(), b"HI\n".to_vec());
        assert!(b.scheduler.is_empty());
    }

    #[test]
    fn test_print_delay_too_long_to_schedule_is_equipment_check() {
        let mut b = Bench::new();
        b.console = Console::new(ConsoleTiming {
            print_ticks: Tick::MAX,
            ..ConsoleTiming::default()
        });
        b.run(1);
        b.with(|c, ctx| c.decode_command(ctx, Command(WRITE_NO_CR)));
        b.with(|c, ctx| c.put_byte(ctx, b'X'));
        assert!(b.flags.sense.contains(Sense::EQUIPMENT_CHECK));
        assert!(b.flags.status.contains(Status::UNIT_CHECK));
        assert!(b.flags.data_end);
        assert!(b.flags.cmd_done);
        assert!(!b.flags.data_ready);
        assert!(b.scheduler.is_empty());
    }

    #[test]
    fn test_write_without_carriage_return_ends_at_once() {
        let mut b = Bench::new();
        b.with(|c, ctx| c.decode_command(ctx, Command(WRITE_NO_CR)));
        b.with(|c, ctx| c.put_byte(ctx, b'X'));
        b.with(|c, ctx| c.halt(ctx));
        assert!(b.flags.cmd_done);
        assert_eq!(b.printed(), b"X".to_vec());
    }

    #[test]
    fn test_read_inquiry_waits_for_operator() {
        let mut b = Bench::new();
        let effect = b.with(|c, ctx| c.decode_command(ctx, Command(READ_INQUIRY)));
        assert_eq!(effect, CommandEffect::Transfer(Direction::Input));
        b.run(100);
        assert!(!b.flags.data_ready);

        b.with(|c, ctx| {
            c.on_input_event(
                ctx,
                InputEvent::ConsoleKeyboard {
                    data: b"GO".to_vec(),
                },
            )
        })
        .expect("keyboard input should be accepted");
        let mut received = Vec::new();
        for _ in 0..100 {
            b.run(1);
            if b.flags.data_ready {
                received.push(b.flags.data);
                b.with(|c, ctx| c.take_byte(ctx));
            }
            if b.flags.cmd_done {
                break;
            }
        }
        assert_eq!(received, b"GO".to_vec());
        assert!(b.flags.data_end);
        assert!(b.flags.cmd_done);
        // Typed characters are echoed.
        assert_eq!(b.printed(), b"GO".to_vec());
    }

    #[test]
    fn test_alarm() {
        let mut b = Bench::new();
        let effect = b.with(|c, ctx| c.decode_command(ctx, Command(ALARM)));
        assert_eq!(effect, CommandEffect::ChannelEnd);
        assert_eq!(b.output, vec![OutputEvent::ConsoleAlarm { address: 0x1F }]);
        b.run(ConsoleTiming::default().alarm_ticks - 1);
        assert!(!b.flags.cmd_done);
        b.run(1);
        assert!(b.flags.cmd_done);
    }

    #[test]
    fn test_sense_and_reject() {
        let mut b = Bench::new();
        assert_eq!(
            b.with(|c, ctx| c.decode_command(ctx, Command(0x02))),
            CommandEffect::Reject
        );
        b.flags.sense = Sense::COMMAND_REJECT;
        assert_eq!(
            b.with(|c, ctx| c.decode_command(ctx, Command::SENSE)),
            CommandEffect::Transfer(Direction::Input)
        );
        assert_eq!(b.flags.data, Sense::COMMAND_REJECT.bits());
        assert!(b.flags.data_ready);
        b.with(|c, ctx| c.take_byte(ctx));
        assert!(b.flags.data_end);
        assert!(b.flags.cmd_done);
    }

    #[test]
    fn test_cards_are_not_for_the_console() {
        let mut b = Bench::new();
        assert_eq!(
            b.with(|c, ctx| c.on_input_event(ctx, InputEvent::LoadCards { cards: vec![] })),
            Err(InputEventError::InputEventNotValidForDevice)
        );
    }
}
