//! Card reader, after the reading side of the 2540.
//!
//! Cards are loaded into the hopper by the operator (as an
//! [`InputEvent::LoadCards`]).  A read command feeds one card past
//! the read station and sends its 80 columns to the channel, one byte
//! per column, then drops the card into the stacker.  Column data is
//! not translated; each column is simply a byte.
//!
//! If the channel wants fewer than 80 bytes it stops the transfer
//! early, and the rest of the card is skipped.  Reading the last card
//! in the hopper gives unit exception in the ending status, which is
//! how a program finds the end of the deck.  Reading from an empty
//! hopper is rejected with unit check, sense "intervention required".
use std::collections::VecDeque;

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use crate::context::DeviceContext;
use crate::device::{begin_sense, finish_sense, CommandEffect, Device, DeviceTimer};
use crate::event::{InputEvent, InputEventError, OutputEvent};
use crate::scheduler::{ScheduledEvent, Tick};

pub const CARD_COLUMNS: usize = 80;

/// The number of cards the hopper holds.
pub const HOPPER_CAPACITY: usize = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CardReaderTiming {
    /// Moving a card from the hopper to the read station.
    pub feed_ticks: Tick,
    /// The interval between successive columns.
    pub byte_ticks: Tick,
}

impl Default for CardReaderTiming {
    fn default() -> CardReaderTiming {
        CardReaderTiming {
            feed_ticks: 200,
            byte_ticks: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Idle,
    Read,
    Feed,
    Sense,
}

#[derive(Debug)]
pub struct CardReader {
    timing: CardReaderTiming,
    operation: Operation,
    hopper: VecDeque<Vec<u8>>,
    /// The card in the transport, if any.
    card: Option<Vec<u8>>,
    column: usize,
    cards_read: u64,
}

fn pad_card(card: Vec<u8>) -> Vec<u8> {
    let mut card = card;
    card.resize(CARD_COLUMNS, b' ');
    card
}

impl CardReader {
    pub fn new(timing: CardReaderTiming) -> CardReader {
        CardReader {
            timing,
            operation: Operation::Idle,
            hopper: VecDeque::new(),
            card: None,
            column: 0,
            cards_read: 0,
        }
    }

    #[must_use]
    pub fn hopper_len(&self) -> usize {
        self.hopper.len()
    }

    fn intervention_required(ctx: &mut DeviceContext<'_>) -> CommandEffect {
        event!(Level::INFO, "card reader: hopper is empty");
        ctx.flags.sense |= Sense::INTERVENTION_REQUIRED;
        ctx.flags.status |= Status::UNIT_CHECK;
        CommandEffect::Immediate
    }

    fn present_column(&mut self, ctx: &mut DeviceContext<'_>) {
        match self.card.as_ref().and_then(|card| card.get(self.column)) {
            Some(byte) => {
                ctx.flags.data = *byte;
                ctx.flags.data_ready = true;
            }
            None => self.stack_card(ctx),
        }
    }

    /// The card leaves the transport for the stacker, and the
    /// operation is over.
    fn stack_card(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.cancel(DeviceTimer::DataService);
        ctx.cancel(DeviceTimer::Mechanical);
        ctx.flags.data_ready = false;
        ctx.flags.data_end = true;
        ctx.flags.cmd_done = true;
        if let Some(card) = self.card.take() {
            let address = ctx.address();
            ctx.emit(OutputEvent::CardStacked { address, card });
        }
        if self.operation == Operation::Read {
            self.cards_read += 1;
            if self.hopper.is_empty() {
                event!(Level::DEBUG, "card reader: last card read");
                ctx.flags.status |= Status::UNIT_EXCEPTION;
            }
        }
        self.operation = Operation::Idle;
    }
}

impl Device for CardReader {
    fn name(&self) -> String {
        "card reader".to_string()
    }

    fn decode_command(&mut self, ctx: &mut DeviceContext<'_>, command: Command) -> CommandEffect {
        match command.kind() {
            CommandKind::Read => {
                let Some(card) = self.hopper.pop_front() else {
                    return CardReader::intervention_required(ctx);
                };
                self.card = Some(card);
                self.column = 0;
                self.operation = Operation::Read;
                self.start_timer(ctx, DeviceTimer::Mechanical, self.timing.feed_ticks, 0);
                CommandEffect::Transfer(Direction::Input)
            }
            CommandKind::Control if command.modifier() == 0 => CommandEffect::Immediate,
            CommandKind::Control => {
                let Some(card) = self.hopper.pop_front() else {
                    return CardReader::intervention_required(ctx);
                };
                self.card = Some(card);
                self.operation = Operation::Feed;
                self.start_timer(ctx, DeviceTimer::Mechanical, self.timing.feed_ticks, 0);
                CommandEffect::ChannelEnd
            }
            CommandKind::Sense => {
                self.operation = Operation::Sense;
                begin_sense(ctx)
            }
            _ => {
                event!(Level::DEBUG, "card reader: rejecting command {}", command);
                CommandEffect::Reject
            }
        }
    }

    fn on_event(&mut self, ctx: &mut DeviceContext<'_>, ev: ScheduledEvent<DeviceTimer>) {
        match (self.operation, ev.action) {
            (Operation::Read, DeviceTimer::Mechanical | DeviceTimer::DataService) => {
                self.present_column(ctx);
            }
            (Operation::Feed, DeviceTimer::Mechanical) => self.stack_card(ctx),
            (operation, action) => {
                event!(
                    Level::WARN,
                    "card reader: ignoring {:?} timer while {:?}",
                    action,
                    operation
                );
            }
        }
    }

    fn take_byte(&mut self, ctx: &mut DeviceContext<'_>) {
        ctx.flags.data_ready = false;
        match self.operation {
            Operation::Read => {
                self.column += 1;
                if self.column >= CARD_COLUMNS {
                    self.stack_card(ctx);
                } else {
                    self.start_timer(ctx, DeviceTimer::DataService, self.timing.byte_ticks, 0);
                }
            }
            Operation::Sense => {
                self.operation = Operation::Idle;
                finish_sense(ctx);
            }
            operation => {
                event!(
                    Level::WARN,
                    "card reader: channel took a byte while {:?}",
                    operation
                );
            }
        }
    }

    fn put_byte(&mut self, ctx: &mut DeviceContext<'_>, byte: u8) {
        // Not reachable for the commands this unit accepts.
        event!(
            Level::WARN,
            "card reader: ignoring output byte {:02X}",
            byte
        );
        ctx.flags.data_ready = false;
    }

    fn halt(&mut self, ctx: &mut DeviceContext<'_>) {
        match self.operation {
            Operation::Read => {
                event!(
                    Level::DEBUG,
                    "card reader: stopped at column {}",
                    self.column
                );
                self.stack_card(ctx);
            }
            // The card is already moving; it finishes by itself.
            Operation::Feed => (),
            Operation::Sense => {
                self.operation = Operation::Idle;
                finish_sense(ctx);
            }
            Operation::Idle => {
                ctx.flags.cmd_done = true;
            }
        }
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {
        // A card caught in the transport goes back in the hopper.
        if let Some(card) = self.card.take() {
            self.hopper.push_front(card);
        }
        self.operation = Operation::Idle;
        self.column = 0;
    }

    fn on_input_event(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        input: InputEvent,
    ) -> Result<(), InputEventError> {
        match input {
            InputEvent::LoadCards { cards } => {
                if self.hopper.len() + cards.len() > HOPPER_CAPACITY {
                    event!(
                        Level::WARN,
                        "card reader: no room for {} more cards ({} in hopper)",
                        cards.len(),
                        self.hopper.len()
                    );
                    return Err(InputEventError::BufferUnavailable);
                }
                event!(
                    Level::INFO,
                    "card reader: {} cards loaded into the hopper",
                    cards.len()
                );
                self.hopper.extend(cards.into_iter().map(pad_card));
                Ok(())
            }
            _ => Err(InputEventError::InputEventNotValidForDevice),
        }
    }

    fn text_info(&self) -> String {
        format!(
            "{:?}, {} cards in hopper, {} read",
            self.operation,
            self.hopper.len(),
            self.cards_read
        )
    }
}
