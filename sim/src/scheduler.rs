//! Discrete-event scheduler.
//!
//! The scheduler is the only source of "now" for the control units.
//! Nothing in the simulator looks at the wall clock; every delay is a
//! number of scheduler ticks, and the device manager advances the
//! scheduler by exactly one tick per simulated cycle.
//!
//! Pending events are keyed by absolute due time.  Two events due at
//! the same tick fire in the order in which they were scheduled,
//! because the queue priority is `(due, EventId)` and event ids are
//! handed out in increasing order.
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};

use serde::Serialize;
use tracing::{event, Level};

use base::collections::pq::KeyedReversePriorityQueue;

/// Simulated time, in scheduler ticks.
pub type Tick = u64;

/// Identifies an attached unit.  This is its position in the bus
/// scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitId(pub usize);

impl Display for UnitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "unit#{}", self.0)
    }
}

/// Handle for a scheduled event, returned by [`Scheduler::schedule`]
/// and accepted by [`Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent<E> {
    pub id: EventId,
    pub owner: UnitId,
    pub action: E,
    pub arg: i64,
    pub due: Tick,
}

/// The outcome of a successful call to [`Scheduler::schedule`].
#[derive(Debug, PartialEq, Eq)]
pub enum Scheduling<E> {
    /// The delay was zero.  Nothing was queued; the caller must act
    /// on the event right away.
    Immediate(ScheduledEvent<E>),
    /// The event was queued.
    Pending(EventId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleFailure {
    /// The queue already holds as many events as it is allowed to.
    /// Nothing was queued and the existing events are unaffected.
    QueueFull { capacity: usize },
    /// The event would fall due beyond the last representable tick.
    TooDistant { now: Tick, delay: Tick },
}

impl Display for ScheduleFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ScheduleFailure::QueueFull { capacity } => {
                write!(f, "event queue is full ({capacity} events pending)")
            }
            ScheduleFailure::TooDistant { now, delay } => {
                write!(f, "cannot schedule an event {delay} ticks after tick {now}")
            }
        }
    }
}

impl Error for ScheduleFailure {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on the number of simultaneously pending events.
    pub max_pending: usize,
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig { max_pending: 4096 }
    }
}

pub struct Scheduler<E> {
    now: Tick,
    next_id: u64,
    config: SchedulerConfig,
    queue: KeyedReversePriorityQueue<EventId, (Tick, EventId)>,
    events: BTreeMap<EventId, ScheduledEvent<E>>,
}

impl<E: Debug> Debug for Scheduler<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("Scheduler")
            .field("now", &self.now)
            .field("config", &self.config)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl<E> Scheduler<E> {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Scheduler<E> {
        Scheduler {
            now: 0,
            next_id: 0,
            config,
            queue: KeyedReversePriorityQueue::new(),
            events: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn now(&self) -> Tick {
        self.now
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn is_pending(&self, id: EventId) -> bool {
        self.events.contains_key(&id)
    }

    /// The tick at which the earliest pending event is due.
    #[must_use]
    pub fn next_due(&self) -> Option<Tick> {
        self.queue.peek().map(|(_, (due, _))| *due)
    }

    fn allocate_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Arranges for `action` to happen `delay` ticks from now on
    /// behalf of `owner`.
    ///
    /// A zero delay queues nothing; the event comes straight back as
    /// [`Scheduling::Immediate`] so that the caller can perform it
    /// synchronously.
    ///
    /// # Errors
    ///
    /// [`ScheduleFailure::QueueFull`] when the queue is at capacity,
    /// [`ScheduleFailure::TooDistant`] when the due time would
    /// overflow [`Tick`].  In either case the action will never happen unless the caller
    /// does something about it.
    pub fn schedule(
        &mut self,
        owner: UnitId,
        action: E,
        delay: Tick,
        arg: i64,
    ) -> Result<Scheduling<E>, ScheduleFailure> {
        let Some(due) = self.now.checked_add(delay) else {
            event!(
                Level::ERROR,
                "cannot schedule event for {owner}: delay {delay} from tick {} overflows",
                self.now
            );
            return Err(ScheduleFailure::TooDistant {
                now: self.now,
                delay,
            });
        };
        if delay == 0 {
            let id = self.allocate_id();
            return Ok(Scheduling::Immediate(ScheduledEvent {
                id,
                owner,
                action,
                arg,
                due,
            }));
        }
        if self.events.len() >= self.config.max_pending {
            event!(
                Level::ERROR,
                "cannot schedule event for {owner}: {} events already pending",
                self.events.len()
            );
            return Err(ScheduleFailure::QueueFull {
                capacity: self.config.max_pending,
            });
        }
        let id = self.allocate_id();
        self.queue.push(id, (due, id));
        self.events.insert(
            id,
            ScheduledEvent {
                id,
                owner,
                action,
                arg,
                due,
            },
        );
        event!(
            Level::TRACE,
            "scheduled {id:?} for {owner} at tick {due} (now {})",
            self.now
        );
        Ok(Scheduling::Pending(id))
    }

    /// Removes a pending event.  Returns `None` (and changes nothing)
    /// if the event already fired or was never scheduled.
    pub fn cancel(&mut self, id: EventId) -> Option<ScheduledEvent<E>> {
        self.queue.remove(&id)?;
        self.events.remove(&id)
    }

    /// Removes every pending event belonging to `owner`, returning
    /// how many there were.
    pub fn cancel_owner(&mut self, owner: UnitId) -> usize {
        let doomed: Vec<EventId> = self
            .events
            .values()
            .filter(|ev| ev.owner == owner)
            .map(|ev| ev.id)
            .collect();
        for id in doomed.iter() {
            self.cancel(*id);
        }
        doomed.len()
    }

    /// Advances the clock by one tick and returns the events which are
    /// now due, in firing order.
    pub fn advance_one_tick(&mut self) -> Vec<ScheduledEvent<E>> {
        self.now += 1;
        let mut fired = Vec::new();
        while let Some((_, (due, _))) = self.queue.peek() {
            if *due > self.now {
                break;
            }
            if let Some((id, _)) = self.queue.pop() {
                if let Some(ev) = self.events.remove(&id) {
                    fired.push(ev);
                }
            }
        }
        fired
    }
}

impl<E: PartialEq> Scheduler<E> {
    /// Removes the earliest pending event of `owner` whose action is
    /// `action`.
    pub fn cancel_matching(&mut self, owner: UnitId, action: &E) -> Option<ScheduledEvent<E>> {
        let id = self
            .events
            .values()
            .filter(|ev| ev.owner == owner && ev.action == *action)
            .min_by_key(|ev| (ev.due, ev.id))
            .map(|ev| ev.id)?;
        self.cancel(id)
    }
}

impl<E> Default for Scheduler<E> {
    fn default() -> Scheduler<E> {
        Scheduler::new(SchedulerConfig::default())
    }
}
