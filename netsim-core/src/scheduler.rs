use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::error::EventError;
use crate::logging::events;
use crate::types::{EventHandle, EventId};
use crate::SimTime;

/// A one-shot callback. It receives the scheduler (to read the clock and to
/// schedule or cancel further events) and the per-run state `S`.
pub type Callback<S> = Box<dyn FnOnce(&mut Scheduler<S>, &mut S)>;

/// Entry stored in the scheduler's priority queue.
///
/// Entries only carry the due time and the event id; the callback lives in a
/// side table so that cancellation is a table removal and the heap entry is
/// discarded lazily when it reaches the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventEntry {
    id: EventId,
    time: SimTime,
}

impl EventEntry {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn time(&self) -> SimTime {
        self.time
    }
}

impl PartialOrd for EventEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the earliest (time, id) pops first.
        // Ids grow with insertion order, which makes equal-time events FIFO.
        self.time
            .cmp(&other.time)
            .then_with(|| self.id.cmp(&other.id))
            .reverse()
    }
}

type Clock = Rc<Cell<SimTime>>;

/// This struct exposes only immutable access to the simulation clock.
/// The clock itself is owned by the scheduler, while others can obtain `ClockRef`
/// to read the current simulation time.
///
/// # Example
///
/// ```
/// # use netsim_core::Scheduler;
/// let scheduler = Scheduler::<()>::default();
/// let clock_ref = scheduler.clock();
/// assert_eq!(clock_ref.time(), scheduler.time());
/// ```
#[derive(Clone)]
pub struct ClockRef {
    clock: Clock,
}

impl From<Clock> for ClockRef {
    fn from(clock: Clock) -> Self {
        Self { clock }
    }
}

impl ClockRef {
    /// Return the current simulation time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.clock.get()
    }
}

/// Scheduler keeps the virtual clock and the set of pending events.
///
/// Events are one-shot; periodic behaviour is obtained by a callback that
/// schedules its own successor before returning.
pub struct Scheduler<S> {
    next_event_id: u64,
    epoch: u32,
    events: BinaryHeap<EventEntry>,
    callbacks: HashMap<EventId, Callback<S>>,
    clock: Clock,
    stop_requested: bool,
    events_processed: u64,
}

impl<S> Default for Scheduler<S> {
    fn default() -> Self {
        Self {
            next_event_id: 0,
            epoch: 0,
            events: BinaryHeap::default(),
            callbacks: HashMap::new(),
            clock: Rc::new(Cell::new(SimTime::zero())),
            stop_requested: false,
            events_processed: 0,
        }
    }
}

impl<S> Scheduler<S> {
    /// Schedules `callback` to run at `self.time() + delay`.
    pub fn schedule<F>(&mut self, delay: SimTime, callback: F) -> EventHandle
    where
        F: FnOnce(&mut Scheduler<S>, &mut S) + 'static,
    {
        let time = self.time() + delay;
        self.insert(time, Box::new(callback))
    }

    /// Schedules `callback` at the current instant, after every event already
    /// due now.
    pub fn schedule_now<F>(&mut self, callback: F) -> EventHandle
    where
        F: FnOnce(&mut Scheduler<S>, &mut S) + 'static,
    {
        self.schedule(SimTime::zero(), callback)
    }

    /// Schedules `callback` after a delay given in fractional seconds.
    ///
    /// # Errors
    ///
    /// [`EventError::InvalidDelay`] if `delay_secs` is negative, NaN or infinite.
    pub fn schedule_secs<F>(&mut self, delay_secs: f64, callback: F) -> Result<EventHandle, EventError>
    where
        F: FnOnce(&mut Scheduler<S>, &mut S) + 'static,
    {
        let delay = SimTime::try_from_secs(delay_secs).inspect_err(|err| {
            warn!(delay_secs, error = %err, "Rejected schedule request");
        })?;
        Ok(self.schedule(delay, callback))
    }

    /// Schedules `callback` at the absolute instant `time`.
    ///
    /// # Errors
    ///
    /// [`EventError::ScheduleInPast`] if `time` is earlier than the clock.
    pub fn schedule_at<F>(&mut self, time: SimTime, callback: F) -> Result<EventHandle, EventError>
    where
        F: FnOnce(&mut Scheduler<S>, &mut S) + 'static,
    {
        let now = self.time();
        if time < now {
            warn!(requested = %time, now = %now, "Rejected schedule in the past");
            return Err(EventError::ScheduleInPast { requested: time, now });
        }
        Ok(self.insert(time, Box::new(callback)))
    }

    fn insert(&mut self, time: SimTime, callback: Callback<S>) -> EventHandle {
        self.next_event_id += 1;
        let id = EventId(self.next_event_id);
        self.events.push(EventEntry { id, time });
        self.callbacks.insert(id, callback);
        events::event_scheduled(id, time, self.time());
        EventHandle {
            id,
            epoch: self.epoch,
        }
    }

    /// Cancels a pending event.
    ///
    /// Returns `Ok(true)` if the event was pending and will now never run, and
    /// `Ok(false)` if it already fired or was already cancelled.
    ///
    /// # Errors
    ///
    /// [`EventError::UnknownHandle`] if the handle was never issued by this
    /// run (including handles issued before the last `destroy`).
    pub fn cancel(&mut self, handle: EventHandle) -> Result<bool, EventError> {
        self.check_handle(handle)?;
        let cancelled = self.callbacks.remove(&handle.id).is_some();
        debug!(event = %handle.id, cancelled, "Cancel requested");
        Ok(cancelled)
    }

    /// Returns `true` while the event behind `handle` is still waiting to run.
    pub fn is_pending(&self, handle: EventHandle) -> bool {
        handle.epoch == self.epoch && self.callbacks.contains_key(&handle.id)
    }

    fn check_handle(&self, handle: EventHandle) -> Result<(), EventError> {
        let issued = handle.epoch == self.epoch
            && handle.id.0 != 0
            && handle.id.0 <= self.next_event_id;
        if issued {
            Ok(())
        } else {
            warn!(handle = %handle, "Unknown event handle");
            Err(EventError::UnknownHandle(handle.id))
        }
    }

    /// Returns the current simulation time.
    #[must_use]
    pub fn time(&self) -> SimTime {
        self.clock.get()
    }

    /// Returns a structure with immutable access to the simulation time.
    #[must_use]
    pub fn clock(&self) -> ClockRef {
        ClockRef {
            clock: Rc::clone(&self.clock),
        }
    }

    /// Number of events still waiting to run (cancelled events excluded).
    pub fn pending_events(&self) -> usize {
        self.callbacks.len()
    }

    /// Number of callbacks invoked since the start of the run.
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Run epoch; incremented on every `clear`.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Due time of the next active event, dropping cancelled entries on the way.
    pub fn peek_next_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled();
        self.events.peek().map(EventEntry::time)
    }

    /// Removes the next active event and advances the clock to its due time.
    pub(crate) fn pop(&mut self) -> Option<(EventEntry, Callback<S>)> {
        loop {
            let entry = self.events.pop()?;
            let Some(callback) = self.callbacks.remove(&entry.id) else {
                trace!(event = %entry.id, "Skipping cancelled event");
                continue;
            };
            debug_assert!(entry.time >= self.time(), "event due before the clock");
            self.clock.set(entry.time);
            self.events_processed += 1;
            return Some((entry, callback));
        }
    }

    fn discard_cancelled(&mut self) {
        while let Some(entry) = self.events.peek() {
            if self.callbacks.contains_key(&entry.id) {
                break;
            }
            self.events.pop();
        }
    }

    /// Asks the run loop to return once the current callback completes.
    pub fn stop(&mut self) {
        debug!(time = %self.time(), "Stop requested");
        self.stop_requested = true;
    }

    /// Schedules a stop `delay` from now.
    pub fn stop_after(&mut self, delay: SimTime) -> EventHandle {
        self.schedule(delay, |scheduler, _| scheduler.stop())
    }

    pub(crate) fn take_stop_request(&mut self) -> bool {
        std::mem::take(&mut self.stop_requested)
    }

    /// Drops every pending event and rewinds the clock to zero, starting a new
    /// epoch so that old handles are recognised as foreign.
    pub(crate) fn clear(&mut self) -> usize {
        let discarded = self.callbacks.len();
        self.events.clear();
        self.callbacks.clear();
        self.clock.set(SimTime::zero());
        self.next_event_id = 0;
        self.epoch = self.epoch.wrapping_add(1);
        self.stop_requested = false;
        self.events_processed = 0;
        discarded
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn noop(_: &mut Scheduler<()>, _: &mut ()) {}

    #[test]
    fn test_clock_ref() {
        let time = SimTime::from_secs(1);
        let clock = Clock::new(Cell::new(time));
        let clock_ref = ClockRef::from(clock);
        assert_eq!(clock_ref.time(), time);
    }

    #[test]
    fn test_event_entry_cmp() {
        let early = EventEntry { id: EventId(5), time: SimTime::from_secs(1) };
        let late = EventEntry { id: EventId(1), time: SimTime::from_secs(2) };
        let tie = EventEntry { id: EventId(6), time: SimTime::from_secs(1) };
        // Reversed: the entry that must pop first compares greater.
        assert_eq!(early.cmp(&late), Ordering::Greater);
        assert_eq!(early.cmp(&tie), Ordering::Greater);
        assert_eq!(tie.cmp(&tie), Ordering::Equal);
    }

    #[test]
    fn test_pop_order_and_clock() {
        let mut scheduler = Scheduler::<()>::default();
        scheduler.schedule(SimTime::from_secs(2), noop);
        let first = scheduler.schedule_now(noop);
        scheduler.schedule(SimTime::from_secs(1), noop);
        assert_eq!(scheduler.pending_events(), 3);

        let (entry, _) = scheduler.pop().unwrap();
        assert_eq!(entry.id(), first.id());
        assert_eq!(scheduler.time(), SimTime::zero());

        let (entry, _) = scheduler.pop().unwrap();
        assert_eq!(entry.time(), SimTime::from_secs(1));
        assert_eq!(scheduler.clock().time(), SimTime::from_secs(1));

        let (entry, _) = scheduler.pop().unwrap();
        assert_eq!(entry.time(), SimTime::from_secs(2));
        assert!(scheduler.pop().is_none());
        assert_eq!(scheduler.events_processed(), 3);
    }

    #[test]
    fn test_cancel_semantics() {
        let mut scheduler = Scheduler::<()>::default();
        let handle = scheduler.schedule(SimTime::from_secs(1), noop);
        assert!(scheduler.is_pending(handle));
        assert_eq!(scheduler.cancel(handle), Ok(true));
        assert!(!scheduler.is_pending(handle));
        assert_eq!(scheduler.cancel(handle), Ok(false));

        // Cancelled entries never advance the clock.
        assert!(scheduler.pop().is_none());
        assert_eq!(scheduler.time(), SimTime::zero());

        let never = EventHandle::from_raw(42, 0);
        assert_eq!(scheduler.cancel(never), Err(EventError::UnknownHandle(EventId(42))));
        let zero = EventHandle::from_raw(0, 0);
        assert!(scheduler.cancel(zero).is_err());
    }

    #[test]
    fn test_schedule_validation() {
        let mut scheduler = Scheduler::<()>::default();
        assert!(matches!(
            scheduler.schedule_secs(-1.0, noop),
            Err(EventError::InvalidDelay { .. })
        ));
        assert_eq!(scheduler.pending_events(), 0);

        scheduler.schedule(SimTime::from_secs(3), noop);
        scheduler.pop();
        let err = scheduler.schedule_at(SimTime::from_secs(1), noop).unwrap_err();
        assert_eq!(
            err,
            EventError::ScheduleInPast {
                requested: SimTime::from_secs(1),
                now: SimTime::from_secs(3),
            }
        );
        assert!(scheduler.schedule_at(SimTime::from_secs(3), noop).is_ok());
    }

    #[test]
    fn test_clear_starts_new_epoch() {
        let mut scheduler = Scheduler::<()>::default();
        let old = scheduler.schedule(SimTime::from_secs(1), noop);
        scheduler.pop();
        assert_eq!(scheduler.clear(), 0);
        assert_eq!(scheduler.time(), SimTime::zero());

        let new = scheduler.schedule(SimTime::from_secs(1), noop);
        assert_eq!(new.id(), old.id());
        assert!(matches!(scheduler.cancel(old), Err(EventError::UnknownHandle(_))));
        assert_eq!(scheduler.cancel(new), Ok(true));
    }
}
