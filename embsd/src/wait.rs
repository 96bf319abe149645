//! Wait slots
//!
//! A control block owns two slots: the receiver slot serves accept, connect, the receive
//! family, closesocket and select read interest; the sender slot serves the send family and
//! select write interest. Each slot holds at most one waiter, identified by a ticket.
//!
//! Waiting follows the same pattern everywhere. Under the stack lock, the caller re-checks the
//! socket state, and if the call cannot complete it arms the slot with its ticket and
//! registers its waker. Events only wake the waiter; the waiter learns the outcome by
//! re-checking the state on the next poll. Teardown vacates the slot, so a waiter whose
//! ticket no longer matches observes `Event::Kill`.

use core::task::Waker;
use embassy_sync::waitqueue::WakerRegistration;

use crate::core::{Event, EventSet};

/// Identifies a single blocked call. Zero means "not armed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct Ticket(u32);

impl Ticket {
    pub const NONE: Self = Self(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Source of unique nonzero tickets
pub(crate) struct TicketCounter(u32);

impl TicketCounter {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn next(&mut self) -> Ticket {
        self.0 = self.0.wrapping_add(1);
        if self.0 == 0 {
            self.0 = 1;
        }
        Ticket(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum SlotKind {
    Receiver,
    Sender,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct Occupied;

pub(crate) struct WaitSlot {
    ticket: Ticket,
    mask: EventSet,
    observed: EventSet,
    /// Housekeeping ticks left until `Event::Timeout`
    timer: Option<u32>,
    waker: WakerRegistration,
}

impl WaitSlot {
    pub const fn new() -> Self {
        Self {
            ticket: Ticket::NONE,
            mask: EventSet::NONE,
            observed: EventSet::NONE,
            timer: None,
            waker: WakerRegistration::new(),
        }
    }

    pub fn is_armed(&self) -> bool {
        !self.ticket.is_none()
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Checks whether the waiter is interested in `event`
    pub fn wants(&self, event: Event) -> bool {
        self.is_armed() && self.mask.contains(event)
    }

    /// Occupies the slot or refreshes the waker of its current owner.
    ///
    /// The interest mask always includes `Kill` and `Timeout`.
    /// The timer starts on the first arming only.
    pub fn arm(
        &mut self,
        ticket: Ticket,
        mask: EventSet,
        timeout_ticks: Option<u32>,
        waker: &Waker,
    ) -> Result<(), Occupied> {
        debug_assert!(!ticket.is_none());
        if self.ticket != ticket {
            if self.is_armed() {
                return Err(Occupied);
            }
            self.ticket = ticket;
            self.observed = EventSet::NONE;
            self.timer = timeout_ticks.map(|ticks| ticks.max(1));
        }
        self.mask = mask | EventSet::KILL | EventSet::TIMEOUT;
        self.waker.register(waker);
        Ok(())
    }

    /// Takes the events observed since the last call.
    ///
    /// A waiter whose ticket was discarded by teardown observes `Kill`.
    pub fn take_observed(&mut self, ticket: Ticket) -> EventSet {
        if self.ticket != ticket {
            return EventSet::KILL;
        }
        let observed = self.observed & self.mask;
        self.observed = EventSet::NONE;
        observed
    }

    /// Records an event and wakes the waiter if it is interested.
    pub fn wake(&mut self, event: Event) {
        if !self.is_armed() {
            return;
        }
        self.observed.insert(event);
        if self.mask.contains(event) {
            self.waker.wake();
        }
    }

    /// Vacates the slot if `ticket` owns it.
    pub fn disarm(&mut self, ticket: Ticket) {
        if self.ticket == ticket && !ticket.is_none() {
            *self = Self::new();
        }
    }

    /// Wakes the waiter with `Kill` and vacates the slot.
    pub fn kill(&mut self) {
        if self.is_armed() {
            self.waker.wake();
        }
        *self = Self::new();
    }

    /// Advances the timer by one tick. Delivers `Timeout` on expiry.
    pub fn tick(&mut self) {
        if let Some(left) = self.timer.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.timer = None;
                self.wake(Event::Timeout);
            }
        }
    }
}

impl Default for WaitSlot {
    fn default() -> Self {
        Self::new()
    }
}
