//! Readiness multiplexing

use core::task::{Context, Poll};
use embsd_driver::engine::Engine;

use crate::core::{Event, EventSet, SockId, SockType};
use crate::error::Error;
use crate::socket::Call;
use crate::stack::Inner;
use crate::table::{Control, State};
use crate::time::Duration;

const READ: usize = 0;
const WRITE: usize = 1;
const EXCEPT: usize = 2;

/// Set of socket descriptors
///
/// Holds every descriptor value up to [`SockId::MAX_VALUE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FdSet(u64);

impl FdSet {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn set(&mut self, id: SockId) {
        self.0 |= Self::bit(id);
    }

    pub fn clear(&mut self, id: SockId) {
        self.0 &= !Self::bit(id);
    }

    pub fn is_set(&self, id: SockId) -> bool {
        self.0 & Self::bit(id) != 0
    }

    pub fn zero(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = SockId> + '_ {
        (0..u64::BITS as usize)
            .filter(|&index| self.0 & (1u64 << index) != 0)
            .map(SockId::from_index)
    }

    const fn bit(id: SockId) -> u64 {
        1 << id.index()
    }
}

impl FromIterator<SockId> for FdSet {
    fn from_iter<T: IntoIterator<Item = SockId>>(iter: T) -> Self {
        let mut set = FdSet::new();
        for id in iter {
            set.set(id);
        }
        set
    }
}

impl<const SOCKS: usize, const FRAMES: usize> Inner<SOCKS, FRAMES> {
    pub fn poll_select(
        &mut self,
        cx: &mut Context<'_>,
        engine: &dyn Engine,
        interest: &[FdSet; 3],
        timeout: Option<Duration>,
        call: &mut Call,
    ) -> Poll<Result<[FdSet; 3], Error>> {
        let all = FdSet(interest[READ].0 | interest[WRITE].0 | interest[EXCEPT].0);
        let receivers = FdSet(interest[READ].0 | interest[EXCEPT].0);

        let mut observed = EventSet::NONE;
        if call.armed {
            for id in all.iter() {
                let Some(ctl) = self.table.slot_mut(id) else {
                    continue;
                };
                if receivers.is_set(id) {
                    observed |= ctl.receiver.take_observed(call.ticket);
                }
                if interest[WRITE].is_set(id) {
                    observed |= ctl.sender.take_observed(call.ticket);
                }
            }
        }

        let ready = match self.scan(engine, interest, all) {
            Ok(ready) => ready,
            Err(err) => {
                self.release_all(call);
                return Poll::Ready(Err(err));
            }
        };
        let count: usize = ready.iter().map(FdSet::count).sum();
        let expired = observed.contains(Event::Timeout) || timeout == Some(Duration::from_ticks(0));
        // Nothing to wait on without descriptors
        if count > 0 || expired || all.is_empty() {
            self.release_all(call);
            return Poll::Ready(Ok(ready));
        }

        if call.ticket.is_none() {
            call.ticket = self.tickets.next();
        }
        let ticks = timeout.map(|timeout| self.config.ticks(timeout));
        let read_mask = EventSet::DATA | EventSet::CONNECT | EventSet::CLOSE;
        let write_mask = EventSet::ACK | EventSet::SEND | EventSet::CONNECT | EventSet::CLOSE;
        for id in all.iter() {
            let ctl = unwrap!(self.table.slot_mut(id));
            let mut res = Ok(());
            if receivers.is_set(id) {
                res = ctl.receiver.arm(call.ticket, read_mask, ticks, cx.waker());
            }
            if res.is_ok() && interest[WRITE].is_set(id) {
                res = ctl.sender.arm(call.ticket, write_mask, ticks, cx.waker());
            }
            call.armed = true;
            if res.is_err() {
                self.release_all(call);
                return Poll::Ready(Err(Error::Locked));
            }
        }
        Poll::Pending
    }

    /// Evaluates readiness of every descriptor of interest.
    fn scan(
        &self,
        engine: &dyn Engine,
        interest: &[FdSet; 3],
        all: FdSet,
    ) -> Result<[FdSet; 3], Error> {
        let mut ready = [FdSet::new(); 3];
        for id in all.iter() {
            let ctl = self.table.get(id)?;
            let idx = id.index() as u8;
            if interest[READ].is_set(id) && self.readable(idx, ctl) {
                ready[READ].set(id);
            }
            if interest[WRITE].is_set(id) && writable(engine, ctl) {
                ready[WRITE].set(id);
            }
            if interest[EXCEPT].is_set(id) && ctl.state == State::Closed {
                ready[EXCEPT].set(id);
            }
        }
        Ok(ready)
    }

    fn readable(&self, idx: u8, ctl: &Control) -> bool {
        !ctl.rx.is_empty()
            || ctl.state == State::Closed
            || (ctl.state == State::Server && self.table.has_pending(idx))
    }

    fn release_all(&mut self, call: &mut Call) {
        if call.armed {
            self.table.disarm(call.ticket);
            call.armed = false;
        }
    }
}

fn writable(engine: &dyn Engine, ctl: &Control) -> bool {
    match (ctl.ty, ctl.state) {
        (SockType::Stream, State::Connected) => {
            ctl.engine.is_some_and(|handle| engine.tcp_check_send(handle))
        }
        (SockType::Dgram, State::Created | State::Bound) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fd_set() {
        let first = unwrap!(SockId::new(1));
        let last = unwrap!(SockId::new(SockId::MAX_VALUE));
        let mut set = FdSet::new();
        assert!(set.is_empty());
        set.set(first);
        set.set(last);
        assert!(set.is_set(first));
        assert!(set.is_set(last));
        assert_eq!(set.count(), 2);

        {
            let mut iter = set.iter();
            assert_eq!(iter.next(), Some(first));
            assert_eq!(iter.next(), Some(last));
            assert_eq!(iter.next(), None);
        }

        set.clear(first);
        assert!(!set.is_set(first));
        set.zero();
        assert!(set.is_empty());
    }

    #[test]
    fn test_fd_set_from_iter() {
        let ids = [3u8, 5, 3].map(|value| unwrap!(SockId::new(value)));
        let set: FdSet = ids.into_iter().collect();
        assert_eq!(set.count(), 2);
    }
}
