//! Send and receive families

use core::net::SocketAddr;
use core::task::{Context, Poll};
use embsd_driver::engine::{Engine, EngineError};

use crate::addr::{self, SockAddr};
use crate::core::{Event, EventSet, MsgFlags, SockId, SockType};
use crate::error::Error;
use crate::socket::{Call, Received};
use crate::stack::Inner;
use crate::table::{Flags, State};
use crate::time::Duration;
use crate::wait::SlotKind;

/// Delay before the single retry of a failed datagram transmission
const UDP_RETRY_DELAY: Duration = Duration::from_millis(200);

impl<const SOCKS: usize, const FRAMES: usize> Inner<SOCKS, FRAMES> {
    #[allow(clippy::too_many_arguments)]
    pub fn poll_send(
        &mut self,
        cx: &mut Context<'_>,
        engine: &dyn Engine,
        id: SockId,
        data: &[u8],
        to: Option<&SockAddr>,
        flags: MsgFlags,
        call: &mut Call,
    ) -> Poll<Result<usize, Error>> {
        let observed = self.observe(id, SlotKind::Sender, call);
        if observed.contains(Event::Kill) {
            return Poll::Ready(Err(Error::ConnAborted));
        }
        let ty = match self.table.get(id) {
            Ok(ctl) => ctl.ty,
            Err(err) => return Poll::Ready(Err(err)),
        };
        if let Err(err) = self.check_slot(id, SlotKind::Sender, call) {
            return Poll::Ready(Err(err));
        }
        let res = match ty {
            SockType::Stream => self.poll_send_stream(cx, engine, id, data, flags, call, observed),
            SockType::Dgram => {
                self.poll_send_datagram(cx, engine, id, data, to, flags, call, observed)
            }
        };
        if res.is_ready() {
            self.release_slot(id, SlotKind::Sender, call);
        }
        res
    }

    #[allow(clippy::too_many_arguments)]
    fn poll_send_stream(
        &mut self,
        cx: &mut Context<'_>,
        engine: &dyn Engine,
        id: SockId,
        data: &[u8],
        flags: MsgFlags,
        call: &mut Call,
        observed: EventSet,
    ) -> Poll<Result<usize, Error>> {
        // Partial progress is reported instead of a late error
        let partial = |sent: usize, err: Error| {
            if sent > 0 {
                Poll::Ready(Ok(sent))
            } else {
                Poll::Ready(Err(err))
            }
        };

        loop {
            let ctl = match self.table.get(id) {
                Ok(ctl) => ctl,
                Err(err) => return Poll::Ready(Err(err)),
            };
            match ctl.state {
                State::Connected => {}
                State::Closed if ctl.flags.contains(Flags::ABORTED) => {
                    return partial(call.sent, Error::ConnReset);
                }
                _ => return partial(call.sent, Error::NotConnected),
            }
            if call.sent == data.len() {
                return Poll::Ready(Ok(call.sent));
            }
            let Some(handle) = ctl.engine else {
                return partial(call.sent, Error::NotConnected);
            };
            let non_blocking = ctl.non_blocking() || flags.contains(MsgFlags::DONTWAIT);
            let send_timeout = ctl.send_timeout;

            if engine.tcp_check_send(handle) {
                let mss = engine.tcp_mss(handle).max(1);
                let rest = &data[call.sent..];
                let chunk = &rest[..rest.len().min(mss)];
                match engine.tcp_send(handle, chunk) {
                    Ok(()) => {
                        call.sent += chunk.len();
                        // Every wait for the send window gets a fresh timeout
                        self.release_slot(id, SlotKind::Sender, call);
                        continue;
                    }
                    Err(EngineError::NoMemory | EngineError::Busy) => {}
                    Err(err) => return partial(call.sent, err.into()),
                }
            }

            if observed.contains(Event::Timeout) && call.armed {
                return partial(call.sent, Error::TimedOut);
            }
            if non_blocking {
                return partial(call.sent, Error::WouldBlock);
            }
            let mask = EventSet::ACK | EventSet::CLOSE;
            return match self.arm(cx, id, SlotKind::Sender, call, mask, send_timeout) {
                Ok(()) => Poll::Pending,
                Err(err) => partial(call.sent, err),
            };
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn poll_send_datagram(
        &mut self,
        cx: &mut Context<'_>,
        engine: &dyn Engine,
        id: SockId,
        data: &[u8],
        to: Option<&SockAddr>,
        flags: MsgFlags,
        call: &mut Call,
        observed: EventSet,
    ) -> Poll<Result<usize, Error>> {
        let destination = match self.datagram_destination(engine, id, to) {
            Ok(destination) => destination,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let ctl = match self.table.get(id) {
            Ok(ctl) => ctl,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let Some(handle) = ctl.engine else {
            return Poll::Ready(Err(Error::Failed));
        };
        if data.len() > engine.udp_mtu(handle, destination.is_ipv6()) {
            return Poll::Ready(Err(Error::MsgSize));
        }
        let non_blocking = ctl.non_blocking() || flags.contains(MsgFlags::DONTWAIT);

        if !call.started {
            call.started = true;
            match engine.udp_send(handle, destination, data) {
                Ok(()) => return Poll::Ready(Ok(data.len())),
                Err(_) if non_blocking => return Poll::Ready(Err(Error::WouldBlock)),
                Err(err) => debug!("socket {:?} send failed: {:?}, retrying", id, err),
            }
        } else if observed.contains(Event::Timeout) || observed.contains(Event::Send) {
            return match engine.udp_send(handle, destination, data) {
                Ok(()) => Poll::Ready(Ok(data.len())),
                Err(EngineError::NoMemory) => Poll::Ready(Err(Error::NoMemory)),
                Err(_) => Poll::Ready(Err(Error::Failed)),
            };
        }

        match self.arm(cx, id, SlotKind::Sender, call, EventSet::SEND, Some(UDP_RETRY_DELAY)) {
            Ok(()) => Poll::Pending,
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    /// Resolves the datagram destination and binds the socket implicitly.
    fn datagram_destination(
        &mut self,
        engine: &dyn Engine,
        id: SockId,
        to: Option<&SockAddr>,
    ) -> Result<SocketAddr, Error> {
        let ctl = self.table.get(id)?;
        let filter = ctl.flags.contains(Flags::FILTER).then_some(ctl.remote);
        let destination = match (to, filter) {
            (Some(to), filter) => {
                let to = addr::to_internal(to, ctl.family, ctl.flags.contains(Flags::V6_ONLY))?;
                if filter.is_some_and(|peer| peer != to) {
                    return Err(Error::IsConnected);
                }
                to
            }
            (None, Some(peer)) => peer,
            (None, None) => return Err(Error::DestAddrRequired),
        };
        if addr::is_unspecified(&destination) || destination.port() == 0 {
            return Err(Error::Invalid);
        }
        self.implicit_bind(engine, id)?;
        Ok(destination)
    }

    pub fn poll_recv(
        &mut self,
        cx: &mut Context<'_>,
        engine: &dyn Engine,
        id: SockId,
        bufs: &mut [&mut [u8]],
        flags: MsgFlags,
        call: &mut Call,
    ) -> Poll<Result<Received, Error>> {
        let observed = self.observe(id, SlotKind::Receiver, call);
        if observed.contains(Event::Kill) {
            return Poll::Ready(Err(Error::ConnAborted));
        }
        if let Err(err) = self.check_slot(id, SlotKind::Receiver, call) {
            return Poll::Ready(Err(err));
        }
        let peek = flags.contains(MsgFlags::PEEK);
        let ctl = match self.table.get_mut(id) {
            Ok(ctl) => ctl,
            Err(err) => return Poll::Ready(Err(err)),
        };

        if !ctl.rx.is_empty() {
            let received = match ctl.ty {
                SockType::Dgram => {
                    let meta = unwrap!(ctl.rx.read_datagram(&mut self.pool, bufs, peek));
                    Received {
                        len: meta.copied,
                        full_len: meta.len,
                        source: addr::to_external(meta.source, ctl.family),
                        destination: meta.destination,
                    }
                }
                SockType::Stream => {
                    let copied = ctl.rx.read_stream(&mut self.pool, bufs, peek);
                    if ctl.flags.contains(Flags::FLOW_CONTROL) && ctl.rx.is_empty() {
                        if let Some(handle) = ctl.engine {
                            engine.tcp_reset_window(handle);
                        }
                    }
                    Received {
                        len: copied,
                        full_len: copied,
                        source: addr::to_external(ctl.remote, ctl.family),
                        destination: None,
                    }
                }
            };
            self.release_slot(id, SlotKind::Receiver, call);
            return Poll::Ready(Ok(received));
        }

        let eof = Received {
            len: 0,
            full_len: 0,
            source: addr::to_external(ctl.remote, ctl.family),
            destination: None,
        };
        let res = match (ctl.ty, ctl.state) {
            (SockType::Stream, State::Connected) => None,
            (SockType::Stream, State::Closed) if ctl.flags.contains(Flags::ABORTED) => {
                Some(Err(Error::ConnReset))
            }
            (SockType::Stream, State::Closed) => Some(Ok(eof)),
            (SockType::Stream, _) => Some(Err(Error::NotConnected)),
            (SockType::Dgram, State::Created) => Some(Err(Error::Invalid)),
            (SockType::Dgram, _) => None,
        };
        if let Some(res) = res {
            self.release_slot(id, SlotKind::Receiver, call);
            return Poll::Ready(res);
        }

        if observed.contains(Event::Timeout) {
            self.release_slot(id, SlotKind::Receiver, call);
            return Poll::Ready(Err(Error::TimedOut));
        }
        if ctl.non_blocking() || flags.contains(MsgFlags::DONTWAIT) {
            return Poll::Ready(Err(Error::WouldBlock));
        }
        let timeout = ctl.recv_timeout;
        let mask = EventSet::DATA | EventSet::CLOSE;
        match self.arm(cx, id, SlotKind::Receiver, call, mask, timeout) {
            Ok(()) => Poll::Pending,
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}
