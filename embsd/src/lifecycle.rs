//! Socket lifecycle: socket, bind, listen, accept, connect, closesocket

use core::net::SocketAddr;
use core::task::{Context, Poll};
use embsd_driver::engine::{Engine, TcpState};

use crate::addr::{self, SockAddr};
use crate::core::{Event, EventSet, Family, SockId, SockType};
use crate::error::Error;
use crate::socket::Call;
use crate::stack::Inner;
use crate::table::{Control, Flags, State};
use crate::wait::SlotKind;

/// Ephemeral port draws before giving up on collisions
const PORT_ATTEMPTS: usize = 64;

impl<const SOCKS: usize, const FRAMES: usize> Inner<SOCKS, FRAMES> {
    pub fn socket(
        &mut self,
        engine: &dyn Engine,
        family: Family,
        ty: SockType,
        protocol: u8,
    ) -> Result<SockId, Error> {
        if protocol != 0 && protocol != ty.protocol() {
            return Err(Error::Invalid);
        }
        let idx = self.table.find_free().ok_or(Error::NoSocket)?;
        let handle = match ty {
            SockType::Stream => engine.tcp_get_socket(),
            SockType::Dgram => engine.udp_get_socket(),
        }
        .ok_or(Error::NoMemory)?;

        let config = self.config;
        let ctl = self.table.at_mut(idx as u8);
        *ctl = Control::new();
        ctl.state = State::Created;
        ctl.ty = ty;
        ctl.family = family;
        ctl.local = addr::unspecified(family);
        ctl.remote = addr::unspecified(family);
        ctl.engine = Some(handle);
        ctl.recv_timeout = config.recv_timeout;
        ctl.send_timeout = config.send_timeout;
        ctl.ttl = config.ttl;
        ctl.hop_limit = config.hop_limit;

        let id = SockId::from_index(idx);
        debug!("socket {:?} created: {:?} {:?}", id, family, ty);
        Ok(id)
    }

    pub fn bind(&mut self, engine: &dyn Engine, id: SockId, addr: &SockAddr) -> Result<(), Error> {
        let ctl = self.table.get(id)?;
        if ctl.flags.contains(Flags::FILTER) {
            return Err(Error::IsConnected);
        }
        if ctl.state != State::Created {
            return Err(Error::Invalid);
        }
        let local = addr::to_internal(addr, ctl.family, ctl.flags.contains(Flags::V6_ONLY))?;
        self.bind_local(engine, id, local)
    }

    /// Binds a CREATED socket to the wildcard address and an ephemeral port.
    pub(crate) fn implicit_bind(&mut self, engine: &dyn Engine, id: SockId) -> Result<(), Error> {
        let ctl = self.table.get(id)?;
        if ctl.state != State::Created {
            return Ok(());
        }
        let local = addr::unspecified(ctl.family);
        self.bind_local(engine, id, local)
    }

    fn bind_local(
        &mut self,
        engine: &dyn Engine,
        id: SockId,
        mut local: SocketAddr,
    ) -> Result<(), Error> {
        let ty = self.table.get(id)?.ty;
        let port = match local.port() {
            0 => self.ephemeral_port(engine, ty)?,
            port if self.table.port_in_use(ty, port) => return Err(Error::AddrInUse),
            port => port,
        };
        local.set_port(port);

        let ctl = self.table.get_mut(id)?;
        if ty == SockType::Dgram {
            let handle = ctl.engine.ok_or(Error::Failed)?;
            engine.udp_open(handle, port, &ctl.udp_params())?;
        }
        ctl.local = local;
        ctl.state = State::Bound;
        debug!("socket {:?} bound to port {}", id, port);
        Ok(())
    }

    fn ephemeral_port(&self, engine: &dyn Engine, ty: SockType) -> Result<u16, Error> {
        for _ in 0..PORT_ATTEMPTS {
            let port = match ty {
                SockType::Stream => engine.tcp_ephemeral_port(),
                SockType::Dgram => engine.udp_ephemeral_port(),
            };
            if port != 0 && !self.table.port_in_use(ty, port) {
                return Ok(port);
            }
        }
        Err(Error::AddrInUse)
    }

    pub fn listen(&mut self, engine: &dyn Engine, id: SockId, backlog: usize) -> Result<(), Error> {
        let ctl = self.table.get(id)?;
        if ctl.ty != SockType::Stream {
            return Err(Error::NotSupported);
        }
        if ctl.state != State::Bound {
            return Err(Error::Invalid);
        }
        if backlog == 0 {
            return Err(Error::Invalid);
        }
        if self.table.free_count() < backlog {
            return Err(Error::NoMemory);
        }

        let parent = id.index() as u8;
        let server = self.table.at_mut(parent);
        if let Some(handle) = server.engine.take() {
            engine.tcp_release(handle);
        }
        server.state = State::Server;
        server.parent = None;
        server.accept_head = None;
        server.accept_tail = None;

        let mut result = Ok(());
        for _ in 0..backlog {
            let child = unwrap!(self.table.find_free()) as u8;
            self.init_child(parent, child);
            if let Err(err) = self.start_listen(engine, child) {
                warn!("backlog socket {:?} not listening: {:?}", SockId::from_index(child.into()), err);
                result = Err(Error::NoMemory);
            }
        }
        info!("socket {:?} listening, backlog {}", id, backlog);
        result
    }

    /// Prepares a slot as a LISTEN child of the server.
    fn init_child(&mut self, parent: u8, child: u8) {
        let server = self.table.at(parent);
        let mut template = Control::new();
        template.state = State::Listen;
        template.ty = SockType::Stream;
        template.family = server.family;
        template.flags = server
            .flags
            .intersection(Flags::INHERITED.union(Flags::V6_ONLY));
        template.local = server.local;
        template.remote = addr::unspecified(server.family);
        template.parent = Some(parent);
        template.recv_timeout = server.recv_timeout;
        template.send_timeout = server.send_timeout;
        template.tos = server.tos;
        template.ttl = server.ttl;
        template.hop_limit = server.hop_limit;

        let ctl = self.table.at_mut(child);
        template.engine = ctl.engine.take();
        *ctl = template;
    }

    /// Starts a passive open on the engine socket of a LISTEN child.
    pub(crate) fn start_listen(&mut self, engine: &dyn Engine, idx: u8) -> Result<(), Error> {
        let ctl = self.table.at_mut(idx);
        ctl.remote = addr::unspecified(ctl.family);
        let handle = match ctl.engine {
            Some(handle) => handle,
            None => {
                let handle = engine.tcp_get_socket().ok_or(Error::NoMemory)?;
                ctl.engine = Some(handle);
                handle
            }
        };
        if engine.tcp_state(handle) != TcpState::Closed {
            engine.tcp_abort(handle);
        }
        engine.tcp_configure(handle, &ctl.tcp_params());
        engine
            .tcp_listen(handle, ctl.local.port())
            .map_err(|_| Error::NoMemory)
    }

    pub fn poll_accept(
        &mut self,
        cx: &mut Context<'_>,
        engine: &dyn Engine,
        id: SockId,
        call: &mut Call,
    ) -> Poll<Result<(SockId, SockAddr), Error>> {
        let observed = self.observe(id, SlotKind::Receiver, call);
        if observed.contains(Event::Kill) {
            return Poll::Ready(Err(Error::ConnAborted));
        }
        let ctl = match self.table.get(id) {
            Ok(ctl) => ctl,
            Err(err) => return Poll::Ready(Err(err)),
        };
        if ctl.state != State::Server {
            return Poll::Ready(Err(Error::Invalid));
        }
        let non_blocking = ctl.non_blocking();
        if let Err(err) = self.check_slot(id, SlotKind::Receiver, call) {
            return Poll::Ready(Err(err));
        }

        let parent = id.index() as u8;
        if let Some(child) = self.table.pop_pending(parent) {
            self.release_slot(id, SlotKind::Receiver, call);
            let server = self.table.at(parent);
            let inherited = server.flags.intersection(Flags::INHERITED);
            let (recv_timeout, send_timeout) = (server.recv_timeout, server.send_timeout);
            let (tos, ttl, hop_limit) = (server.tos, server.ttl, server.hop_limit);

            let ctl = self.table.at_mut(child);
            ctl.flags.set(Flags::INHERITED, false);
            ctl.flags = ctl.flags.union(inherited).union(Flags::ACCEPTED);
            ctl.recv_timeout = recv_timeout;
            ctl.send_timeout = send_timeout;
            ctl.tos = tos;
            ctl.ttl = ttl;
            ctl.hop_limit = hop_limit;
            // Settings changed on the server after listen apply from here on
            if let Some(handle) = ctl.engine {
                engine.tcp_configure(handle, &ctl.tcp_params());
            }
            let remote = addr::to_external(ctl.remote, ctl.family);
            let child_id = SockId::from_index(child.into());
            debug!("socket {:?} accepted {:?}", id, child_id);
            return Poll::Ready(Ok((child_id, remote)));
        }

        if observed.contains(Event::Close) {
            return Poll::Ready(Err(Error::ConnReset));
        }
        if non_blocking {
            return Poll::Ready(Err(Error::WouldBlock));
        }
        let mask = EventSet::CONNECT | EventSet::CLOSE;
        match self.arm(cx, id, SlotKind::Receiver, call, mask, None) {
            Ok(()) => Poll::Pending,
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    pub fn poll_connect(
        &mut self,
        cx: &mut Context<'_>,
        engine: &dyn Engine,
        id: SockId,
        addr: &SockAddr,
        call: &mut Call,
    ) -> Poll<Result<(), Error>> {
        if !call.started {
            call.started = true;
            if let Err(err) = self.start_connect(engine, id, addr) {
                return Poll::Ready(Err(err));
            }
            // Datagram connect completes at once
            if self.table.get(id).map(|ctl| ctl.ty) == Ok(SockType::Dgram) {
                return Poll::Ready(Ok(()));
            }
            if self.table.get(id).is_ok_and(Control::non_blocking) {
                return Poll::Ready(Err(Error::InProgress));
            }
        }

        let observed = self.observe(id, SlotKind::Receiver, call);
        if observed.contains(Event::Kill) {
            return Poll::Ready(Err(Error::ConnAborted));
        }
        let (state, flags) = match self.table.get(id) {
            Ok(ctl) => (ctl.state, ctl.flags),
            Err(err) => return Poll::Ready(Err(err)),
        };
        let result = match state {
            State::Connected => Ok(()),
            State::Closed if flags.contains(Flags::TIMEOUT) => Err(Error::TimedOut),
            State::Closed => Err(Error::ConnRefused),
            State::ConnReq => {
                let mask = EventSet::CONNECT | EventSet::CLOSE;
                return match self.arm(cx, id, SlotKind::Receiver, call, mask, None) {
                    Ok(()) => Poll::Pending,
                    Err(err) => Poll::Ready(Err(err)),
                };
            }
            _ => Err(Error::ConnAborted),
        };
        self.release_slot(id, SlotKind::Receiver, call);
        Poll::Ready(result)
    }

    fn start_connect(&mut self, engine: &dyn Engine, id: SockId, addr: &SockAddr) -> Result<(), Error> {
        let ctl = self.table.get(id)?;
        let v6_only = ctl.flags.contains(Flags::V6_ONLY);
        if ctl.ty == SockType::Dgram {
            let remote = addr::to_internal(addr, ctl.family, v6_only)?;
            if addr::is_unspecified(&remote) {
                let ctl = self.table.get_mut(id)?;
                ctl.flags.set(Flags::FILTER, false);
                ctl.remote = addr::unspecified(ctl.family);
                debug!("socket {:?} peer filter cleared", id);
                return Ok(());
            }
            self.implicit_bind(engine, id)?;
            let ctl = self.table.get_mut(id)?;
            ctl.remote = remote;
            ctl.flags.set(Flags::FILTER, true);
            debug!("socket {:?} peer filter set", id);
            return Ok(());
        }

        match ctl.state {
            State::ConnReq => return Err(Error::Already),
            State::Connected => return Err(Error::IsConnected),
            State::Created | State::Bound => {}
            _ => return Err(Error::Invalid),
        }
        self.check_slot(id, SlotKind::Receiver, &Call::default())?;
        let remote = addr::to_internal(addr, ctl.family, v6_only)?;
        if addr::is_unspecified(&remote) || remote.port() == 0 {
            return Err(Error::Invalid);
        }
        self.implicit_bind(engine, id)?;

        let ctl = self.table.get_mut(id)?;
        let handle = ctl.engine.ok_or(Error::Failed)?;
        engine.tcp_configure(handle, &ctl.tcp_params());
        engine.tcp_connect(handle, remote, ctl.local.port())?;
        ctl.remote = remote;
        ctl.state = State::ConnReq;
        ctl.flags.set(Flags::TIMEOUT, false);
        ctl.flags.set(Flags::ABORTED, false);
        debug!("socket {:?} connecting", id);
        Ok(())
    }

    pub fn poll_close(
        &mut self,
        cx: &mut Context<'_>,
        engine: &dyn Engine,
        id: SockId,
        call: &mut Call,
    ) -> Poll<Result<(), Error>> {
        if call.started {
            let observed = self.observe(id, SlotKind::Receiver, call);
            if observed.contains(Event::Kill) {
                // Torn down by another caller
                return Poll::Ready(Ok(()));
            }
        } else {
            call.started = true;
            let ctl = match self.table.get_mut(id) {
                Ok(ctl) => ctl,
                Err(err) => return Poll::Ready(Err(err)),
            };
            ctl.kill_waiters();
        }

        let ctl = match self.table.get(id) {
            Ok(ctl) => ctl,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let idx = id.index() as u8;
        match (ctl.ty, ctl.state) {
            (SockType::Dgram, _) => {
                if let Some(handle) = ctl.engine {
                    engine.udp_close(handle);
                    engine.udp_release(handle);
                }
                self.free(idx);
            }
            (SockType::Stream, State::Server) => self.close_server(engine, idx),
            (SockType::Stream, State::Connected) => {
                let Some(handle) = ctl.engine else {
                    self.finish(engine, idx);
                    return Poll::Ready(Ok(()));
                };
                if engine.tcp_close(handle).is_err() {
                    engine.tcp_abort(handle);
                }
                self.table.at_mut(idx).state = State::Closing;
                return self.poll_closing(cx, engine, id, call);
            }
            (SockType::Stream, State::Closing) => return self.poll_closing(cx, engine, id, call),
            (SockType::Stream, State::Listen) => {
                if let Some(parent) = ctl.parent {
                    self.table.unlink_pending(parent, idx);
                }
                self.release_engine(engine, idx);
                self.free(idx);
            }
            (SockType::Stream, _) => self.finish(engine, idx),
        }
        debug!("socket {:?} closed", id);
        Poll::Ready(Ok(()))
    }

    fn poll_closing(
        &mut self,
        cx: &mut Context<'_>,
        engine: &dyn Engine,
        id: SockId,
        call: &mut Call,
    ) -> Poll<Result<(), Error>> {
        let idx = id.index() as u8;
        let ctl = self.table.at(idx);
        let non_blocking = ctl.non_blocking();
        let closed = ctl
            .engine
            .is_none_or(|handle| engine.tcp_state(handle) == TcpState::Closed);
        if closed {
            self.release_slot(id, SlotKind::Receiver, call);
            self.finish(engine, idx);
            debug!("socket {:?} closed", id);
            return Poll::Ready(Ok(()));
        }
        if non_blocking {
            return Poll::Ready(Err(Error::WouldBlock));
        }
        match self.arm(cx, id, SlotKind::Receiver, call, EventSet::CLOSE, None) {
            Ok(()) => Poll::Pending,
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn close_server(&mut self, engine: &dyn Engine, parent: u8) {
        for idx in 0..SOCKS as u8 {
            let ctl = self.table.at_mut(idx);
            if ctl.is_free() || ctl.parent != Some(parent) {
                continue;
            }
            if ctl.flags.contains(Flags::ACCEPTED) {
                ctl.parent = None;
                continue;
            }
            self.release_engine(engine, idx);
            self.free(idx);
        }
        self.free(parent);
    }

    /// Completes the teardown of a stream socket.
    ///
    /// A backlog child of a live server re-enters LISTEN instead of being freed.
    pub(crate) fn finish(&mut self, engine: &dyn Engine, idx: u8) {
        let relisten = self
            .table
            .at(idx)
            .parent
            .is_some_and(|parent| self.table.at(parent).state == State::Server);
        if !relisten {
            self.release_engine(engine, idx);
            self.free(idx);
            return;
        }

        let parent = unwrap!(self.table.at(idx).parent);
        self.table.unlink_pending(parent, idx);
        let ctl = self.table.at_mut(idx);
        ctl.kill_waiters();
        ctl.rx.clear(&mut self.pool);
        self.init_child(parent, idx);
        if let Err(err) = self.start_listen(engine, idx) {
            warn!("backlog socket {:?} not listening: {:?}", SockId::from_index(idx.into()), err);
        }
    }

    /// Aborts and returns the engine socket of a stream control block.
    fn release_engine(&mut self, engine: &dyn Engine, idx: u8) {
        if let Some(handle) = self.table.at_mut(idx).engine.take() {
            if engine.tcp_state(handle) != TcpState::Closed {
                engine.tcp_abort(handle);
            }
            engine.tcp_release(handle);
        }
    }

    /// Resets a control block to FREE. Waiters observe `Kill`.
    pub(crate) fn free(&mut self, idx: u8) {
        let ctl = self.table.at_mut(idx);
        ctl.kill_waiters();
        ctl.rx.clear(&mut self.pool);
        *ctl = Control::new();
    }

    /// Takes the events observed by the call's waiter since the last poll.
    pub(crate) fn observe(&mut self, id: SockId, kind: SlotKind, call: &Call) -> EventSet {
        if !call.armed {
            return EventSet::NONE;
        }
        match self.table.slot_mut(id) {
            Some(ctl) => ctl.slot_mut(kind).take_observed(call.ticket),
            None => EventSet::KILL,
        }
    }

    /// Fails with `Locked` if another call waits on the slot.
    pub(crate) fn check_slot(&self, id: SockId, kind: SlotKind, call: &Call) -> Result<(), Error> {
        let slot = self.table.get(id)?.slot(kind);
        if slot.is_armed() && slot.ticket() != call.ticket {
            return Err(Error::Locked);
        }
        Ok(())
    }

    pub(crate) fn arm(
        &mut self,
        cx: &mut Context<'_>,
        id: SockId,
        kind: SlotKind,
        call: &mut Call,
        mask: EventSet,
        timeout: Option<crate::time::Duration>,
    ) -> Result<(), Error> {
        if call.ticket.is_none() {
            call.ticket = self.tickets.next();
        }
        let ticks = timeout.map(|timeout| self.config.ticks(timeout));
        self.table
            .get_mut(id)?
            .slot_mut(kind)
            .arm(call.ticket, mask, ticks, cx.waker())
            .map_err(|_| Error::Locked)?;
        call.armed = true;
        Ok(())
    }

    /// Vacates the slot if the call owns it. The ticket stays valid for later waits.
    pub(crate) fn release_slot(&mut self, id: SockId, kind: SlotKind, call: &mut Call) {
        if let Some(ctl) = self.table.slot_mut(id) {
            ctl.slot_mut(kind).disarm(call.ticket);
        }
        call.armed = false;
    }
}
