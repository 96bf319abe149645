//! Engine callbacks and housekeeping

use core::net::SocketAddr;
use embsd_driver::engine::{Engine, EngineSocket, TcpState};
use embsd_driver::link::{AbortCause, Datagram, NoBuffer, TcpEvent};

use crate::core::{Event, Family, SockId, SockType};
use crate::stack::{Inner, normalize};
use crate::table::{Flags, State};

impl<const SOCKS: usize, const FRAMES: usize> Inner<SOCKS, FRAMES> {
    pub fn tcp_connect_request(&mut self, socket: EngineSocket, remote: SocketAddr) -> bool {
        let Some(idx) = self.table.find_engine(SockType::Stream, socket) else {
            warn!("connect request on unknown engine socket {:?}", socket);
            return false;
        };
        let ctl = self.table.at(idx);
        if ctl.state != State::Listen {
            return false;
        }
        let Some(parent) = ctl.parent else {
            return false;
        };
        let server = self.table.at(parent);
        if server.state != State::Server {
            return false;
        }
        // Connections are only taken while someone accepts them
        if !server.receiver.wants(Event::Connect) && !server.non_blocking() {
            debug!("connect request refused, no acceptor");
            return false;
        }
        self.table.at_mut(idx).remote = normalize(remote);
        true
    }

    pub fn tcp_event(&mut self, socket: EngineSocket, event: TcpEvent) {
        let Some(idx) = self.table.find_engine(SockType::Stream, socket) else {
            warn!("event {:?} on unknown engine socket {:?}", event, socket);
            return;
        };
        let id = SockId::from_index(idx.into());
        match event {
            TcpEvent::Established => self.established(idx),
            TcpEvent::Closed | TcpEvent::Aborted(_) => {
                let ctl = self.table.at_mut(idx);
                // Housekeeping puts backlog children back to listening
                if ctl.state == State::Listen {
                    return;
                }
                ctl.state = State::Closed;
                if let TcpEvent::Aborted(cause) = event {
                    ctl.flags.set(Flags::ABORTED, true);
                    ctl.flags.set(Flags::TIMEOUT, cause == AbortCause::Timeout);
                }
                ctl.receiver.wake(Event::Close);
                ctl.sender.wake(Event::Close);
                debug!("socket {:?} closed by engine: {:?}", id, event);
            }
            TcpEvent::Ack => self.table.at_mut(idx).sender.wake(Event::Ack),
        }
    }

    fn established(&mut self, idx: u8) {
        let id = SockId::from_index(idx.into());
        let ctl = self.table.at_mut(idx);
        let state = ctl.state;
        match state {
            State::ConnReq => {
                ctl.state = State::Connected;
                ctl.receiver.wake(Event::Connect);
                ctl.sender.wake(Event::Connect);
                debug!("socket {:?} connected", id);
            }
            State::Listen => {
                ctl.state = State::Connected;
                let Some(parent) = ctl.parent else {
                    return;
                };
                self.table.push_pending(parent, idx);
                self.table.at_mut(parent).receiver.wake(Event::Connect);
                debug!("socket {:?} connection pending", id);
            }
            state => debug!("socket {:?} established in state {:?}", id, state),
        }
    }

    pub fn tcp_data(&mut self, socket: EngineSocket, data: &[u8]) -> Result<(), NoBuffer> {
        let Some(idx) = self.table.find_engine(SockType::Stream, socket) else {
            warn!("data on unknown engine socket {:?}", socket);
            return Ok(());
        };
        let ctl = self.table.at_mut(idx);
        if ctl.state != State::Connected {
            return Ok(());
        }
        ctl.rx
            .append_stream(&mut self.pool, data)
            .map_err(|_| NoBuffer)?;
        ctl.receiver.wake(Event::Data);
        Ok(())
    }

    pub fn udp_data(&mut self, socket: EngineSocket, datagram: &Datagram<'_>) {
        let Some(idx) = self.table.find_engine(SockType::Dgram, socket) else {
            warn!("datagram on unknown engine socket {:?}", socket);
            return;
        };
        let ctl = self.table.at_mut(idx);
        if ctl.state != State::Bound {
            return;
        }
        let source = normalize(datagram.source);
        let accepted = match (ctl.family, source) {
            (Family::Inet, SocketAddr::V4(_)) => true,
            (Family::Inet6, SocketAddr::V6(_)) => true,
            (Family::Inet6, SocketAddr::V4(_)) => !ctl.flags.contains(Flags::V6_ONLY),
            (Family::Inet, SocketAddr::V6(_)) => false,
        };
        if !accepted {
            return;
        }
        if ctl.flags.contains(Flags::FILTER) && ctl.remote != source {
            trace!("datagram filtered out");
            return;
        }
        let destination = ctl
            .flags
            .contains(Flags::RECV_DST)
            .then(|| datagram.destination.to_canonical());
        let pushed = ctl
            .rx
            .push_datagram(&mut self.pool, source, destination, datagram.payload);
        if pushed.is_err() {
            debug!("datagram of {} bytes dropped", datagram.payload.len());
            return;
        }
        ctl.receiver.wake(Event::Data);
    }

    pub fn udp_send_ready(&mut self, socket: EngineSocket) {
        if let Some(idx) = self.table.find_engine(SockType::Dgram, socket) {
            self.table.at_mut(idx).sender.wake(Event::Send);
        }
    }

    /// Housekeeping pass
    pub fn tick(&mut self, engine: &dyn Engine) {
        for idx in 0..SOCKS as u8 {
            let ctl = self.table.at_mut(idx);
            if ctl.is_free() {
                continue;
            }
            ctl.receiver.tick();
            ctl.sender.tick();

            if ctl.ty != SockType::Stream {
                continue;
            }
            let closed = ctl
                .engine
                .is_none_or(|handle| engine.tcp_state(handle) == TcpState::Closed);
            if !closed {
                continue;
            }
            let state = ctl.state;
            match state {
                State::Listen => {
                    if let Err(err) = self.start_listen(engine, idx) {
                        warn!("backlog socket {:?} not listening: {:?}", SockId::from_index(idx.into()), err);
                    }
                }
                State::Closing => {
                    ctl.state = State::Closed;
                    ctl.receiver.wake(Event::Close);
                    ctl.sender.wake(Event::Close);
                }
                _ => {}
            }
        }
    }
}

