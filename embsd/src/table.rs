//! Socket table
//!
//! A fixed arena of control blocks. Descriptors are 1-based indices. Backlog children of a
//! listening parent are linked by index in arrival order.

use core::net::SocketAddr;
use embsd_driver::engine::{EngineSocket, TcpParams, UdpParams};

use crate::addr;
use crate::buffer::Chain;
use crate::core::{Family, SockId, SockType};
use crate::error::Error;
use crate::time::Duration;
use crate::wait::{SlotKind, Ticket, WaitSlot};

/// Control block state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum State {
    Free,
    Created,
    Bound,
    /// Backlog child waiting for an incoming connection
    Listen,
    /// Active open in progress
    ConnReq,
    Connected,
    /// Graceful close in progress
    Closing,
    /// Connection closed or aborted by the engine
    Closed,
    /// Listening parent. Owns no engine socket.
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct Flags(u16);

impl Flags {
    pub const NONE: Self = Self(0);
    pub const NON_BLOCKING: Self = Self(1 << 0);
    pub const V6_ONLY: Self = Self(1 << 1);
    /// Datagram peer filter is set
    pub const FILTER: Self = Self(1 << 2);
    /// The last connection attempt or connection failed by timeout
    pub const TIMEOUT: Self = Self(1 << 3);
    pub const DELAY_ACK: Self = Self(1 << 4);
    pub const KEEP_ALIVE: Self = Self(1 << 5);
    pub const FLOW_CONTROL: Self = Self(1 << 6);
    /// Capture destination addresses of received datagrams
    pub const RECV_DST: Self = Self(1 << 7);
    /// Backlog child handed out by accept
    pub const ACCEPTED: Self = Self(1 << 8);
    /// The connection was reset rather than closed gracefully
    pub const ABORTED: Self = Self(1 << 9);

    /// Settings a child inherits from its listening parent
    pub const INHERITED: Self = Self(
        Self::NON_BLOCKING.0 | Self::DELAY_ACK.0 | Self::KEEP_ALIVE.0 | Self::FLOW_CONTROL.0,
    );

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Socket control block
pub(crate) struct Control {
    pub state: State,
    pub ty: SockType,
    pub family: Family,
    pub flags: Flags,
    pub local: SocketAddr,
    /// Connected peer, or the datagram peer filter
    pub remote: SocketAddr,
    pub engine: Option<EngineSocket>,
    /// Listening parent of a backlog child
    pub parent: Option<u8>,
    /// Next pending child in the parent's accept chain
    pub accept_next: Option<u8>,
    /// Head and tail of the accept chain of a server
    pub accept_head: Option<u8>,
    pub accept_tail: Option<u8>,
    pub rx: Chain,
    pub recv_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
    /// IPv4 type of service or IPv6 traffic class
    pub tos: u8,
    pub ttl: u8,
    pub hop_limit: u8,
    pub receiver: WaitSlot,
    pub sender: WaitSlot,
}

impl Control {
    pub const fn new() -> Self {
        Self {
            state: State::Free,
            ty: SockType::Stream,
            family: Family::Inet,
            flags: Flags::NONE,
            local: addr::unspecified(Family::Inet),
            remote: addr::unspecified(Family::Inet),
            engine: None,
            parent: None,
            accept_next: None,
            accept_head: None,
            accept_tail: None,
            rx: Chain::new(),
            recv_timeout: None,
            send_timeout: None,
            tos: 0,
            ttl: 0,
            hop_limit: 0,
            receiver: WaitSlot::new(),
            sender: WaitSlot::new(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == State::Free
    }

    pub fn non_blocking(&self) -> bool {
        self.flags.contains(Flags::NON_BLOCKING)
    }

    pub fn slot(&self, kind: SlotKind) -> &WaitSlot {
        match kind {
            SlotKind::Receiver => &self.receiver,
            SlotKind::Sender => &self.sender,
        }
    }

    pub fn slot_mut(&mut self, kind: SlotKind) -> &mut WaitSlot {
        match kind {
            SlotKind::Receiver => &mut self.receiver,
            SlotKind::Sender => &mut self.sender,
        }
    }

    /// Wakes both waiters with `Kill` and vacates the slots.
    pub fn kill_waiters(&mut self) {
        self.receiver.kill();
        self.sender.kill();
    }

    /// Time-to-live or hop limit for the socket family
    pub fn hops(&self) -> u8 {
        match self.family {
            Family::Inet => self.ttl,
            Family::Inet6 => self.hop_limit,
        }
    }

    pub fn udp_params(&self) -> UdpParams {
        UdpParams {
            tos: self.tos,
            ttl: self.hops(),
        }
    }

    pub fn tcp_params(&self) -> TcpParams {
        TcpParams {
            tos: self.tos,
            ttl: self.hops(),
            keep_alive: self.flags.contains(Flags::KEEP_ALIVE),
            delay_ack: self.flags.contains(Flags::DELAY_ACK),
            flow_control: self.flags.contains(Flags::FLOW_CONTROL),
        }
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct Table<const N: usize> {
    blocks: [Control; N],
}

impl<const N: usize> Table<N> {
    const _ASSERT: usize = SockId::MAX_VALUE as usize - N;

    pub fn new() -> Self {
        let _ = Self::_ASSERT;
        Self {
            blocks: core::array::from_fn(|_| Control::new()),
        }
    }

    /// Lowest free slot index
    pub fn find_free(&self) -> Option<usize> {
        self.blocks.iter().position(Control::is_free)
    }

    pub fn free_count(&self) -> usize {
        self.blocks.iter().filter(|ctl| ctl.is_free()).count()
    }

    /// Looks up an allocated control block
    pub fn get(&self, id: SockId) -> Result<&Control, Error> {
        match self.blocks.get(id.index()) {
            Some(ctl) if !ctl.is_free() => Ok(ctl),
            _ => Err(Error::NoSocket),
        }
    }

    pub fn get_mut(&mut self, id: SockId) -> Result<&mut Control, Error> {
        match self.blocks.get_mut(id.index()) {
            Some(ctl) if !ctl.is_free() => Ok(ctl),
            _ => Err(Error::NoSocket),
        }
    }

    /// Looks up a slot regardless of its state
    pub fn slot_mut(&mut self, id: SockId) -> Option<&mut Control> {
        self.blocks.get_mut(id.index())
    }

    pub fn at(&self, idx: u8) -> &Control {
        &self.blocks[usize::from(idx)]
    }

    pub fn at_mut(&mut self, idx: u8) -> &mut Control {
        &mut self.blocks[usize::from(idx)]
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &Control)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, ctl)| (i as u8, ctl))
    }

    /// Finds the control block owning the engine socket
    pub fn find_engine(&self, ty: SockType, socket: EngineSocket) -> Option<u8> {
        self.iter()
            .find(|(_, ctl)| !ctl.is_free() && ctl.ty == ty && ctl.engine == Some(socket))
            .map(|(idx, _)| idx)
    }

    /// Checks whether a bound socket of the type uses the local port
    pub fn port_in_use(&self, ty: SockType, port: u16) -> bool {
        self.blocks.iter().any(|ctl| {
            ctl.ty == ty
                && ctl.local.port() == port
                && !matches!(ctl.state, State::Free | State::Created)
        })
    }

    /// Vacates every slot armed with the ticket.
    pub fn disarm(&mut self, ticket: Ticket) {
        for ctl in self.blocks.iter_mut() {
            ctl.receiver.disarm(ticket);
            ctl.sender.disarm(ticket);
        }
    }

    /// Appends a connected child to the accept chain of its parent.
    pub fn push_pending(&mut self, parent: u8, child: u8) {
        self.at_mut(child).accept_next = None;
        match self.at(parent).accept_tail {
            Some(tail) => self.at_mut(tail).accept_next = Some(child),
            None => self.at_mut(parent).accept_head = Some(child),
        }
        self.at_mut(parent).accept_tail = Some(child);
    }

    /// Removes the oldest pending child of the parent.
    pub fn pop_pending(&mut self, parent: u8) -> Option<u8> {
        let head = self.at(parent).accept_head?;
        let next = self.at(head).accept_next;
        let server = self.at_mut(parent);
        server.accept_head = next;
        if next.is_none() {
            server.accept_tail = None;
        }
        self.at_mut(head).accept_next = None;
        Some(head)
    }

    /// Removes the child from the parent's accept chain, if present.
    pub fn unlink_pending(&mut self, parent: u8, child: u8) {
        let mut prev: Option<u8> = None;
        let mut cursor = self.at(parent).accept_head;
        while let Some(idx) = cursor {
            let next = self.at(idx).accept_next;
            if idx == child {
                match prev {
                    Some(prev) => self.at_mut(prev).accept_next = next,
                    None => self.at_mut(parent).accept_head = next,
                }
                if self.at(parent).accept_tail == Some(child) {
                    self.at_mut(parent).accept_tail = prev;
                }
                self.at_mut(child).accept_next = None;
                return;
            }
            prev = Some(idx);
            cursor = next;
        }
    }

    pub fn has_pending(&self, parent: u8) -> bool {
        self.at(parent).accept_head.is_some()
    }
}
