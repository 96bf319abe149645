//! Socket stack
//!
//! The stack owns the socket table, the receive frame pool and the protocol engine.
//! A single blocking mutex guards the table and the pool. It is held for the duration of a
//! single step of a socket call or an engine callback and never across an await.
//!
//! ## Examples
//!
//! The stack is typically allocated statically to obtain `'static` handles for spawned tasks:
//! ```ignore
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex as Mutex;
//! use embsd::stack::{Config, Stack};
//! use static_cell::StaticCell;
//!
//! static STACK: StaticCell<Stack<Mutex, MyEngine, 8, 16>> = StaticCell::new();
//! let stack = STACK.init(Stack::new(MyEngine::new(), Config::default()));
//! let (sockets, link) = stack.split();
//! ```

use core::cell::RefCell;
use core::net::{IpAddr, SocketAddr};
use core::task::{Context, Poll};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embsd_driver::engine::{Engine, EngineSocket};
use embsd_driver::internal::DynamicLink;
use embsd_driver::link::{Datagram, NoBuffer, TcpEvent};

use crate::addr::SockAddr;
use crate::buffer::FramePool;
use crate::core::{Family, MsgFlags, SockId, SockType};
use crate::error::Error;
use crate::options::{Ioctl, OptName, SockOpt};
use crate::select::FdSet;
use crate::socket::{Call, DynamicSockets, Received, Sockets};
use crate::table::Table;
use crate::time::Duration;
use crate::wait::{Ticket, TicketCounter};

pub use embsd_driver::link::Link;

/// Runtime settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Period of `Link::tick` calls. Wait timers count in these ticks.
    pub tick_period: Duration,
    /// Receive timeout of new sockets, `None` waits forever
    pub recv_timeout: Option<Duration>,
    /// Send timeout of new sockets, `None` waits forever
    pub send_timeout: Option<Duration>,
    /// Time-to-live of new IPv4 sockets
    pub ttl: u8,
    /// Hop limit of new IPv6 sockets
    pub hop_limit: u8,
}

impl Config {
    /// Converts a timeout into housekeeping ticks, rounding up
    pub(crate) fn ticks(&self, timeout: Duration) -> u32 {
        let period = self.tick_period.as_ticks().max(1);
        let ticks = timeout.as_ticks().div_ceil(period).max(1);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(100),
            recv_timeout: None,
            send_timeout: None,
            ttl: 128,
            hop_limit: 128,
        }
    }
}

/// Lock-protected state
pub(crate) struct Inner<const SOCKS: usize, const FRAMES: usize> {
    pub config: Config,
    pub table: Table<SOCKS>,
    pub pool: FramePool<FRAMES>,
    pub tickets: TicketCounter,
}

impl<const SOCKS: usize, const FRAMES: usize> Inner<SOCKS, FRAMES> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            table: Table::new(),
            pool: FramePool::new(),
            tickets: TicketCounter::new(),
        }
    }
}

/// BSD socket stack
///
/// `SOCKS` is the socket table size, shared by user sockets and backlog children.
/// `FRAMES` is the receive frame pool size.
pub struct Stack<M: RawMutex, E: Engine, const SOCKS: usize, const FRAMES: usize> {
    engine: E,
    inner: Mutex<M, RefCell<Inner<SOCKS, FRAMES>>>,
}

impl<M, E, const SOCKS: usize, const FRAMES: usize> Stack<M, E, SOCKS, FRAMES>
where
    M: RawMutex + Sync,
    E: Engine + Sync,
{
    pub fn new(engine: E, config: Config) -> Self {
        Self {
            engine,
            inner: Mutex::new(RefCell::new(Inner::new(config))),
        }
    }

    /// Returns the application handle and the engine handle.
    pub fn split(&self) -> (Sockets<'_>, Link<'_>) {
        (Sockets::new(self), Link::new(self))
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<SOCKS, FRAMES>, &dyn Engine) -> R) -> R {
        self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();
            f(&mut inner, &self.engine)
        })
    }
}

impl<M, E, const SOCKS: usize, const FRAMES: usize> DynamicSockets for Stack<M, E, SOCKS, FRAMES>
where
    M: RawMutex + Sync,
    E: Engine + Sync,
{
    fn socket(&self, family: Family, ty: SockType, protocol: u8) -> Result<SockId, Error> {
        self.with(|inner, engine| inner.socket(engine, family, ty, protocol))
    }

    fn bind(&self, id: SockId, addr: &SockAddr) -> Result<(), Error> {
        self.with(|inner, engine| inner.bind(engine, id, addr))
    }

    fn listen(&self, id: SockId, backlog: usize) -> Result<(), Error> {
        self.with(|inner, engine| inner.listen(engine, id, backlog))
    }

    fn poll_accept(
        &self,
        cx: &mut Context<'_>,
        id: SockId,
        call: &mut Call,
    ) -> Poll<Result<(SockId, SockAddr), Error>> {
        self.with(|inner, engine| inner.poll_accept(cx, engine, id, call))
    }

    fn poll_connect(
        &self,
        cx: &mut Context<'_>,
        id: SockId,
        addr: &SockAddr,
        call: &mut Call,
    ) -> Poll<Result<(), Error>> {
        self.with(|inner, engine| inner.poll_connect(cx, engine, id, addr, call))
    }

    fn poll_close(
        &self,
        cx: &mut Context<'_>,
        id: SockId,
        call: &mut Call,
    ) -> Poll<Result<(), Error>> {
        self.with(|inner, engine| inner.poll_close(cx, engine, id, call))
    }

    fn poll_send(
        &self,
        cx: &mut Context<'_>,
        id: SockId,
        data: &[u8],
        to: Option<&SockAddr>,
        flags: MsgFlags,
        call: &mut Call,
    ) -> Poll<Result<usize, Error>> {
        self.with(|inner, engine| inner.poll_send(cx, engine, id, data, to, flags, call))
    }

    fn poll_recv(
        &self,
        cx: &mut Context<'_>,
        id: SockId,
        bufs: &mut [&mut [u8]],
        flags: MsgFlags,
        call: &mut Call,
    ) -> Poll<Result<Received, Error>> {
        self.with(|inner, engine| inner.poll_recv(cx, engine, id, bufs, flags, call))
    }

    fn poll_select(
        &self,
        cx: &mut Context<'_>,
        interest: &[FdSet; 3],
        timeout: Option<Duration>,
        call: &mut Call,
    ) -> Poll<Result<[FdSet; 3], Error>> {
        self.with(|inner, engine| inner.poll_select(cx, engine, interest, timeout, call))
    }

    fn setsockopt(&self, id: SockId, opt: SockOpt) -> Result<(), Error> {
        self.with(|inner, engine| inner.setsockopt(engine, id, opt))
    }

    fn getsockopt(&self, id: SockId, name: OptName) -> Result<SockOpt, Error> {
        self.with(|inner, _| inner.getsockopt(id, name))
    }

    fn ioctl(&self, id: SockId, cmd: Ioctl) -> Result<(), Error> {
        self.with(|inner, _| inner.ioctl(id, cmd))
    }

    fn getpeername(&self, id: SockId) -> Result<SockAddr, Error> {
        self.with(|inner, engine| inner.getpeername(engine, id))
    }

    fn getsockname(&self, id: SockId) -> Result<SockAddr, Error> {
        self.with(|inner, engine| inner.getsockname(engine, id))
    }

    fn disarm(&self, ticket: Ticket) {
        self.with(|inner, _| inner.table.disarm(ticket))
    }
}

impl<M, E, const SOCKS: usize, const FRAMES: usize> DynamicLink for Stack<M, E, SOCKS, FRAMES>
where
    M: RawMutex + Sync,
    E: Engine + Sync,
{
    fn tcp_connect_request(&self, socket: EngineSocket, remote: SocketAddr) -> bool {
        self.with(|inner, _| inner.tcp_connect_request(socket, remote))
    }

    fn tcp_event(&self, socket: EngineSocket, event: TcpEvent) {
        self.with(|inner, _| inner.tcp_event(socket, event))
    }

    fn tcp_data(&self, socket: EngineSocket, data: &[u8]) -> Result<(), NoBuffer> {
        self.with(|inner, _| inner.tcp_data(socket, data))
    }

    fn udp_data(&self, socket: EngineSocket, datagram: &Datagram<'_>) {
        self.with(|inner, _| inner.udp_data(socket, datagram))
    }

    fn udp_send_ready(&self, socket: EngineSocket) {
        self.with(|inner, _| inner.udp_send_ready(socket))
    }

    fn tick(&self) {
        self.with(|inner, engine| inner.tick(engine))
    }
}

/// Normalizes IPv4-mapped IPv6 addresses to IPv4
pub(crate) fn normalize(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(ip) => SocketAddr::new(IpAddr::V4(ip), v6.port()),
            None => addr,
        },
        addr => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_round_up() {
        let config = Config::default();
        assert_eq!(config.ticks(Duration::from_millis(200)), 2);
        assert_eq!(config.ticks(Duration::from_millis(201)), 3);
        assert_eq!(config.ticks(Duration::from_millis(1)), 1);
        assert_eq!(config.ticks(Duration::from_ticks(0)), 1);
    }
}
