#![allow(dead_code)]

use core::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embsd::addr::SockAddr;
use embsd::socket::Sockets;
use embsd::stack::{Config, Link, Stack};
use embsd_driver::engine::{
    EngineError, EngineSocket, TcpEngine, TcpParams, TcpState, UdpEngine, UdpParams,
};
use std::boxed::Box;
use std::sync::Mutex;
use std::vec::Vec;

pub const TCP_SOCKETS: usize = 12;
pub const UDP_SOCKETS: usize = 8;
pub const FIRST_EPHEMERAL: u16 = 49152;
pub const UDP_MTU: usize = 1472;
pub const MSS: usize = 536;
pub const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);

pub type TestStack = Stack<CriticalSectionRawMutex, MockEngine, 8, 16>;

pub struct MockTcp {
    pub allocated: bool,
    pub state: TcpState,
    pub port: u16,
    pub remote: Option<SocketAddr>,
    pub params: Option<TcpParams>,
    pub window_open: bool,
    pub sent: Vec<u8>,
    pub window_resets: usize,
}

impl MockTcp {
    fn new() -> Self {
        Self {
            allocated: false,
            state: TcpState::Closed,
            port: 0,
            remote: None,
            params: None,
            window_open: true,
            sent: Vec::new(),
            window_resets: 0,
        }
    }
}

pub struct MockUdp {
    pub allocated: bool,
    pub port: Option<u16>,
    pub params: Option<UdpParams>,
    pub sent: Vec<(SocketAddr, Vec<u8>)>,
    /// Number of upcoming sends to refuse
    pub refuse: usize,
}

impl MockUdp {
    fn new() -> Self {
        Self {
            allocated: false,
            port: None,
            params: None,
            sent: Vec::new(),
            refuse: 0,
        }
    }
}

pub struct MockState {
    pub tcp: Vec<MockTcp>,
    pub udp: Vec<MockUdp>,
    pub next_port: u16,
    /// TCP sockets the engine may still hand out
    pub tcp_budget: usize,
    /// Graceful close completes inside `tcp_close`
    pub close_immediately: bool,
}

/// Protocol engine double that records every request
pub struct MockEngine {
    pub state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                tcp: (0..TCP_SOCKETS).map(|_| MockTcp::new()).collect(),
                udp: (0..UDP_SOCKETS).map(|_| MockUdp::new()).collect(),
                next_port: FIRST_EPHEMERAL,
                tcp_budget: TCP_SOCKETS,
                close_immediately: true,
            }),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Engine sockets listening on the port, in allocation order
    pub fn listening(&self, port: u16) -> Vec<EngineSocket> {
        self.with(|state| {
            state
                .tcp
                .iter()
                .enumerate()
                .filter(|(_, tcp)| tcp.allocated && tcp.state == TcpState::Listen && tcp.port == port)
                .map(|(i, _)| EngineSocket::new(i as u8))
                .collect()
        })
    }

    /// Engine sockets in the state, in index order
    pub fn tcp_all_in_state(&self, tcp_state: TcpState) -> Vec<EngineSocket> {
        self.with(|state| {
            state
                .tcp
                .iter()
                .enumerate()
                .filter(|(_, tcp)| tcp.allocated && tcp.state == tcp_state)
                .map(|(i, _)| EngineSocket::new(i as u8))
                .collect()
        })
    }

    /// The single engine socket in the state
    pub fn tcp_in_state(&self, tcp_state: TcpState) -> EngineSocket {
        let found = self.tcp_all_in_state(tcp_state);
        assert_eq!(found.len(), 1, "expected one socket in {:?}", tcp_state);
        found[0]
    }

    pub fn set_tcp_state(&self, socket: EngineSocket, tcp_state: TcpState) {
        self.with(|state| state.tcp[usize::from(socket.into_u8())].state = tcp_state);
    }

    pub fn tcp_sent(&self, socket: EngineSocket) -> Vec<u8> {
        self.with(|state| state.tcp[usize::from(socket.into_u8())].sent.clone())
    }

    pub fn tcp_allocated(&self) -> usize {
        self.with(|state| state.tcp.iter().filter(|tcp| tcp.allocated).count())
    }

    /// The engine socket open on the UDP port
    pub fn udp_on_port(&self, port: u16) -> EngineSocket {
        self.with(|state| {
            let idx = state
                .udp
                .iter()
                .position(|udp| udp.allocated && udp.port == Some(port))
                .unwrap();
            EngineSocket::new(idx as u8)
        })
    }

    pub fn tcp_params(&self, socket: EngineSocket) -> Option<TcpParams> {
        self.with(|state| state.tcp[usize::from(socket.into_u8())].params)
    }

    pub fn udp_params(&self, socket: EngineSocket) -> Option<UdpParams> {
        self.with(|state| state.udp[usize::from(socket.into_u8())].params)
    }

    pub fn udp_sent(&self, socket: EngineSocket) -> Vec<(SocketAddr, Vec<u8>)> {
        self.with(|state| state.udp[usize::from(socket.into_u8())].sent.clone())
    }

    fn tcp<R>(&self, socket: EngineSocket, f: impl FnOnce(&mut MockTcp) -> R) -> R {
        self.with(|state| f(&mut state.tcp[usize::from(socket.into_u8())]))
    }

    fn udp<R>(&self, socket: EngineSocket, f: impl FnOnce(&mut MockUdp) -> R) -> R {
        self.with(|state| f(&mut state.udp[usize::from(socket.into_u8())]))
    }

    fn next_port(&self) -> u16 {
        self.with(|state| {
            let port = state.next_port;
            state.next_port += 1;
            port
        })
    }
}

impl TcpEngine for MockEngine {
    fn tcp_get_socket(&self) -> Option<EngineSocket> {
        self.with(|state| {
            if state.tcp.iter().filter(|tcp| tcp.allocated).count() >= state.tcp_budget {
                return None;
            }
            let idx = state.tcp.iter().position(|tcp| !tcp.allocated)?;
            state.tcp[idx] = MockTcp::new();
            state.tcp[idx].allocated = true;
            Some(EngineSocket::new(idx as u8))
        })
    }

    fn tcp_release(&self, socket: EngineSocket) {
        self.tcp(socket, |tcp| {
            assert!(tcp.allocated, "double release");
            tcp.allocated = false;
        });
    }

    fn tcp_configure(&self, socket: EngineSocket, params: &TcpParams) {
        self.tcp(socket, |tcp| tcp.params = Some(*params));
    }

    fn tcp_listen(&self, socket: EngineSocket, port: u16) -> Result<(), EngineError> {
        self.tcp(socket, |tcp| {
            tcp.port = port;
            tcp.state = TcpState::Listen;
        });
        Ok(())
    }

    fn tcp_connect(
        &self,
        socket: EngineSocket,
        remote: SocketAddr,
        local_port: u16,
    ) -> Result<(), EngineError> {
        self.tcp(socket, |tcp| {
            tcp.port = local_port;
            tcp.remote = Some(remote);
            tcp.state = TcpState::SynSent;
        });
        Ok(())
    }

    fn tcp_close(&self, socket: EngineSocket) -> Result<(), EngineError> {
        let immediately = self.with(|state| state.close_immediately);
        self.tcp(socket, |tcp| {
            tcp.state = if immediately {
                TcpState::Closed
            } else {
                TcpState::FinWait1
            };
        });
        Ok(())
    }

    fn tcp_abort(&self, socket: EngineSocket) {
        self.tcp(socket, |tcp| tcp.state = TcpState::Closed);
    }

    fn tcp_state(&self, socket: EngineSocket) -> TcpState {
        self.tcp(socket, |tcp| tcp.state)
    }

    fn tcp_check_send(&self, socket: EngineSocket) -> bool {
        self.tcp(socket, |tcp| tcp.window_open && tcp.state == TcpState::Established)
    }

    fn tcp_mss(&self, _socket: EngineSocket) -> usize {
        MSS
    }

    fn tcp_send(&self, socket: EngineSocket, data: &[u8]) -> Result<(), EngineError> {
        self.tcp(socket, |tcp| {
            assert!(data.len() <= MSS);
            tcp.sent.extend_from_slice(data);
        });
        Ok(())
    }

    fn tcp_reset_window(&self, socket: EngineSocket) {
        self.tcp(socket, |tcp| tcp.window_resets += 1);
    }

    fn tcp_local_addr(&self, socket: EngineSocket) -> Option<SocketAddr> {
        self.tcp(socket, |tcp| {
            Some(SocketAddr::V4(SocketAddrV4::new(LOCAL_IP, tcp.port)))
        })
    }

    fn tcp_peer_addr(&self, socket: EngineSocket) -> Option<SocketAddr> {
        self.tcp(socket, |tcp| tcp.remote)
    }

    fn tcp_ephemeral_port(&self) -> u16 {
        self.next_port()
    }
}

impl UdpEngine for MockEngine {
    fn udp_get_socket(&self) -> Option<EngineSocket> {
        self.with(|state| {
            let idx = state.udp.iter().position(|udp| !udp.allocated)?;
            state.udp[idx] = MockUdp::new();
            state.udp[idx].allocated = true;
            Some(EngineSocket::new(idx as u8))
        })
    }

    fn udp_release(&self, socket: EngineSocket) {
        self.udp(socket, |udp| {
            assert!(udp.allocated, "double release");
            udp.allocated = false;
        });
    }

    fn udp_open(
        &self,
        socket: EngineSocket,
        port: u16,
        params: &UdpParams,
    ) -> Result<(), EngineError> {
        self.udp(socket, |udp| {
            udp.port = Some(port);
            udp.params = Some(*params);
        });
        Ok(())
    }

    fn udp_configure(&self, socket: EngineSocket, params: &UdpParams) {
        self.udp(socket, |udp| {
            assert!(udp.port.is_some(), "configure before open");
            udp.params = Some(*params);
        });
    }

    fn udp_close(&self, socket: EngineSocket) {
        self.udp(socket, |udp| udp.port = None);
    }

    fn udp_mtu(&self, _socket: EngineSocket, _ipv6: bool) -> usize {
        UDP_MTU
    }

    fn udp_send(
        &self,
        socket: EngineSocket,
        destination: SocketAddr,
        data: &[u8],
    ) -> Result<(), EngineError> {
        self.udp(socket, |udp| {
            if udp.refuse > 0 {
                udp.refuse -= 1;
                return Err(EngineError::NoMemory);
            }
            udp.sent.push((destination, data.to_vec()));
            Ok(())
        })
    }

    fn udp_ephemeral_port(&self) -> u16 {
        self.next_port()
    }
}

/// Leaks a stack with the mock engine and returns it with both handles.
pub fn setup() -> (&'static TestStack, Sockets<'static>, Link<'static>) {
    let stack: &'static TestStack = Box::leak(Box::new(Stack::new(MockEngine::new(), Config::default())));
    let (sockets, link) = stack.split();
    (stack, sockets, link)
}

/// Leaks a cell for the result of a spawned call.
pub fn outcome<T>() -> &'static Mutex<Option<T>> {
    Box::leak(Box::new(Mutex::new(None)))
}

pub fn v4(a: u8, b: u8, c: u8, d: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), port)
}

pub fn sock_addr(addr: SocketAddr) -> SockAddr {
    SockAddr::from(addr)
}

pub fn any_port(port: u16) -> SockAddr {
    SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
}
