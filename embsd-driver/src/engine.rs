//! Protocol engine services consumed by the socket layer

use core::net::SocketAddr;

/// Engine socket handle
///
/// A handle is exclusively owned by one BSD socket at a time. The socket layer returns it
/// through `tcp_release` / `udp_release` before it may be handed out again.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineSocket(u8);

impl EngineSocket {
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineError {
    /// The engine is out of buffers or control blocks
    NoMemory,
    /// The request cannot be served right now, e.g. the destination address is being resolved
    Busy,
    /// The engine socket is not in a state that allows the request
    InvalidState,
    /// Any other engine failure
    Failed,
}

/// TCP connection state as reported by the engine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TcpState {
    /// No connection, the socket can be reused
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    CloseWait,
    LastAck,
    TimeWait,
}

/// Per-connection settings applied before listen or connect
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TcpParams {
    pub tos: u8,
    pub ttl: u8,
    pub keep_alive: bool,
    pub delay_ack: bool,
    /// The application reopens the receive window explicitly with `tcp_reset_window`
    pub flow_control: bool,
}

/// Per-association settings applied when the UDP port is opened and on later changes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UdpParams {
    pub tos: u8,
    pub ttl: u8,
}

pub trait TcpEngine {
    /// Allocates a TCP socket. Returns `None` when the engine has no free sockets.
    fn tcp_get_socket(&self) -> Option<EngineSocket>;
    /// Returns the socket to the engine. The connection must be closed or aborted.
    fn tcp_release(&self, socket: EngineSocket);
    fn tcp_configure(&self, socket: EngineSocket, params: &TcpParams);
    /// Starts passive open on the local port
    fn tcp_listen(&self, socket: EngineSocket, port: u16) -> Result<(), EngineError>;
    /// Starts active open from the local port to the remote address
    fn tcp_connect(
        &self,
        socket: EngineSocket,
        remote: SocketAddr,
        local_port: u16,
    ) -> Result<(), EngineError>;
    /// Starts graceful close
    fn tcp_close(&self, socket: EngineSocket) -> Result<(), EngineError>;
    /// Resets the connection immediately. The socket state becomes `Closed`.
    fn tcp_abort(&self, socket: EngineSocket);
    fn tcp_state(&self, socket: EngineSocket) -> TcpState;
    /// Checks whether the engine can accept more data for transmission
    fn tcp_check_send(&self, socket: EngineSocket) -> bool;
    /// Largest chunk accepted by a single `tcp_send`
    fn tcp_mss(&self, socket: EngineSocket) -> usize;
    /// Queues data for transmission. `data` is never longer than `tcp_mss`.
    fn tcp_send(&self, socket: EngineSocket, data: &[u8]) -> Result<(), EngineError>;
    /// Reopens the receive window in flow-control mode
    fn tcp_reset_window(&self, socket: EngineSocket);
    fn tcp_local_addr(&self, socket: EngineSocket) -> Option<SocketAddr>;
    fn tcp_peer_addr(&self, socket: EngineSocket) -> Option<SocketAddr>;
    /// Returns a nonzero ephemeral port. The socket layer resolves collisions.
    fn tcp_ephemeral_port(&self) -> u16;
}

pub trait UdpEngine {
    /// Allocates a UDP socket. Returns `None` when the engine has no free sockets.
    fn udp_get_socket(&self) -> Option<EngineSocket>;
    fn udp_release(&self, socket: EngineSocket);
    fn udp_open(
        &self,
        socket: EngineSocket,
        port: u16,
        params: &UdpParams,
    ) -> Result<(), EngineError>;
    /// Updates the settings of an open association
    fn udp_configure(&self, socket: EngineSocket, params: &UdpParams);
    fn udp_close(&self, socket: EngineSocket);
    /// Largest datagram payload for the destination family
    fn udp_mtu(&self, socket: EngineSocket, ipv6: bool) -> usize;
    /// Transmits a datagram. `Busy` indicates a transient condition worth a retry.
    fn udp_send(
        &self,
        socket: EngineSocket,
        destination: SocketAddr,
        data: &[u8],
    ) -> Result<(), EngineError>;
    /// Returns a nonzero ephemeral port. The socket layer resolves collisions.
    fn udp_ephemeral_port(&self) -> u16;
}

/// Full protocol engine
pub trait Engine: TcpEngine + UdpEngine {}

impl<T: TcpEngine + UdpEngine> Engine for T {}
