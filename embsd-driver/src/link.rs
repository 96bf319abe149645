//! Event path from the protocol engine into the socket layer

use core::net::{IpAddr, SocketAddr};

use crate::engine::EngineSocket;
use crate::internal;

/// Cause of an abortive close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortCause {
    /// The peer reset or refused the connection
    Reset,
    /// Retransmissions or connection establishment timed out
    Timeout,
}

/// TCP state change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TcpEvent {
    /// The three-way handshake completed
    Established,
    /// The connection was closed gracefully
    Closed,
    /// The connection was aborted
    Aborted(AbortCause),
    /// Sent data was acknowledged
    Ack,
}

/// Received UDP datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram<'a> {
    pub source: SocketAddr,
    pub destination: IpAddr,
    pub payload: &'a [u8],
}

/// The frame pool cannot hold the data
///
/// A TCP engine should not acknowledge the segment, so that the peer retransmits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NoBuffer;

/// Engine-side handle of a socket stack
///
/// All methods must be called from the network core context, one at a time.
/// `tick` should be called periodically with the period configured in the stack.
#[derive(Clone, Copy)]
pub struct Link<'a>(&'a (dyn internal::DynamicLink + Sync));

impl<'a> Link<'a> {
    pub fn new(access: &'a (dyn internal::DynamicLink + Sync)) -> Self {
        Self(access)
    }

    /// Reports an incoming connection on a listening socket.
    ///
    /// Returns `true` if the engine should proceed with the handshake, `false` to refuse.
    pub fn tcp_connect_request(&self, socket: EngineSocket, remote: SocketAddr) -> bool {
        self.0.tcp_connect_request(socket, remote)
    }

    pub fn tcp_event(&self, socket: EngineSocket, event: TcpEvent) {
        self.0.tcp_event(socket, event)
    }

    /// Delivers in-order stream data.
    pub fn tcp_data(&self, socket: EngineSocket, data: &[u8]) -> Result<(), NoBuffer> {
        self.0.tcp_data(socket, data)
    }

    /// Delivers a datagram. Datagrams that cannot be queued are dropped.
    pub fn udp_data(&self, socket: EngineSocket, datagram: &Datagram<'_>) {
        self.0.udp_data(socket, datagram)
    }

    /// Reports that a previously failed transmission may now succeed.
    pub fn udp_send_ready(&self, socket: EngineSocket) {
        self.0.udp_send_ready(socket)
    }

    /// Runs periodic housekeeping.
    pub fn tick(&self) {
        self.0.tick()
    }
}
