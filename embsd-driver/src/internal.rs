/// Private interfaces for the embsd socket stack
///
/// Engines should not use this module.
/// Backward-incompatible changes can be made without major version bump.
use core::net::SocketAddr;

use crate::engine::EngineSocket;
use crate::link::{Datagram, NoBuffer, TcpEvent};

pub trait DynamicLink {
    fn tcp_connect_request(&self, socket: EngineSocket, remote: SocketAddr) -> bool;
    fn tcp_event(&self, socket: EngineSocket, event: TcpEvent);
    fn tcp_data(&self, socket: EngineSocket, data: &[u8]) -> Result<(), NoBuffer>;
    fn udp_data(&self, socket: EngineSocket, datagram: &Datagram<'_>);
    fn udp_send_ready(&self, socket: EngineSocket);
    fn tick(&self);
}
